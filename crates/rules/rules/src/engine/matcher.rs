use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use ruleweave_facts::{Fact, FactId, FactSource};
use tracing::{trace, warn};

use crate::engine::agenda::Activation;
use crate::engine::eval::{Scope, eval_test};
use crate::engine::functions::FunctionRegistry;
use crate::engine::plan::Slot;
use crate::engine::ruleset::RuleSet;
use crate::error::RuleError;
use crate::ir::condition::Test;
use crate::ir::rule::Rule;

/// Joins rules against one frozen view of the facts.
pub(crate) struct Matcher<'a> {
    rules: &'a RuleSet,
    facts: &'a dyn FactSource,
    functions: &'a FunctionRegistry,
    strict: bool,
}

type Bound<'a> = Vec<(&'a str, &'a Fact)>;

impl<'a> Matcher<'a> {
    pub(crate) fn new(
        rules: &'a RuleSet,
        facts: &'a dyn FactSource,
        functions: &'a FunctionRegistry,
        strict: bool,
    ) -> Self {
        Self {
            rules,
            facts,
            functions,
            strict,
        }
    }

    /// Activations of the rules in `range`, in rule order.
    pub(crate) fn match_range(&self, range: Range<usize>) -> Result<Vec<Activation>, RuleError> {
        let mut out = Vec::new();
        for index in range {
            out.extend(self.match_rule(index)?);
        }
        Ok(out)
    }

    fn match_rule(&self, index: usize) -> Result<Vec<Activation>, RuleError> {
        let rule = &self.rules.rules()[index];
        let mut found = Vec::new();
        for branch in &self.rules.plan(index).branches {
            if !self.holds(rule, &branch.ground, &[])? {
                continue;
            }
            let mut bound = Vec::with_capacity(branch.slots.len());
            self.join(rule, &branch.slots, &mut bound, &mut found)?;
        }

        // Branches of a disjunction can produce the same bindings.
        let mut seen = BTreeSet::new();
        let activations: Vec<Activation> = found
            .into_iter()
            .filter(|bindings| seen.insert(bindings.clone()))
            .map(|bindings| {
                let stamps = bindings
                    .values()
                    .map(|id| self.facts.stamp(id).unwrap_or_default())
                    .collect();
                Activation::new(index, rule.salience, bindings, stamps)
            })
            .collect();
        trace!(rule = %rule.name, activations = activations.len(), "rule matched");
        Ok(activations)
    }

    fn join(
        &self,
        rule: &Rule,
        slots: &'a [Slot],
        bound: &mut Bound<'a>,
        found: &mut Vec<BTreeMap<String, FactId>>,
    ) -> Result<(), RuleError> {
        let Some((slot, rest)) = slots.split_first() else {
            found.push(
                bound
                    .iter()
                    .map(|(name, fact)| ((*name).to_owned(), fact.id().clone()))
                    .collect(),
            );
            return Ok(());
        };
        for fact in self.facts.candidates(slot.fact_type.as_deref()) {
            bound.push((slot.binding.as_str(), fact));
            let result = if self.holds(rule, &slot.tests, bound)? {
                self.join(rule, rest, bound, found)
            } else {
                Ok(())
            };
            bound.pop();
            result?;
        }
        Ok(())
    }

    fn holds(&self, rule: &Rule, tests: &[Test], bound: &[(&str, &Fact)]) -> Result<bool, RuleError> {
        let scope = Scope {
            facts: self.facts,
            bound,
            functions: self.functions,
        };
        for test in tests {
            match eval_test(test, &scope) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(err) if self.strict => return Err(err),
                Err(err) => {
                    warn!(
                        rule = %rule.name,
                        test = %test.to_source(),
                        error = %err,
                        "test failed to evaluate, treating as no match"
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use ruleweave_facts::FactStore;

    use super::*;
    use crate::ir::condition::{CompareOp, Condition};
    use crate::ir::expr::Expr;

    fn cmp(binding: &str, attribute: &str, op: CompareOp, operand: Expr) -> Condition {
        Condition::Test(Test::compare(binding, attribute, op, operand))
    }

    fn run(rules: Vec<Rule>, store: &FactStore, strict: bool) -> Result<Vec<Activation>, RuleError> {
        let set = RuleSet::new(rules).unwrap();
        let functions = FunctionRegistry::new();
        let snapshot = store.snapshot();
        Matcher::new(&set, &snapshot, &functions, strict).match_range(0..set.len())
    }

    fn patients() -> FactStore {
        let mut store = FactStore::new();
        store.assert(Fact::new("Patient").with_id("p1").with("age", 30));
        store.assert(Fact::new("Patient").with_id("p2").with("age", 50));
        store.assert(Fact::new("Ward").with_id("w1"));
        store
    }

    #[test]
    fn typed_binding_restricts_candidates() {
        let rule = Rule::new("all").with_binding("p", "Patient");
        let activations = run(vec![rule], &patients(), false).unwrap();
        assert_eq!(activations.len(), 2);
    }

    #[test]
    fn cross_fact_join() {
        let rule = Rule::new("older")
            .with_binding("p", "Patient")
            .with_binding("q", "Patient")
            .when(cmp("p", "age", CompareOp::Gt, Expr::attr("q", "age")));
        let activations = run(vec![rule], &patients(), false).unwrap();
        assert_eq!(activations.len(), 1);
        let bound: Vec<_> = activations[0].fact_ids().map(FactId::as_str).collect();
        assert_eq!(bound, vec!["p2", "p1"]);
    }

    #[test]
    fn two_bindings_may_share_a_fact() {
        let rule = Rule::new("pair")
            .with_binding("p", "Patient")
            .with_binding("q", "Patient");
        let activations = run(vec![rule], &patients(), false).unwrap();
        assert_eq!(activations.len(), 4);
    }

    #[test]
    fn disjunction_branches_are_merged() {
        let rule = Rule::new("either")
            .with_binding("p", "Patient")
            .when(Condition::Any(vec![
                cmp("p", "age", CompareOp::Gt, Expr::Int(20)),
                cmp("p", "age", CompareOp::Gt, Expr::Int(40)),
            ]));
        let activations = run(vec![rule], &patients(), false).unwrap();
        assert_eq!(activations.len(), 2);
    }

    #[test]
    fn rule_without_conditions_matches_once() {
        let activations = run(vec![Rule::new("always")], &FactStore::new(), false).unwrap();
        assert_eq!(activations.len(), 1);
        assert!(activations[0].bindings.is_empty());
    }

    #[test]
    fn evaluation_errors_depend_on_strictness() {
        let rule = Rule::new("bad")
            .with_binding("p", "Patient")
            .when(cmp("p", "age", CompareOp::Lt, Expr::Bool(true)));
        assert!(run(vec![rule.clone()], &patients(), false).unwrap().is_empty());
        assert!(matches!(
            run(vec![rule], &patients(), true),
            Err(RuleError::TypeError(_))
        ));
    }

    #[test]
    fn stamps_follow_binding_names() {
        let mut store = patients();
        store.modify(&"p1".into(), "age", 31).unwrap();
        let rule = Rule::new("pair")
            .with_binding("a", "Patient")
            .with_binding("b", "Ward")
            .when(cmp("a", "age", CompareOp::Eq, Expr::Int(31)));
        let activations = run(vec![rule], &store, false).unwrap();
        assert_eq!(activations.len(), 1);
        assert_eq!(activations[0].stamps, vec![4, 3]);
        assert_eq!(activations[0].recency(), &[4, 3]);
    }
}
