//! Join plans: the order in which a rule's bindings are bound and the point
//! at which each test becomes evaluable.

use crate::ir::condition::Test;
use crate::ir::rule::Rule;

/// One binding position in a join.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Slot {
    pub binding: String,
    pub fact_type: Option<String>,
    /// Tests whose bindings are all bound once this slot is.
    pub tests: Vec<Test>,
}

/// A conjunctive branch of a rule's condition, ready to join.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BranchPlan {
    /// Tests that mention no binding at all.
    pub ground: Vec<Test>,
    pub slots: Vec<Slot>,
}

/// Every disjunctive branch of one rule.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RulePlan {
    pub branches: Vec<BranchPlan>,
}

impl RulePlan {
    pub(crate) fn compile(rule: &Rule) -> Self {
        let branches = rule
            .condition
            .branches()
            .iter()
            .map(|tests| BranchPlan::compile(rule, tests))
            .collect();
        Self { branches }
    }
}

impl BranchPlan {
    fn compile(rule: &Rule, tests: &[&Test]) -> Self {
        // Bindings in order of first use, the tested binding of a
        // comparison ahead of the ones its operand reads.
        let mut order: Vec<&str> = Vec::new();
        for test in tests {
            if let Test::Compare { binding, .. } = test
                && !order.contains(&binding.as_str())
            {
                order.push(binding);
            }
            for name in test.bindings() {
                if !order.contains(&name) {
                    order.push(name);
                }
            }
        }
        for name in rule.bindings.keys() {
            if !order.contains(&name.as_str()) {
                order.push(name);
            }
        }

        let mut slots: Vec<Slot> = order
            .iter()
            .map(|name| Slot {
                binding: (*name).to_owned(),
                fact_type: rule.bindings.get(*name).cloned().flatten(),
                tests: Vec::new(),
            })
            .collect();
        let mut ground = Vec::new();
        for test in tests {
            let anchor = test
                .bindings()
                .iter()
                .filter_map(|name| order.iter().position(|o| o == name))
                .max();
            match anchor {
                Some(index) => slots[index].tests.push((*test).clone()),
                None => ground.push((*test).clone()),
            }
        }
        Self { ground, slots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::condition::{CompareOp, Condition};
    use crate::ir::expr::Expr;

    #[test]
    fn tests_anchor_at_last_needed_slot() {
        let rule = Rule::new("older")
            .with_binding("p", "Patient")
            .with_binding("q", "Patient")
            .with_binding("z", "Ward")
            .when(Condition::Test(Test::compare(
                "p",
                "age",
                CompareOp::Gt,
                Expr::attr("q", "age"),
            )))
            .when(Condition::Test(Test::compare(
                "p",
                "age",
                CompareOp::Ge,
                Expr::Int(18),
            )));
        let plan = RulePlan::compile(&rule);
        assert_eq!(plan.branches.len(), 1);
        let branch = &plan.branches[0];
        let order: Vec<_> = branch.slots.iter().map(|s| s.binding.as_str()).collect();
        assert_eq!(order, vec!["p", "q", "z"]);
        assert_eq!(branch.slots[0].tests.len(), 1);
        assert_eq!(branch.slots[1].tests.len(), 1);
        assert!(branch.slots[2].tests.is_empty());
        assert_eq!(branch.slots[2].fact_type.as_deref(), Some("Ward"));
    }

    #[test]
    fn binding_free_tests_are_ground() {
        let rule = Rule::new("flag").when(Condition::Test(Test::Predicate {
            function: "enabled".into(),
            args: vec![],
        }));
        let plan = RulePlan::compile(&rule);
        assert_eq!(plan.branches[0].ground.len(), 1);
        assert!(plan.branches[0].slots.is_empty());
    }

    #[test]
    fn disjunction_yields_one_plan_per_branch() {
        let rule = Rule::new("either").when(Condition::Any(vec![
            Condition::Test(Test::compare("a", "x", CompareOp::Eq, Expr::Int(1))),
            Condition::Test(Test::compare("b", "y", CompareOp::Eq, Expr::Int(2))),
        ]));
        let plan = RulePlan::compile(&rule);
        assert_eq!(plan.branches.len(), 2);
        // Both branches bind every declared binding.
        assert!(plan.branches.iter().all(|b| b.slots.len() == 2));
        assert_eq!(plan.branches[1].slots[0].binding, "b");
    }
}
