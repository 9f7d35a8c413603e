use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::engine::plan::RulePlan;
use crate::error::RuleError;
use crate::ir::rule::{Rule, render_rules};

/// An immutable, validated collection of rules in declaration order.
///
/// Rule sets are shared behind an `Arc` so that a running match pool keeps
/// its view while a new set is swapped in.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    plans: Vec<RulePlan>,
    fingerprint: String,
}

impl RuleSet {
    /// Validate and compile `rules`.
    ///
    /// Fails on duplicate names and on rules that reference undeclared
    /// bindings.
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleError> {
        let mut seen = BTreeSet::new();
        for rule in &rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateRule(rule.name.clone()));
            }
            rule.validate()?;
        }
        let plans = rules.iter().map(RulePlan::compile).collect();
        let fingerprint = hex::encode(Sha256::digest(render_rules(&rules).as_bytes()));
        Ok(Self {
            rules,
            plans,
            fingerprint,
        })
    }

    /// A new set holding these rules followed by `more`.
    pub fn extended(&self, more: Vec<Rule>) -> Result<Self, RuleError> {
        let mut rules = self.rules.clone();
        rules.extend(more);
        Self::new(rules)
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Look up a rule by name.
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// SHA-256 of the canonical rendering, hex encoded. Equal rule sets have
    /// equal fingerprints.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn plan(&self, index: usize) -> &RulePlan {
        &self.plans[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::action::Action;

    #[test]
    fn duplicate_names_are_rejected() {
        let err = RuleSet::new(vec![Rule::new("a"), Rule::new("b"), Rule::new("a")]).unwrap_err();
        assert!(matches!(err, RuleError::DuplicateRule(name) if name == "a"));
    }

    #[test]
    fn undeclared_bindings_are_rejected() {
        let rule = Rule::new("bad").then(Action::Retract {
            binding: "x".into(),
        });
        assert!(matches!(
            RuleSet::new(vec![rule]),
            Err(RuleError::UndefinedBinding(_))
        ));
    }

    #[test]
    fn extended_keeps_order_and_checks_names() {
        let base = RuleSet::new(vec![Rule::new("a")]).unwrap();
        let more = base.extended(vec![Rule::new("b")]).unwrap();
        let names: Vec<_> = more.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(more.get("b").is_some());
        assert!(base.extended(vec![Rule::new("a")]).is_err());
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = RuleSet::new(vec![Rule::new("a")]).unwrap();
        let same = RuleSet::new(vec![Rule::new("a")]).unwrap();
        let other = RuleSet::new(vec![Rule::new("a").with_salience(1)]).unwrap();
        assert_eq!(a.fingerprint(), same.fingerprint());
        assert_ne!(a.fingerprint(), other.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
