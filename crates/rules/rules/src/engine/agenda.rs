//! Activations and the conflict-resolution order that sequences them.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ruleweave_facts::FactId;
use serde::{Deserialize, Serialize};

/// Tie-break order applied after salience.
///
/// Both policies end with the bound fact ids, so the order is total and a
/// run is reproducible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgendaPolicy {
    /// Salience, then most recently changed supporting facts, then rule
    /// declaration order.
    #[default]
    Recency,
    /// Salience, then rule declaration order, then recency.
    Declaration,
}

/// A rule matched against concrete facts, waiting to fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Declaration index of the rule in its rule set.
    pub rule: usize,
    /// The rule's salience.
    pub salience: i32,
    /// Bound facts by binding name.
    pub bindings: BTreeMap<String, FactId>,
    /// Stamp of each bound fact at match time, in binding-name order.
    pub stamps: Vec<u64>,
    recency: Vec<u64>,
}

/// Identity of an activation for refraction: the rule plus the exact
/// version of every fact it bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ActivationKey {
    rule: usize,
    facts: Vec<(FactId, u64)>,
}

impl Activation {
    /// Build an activation. `stamps` must follow `bindings` order.
    pub fn new(
        rule: usize,
        salience: i32,
        bindings: BTreeMap<String, FactId>,
        stamps: Vec<u64>,
    ) -> Self {
        let mut recency = stamps.clone();
        recency.sort_unstable_by(|a, b| b.cmp(a));
        Self {
            rule,
            salience,
            bindings,
            stamps,
            recency,
        }
    }

    /// Stamps of the bound facts, most recent first.
    pub fn recency(&self) -> &[u64] {
        &self.recency
    }

    /// Bound fact ids in binding-name order.
    pub fn fact_ids(&self) -> impl Iterator<Item = &FactId> {
        self.bindings.values()
    }

    pub(crate) fn key(&self) -> ActivationKey {
        ActivationKey {
            rule: self.rule,
            facts: self
                .bindings
                .values()
                .cloned()
                .zip(self.stamps.iter().copied())
                .collect(),
        }
    }
}

/// Compare two activations; `Less` means `a` fires first.
pub fn firing_order(policy: AgendaPolicy, a: &Activation, b: &Activation) -> Ordering {
    let by_salience = b.salience.cmp(&a.salience);
    let by_recency = || b.recency.cmp(&a.recency);
    let by_declaration = || a.rule.cmp(&b.rule);
    let by_facts = || a.fact_ids().cmp(b.fact_ids());
    match policy {
        AgendaPolicy::Recency => by_salience
            .then_with(by_recency)
            .then_with(by_declaration)
            .then_with(by_facts),
        AgendaPolicy::Declaration => by_salience
            .then_with(by_declaration)
            .then_with(by_recency)
            .then_with(by_facts),
    }
}

/// Pending activations for one forward-chaining run, kept in firing order.
#[derive(Debug, Clone, Default)]
pub struct Agenda {
    policy: AgendaPolicy,
    // Reverse firing order: the next activation to fire is last.
    entries: Vec<Activation>,
}

impl Agenda {
    /// Create an empty agenda.
    pub fn new(policy: AgendaPolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
        }
    }

    /// Replace the contents with freshly matched activations.
    pub fn replace(&mut self, mut activations: Vec<Activation>) {
        let policy = self.policy;
        activations.sort_by(|a, b| firing_order(policy, b, a));
        self.entries = activations;
    }

    /// Remove and return the next activation to fire.
    pub fn pop(&mut self) -> Option<Activation> {
        self.entries.pop()
    }

    /// The next activation to fire.
    pub fn peek(&self) -> Option<&Activation> {
        self.entries.last()
    }

    /// Number of pending activations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending activations in firing order.
    pub fn iter(&self) -> impl Iterator<Item = &Activation> {
        self.entries.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation(rule: usize, salience: i32, facts: &[(&str, u64)]) -> Activation {
        let bindings = facts
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (format!("b{i}"), FactId::from(*id)))
            .collect();
        let stamps = facts.iter().map(|(_, s)| *s).collect();
        Activation::new(rule, salience, bindings, stamps)
    }

    fn order(policy: AgendaPolicy, activations: Vec<Activation>) -> Vec<usize> {
        let mut agenda = Agenda::new(policy);
        agenda.replace(activations);
        agenda.iter().map(|a| a.rule).collect()
    }

    #[test]
    fn salience_dominates() {
        let fired = order(
            AgendaPolicy::Recency,
            vec![
                activation(0, 0, &[("a", 9)]),
                activation(1, 10, &[("b", 1)]),
            ],
        );
        assert_eq!(fired, vec![1, 0]);
    }

    #[test]
    fn recency_before_declaration() {
        let fired = order(
            AgendaPolicy::Recency,
            vec![
                activation(0, 5, &[("a", 2)]),
                activation(1, 5, &[("b", 7)]),
            ],
        );
        assert_eq!(fired, vec![1, 0]);
    }

    #[test]
    fn declaration_policy_prefers_earlier_rules() {
        let fired = order(
            AgendaPolicy::Declaration,
            vec![
                activation(1, 5, &[("b", 7)]),
                activation(0, 5, &[("a", 2)]),
            ],
        );
        assert_eq!(fired, vec![0, 1]);
    }

    #[test]
    fn recency_compares_most_recent_fact_first() {
        let a = activation(0, 0, &[("x", 3), ("y", 8)]);
        let b = activation(1, 0, &[("x", 7), ("y", 7)]);
        assert_eq!(a.recency(), &[8, 3]);
        assert_eq!(firing_order(AgendaPolicy::Recency, &a, &b), Ordering::Less);
    }

    #[test]
    fn fact_ids_break_remaining_ties() {
        let fired: Vec<_> = {
            let mut agenda = Agenda::new(AgendaPolicy::Recency);
            agenda.replace(vec![
                activation(0, 0, &[("p2", 1)]),
                activation(0, 0, &[("p1", 1)]),
            ]);
            agenda
                .iter()
                .map(|a| a.fact_ids().next().unwrap().to_string())
                .collect()
        };
        assert_eq!(fired, vec!["p1", "p2"]);
    }

    #[test]
    fn pop_follows_firing_order() {
        let mut agenda = Agenda::new(AgendaPolicy::Recency);
        agenda.replace(vec![
            activation(0, 1, &[("a", 1)]),
            activation(1, 3, &[("b", 1)]),
            activation(2, 2, &[("c", 1)]),
        ]);
        assert_eq!(agenda.peek().map(|a| a.rule), Some(1));
        let popped: Vec<_> = std::iter::from_fn(|| agenda.pop()).map(|a| a.rule).collect();
        assert_eq!(popped, vec![1, 2, 0]);
        assert!(agenda.is_empty());
    }

    #[test]
    fn key_tracks_fact_versions() {
        let a = activation(0, 0, &[("p1", 1)]);
        let b = activation(0, 0, &[("p1", 2)]);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), activation(0, 0, &[("p1", 1)]).key());
    }
}
