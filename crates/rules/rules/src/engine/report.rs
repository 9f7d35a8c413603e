use std::collections::BTreeMap;

use ruleweave_facts::FactId;
use serde::Serialize;

/// How a forward-chaining run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// No activation remained and the facts stopped changing.
    Fixpoint,
    /// `max_cycles` activations fired while more were still pending.
    CycleLimitExceeded,
    /// A rule executed `halt`.
    Halted,
    /// The cancellation token fired between cycles.
    Cancelled,
}

impl Completion {
    /// Return the `snake_case` string representation (matches serde serialization).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixpoint => "fixpoint",
            Self::CycleLimitExceeded => "cycle_limit_exceeded",
            Self::Halted => "halted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One successful firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiredActivation {
    /// Name of the rule that fired.
    pub rule: String,
    /// 1-based cycle in which it fired.
    pub cycle: u64,
    /// The facts it was bound to.
    pub bindings: BTreeMap<String, FactId>,
}

/// An activation whose actions failed and were rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    /// Name of the rule.
    pub rule: String,
    /// 1-based cycle of the attempt.
    pub cycle: u64,
    /// Index of the failing action within the rule.
    pub action: usize,
    /// The error message.
    pub message: String,
}

/// Outcome of a forward-chaining run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Why the run stopped.
    pub completion: Completion,
    /// Activations attempted, including failed ones.
    pub cycles: u64,
    /// Successful firings in order.
    pub fired: Vec<FiredActivation>,
    /// Failed activations in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ActionFailure>,
    /// Fact store generation when the run ended.
    pub generation: u64,
}

impl RunReport {
    pub(crate) fn new() -> Self {
        Self {
            completion: Completion::Fixpoint,
            cycles: 0,
            fired: Vec::new(),
            failures: Vec::new(),
            generation: 0,
        }
    }

    /// Names of the fired rules, in firing order.
    pub fn fired_rules(&self) -> impl Iterator<Item = &str> {
        self.fired.iter().map(|f| f.rule.as_str())
    }

    /// How many times `rule` fired.
    pub fn fire_count(&self, rule: &str) -> usize {
        self.fired.iter().filter(|f| f.rule == rule).count()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
