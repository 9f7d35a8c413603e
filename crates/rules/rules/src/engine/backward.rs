//! Goal-directed proof search.
//!
//! The search is depth-first and never recurses on the host stack: pending
//! work is a task stack inside the proof state, and every open choice keeps
//! a clone of the state it branched from.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use ruleweave_facts::{Fact, FactId, FactSource, FactStore, Value};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::engine::eval::{Scope, compare, eval, eval_test};
use crate::engine::functions::FunctionRegistry;
use crate::engine::ruleset::RuleSet;
use crate::error::ProofFailure;
use crate::ir::action::Action;
use crate::ir::condition::{CompareOp, Test};
use crate::ir::goal::{Goal, Term};

/// Whether a successful proof writes what it derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProveOptions {
    commit: bool,
}

impl Default for ProveOptions {
    fn default() -> Self {
        Self { commit: true }
    }
}

impl ProveOptions {
    /// Assert derived facts into the store on success (the default).
    pub fn committing() -> Self {
        Self::default()
    }

    /// Leave the store untouched.
    pub fn pure() -> Self {
        Self { commit: false }
    }

    /// Returns `true` if derived facts are asserted on success.
    pub fn commits(&self) -> bool {
        self.commit
    }
}

/// What satisfied a goal during a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofSource {
    /// A fact already present.
    Fact(FactId),
    /// An application of the named rule.
    Rule(String),
}

/// One goal resolution on the successful path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProofStep {
    /// Rule applications above this goal.
    pub depth: usize,
    /// The goal, with known values substituted.
    pub goal: String,
    /// How it was resolved.
    pub source: ProofSource,
}

/// A successful proof.
#[derive(Debug, Clone, PartialEq)]
pub struct Bindings {
    /// Values of the goal's `?variables`.
    pub values: BTreeMap<String, Value>,
    /// The fact that satisfied the goal.
    pub fact: Fact,
    /// Facts inferred along the way, in derivation order.
    pub derived: Vec<Fact>,
    /// The resolution steps of the proof, in order.
    pub steps: Vec<ProofStep>,
}

impl Bindings {
    /// Value bound to `?var`.
    pub fn get(&self, var: &str) -> Option<&Value> {
        self.values.get(var)
    }
}

/// A fact pattern with every value known.
#[derive(Debug, Clone, PartialEq)]
struct Need {
    fact_type: Option<String>,
    constraints: Vec<(String, CompareOp, Value)>,
}

impl Need {
    fn satisfied_by(&self, fact: &Fact) -> bool {
        if self
            .fact_type
            .as_deref()
            .is_some_and(|t| t != fact.fact_type())
        {
            return false;
        }
        self.constraints.iter().all(|(attribute, op, value)| {
            fact.get(attribute)
                .is_some_and(|actual| matches!(compare(*op, actual, value), Ok(true)))
        })
    }
}

impl fmt::Display for Need {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fact_type.as_deref().unwrap_or("_"))?;
        f.write_str("(")?;
        for (i, (attribute, op, value)) in self.constraints.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{attribute} {} {value}", op.symbol())?;
        }
        f.write_str(")")
    }
}

/// Where a resolved fact goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parent {
    Goal,
    Slot { frame: usize, slot: usize },
}

#[derive(Debug, Clone)]
struct Solve {
    need: Need,
    parent: Parent,
    depth: usize,
    ancestors: Vec<String>,
}

#[derive(Debug, Clone)]
enum Task {
    Solve(Solve),
    Bind { frame: usize, slot: usize },
    Conclude { frame: usize },
}

/// One rule application being proved.
#[derive(Debug, Clone)]
struct Frame {
    rule: usize,
    branch: usize,
    action: usize,
    bound: Vec<(String, Fact)>,
    need: Need,
    parent: Parent,
    depth: usize,
    ancestors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct ProofState {
    tasks: Vec<Task>,
    frames: Vec<Frame>,
    derived: Vec<Fact>,
    answer: Option<Fact>,
    values: BTreeMap<String, Value>,
    steps: Vec<ProofStep>,
}

#[derive(Debug, Clone)]
enum Alternative {
    Fact(Fact),
    Rule {
        rule: usize,
        branch: usize,
        action: usize,
    },
}

struct ChoicePoint {
    state: ProofState,
    solve: Solve,
    alternatives: VecDeque<Alternative>,
}

/// Why branches were pruned, for the final failure.
#[derive(Debug, Default)]
struct Pruned {
    cyclic: Option<String>,
    depth: bool,
}

/// The store seen through the facts derived so far on one search path.
struct Overlay<'a> {
    store: &'a FactStore,
    derived: &'a [Fact],
}

impl FactSource for Overlay<'_> {
    fn get(&self, id: &FactId) -> Option<&Fact> {
        self.derived
            .iter()
            .find(|fact| fact.id() == id)
            .or_else(|| self.store.get(id))
    }

    fn stamp(&self, id: &FactId) -> Option<u64> {
        self.store.stamp(id)
    }

    fn candidates<'a>(
        &'a self,
        fact_type: Option<&str>,
    ) -> Box<dyn Iterator<Item = &'a Fact> + 'a> {
        let mut merged: BTreeMap<&FactId, &Fact> = self
            .store
            .candidates(fact_type)
            .map(|fact| (fact.id(), fact))
            .collect();
        for fact in self.derived {
            if fact_type.is_none_or(|t| t == fact.fact_type()) {
                merged.insert(fact.id(), fact);
            }
        }
        Box::new(merged.into_values())
    }
}

/// Proves goals against a fact store and rule set.
pub struct BackwardChainer<'e> {
    rules: &'e RuleSet,
    functions: &'e FunctionRegistry,
    max_depth: usize,
    cancel: Option<&'e CancellationToken>,
}

impl<'e> BackwardChainer<'e> {
    /// Create a chainer with the default depth limit of 64.
    pub fn new(rules: &'e RuleSet, functions: &'e FunctionRegistry) -> Self {
        Self {
            rules,
            functions,
            max_depth: 64,
            cancel: None,
        }
    }

    /// Limit nested rule applications on any proof path.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Abort with [`ProofFailure::Cancelled`] once `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: &'e CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Prove `goal`.
    ///
    /// Facts are tried before rules, in id order. Rules are tried in
    /// declaration order. The first complete proof wins. With committing
    /// options the facts it derived are asserted into `facts`.
    #[instrument(skip_all, fields(goal = %goal, max_depth = self.max_depth))]
    pub fn prove(
        &self,
        goal: &Goal,
        facts: &mut FactStore,
        options: &ProveOptions,
    ) -> Result<Bindings, ProofFailure> {
        let proof = self.search(goal, facts)?;
        let fact = proof.answer.ok_or_else(|| ProofFailure::Unprovable {
            goal: goal.to_string(),
        })?;
        if options.commits() {
            for derived in &proof.derived {
                facts.assert(derived.clone());
            }
        }
        debug!(
            steps = proof.steps.len(),
            derived = proof.derived.len(),
            committed = options.commits(),
            "goal proved"
        );
        Ok(Bindings {
            values: proof.values,
            fact,
            derived: proof.derived,
            steps: proof.steps,
        })
    }

    fn search(&self, goal: &Goal, facts: &FactStore) -> Result<ProofState, ProofFailure> {
        let need = Need {
            fact_type: goal.fact_type.clone(),
            constraints: goal
                .constraints
                .iter()
                .filter_map(|c| match &c.term {
                    Term::Value(value) => Some((c.attribute.clone(), c.op, value.clone())),
                    Term::Var(_) => None,
                })
                .collect(),
        };
        let mut current = Some(ProofState {
            tasks: vec![Task::Solve(Solve {
                need,
                parent: Parent::Goal,
                depth: 0,
                ancestors: Vec::new(),
            })],
            ..ProofState::default()
        });
        let mut choices: Vec<ChoicePoint> = Vec::new();
        let mut pruned = Pruned::default();

        loop {
            if self.cancel.is_some_and(CancellationToken::is_cancelled) {
                debug!("proof cancelled");
                return Err(ProofFailure::Cancelled);
            }
            let mut state = match current.take() {
                Some(state) => state,
                None => match self.resume(&mut choices, goal, facts) {
                    Some(state) => state,
                    None => return Err(self.failure(goal, pruned)),
                },
            };
            let Some(task) = state.tasks.pop() else {
                return Ok(state);
            };
            match task {
                Task::Solve(solve) => {
                    let alternatives = self.alternatives(&state, &solve, facts, &mut pruned);
                    trace!(goal = %solve.need, alternatives = alternatives.len(), "expanding goal");
                    choices.push(ChoicePoint {
                        state,
                        solve,
                        alternatives: alternatives.into(),
                    });
                }
                Task::Bind { frame, slot } => {
                    let solve = self.slot_goal(&state, facts, frame, slot);
                    state.tasks.push(Task::Solve(solve));
                    current = Some(state);
                }
                Task::Conclude { frame } => {
                    if self.conclude(&mut state, goal, facts, frame) {
                        current = Some(state);
                    }
                }
            }
        }
    }

    /// Take the next untried alternative from the innermost open choice.
    fn resume(
        &self,
        choices: &mut Vec<ChoicePoint>,
        goal: &Goal,
        facts: &FactStore,
    ) -> Option<ProofState> {
        while let Some(mut choice) = choices.pop() {
            let Some(alternative) = choice.alternatives.pop_front() else {
                continue;
            };
            let solve = choice.solve.clone();
            let mut state = if choice.alternatives.is_empty() {
                choice.state
            } else {
                let state = choice.state.clone();
                choices.push(choice);
                state
            };
            if self.apply(&mut state, goal, facts, &solve, alternative) {
                return Some(state);
            }
        }
        None
    }

    fn alternatives(
        &self,
        state: &ProofState,
        solve: &Solve,
        facts: &FactStore,
        pruned: &mut Pruned,
    ) -> Vec<Alternative> {
        let overlay = Overlay {
            store: facts,
            derived: &state.derived,
        };
        let mut alternatives: Vec<Alternative> = overlay
            .candidates(solve.need.fact_type.as_deref())
            .filter(|fact| solve.need.satisfied_by(fact))
            .map(|fact| Alternative::Fact(fact.clone()))
            .collect();

        let rules = self.deriving_rules(&solve.need, &overlay);
        if rules.is_empty() {
            return alternatives;
        }
        let key = solve.need.to_string();
        if solve.ancestors.contains(&key) {
            trace!(goal = %key, "goal recurs on its own path");
            pruned.cyclic.get_or_insert(key);
        } else if solve.depth >= self.max_depth {
            trace!(goal = %key, depth = solve.depth, "depth limit reached");
            pruned.depth = true;
        } else {
            alternatives.extend(rules);
        }
        alternatives
    }

    /// Rules with an `assert` that could produce a fact satisfying `need`.
    fn deriving_rules(&self, need: &Need, overlay: &Overlay<'_>) -> Vec<Alternative> {
        let scope = Scope {
            facts: overlay,
            bound: &[],
            functions: self.functions,
        };
        let mut out = Vec::new();
        for (rule_index, rule) in self.rules.rules().iter().enumerate() {
            for (action_index, action) in rule.actions.iter().enumerate() {
                let Action::Assert {
                    fact_type,
                    attributes,
                } = action
                else {
                    continue;
                };
                if need.fact_type.as_ref().is_some_and(|t| t != fact_type) {
                    continue;
                }
                let compatible = need.constraints.iter().all(|(attribute, op, value)| {
                    match attributes.iter().find(|(name, _)| name == attribute) {
                        None => false,
                        Some((_, expr)) if expr.is_literal() => eval(expr, &scope)
                            .is_ok_and(|literal| matches!(compare(*op, &literal, value), Ok(true))),
                        Some(_) => true,
                    }
                });
                if !compatible {
                    continue;
                }
                for branch in 0..self.rules.plan(rule_index).branches.len() {
                    out.push(Alternative::Rule {
                        rule: rule_index,
                        branch,
                        action: action_index,
                    });
                }
            }
        }
        out
    }

    /// Commit to one alternative. Returns `false` if it fails at once.
    fn apply(
        &self,
        state: &mut ProofState,
        goal: &Goal,
        facts: &FactStore,
        solve: &Solve,
        alternative: Alternative,
    ) -> bool {
        match alternative {
            Alternative::Fact(fact) => {
                state.steps.push(ProofStep {
                    depth: solve.depth,
                    goal: solve.need.to_string(),
                    source: ProofSource::Fact(fact.id().clone()),
                });
                self.deliver(state, goal, facts, solve.parent, fact)
            }
            Alternative::Rule {
                rule,
                branch,
                action,
            } => {
                let plan = &self.rules.plan(rule).branches[branch];
                let overlay = Overlay {
                    store: facts,
                    derived: &state.derived,
                };
                if !self.all_hold(&plan.ground, &overlay, &[]) {
                    return false;
                }
                let mut ancestors = solve.ancestors.clone();
                ancestors.push(solve.need.to_string());
                let frame = state.frames.len();
                state.frames.push(Frame {
                    rule,
                    branch,
                    action,
                    bound: Vec::with_capacity(plan.slots.len()),
                    need: solve.need.clone(),
                    parent: solve.parent,
                    depth: solve.depth + 1,
                    ancestors,
                });
                state.steps.push(ProofStep {
                    depth: solve.depth,
                    goal: solve.need.to_string(),
                    source: ProofSource::Rule(self.rules.rules()[rule].name.clone()),
                });
                state.tasks.push(if plan.slots.is_empty() {
                    Task::Conclude { frame }
                } else {
                    Task::Bind { frame, slot: 0 }
                });
                true
            }
        }
    }

    /// The subgoal for one binding of a rule application: its type plus
    /// every comparison whose operand is already known.
    fn slot_goal(&self, state: &ProofState, facts: &FactStore, frame: usize, slot: usize) -> Solve {
        let current = &state.frames[frame];
        let plan_slot = &self.rules.plan(current.rule).branches[current.branch].slots[slot];
        let overlay = Overlay {
            store: facts,
            derived: &state.derived,
        };
        let bound: Vec<(&str, &Fact)> = current
            .bound
            .iter()
            .map(|(name, fact)| (name.as_str(), fact))
            .collect();
        let scope = Scope {
            facts: &overlay,
            bound: &bound,
            functions: self.functions,
        };

        let mut constraints = Vec::new();
        for test in &plan_slot.tests {
            let Test::Compare {
                binding,
                attribute,
                op,
                operand,
            } = test
            else {
                continue;
            };
            if *binding != plan_slot.binding {
                continue;
            }
            let mut reads = BTreeSet::new();
            operand.collect_bindings(&mut reads);
            if reads.contains(binding.as_str()) {
                continue;
            }
            if let Ok(value) = eval(operand, &scope) {
                constraints.push((attribute.clone(), *op, value));
            }
        }
        Solve {
            need: Need {
                fact_type: plan_slot.fact_type.clone(),
                constraints,
            },
            parent: Parent::Slot { frame, slot },
            depth: current.depth,
            ancestors: current.ancestors.clone(),
        }
    }

    /// Build the fact a finished rule application asserts and hand it on.
    fn conclude(&self, state: &mut ProofState, goal: &Goal, facts: &FactStore, frame: usize) -> bool {
        let current = &state.frames[frame];
        let rule = &self.rules.rules()[current.rule];
        let Some(Action::Assert {
            fact_type,
            attributes,
        }) = rule.actions.get(current.action)
        else {
            return false;
        };
        let overlay = Overlay {
            store: facts,
            derived: &state.derived,
        };
        let bound: Vec<(&str, &Fact)> = current
            .bound
            .iter()
            .map(|(name, fact)| (name.as_str(), fact))
            .collect();
        let scope = Scope {
            facts: &overlay,
            bound: &bound,
            functions: self.functions,
        };
        let mut fact = Fact::new(fact_type.as_str());
        for (name, expr) in attributes {
            match eval(expr, &scope) {
                Ok(value) => fact = fact.with(name.as_str(), value),
                Err(err) => {
                    debug!(rule = %rule.name, error = %err, "cannot build derived fact");
                    return false;
                }
            }
        }
        let fact = fact.identified();
        if !current.need.satisfied_by(&fact) {
            return false;
        }
        let parent = current.parent;
        debug!(rule = %rule.name, fact = %fact.id(), "fact derived");
        if overlay.get(fact.id()).is_none() {
            state.derived.push(fact.clone());
        }
        self.deliver(state, goal, facts, parent, fact)
    }

    /// Hand a resolved fact to whatever asked for it.
    fn deliver(
        &self,
        state: &mut ProofState,
        goal: &Goal,
        facts: &FactStore,
        parent: Parent,
        fact: Fact,
    ) -> bool {
        match parent {
            Parent::Goal => {
                let Some(values) = capture(goal, &fact) else {
                    return false;
                };
                state.values = values;
                state.answer = Some(fact);
                true
            }
            Parent::Slot { frame, slot } => {
                let (rule, branch) = {
                    let current = &mut state.frames[frame];
                    let binding = self.rules.plan(current.rule).branches[current.branch].slots[slot]
                        .binding
                        .clone();
                    current.bound.push((binding, fact));
                    (current.rule, current.branch)
                };
                let plan = &self.rules.plan(rule).branches[branch];
                let overlay = Overlay {
                    store: facts,
                    derived: &state.derived,
                };
                let bound: Vec<(&str, &Fact)> = state.frames[frame]
                    .bound
                    .iter()
                    .map(|(name, fact)| (name.as_str(), fact))
                    .collect();
                if !self.all_hold(&plan.slots[slot].tests, &overlay, &bound) {
                    return false;
                }
                state.tasks.push(if slot + 1 < plan.slots.len() {
                    Task::Bind {
                        frame,
                        slot: slot + 1,
                    }
                } else {
                    Task::Conclude { frame }
                });
                true
            }
        }
    }

    fn all_hold(&self, tests: &[Test], overlay: &Overlay<'_>, bound: &[(&str, &Fact)]) -> bool {
        let scope = Scope {
            facts: overlay,
            bound,
            functions: self.functions,
        };
        tests.iter().all(|test| match eval_test(test, &scope) {
            Ok(holds) => holds,
            Err(err) => {
                trace!(test = %test.to_source(), error = %err, "test failed to evaluate");
                false
            }
        })
    }

    fn failure(&self, goal: &Goal, pruned: Pruned) -> ProofFailure {
        let failure = match pruned {
            Pruned {
                cyclic: Some(key), ..
            } => ProofFailure::Cyclic { goal: key },
            Pruned { depth: true, .. } => ProofFailure::DepthExceeded {
                depth: self.max_depth,
            },
            Pruned { .. } => ProofFailure::Unprovable {
                goal: goal.to_string(),
            },
        };
        debug!(error = %failure, "proof failed");
        failure
    }
}

/// Values of the goal's variables in `fact`, or `None` if a variable is
/// missing or bound to two different values.
fn capture(goal: &Goal, fact: &Fact) -> Option<BTreeMap<String, Value>> {
    let mut values: BTreeMap<String, Value> = BTreeMap::new();
    for constraint in &goal.constraints {
        let Term::Var(var) = &constraint.term else {
            continue;
        };
        let value = fact.get(&constraint.attribute)?;
        match values.get(var) {
            Some(existing) if existing != value => return None,
            Some(_) => {}
            None => {
                values.insert(var.clone(), value.clone());
            }
        }
    }
    Some(values)
}
