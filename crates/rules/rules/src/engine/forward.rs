use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use ruleweave_facts::{Fact, FactId, FactSnapshot, FactStore, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::engine::agenda::{Activation, ActivationKey, Agenda};
use crate::engine::config::EngineConfig;
use crate::engine::eval::{Scope, eval};
use crate::engine::functions::{FunctionContext, FunctionRegistry};
use crate::engine::matcher::Matcher;
use crate::engine::pool::MatchPool;
use crate::engine::report::{ActionFailure, Completion, FiredActivation, RunReport};
use crate::engine::ruleset::RuleSet;
use crate::error::RuleError;
use crate::ir::action::Action;
use crate::ir::expr::Expr;

/// Runs the match, resolve, act cycle until nothing is left to fire.
pub struct ForwardChainer<'e> {
    rules: Arc<RuleSet>,
    functions: Arc<FunctionRegistry>,
    config: EngineConfig,
    pool: Option<&'e MatchPool>,
    cancel: Option<&'e CancellationToken>,
}

/// Bookkeeping that lives for one run.
struct RunState {
    agenda: Agenda,
    /// Activations that have already fired (or failed).
    consumed: HashSet<ActivationKey>,
    /// The rule and stamp of the firing that last changed each fact.
    touched: HashMap<FactId, (usize, u64)>,
    matched_at: Option<u64>,
}

impl<'e> ForwardChainer<'e> {
    /// Create a chainer that matches on the calling thread.
    pub fn new(rules: Arc<RuleSet>, functions: Arc<FunctionRegistry>, config: EngineConfig) -> Self {
        Self {
            rules,
            functions,
            config,
            pool: None,
            cancel: None,
        }
    }

    /// Match on a worker pool instead of the calling thread.
    #[must_use]
    pub fn with_pool(mut self, pool: &'e MatchPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Stop between cycles once `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: &'e CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fire rules against `facts` until a fixpoint, a halt, cancellation,
    /// or the cycle limit.
    ///
    /// In strict mode the first failing activation aborts the run with
    /// [`RuleError::ActionFailed`]; its own changes are rolled back, earlier
    /// firings stay applied.
    #[instrument(skip_all, fields(rules = self.rules.len(), max_cycles = self.config.max_cycles))]
    pub fn run(&self, facts: &mut FactStore) -> Result<RunReport, RuleError> {
        let mut state = RunState {
            agenda: Agenda::new(self.config.agenda_policy),
            consumed: HashSet::new(),
            touched: HashMap::new(),
            matched_at: None,
        };
        let mut report = RunReport::new();

        let completion = loop {
            if self.cancel.is_some_and(CancellationToken::is_cancelled) {
                break Completion::Cancelled;
            }
            if state.matched_at != Some(facts.generation()) {
                let snapshot = facts.snapshot();
                let activations = self.match_all(&snapshot)?;
                let eligible = activations
                    .into_iter()
                    .filter(|a| self.eligible(a, &state))
                    .collect();
                state.agenda.replace(eligible);
                state.matched_at = Some(snapshot.generation());
            }
            if state.agenda.is_empty() {
                break Completion::Fixpoint;
            }
            if report.cycles >= self.config.max_cycles {
                break Completion::CycleLimitExceeded;
            }
            let Some(activation) = state.agenda.pop() else {
                break Completion::Fixpoint;
            };
            report.cycles += 1;
            if self.act(facts, activation, &mut state, &mut report)? {
                break Completion::Halted;
            }
        };

        report.completion = completion;
        report.generation = facts.generation();
        debug!(
            completion = completion.as_str(),
            cycles = report.cycles,
            fired = report.fired.len(),
            "run finished"
        );
        Ok(report)
    }

    fn match_all(&self, snapshot: &FactSnapshot) -> Result<Vec<Activation>, RuleError> {
        match self.pool {
            Some(pool) if pool.degree() > 1 && self.rules.len() > 1 => {
                pool.match_all(&self.rules, snapshot, &self.functions, self.config.strict)
            }
            _ => Matcher::new(&self.rules, snapshot, &self.functions, self.config.strict)
                .match_range(0..self.rules.len()),
        }
    }

    fn eligible(&self, activation: &Activation, state: &RunState) -> bool {
        if state.consumed.contains(&activation.key()) {
            return false;
        }
        let rule = &self.rules.rules()[activation.rule];
        if !rule.no_loop_or(self.config.no_loop_default) {
            return true;
        }
        // Suppressed if any bound fact is still as this rule last left it.
        let own_change = activation
            .fact_ids()
            .zip(&activation.stamps)
            .any(|(id, stamp)| state.touched.get(id) == Some(&(activation.rule, *stamp)));
        !own_change
    }

    /// Fire one activation. Returns `true` if it executed `halt`.
    fn act(
        &self,
        facts: &mut FactStore,
        activation: Activation,
        state: &mut RunState,
        report: &mut RunReport,
    ) -> Result<bool, RuleError> {
        let rule = &self.rules.rules()[activation.rule];
        let checkpoint = facts.snapshot();
        let before = facts.generation();
        state.consumed.insert(activation.key());

        match self.fire(facts, &activation) {
            Ok(halt) => {
                for id in facts.changed_since(before) {
                    if let Some(stamp) = facts.stamp(id) {
                        state.touched.insert(id.clone(), (activation.rule, stamp));
                    }
                }
                debug!(rule = %rule.name, cycle = report.cycles, "rule fired");
                report.fired.push(FiredActivation {
                    rule: rule.name.clone(),
                    cycle: report.cycles,
                    bindings: activation.bindings,
                });
                if halt {
                    debug!(rule = %rule.name, "run halted by rule");
                }
                Ok(halt)
            }
            Err((action, err)) => {
                facts.restore(checkpoint);
                warn!(rule = %rule.name, action, error = %err, "activation failed, changes rolled back");
                let message = err.to_string();
                report.failures.push(ActionFailure {
                    rule: rule.name.clone(),
                    cycle: report.cycles,
                    action,
                    message: message.clone(),
                });
                if self.config.strict {
                    return Err(RuleError::ActionFailed {
                        rule: rule.name.clone(),
                        message,
                    });
                }
                Ok(false)
            }
        }
    }

    /// Execute the rule's actions in order. On failure returns the index of
    /// the failing action.
    fn fire(
        &self,
        facts: &mut FactStore,
        activation: &Activation,
    ) -> Result<bool, (usize, RuleError)> {
        let rule = &self.rules.rules()[activation.rule];
        let mut halt = false;
        for (index, action) in rule.actions.iter().enumerate() {
            halt |= self
                .execute(facts, &activation.bindings, action)
                .map_err(|err| (index, err))?;
        }
        Ok(halt)
    }

    fn execute(
        &self,
        facts: &mut FactStore,
        bindings: &BTreeMap<String, FactId>,
        action: &Action,
    ) -> Result<bool, RuleError> {
        match action {
            Action::Assert {
                fact_type,
                attributes,
            } => {
                let values = self.evaluate(facts, bindings, attributes.iter().map(|(_, e)| e))?;
                let fact = attributes.iter().zip(values).fold(
                    Fact::new(fact_type.as_str()),
                    |fact, ((name, _), value)| fact.with(name.as_str(), value),
                );
                facts.assert(fact);
            }
            Action::Retract { binding } => {
                facts.retract_strict(bound_id(bindings, binding)?)?;
            }
            Action::Modify { binding, changes } => {
                let id = bound_id(bindings, binding)?;
                let values = self.evaluate(facts, bindings, changes.iter().map(|(_, e)| e))?;
                let changes = changes.iter().map(|(name, _)| name.clone()).zip(values);
                facts.modify_many(id, changes)?;
            }
            Action::Call { function, args } => {
                let values = self.evaluate(facts, bindings, args.iter())?;
                let mut ctx = FunctionContext::writable(facts);
                self.functions
                    .call_or_builtin(function, &values, &mut ctx)?;
            }
            Action::Halt => return Ok(true),
        }
        Ok(false)
    }

    /// Evaluate expressions against the current facts, before any of them is
    /// written.
    fn evaluate<'x>(
        &self,
        facts: &FactStore,
        bindings: &BTreeMap<String, FactId>,
        exprs: impl Iterator<Item = &'x Expr>,
    ) -> Result<Vec<Value>, RuleError> {
        // Facts retracted by an earlier action stay unbound.
        let bound: Vec<(&str, &Fact)> = bindings
            .iter()
            .filter_map(|(name, id)| facts.get(id).map(|fact| (name.as_str(), fact)))
            .collect();
        let scope = Scope {
            facts,
            bound: &bound,
            functions: &self.functions,
        };
        exprs.map(|expr| eval(expr, &scope)).collect()
    }
}

fn bound_id<'b>(bindings: &'b BTreeMap<String, FactId>, binding: &str) -> Result<&'b FactId, RuleError> {
    bindings
        .get(binding)
        .ok_or_else(|| RuleError::UndefinedBinding(binding.to_owned()))
}
