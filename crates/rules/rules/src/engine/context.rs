use std::path::Path;
use std::sync::Arc;

use ruleweave_facts::{FactStore, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::engine::backward::{BackwardChainer, Bindings, ProveOptions};
use crate::engine::config::EngineConfig;
use crate::engine::forward::ForwardChainer;
use crate::engine::functions::{FunctionContext, FunctionRegistry, RuleFunction};
use crate::engine::pool::MatchPool;
use crate::engine::report::RunReport;
use crate::engine::ruleset::RuleSet;
use crate::error::{FunctionError, ProofFailure, RuleError};
use crate::frontend::RuleFrontend;
use crate::ir::goal::Goal;
use crate::ir::rule::Rule;

/// A reasoning session: configuration, working memory, rules, and the
/// functions rules may call.
///
/// Rule sets are immutable and shared; loading or replacing rules swaps in
/// a new set between runs.
#[derive(Debug)]
pub struct EngineContext {
    config: EngineConfig,
    facts: FactStore,
    rules: Arc<RuleSet>,
    functions: Arc<FunctionRegistry>,
    pool: Option<MatchPool>,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineContext {
    /// Create a context with the default configuration.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            facts: FactStore::new(),
            rules: Arc::new(RuleSet::default()),
            functions: Arc::new(FunctionRegistry::new()),
            pool: None,
        }
    }

    /// Create a context with a validated configuration.
    pub fn with_config(config: EngineConfig) -> Result<Self, RuleError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The loaded rules.
    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Append rules. Nothing is loaded if any name collides or any rule is
    /// invalid. Returns the number of rules added.
    pub fn load_rules(&mut self, rules: Vec<Rule>) -> Result<usize, RuleError> {
        let count = rules.len();
        self.rules = Arc::new(self.rules.extended(rules)?);
        debug!(added = count, total = self.rules.len(), "rules loaded");
        Ok(count)
    }

    /// Swap in a whole new rule set, returning the previous one.
    pub fn replace_rules(&mut self, rules: Vec<Rule>) -> Result<Arc<RuleSet>, RuleError> {
        let next = Arc::new(RuleSet::new(rules)?);
        info!(
            rules = next.len(),
            fingerprint = next.fingerprint(),
            "rule set replaced"
        );
        Ok(std::mem::replace(&mut self.rules, next))
    }

    /// Load every file in `path` that one of `frontends` accepts.
    ///
    /// Files are read in name order and all of them are parsed before any
    /// rule is added. Returns the number of rules loaded.
    pub fn load_directory(
        &mut self,
        path: &Path,
        frontends: &[&dyn RuleFrontend],
    ) -> Result<usize, RuleError> {
        let entries = std::fs::read_dir(path)
            .map_err(|e| RuleError::Load(format!("cannot read directory {}: {e}", path.display())))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RuleError::Load(format!("directory entry error: {e}")))?;
            let file_path = entry.path();
            if file_path.is_file() {
                files.push(file_path);
            }
        }
        files.sort();

        let mut rules = Vec::new();
        for file_path in &files {
            let extension = file_path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("");
            if let Some(frontend) = frontends
                .iter()
                .find(|frontend| frontend.extensions().contains(&extension))
            {
                let parsed = frontend.parse_file(file_path)?;
                debug!(file = %file_path.display(), rules = parsed.len(), "rule file parsed");
                rules.extend(parsed);
            }
        }
        self.load_rules(rules)
    }

    /// Working memory.
    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    /// Mutable working memory, for use between runs.
    pub fn facts_mut(&mut self) -> &mut FactStore {
        &mut self.facts
    }

    /// The function registry.
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Register a function. Last registration wins.
    pub fn register_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value], &mut FunctionContext<'_>) -> Result<Value, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        Arc::make_mut(&mut self.functions).register(name, function);
    }

    /// Register a shared [`RuleFunction`]. Last registration wins.
    pub fn register_rule_function(
        &mut self,
        name: impl Into<String>,
        function: Arc<dyn RuleFunction>,
    ) {
        Arc::make_mut(&mut self.functions).register_function(name, function);
    }

    /// Remove a function. Returns `false` if it was not registered.
    pub fn unregister_function(&mut self, name: &str) -> bool {
        Arc::make_mut(&mut self.functions).unregister(name)
    }

    /// Forward-chain to a fixpoint (or halt, or the cycle limit).
    pub fn run(&mut self) -> Result<RunReport, RuleError> {
        self.execute(None)
    }

    /// Forward-chain, stopping between cycles once `token` is cancelled.
    pub fn run_with_cancel(&mut self, token: &CancellationToken) -> Result<RunReport, RuleError> {
        self.execute(Some(token))
    }

    #[instrument(skip_all, fields(rules = self.rules.len(), facts = self.facts.len()))]
    fn execute(&mut self, token: Option<&CancellationToken>) -> Result<RunReport, RuleError> {
        if self.config.parallelism_degree > 1 && self.pool.is_none() {
            self.pool = Some(MatchPool::start(self.config.parallelism_degree)?);
        }
        let mut chainer = ForwardChainer::new(
            Arc::clone(&self.rules),
            Arc::clone(&self.functions),
            self.config.clone(),
        );
        if let Some(pool) = &self.pool {
            chainer = chainer.with_pool(pool);
        }
        if let Some(token) = token {
            chainer = chainer.with_cancel(token);
        }
        chainer.run(&mut self.facts)
    }

    /// Prove `goal` by backward chaining.
    pub fn prove(&mut self, goal: &Goal, options: &ProveOptions) -> Result<Bindings, ProofFailure> {
        BackwardChainer::new(&self.rules, &self.functions)
            .with_max_depth(self.config.max_proof_depth)
            .prove(goal, &mut self.facts, options)
    }

    /// Prove `goal`, aborting once `token` is cancelled.
    pub fn prove_with_cancel(
        &mut self,
        goal: &Goal,
        options: &ProveOptions,
        token: &CancellationToken,
    ) -> Result<Bindings, ProofFailure> {
        BackwardChainer::new(&self.rules, &self.functions)
            .with_max_depth(self.config.max_proof_depth)
            .with_cancel(token)
            .prove(goal, &mut self.facts, options)
    }

    /// Stop the match workers. The pool restarts on the next run.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}
