//! Fixed-size worker pool for the match phase.

use std::ops::Range;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use ruleweave_facts::FactSnapshot;
use tracing::debug;

use crate::engine::agenda::Activation;
use crate::engine::functions::FunctionRegistry;
use crate::engine::matcher::Matcher;
use crate::engine::ruleset::RuleSet;
use crate::error::RuleError;

type MatchResult = (usize, Result<Vec<Activation>, RuleError>);

struct MatchJob {
    rules: Arc<RuleSet>,
    range: Range<usize>,
    facts: FactSnapshot,
    functions: Arc<FunctionRegistry>,
    strict: bool,
    reply: Sender<MatchResult>,
}

/// Worker threads that match slices of a rule set against a snapshot.
///
/// Workers only read: each job carries its own rule set, snapshot, and
/// registry handles.
pub struct MatchPool {
    tx: Option<Sender<MatchJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl MatchPool {
    /// Spawn `degree` workers named `ruleweave-match-<n>`.
    pub fn start(degree: usize) -> Result<Self, RuleError> {
        let degree = degree.max(1);
        let (tx, rx) = bounded::<MatchJob>(degree * 2);
        let mut workers = Vec::with_capacity(degree);
        for idx in 0..degree {
            let rx: Receiver<MatchJob> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("ruleweave-match-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let matcher =
                            Matcher::new(&job.rules, &job.facts, &job.functions, job.strict);
                        let result = matcher.match_range(job.range.clone());
                        let _ = job.reply.send((job.range.start, result));
                    }
                })
                .map_err(|e| RuleError::Pool(format!("cannot spawn match worker: {e}")))?;
            workers.push(handle);
        }
        debug!(degree, "match pool started");
        Ok(Self {
            tx: Some(tx),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn degree(&self) -> usize {
        self.workers.len()
    }

    /// Match every rule, splitting the set into one contiguous slice per
    /// worker. On failure the error of the earliest failing rule wins.
    pub fn match_all(
        &self,
        rules: &Arc<RuleSet>,
        facts: &FactSnapshot,
        functions: &Arc<FunctionRegistry>,
        strict: bool,
    ) -> Result<Vec<Activation>, RuleError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RuleError::Pool("match pool is shut down".into()))?;
        let total = rules.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let chunk = total.div_ceil(self.degree().max(1));
        let ranges: Vec<Range<usize>> = (0..total)
            .step_by(chunk)
            .map(|start| start..(start + chunk).min(total))
            .collect();

        let (reply_tx, reply_rx) = bounded::<MatchResult>(ranges.len());
        for range in &ranges {
            let job = MatchJob {
                rules: Arc::clone(rules),
                range: range.clone(),
                facts: facts.clone(),
                functions: Arc::clone(functions),
                strict,
                reply: reply_tx.clone(),
            };
            tx.send(job)
                .map_err(|_| RuleError::Pool("match workers have exited".into()))?;
        }
        drop(reply_tx);

        let mut results = Vec::with_capacity(ranges.len());
        for _ in 0..ranges.len() {
            let result = reply_rx
                .recv()
                .map_err(|_| RuleError::Pool("match worker exited without replying".into()))?;
            results.push(result);
        }
        results.sort_by_key(|(start, _)| *start);

        let mut activations = Vec::new();
        for (_, result) in results {
            activations.extend(result?);
        }
        Ok(activations)
    }

    /// Stop the workers and wait for them to exit.
    pub fn shutdown(&mut self) {
        // Closing the channel ends each worker's receive loop.
        if self.tx.take().is_some() {
            for handle in self.workers.drain(..) {
                let _ = handle.join();
            }
            debug!("match pool stopped");
        }
    }
}

impl Drop for MatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchPool")
            .field("degree", &self.workers.len())
            .field("running", &self.tx.is_some())
            .finish()
    }
}
