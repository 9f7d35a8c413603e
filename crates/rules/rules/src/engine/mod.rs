pub mod agenda;
pub mod backward;
pub mod builtins;
pub mod config;
pub mod context;
pub(crate) mod eval;
pub mod forward;
pub mod functions;
pub(crate) mod matcher;
pub(crate) mod plan;
pub mod pool;
pub mod report;
pub mod ruleset;

pub use agenda::{Activation, Agenda, AgendaPolicy};
pub use backward::{BackwardChainer, Bindings, ProofSource, ProofStep, ProveOptions};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use eval::{compare, values_equal};
pub use forward::ForwardChainer;
pub use functions::{FunctionContext, FunctionRegistry, RuleFunction};
pub use pool::MatchPool;
pub use report::{ActionFailure, Completion, FiredActivation, RunReport};
pub use ruleset::RuleSet;
