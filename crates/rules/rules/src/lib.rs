pub mod engine;
pub mod error;
pub mod frontend;
pub mod ir;

pub use engine::{
    BackwardChainer, Bindings, Completion, EngineConfig, EngineContext, ForwardChainer,
    FunctionContext, FunctionRegistry, ProveOptions, RuleFunction, RuleSet, RunReport,
};
pub use error::{FunctionError, ParseError, ProofFailure, RuleError};
pub use frontend::RuleFrontend;
pub use ir::action::Action;
pub use ir::condition::{CompareOp, Condition, Test};
pub use ir::expr::{BinaryOp, Expr, UnaryOp};
pub use ir::goal::{Goal, GoalConstraint, Term};
pub use ir::rule::{Rule, render_rules};
pub use ruleweave_facts::{Fact, FactError, FactId, FactSnapshot, FactSource, FactStore, Value};
