//! Text frontend for ruleweave.
//!
//! ```text
//! rule "flu" salience 10 no-loop {
//!     when
//!         $p: Patient(fever == true, age >= 18)
//!         and ($p.region == "north" or $p.region in ["east", "west"])
//!     then
//!         assert Diagnosis { name: "flu", patient: $p };
//!         notify("flu", $p.name);
//! }
//! ```
//!
//! Source text is tokenized with `nom`, parsed into a syntax tree that keeps
//! byte offsets, then lowered to [`Rule`]s. Every failure is a
//! [`ParseError`] with a 1-based line and column.

mod ast;
mod frontend;
mod lexer;
mod lower;
mod parser;

use std::collections::BTreeSet;

use ruleweave_rules::{FunctionRegistry, Goal, ParseError, Rule};
use tracing::{debug, instrument};

pub use frontend::DslFrontend;

use crate::lower::Lowering;

/// Parse rule source with the default options.
pub fn parse(source: &str) -> Result<Vec<Rule>, ParseError> {
    Parser::new().parse(source)
}

/// Parse a goal such as `Diagnosis(name == "flu", patient == ?p)`.
///
/// `_` in place of the fact type matches facts of any type. Variables
/// (`?name`) may only appear on the right of `==`.
pub fn parse_goal(source: &str) -> Result<Goal, ParseError> {
    let node = parser::parse_goal(source)?;
    Lowering::new(source, None).goal(node)
}

/// Rule parser with options.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    known_functions: Option<BTreeSet<String>>,
}

impl Parser {
    /// A parser that accepts calls to any function name.
    ///
    /// ```
    /// let rules = ruleweave_dsl::Parser::new()
    ///     .parse("rule r { when $p: P() then notify($p); }")
    ///     .unwrap();
    /// assert_eq!(rules[0].name, "r");
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject calls to functions outside `names` and the builtins.
    #[must_use]
    pub fn with_known_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_functions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Check calls against the functions registered in `registry`.
    #[must_use]
    pub fn with_registry(self, registry: &FunctionRegistry) -> Self {
        self.with_known_functions(registry.names())
    }

    /// Parse every rule in `source`.
    #[instrument(skip_all, fields(bytes = source.len()))]
    pub fn parse(&self, source: &str) -> Result<Vec<Rule>, ParseError> {
        let nodes = parser::parse_rules(source)?;
        let rules = Lowering::new(source, self.known_functions.as_ref()).rules(nodes)?;
        debug!(rules = rules.len(), "rule source parsed");
        Ok(rules)
    }
}
