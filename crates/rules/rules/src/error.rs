use ruleweave_facts::FactError;
use thiserror::Error;

/// A syntax or validation error in rule-language source.
///
/// `line` and `column` are 1-based and point at the offending token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}, column {column}: expected {expected}, found {found}")]
pub struct ParseError {
    /// Line of the offending token.
    pub line: usize,
    /// Column of the offending token, counted in characters.
    pub column: usize,
    /// What the parser was looking for.
    pub expected: String,
    /// What it saw instead.
    pub found: String,
}

impl ParseError {
    /// Build an error located at a byte offset into `source`.
    pub fn at(
        source: &str,
        offset: usize,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        let (line, column) = locate(source, offset);
        Self {
            line,
            column,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Translate a byte offset into a 1-based (line, column) pair.
pub fn locate(source: &str, offset: usize) -> (usize, usize) {
    let mut offset = offset.min(source.len());
    while !source.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = source[line_start..offset].chars().count() + 1;
    (line, column)
}

/// Errors raised by registered functions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    /// No function is registered under the name.
    #[error("undefined function: {0}")]
    NotFound(String),

    /// The function was called with the wrong number of arguments.
    #[error("{function} expects {expected} argument(s), got {actual}")]
    Arity {
        /// Function name.
        function: String,
        /// Human-readable expected count (e.g. `"2"` or `"1 or 2"`).
        expected: String,
        /// Number of arguments supplied.
        actual: usize,
    },

    /// An argument had an unsupported type.
    #[error("type error: {0}")]
    Type(String),

    /// A write was attempted through a read-only fact handle.
    #[error("fact store is read-only in this context")]
    ReadOnly,

    /// The function reported a failure of its own.
    #[error("{0}")]
    Failed(String),

    /// A fact store operation performed by the function failed.
    #[error(transparent)]
    Fact(#[from] FactError),
}

/// Errors that can occur while loading, matching, or firing rules.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Rule source could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A fact store operation failed.
    #[error("fact error: {0}")]
    Fact(#[from] FactError),

    /// A function call failed.
    #[error("function error: {0}")]
    Function(#[from] FunctionError),

    /// A type mismatch occurred during expression evaluation.
    #[error("type error: {0}")]
    TypeError(String),

    /// An expression referenced a binding that is not bound to a live fact.
    #[error("undefined binding: ${0}")]
    UndefinedBinding(String),

    /// An invalid regular expression was supplied to `matches`.
    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    /// A general evaluation error that does not fit other categories.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Two rules in one rule set share a name.
    #[error("duplicate rule name: {0}")]
    DuplicateRule(String),

    /// A rule's actions failed while firing in strict mode.
    #[error("action failed in rule {rule}: {message}")]
    ActionFailed {
        /// Name of the rule whose activation failed.
        rule: String,
        /// Description of the failure.
        message: String,
    },

    /// Engine configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Rule files could not be read.
    #[error("cannot load rules: {0}")]
    Load(String),

    /// The match worker pool failed.
    #[error("match pool error: {0}")]
    Pool(String),
}

/// Why a backward-chaining proof did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofFailure {
    /// The only remaining routes to the goal required proving a goal that
    /// was already being proved further up the stack.
    #[error("goal {goal} depends on itself")]
    Cyclic {
        /// The goal that recurred.
        goal: String,
    },

    /// Every remaining route needed more nested rule applications than
    /// the configured depth allows.
    #[error("proof depth limit of {depth} exceeded")]
    DepthExceeded {
        /// The configured limit.
        depth: usize,
    },

    /// No fact matches the goal and no rule can derive one.
    #[error("goal {goal} is unprovable")]
    Unprovable {
        /// The goal that could not be proved.
        goal: String,
    },

    /// The proof was cancelled between goal expansions.
    #[error("proof cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = RuleError::TypeError("cannot add bool and int".into());
        assert_eq!(err.to_string(), "type error: cannot add bool and int");

        let err = RuleError::UndefinedBinding("p".into());
        assert_eq!(err.to_string(), "undefined binding: $p");

        let err = RuleError::DuplicateRule("flu".into());
        assert_eq!(err.to_string(), "duplicate rule name: flu");

        let err = RuleError::ActionFailed {
            rule: "flu".into(),
            message: "undefined function: notify".into(),
        };
        assert_eq!(
            err.to_string(),
            "action failed in rule flu: undefined function: notify"
        );

        let err = RuleError::InvalidRegex("unclosed group".into());
        assert_eq!(err.to_string(), "invalid regex: unclosed group");

        let err = RuleError::from(FunctionError::ReadOnly);
        assert_eq!(
            err.to_string(),
            "function error: fact store is read-only in this context"
        );
    }

    #[test]
    fn parse_error_display() {
        let err = ParseError {
            line: 3,
            column: 7,
            expected: "`{`".into(),
            found: "`when`".into(),
        };
        assert_eq!(err.to_string(), "line 3, column 7: expected `{`, found `when`");
    }

    #[test]
    fn parse_error_locates_offsets() {
        let source = "rule a {\n  when x\n}";
        let err = ParseError::at(source, 16, "operator", "end of line");
        assert_eq!((err.line, err.column), (2, 8));
        assert_eq!(locate(source, 0), (1, 1));
        assert_eq!(locate(source, 1000), (3, 2));
    }

    #[test]
    fn proof_failure_display() {
        let err = ProofFailure::Cyclic {
            goal: "A(v == 1)".into(),
        };
        assert_eq!(err.to_string(), "goal A(v == 1) depends on itself");
        assert_eq!(
            ProofFailure::DepthExceeded { depth: 4 }.to_string(),
            "proof depth limit of 4 exceeded"
        );
    }
}
