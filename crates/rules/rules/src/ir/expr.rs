use std::collections::BTreeSet;

use ruleweave_facts::value::{render_float, render_string};
use serde::{Deserialize, Serialize};

/// Unary operators supported in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Logical negation (`!expr`).
    Not,
    /// Arithmetic negation (`-expr`).
    Neg,
}

/// Arithmetic operators supported in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Addition, or string concatenation.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
}

impl BinaryOp {
    /// The operator's source symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

/// A value expression: the right-hand side of a test, a function argument,
/// or an attribute value in an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// The null literal.
    Null,
    /// A boolean literal.
    Bool(bool),
    /// A 64-bit signed integer literal.
    Int(i64),
    /// A 64-bit floating-point literal.
    Float(f64),
    /// A string literal.
    String(String),
    /// A list of expressions.
    List(Vec<Expr>),
    /// An attribute of a bound fact: `$binding.attribute`.
    Attr {
        /// Binding name, without the `$` sigil.
        binding: String,
        /// Attribute name.
        attribute: String,
    },
    /// A reference to a bound fact itself: `$binding`.
    Binding(String),
    /// A unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// An arithmetic operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// A function call: `name(args...)`.
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Shorthand for [`Expr::Attr`].
    pub fn attr(binding: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Attr {
            binding: binding.into(),
            attribute: attribute.into(),
        }
    }

    /// Returns `true` if the expression is a literal (possibly a list of
    /// literals).
    pub fn is_literal(&self) -> bool {
        match self {
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::String(_) => true,
            Self::List(items) => items.iter().all(Self::is_literal),
            _ => false,
        }
    }

    /// Collect the binding names referenced by this expression.
    pub fn collect_bindings<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::String(_) => {}
            Self::List(items) | Self::Call(_, items) => {
                for item in items {
                    item.collect_bindings(out);
                }
            }
            Self::Attr { binding, .. } | Self::Binding(binding) => {
                out.insert(binding);
            }
            Self::Unary(_, inner) => inner.collect_bindings(out),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_bindings(out);
                rhs.collect_bindings(out);
            }
        }
    }

    /// Collect the names of functions called anywhere in this expression.
    pub fn collect_calls<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::List(items) => {
                for item in items {
                    item.collect_calls(out);
                }
            }
            Self::Call(name, args) => {
                out.insert(name);
                for arg in args {
                    arg.collect_calls(out);
                }
            }
            Self::Unary(_, inner) => inner.collect_calls(out),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_calls(out);
                rhs.collect_calls(out);
            }
            _ => {}
        }
    }

    /// Render the expression in rule-language syntax.
    ///
    /// Binary operations are fully parenthesised so the rendering parses
    /// back to the same tree.
    pub fn to_source(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => render_float(*f),
            Self::String(s) => render_string(s),
            Self::List(items) => format!("[{}]", join_sources(items)),
            Self::Attr { binding, attribute } => format!("${binding}.{attribute}"),
            Self::Binding(binding) => format!("${binding}"),
            Self::Unary(op, expr) => {
                let symbol = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                };
                // `-5` reads back as a negative literal, not a negation.
                if matches!(op, UnaryOp::Neg) && matches!(**expr, Self::Int(_) | Self::Float(_)) {
                    format!("{symbol}({})", expr.to_source())
                } else {
                    format!("{symbol}{}", expr.to_source())
                }
            }
            Self::Binary(op, lhs, rhs) => {
                format!("({} {} {})", lhs.to_source(), op.symbol(), rhs.to_source())
            }
            Self::Call(name, args) => format!("{name}({})", join_sources(args)),
        }
    }
}

/// Render a comma-separated argument or element list.
pub(crate) fn join_sources(items: &[Expr]) -> String {
    items
        .iter()
        .map(Expr::to_source)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_source_literals() {
        assert_eq!(Expr::Null.to_source(), "null");
        assert_eq!(Expr::Int(-4).to_source(), "-4");
        assert_eq!(Expr::Float(2.0).to_source(), "2.0");
        assert_eq!(Expr::String("a \"b\"".into()).to_source(), r#""a \"b\"""#);
        assert_eq!(
            Expr::List(vec![Expr::Int(1), Expr::String("x".into())]).to_source(),
            r#"[1, "x"]"#
        );
    }

    #[test]
    fn to_source_nested_arithmetic() {
        let expr = Expr::Binary(
            BinaryOp::Mul,
            Box::new(Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::attr("p", "age")),
                Box::new(Expr::Int(1)),
            )),
            Box::new(Expr::Call("abs".into(), vec![Expr::Binding("q".into())])),
        );
        assert_eq!(expr.to_source(), "(($p.age + 1) * abs($q))");
    }

    #[test]
    fn negated_number_literals_keep_their_parentheses() {
        let neg = |expr| Expr::Unary(UnaryOp::Neg, Box::new(expr));
        assert_eq!(neg(Expr::Int(5)).to_source(), "-(5)");
        assert_eq!(neg(Expr::Float(2.5)).to_source(), "-(2.5)");
        assert_eq!(neg(neg(Expr::Int(5))).to_source(), "--(5)");
        assert_eq!(neg(Expr::Int(-5)).to_source(), "-(-5)");
        assert_eq!(neg(Expr::attr("p", "x")).to_source(), "-$p.x");
    }

    #[test]
    fn collects_bindings_and_calls() {
        let expr = Expr::Call(
            "max".into(),
            vec![
                Expr::attr("a", "x"),
                Expr::Unary(UnaryOp::Neg, Box::new(Expr::attr("b", "y"))),
                Expr::Call("len".into(), vec![Expr::Binding("a".into())]),
            ],
        );
        let mut bindings = BTreeSet::new();
        expr.collect_bindings(&mut bindings);
        assert_eq!(bindings.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);

        let mut calls = BTreeSet::new();
        expr.collect_calls(&mut calls);
        assert_eq!(calls.into_iter().collect::<Vec<_>>(), vec!["len", "max"]);
    }

    #[test]
    fn literal_detection() {
        assert!(Expr::List(vec![Expr::Int(1), Expr::Null]).is_literal());
        assert!(!Expr::List(vec![Expr::attr("p", "x")]).is_literal());
        assert!(!Expr::Call("f".into(), vec![]).is_literal());
    }
}
