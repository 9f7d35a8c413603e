use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::expr::{Expr, join_sources};

/// Comparison operators usable in a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Membership in a list (or substring of a string).
    In,
    /// Negated membership.
    NotIn,
    /// The attribute (string or list) contains the operand.
    Contains,
    /// The attribute matches the operand as a regular expression.
    Matches,
}

impl CompareOp {
    /// Every operator, longest symbols first so that prefix matching in a
    /// tokenizer picks `<=` over `<`.
    pub const ALL: [Self; 10] = [
        Self::Eq,
        Self::Ne,
        Self::Le,
        Self::Ge,
        Self::Lt,
        Self::Gt,
        Self::NotIn,
        Self::In,
        Self::Contains,
        Self::Matches,
    ];

    /// The operator's source spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Contains => "contains",
            Self::Matches => "matches",
        }
    }
}

/// A single predicate over bound facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Test {
    /// `$binding.attribute <op> operand`.
    Compare {
        /// Binding whose attribute is tested.
        binding: String,
        /// The tested attribute.
        attribute: String,
        /// Comparison operator.
        op: CompareOp,
        /// Right-hand side: a literal, another fact's attribute, arithmetic,
        /// or a function call.
        operand: Expr,
    },
    /// A registered function used as a predicate; satisfied when it returns
    /// a truthy value.
    Predicate {
        /// Function name.
        function: String,
        /// Call arguments.
        args: Vec<Expr>,
    },
}

impl Test {
    /// Shorthand for [`Test::Compare`].
    pub fn compare(
        binding: impl Into<String>,
        attribute: impl Into<String>,
        op: CompareOp,
        operand: Expr,
    ) -> Self {
        Self::Compare {
            binding: binding.into(),
            attribute: attribute.into(),
            op,
            operand,
        }
    }

    /// Binding names this test reads.
    pub fn bindings(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        match self {
            Self::Compare {
                binding, operand, ..
            } => {
                out.insert(binding.as_str());
                operand.collect_bindings(&mut out);
            }
            Self::Predicate { args, .. } => {
                for arg in args {
                    arg.collect_bindings(&mut out);
                }
            }
        }
        out
    }

    /// Render the test in rule-language syntax.
    pub fn to_source(&self) -> String {
        match self {
            Self::Compare {
                binding,
                attribute,
                op,
                operand,
            } => format!(
                "${binding}.{attribute} {} {}",
                op.symbol(),
                operand.to_source()
            ),
            Self::Predicate { function, args } => format!("{function}({})", join_sources(args)),
        }
    }
}

/// A rule's left-hand side: tests combined with conjunction and
/// disjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Every child must hold.
    All(Vec<Condition>),
    /// At least one child must hold.
    Any(Vec<Condition>),
    /// A single test.
    Test(Test),
}

impl Default for Condition {
    fn default() -> Self {
        Self::All(Vec::new())
    }
}

impl Condition {
    /// Normalise into the canonical root form: an `All` whose nested `All`s
    /// and `Any`s are flattened and whose single-child groups are unwrapped.
    #[must_use]
    pub fn into_root(self) -> Self {
        match self.normalize() {
            root @ Self::All(_) => root,
            other => Self::All(vec![other]),
        }
    }

    fn normalize(self) -> Self {
        match self {
            Self::Test(_) => self,
            Self::All(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.normalize() {
                        Self::All(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                if flat.len() == 1 {
                    flat.remove(0)
                } else {
                    Self::All(flat)
                }
            }
            Self::Any(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.normalize() {
                        Self::Any(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                if flat.len() == 1 {
                    flat.remove(0)
                } else {
                    Self::Any(flat)
                }
            }
        }
    }

    /// All tests in depth-first, left-to-right order.
    pub fn tests(&self) -> Vec<&Test> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Test(test) => out.push(test),
                Self::All(children) | Self::Any(children) => {
                    stack.extend(children.iter().rev());
                }
            }
        }
        out
    }

    /// Expand into disjunctive normal form: each branch is a conjunction of
    /// tests, and the condition holds when any branch holds.
    pub fn branches(&self) -> Vec<Vec<&Test>> {
        match self {
            Self::Test(test) => vec![vec![test]],
            Self::Any(children) => children.iter().flat_map(Self::branches).collect(),
            Self::All(children) => {
                let mut product: Vec<Vec<&Test>> = vec![Vec::new()];
                for child in children {
                    let options = child.branches();
                    let mut next = Vec::with_capacity(product.len() * options.len());
                    for prefix in &product {
                        for option in &options {
                            let mut branch = prefix.clone();
                            branch.extend(option.iter().copied());
                            next.push(branch);
                        }
                    }
                    product = next;
                }
                product
            }
        }
    }

    /// Render in rule-language syntax. A root `All` renders without
    /// surrounding parentheses.
    pub fn to_source(&self) -> String {
        match self {
            Self::All(children) => children
                .iter()
                .map(Self::to_nested_source)
                .collect::<Vec<_>>()
                .join(" and "),
            other => other.to_nested_source(),
        }
    }

    fn to_nested_source(&self) -> String {
        match self {
            Self::Test(test) => test.to_source(),
            Self::All(children) => format!(
                "({})",
                children
                    .iter()
                    .map(Self::to_nested_source)
                    .collect::<Vec<_>>()
                    .join(" and ")
            ),
            Self::Any(children) => format!(
                "({})",
                children
                    .iter()
                    .map(Self::to_nested_source)
                    .collect::<Vec<_>>()
                    .join(" or ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(binding: &str, attribute: &str, value: i64) -> Condition {
        Condition::Test(Test::compare(
            binding,
            attribute,
            CompareOp::Eq,
            Expr::Int(value),
        ))
    }

    #[test]
    fn into_root_flattens_nested_groups() {
        let cond = Condition::All(vec![
            t("a", "x", 1),
            Condition::All(vec![t("a", "y", 2), Condition::Any(vec![t("b", "z", 3)])]),
        ])
        .into_root();
        assert_eq!(
            cond,
            Condition::All(vec![t("a", "x", 1), t("a", "y", 2), t("b", "z", 3)])
        );
    }

    #[test]
    fn into_root_wraps_single_disjunction() {
        let cond = Condition::Any(vec![t("a", "x", 1), t("a", "x", 2)]).into_root();
        assert!(matches!(&cond, Condition::All(children) if children.len() == 1));
        assert_eq!(cond.to_source(), "($a.x == 1 or $a.x == 2)");
    }

    #[test]
    fn branches_expand_to_dnf() {
        let cond = Condition::All(vec![
            t("a", "x", 1),
            Condition::Any(vec![t("b", "y", 2), t("c", "z", 3)]),
            Condition::Any(vec![t("d", "w", 4), t("e", "v", 5)]),
        ]);
        let branches = cond.branches();
        assert_eq!(branches.len(), 4);
        assert!(branches.iter().all(|b| b.len() == 3));
        assert_eq!(branches[1][2].to_source(), "$e.v == 5");
    }

    #[test]
    fn empty_condition_has_one_empty_branch() {
        let condition = Condition::default();
        let branches = condition.branches();
        assert_eq!(branches, vec![Vec::<&Test>::new()]);
    }

    #[test]
    fn tests_are_listed_depth_first() {
        let cond = Condition::All(vec![
            Condition::Any(vec![t("a", "x", 1), t("b", "y", 2)]),
            t("c", "z", 3),
        ]);
        let order: Vec<_> = cond.tests().iter().map(|t| t.to_source()).collect();
        assert_eq!(order, vec!["$a.x == 1", "$b.y == 2", "$c.z == 3"]);
    }

    #[test]
    fn nested_rendering_parenthesises_groups() {
        let cond = Condition::All(vec![
            t("a", "x", 1),
            Condition::Any(vec![
                Condition::All(vec![t("b", "y", 2), t("b", "z", 3)]),
                Condition::Test(Test::Predicate {
                    function: "flag".into(),
                    args: vec![Expr::Binding("a".into())],
                }),
            ]),
        ]);
        assert_eq!(
            cond.to_source(),
            "$a.x == 1 and (($b.y == 2 and $b.z == 3) or flag($a))"
        );
    }
}
