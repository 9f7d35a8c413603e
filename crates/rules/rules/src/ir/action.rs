use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::expr::{Expr, join_sources};

/// One step of a rule's right-hand side, executed in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Insert (or replace) a fact built from evaluated attributes.
    Assert {
        /// Type of the new fact.
        fact_type: String,
        /// Attribute names and value expressions, in source order.
        attributes: Vec<(String, Expr)>,
    },
    /// Remove the fact bound to `binding`.
    Retract {
        /// Binding name.
        binding: String,
    },
    /// Update attributes of the fact bound to `binding` in place.
    Modify {
        /// Binding name.
        binding: String,
        /// Attribute names and value expressions, in source order.
        changes: Vec<(String, Expr)>,
    },
    /// Invoke a registered function.
    Call {
        /// Function name.
        function: String,
        /// Call arguments.
        args: Vec<Expr>,
    },
    /// Stop the run once this activation has finished.
    Halt,
}

impl Action {
    /// Binding names this action reads or targets.
    pub fn bindings(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        match self {
            Self::Assert { attributes, .. } => {
                for (_, expr) in attributes {
                    expr.collect_bindings(&mut out);
                }
            }
            Self::Retract { binding } => {
                out.insert(binding.as_str());
            }
            Self::Modify { binding, changes } => {
                out.insert(binding.as_str());
                for (_, expr) in changes {
                    expr.collect_bindings(&mut out);
                }
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_bindings(&mut out);
                }
            }
            Self::Halt => {}
        }
        out
    }

    /// Render the action in rule-language syntax, including the trailing `;`.
    pub fn to_source(&self) -> String {
        match self {
            Self::Assert {
                fact_type,
                attributes,
            } => format!("assert {fact_type} {};", render_fields(attributes)),
            Self::Retract { binding } => format!("retract ${binding};"),
            Self::Modify { binding, changes } => {
                format!("modify ${binding} {};", render_fields(changes))
            }
            Self::Call { function, args } => format!("call {function}({});", join_sources(args)),
            Self::Halt => "halt;".to_owned(),
        }
    }
}

fn render_fields(fields: &[(String, Expr)]) -> String {
    if fields.is_empty() {
        return "{}".to_owned();
    }
    let inner = fields
        .iter()
        .map(|(name, expr)| format!("{name}: {}", expr.to_source()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{ {inner} }}")
}
