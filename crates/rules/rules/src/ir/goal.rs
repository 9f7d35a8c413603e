use std::fmt;

use ruleweave_facts::Value;
use serde::{Deserialize, Serialize};

use super::condition::CompareOp;

/// The right-hand side of a goal constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    /// A concrete value.
    Value(Value),
    /// An unbound variable (`?name`), filled in by a successful proof.
    Var(String),
}

/// One attribute constraint of a [`Goal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalConstraint {
    /// Constrained attribute.
    pub attribute: String,
    /// Comparison operator. Variables are only meaningful with `==`.
    pub op: CompareOp,
    /// Value or variable to compare against.
    pub term: Term,
}

/// A fact pattern to prove with backward chaining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Required fact type, or `None` for any type.
    pub fact_type: Option<String>,
    /// Attribute constraints, all of which must hold.
    pub constraints: Vec<GoalConstraint>,
}

impl Goal {
    /// A goal for facts of `fact_type`.
    pub fn new(fact_type: impl Into<String>) -> Self {
        Self {
            fact_type: Some(fact_type.into()),
            constraints: Vec::new(),
        }
    }

    /// A goal matching facts of any type.
    pub fn any() -> Self {
        Self {
            fact_type: None,
            constraints: Vec::new(),
        }
    }

    /// Require `attribute == value`.
    #[must_use]
    pub fn with(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_constraint(attribute, CompareOp::Eq, value)
    }

    /// Require `attribute <op> value`.
    #[must_use]
    pub fn with_constraint(
        mut self,
        attribute: impl Into<String>,
        op: CompareOp,
        value: impl Into<Value>,
    ) -> Self {
        self.constraints.push(GoalConstraint {
            attribute: attribute.into(),
            op,
            term: Term::Value(value.into()),
        });
        self
    }

    /// Bind the value of `attribute` to the variable `var`.
    #[must_use]
    pub fn with_var(mut self, attribute: impl Into<String>, var: impl Into<String>) -> Self {
        self.constraints.push(GoalConstraint {
            attribute: attribute.into(),
            op: CompareOp::Eq,
            term: Term::Var(var.into()),
        });
        self
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fact_type.as_deref().unwrap_or("_"))?;
        f.write_str("(")?;
        for (i, c) in self.constraints.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {} ", c.attribute, c.op.symbol())?;
            match &c.term {
                Term::Value(v) => write!(f, "{v}")?,
                Term::Var(name) => write!(f, "?{name}")?,
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_constraints_and_vars() {
        let goal = Goal::new("Diagnosis")
            .with("name", "flu")
            .with_constraint("severity", CompareOp::Ge, 2)
            .with_var("patient", "p");
        assert_eq!(
            goal.to_string(),
            r#"Diagnosis(name == "flu", severity >= 2, patient == ?p)"#
        );
        assert_eq!(Goal::any().to_string(), "_()");
    }
}
