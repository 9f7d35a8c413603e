use std::collections::{BTreeMap, BTreeSet};

use ruleweave_facts::value::render_string;
use serde::{Deserialize, Serialize};

use super::action::Action;
use super::condition::{Condition, Test};
use crate::error::RuleError;

/// A parsed, immutable production rule.
///
/// Bindings name the facts a rule talks about. Tests constrain them and
/// actions read or change them. Two bindings may be satisfied by the same
/// fact unless a test says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique name within a rule set.
    pub name: String,
    /// Priority for conflict resolution. Higher values fire first.
    pub salience: i32,
    /// Suppress re-activation from facts this rule itself last changed.
    /// `None` defers to the engine's `no_loop_default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_loop: Option<bool>,
    /// Optional description of what this rule does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared bindings and their optional fact type constraint.
    pub bindings: BTreeMap<String, Option<String>>,
    /// Left-hand side, always an `All` at the root.
    pub condition: Condition,
    /// Right-hand side, executed in order.
    pub actions: Vec<Action>,
}

impl Rule {
    /// Create a rule with no conditions and no actions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            salience: 0,
            no_loop: None,
            description: None,
            bindings: BTreeMap::new(),
            condition: Condition::default(),
            actions: Vec::new(),
        }
    }

    /// Set the salience.
    #[must_use]
    pub fn with_salience(mut self, salience: i32) -> Self {
        self.salience = salience;
        self
    }

    /// Set the no-loop flag explicitly.
    #[must_use]
    pub fn with_no_loop(mut self, no_loop: bool) -> Self {
        self.no_loop = Some(no_loop);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare a binding constrained to facts of `fact_type`.
    #[must_use]
    pub fn with_binding(mut self, name: impl Into<String>, fact_type: impl Into<String>) -> Self {
        self.bindings.insert(name.into(), Some(fact_type.into()));
        self
    }

    /// Add a condition to the conjunction. Bindings tested by it that are
    /// not yet declared are declared untyped.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        for test in condition.tests() {
            if let Test::Compare { binding, .. } = test {
                self.bindings.entry(binding.clone()).or_insert(None);
            }
        }
        let mut children = match std::mem::take(&mut self.condition) {
            Condition::All(children) => children,
            other => vec![other],
        };
        children.push(condition);
        self.condition = Condition::All(children).into_root();
        self
    }

    /// Append an action.
    #[must_use]
    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// The effective no-loop flag given the engine default.
    pub fn no_loop_or(&self, default: bool) -> bool {
        self.no_loop.unwrap_or(default)
    }

    /// Check that every binding the rule references is declared.
    pub fn validate(&self) -> Result<(), RuleError> {
        let mut referenced: BTreeSet<&str> = BTreeSet::new();
        for test in self.condition.tests() {
            referenced.extend(test.bindings());
        }
        for action in &self.actions {
            referenced.extend(action.bindings());
        }
        match referenced
            .into_iter()
            .find(|name| !self.bindings.contains_key(*name))
        {
            Some(name) => Err(RuleError::UndefinedBinding(name.to_owned())),
            None => Ok(()),
        }
    }

    /// Render the rule in canonical rule-language syntax.
    ///
    /// Parsing the rendering yields a rule equal to `self`.
    pub fn to_source(&self) -> String {
        let mut out = format!(
            "rule {} salience {}",
            render_string(&self.name),
            self.salience
        );
        match self.no_loop {
            Some(true) => out.push_str(" no-loop"),
            Some(false) => out.push_str(" no-loop false"),
            None => {}
        }
        if let Some(description) = &self.description {
            out.push_str(" description ");
            out.push_str(&render_string(description));
        }
        out.push_str(" {\n    when\n");

        let mut clauses: Vec<String> = self
            .bindings
            .iter()
            .filter_map(|(name, fact_type)| {
                fact_type.as_ref().map(|t| format!("${name}: {t}()"))
            })
            .collect();
        let condition = self.condition.to_source();
        if !condition.is_empty() {
            clauses.push(condition);
        }
        if !clauses.is_empty() {
            out.push_str("        ");
            out.push_str(&clauses.join(" and "));
            out.push('\n');
        }

        out.push_str("    then\n");
        for action in &self.actions {
            out.push_str("        ");
            out.push_str(&action.to_source());
            out.push('\n');
        }
        out.push_str("}\n");
        out
    }
}

/// Render several rules, separated by blank lines.
pub fn render_rules(rules: &[Rule]) -> String {
    rules
        .iter()
        .map(Rule::to_source)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::condition::CompareOp;
    use crate::ir::expr::Expr;

    fn flu() -> Rule {
        Rule::new("flu")
            .with_salience(10)
            .with_no_loop(true)
            .with_binding("p", "Patient")
            .when(Condition::Test(Test::compare(
                "p",
                "fever",
                CompareOp::Eq,
                Expr::Bool(true),
            )))
            .when(Condition::Test(Test::compare(
                "c",
                "cough",
                CompareOp::Eq,
                Expr::Bool(true),
            )))
            .then(Action::Assert {
                fact_type: "Diagnosis".into(),
                attributes: vec![("name".into(), Expr::String("flu".into()))],
            })
    }

    #[test]
    fn builder_declares_tested_bindings() {
        let rule = flu();
        assert_eq!(rule.bindings.get("p"), Some(&Some("Patient".to_owned())));
        assert_eq!(rule.bindings.get("c"), Some(&None));
        assert!(matches!(&rule.condition, Condition::All(c) if c.len() == 2));
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_action_binding() {
        let rule = Rule::new("bad").then(Action::Retract {
            binding: "ghost".into(),
        });
        assert!(matches!(
            rule.validate(),
            Err(RuleError::UndefinedBinding(name)) if name == "ghost"
        ));
    }

    #[test]
    fn to_source_canonical_layout() {
        let expected = "rule \"flu\" salience 10 no-loop {\n    when\n        \
                        $p: Patient() and $p.fever == true and $c.cough == true\n    \
                        then\n        assert Diagnosis { name: \"flu\" };\n}\n";
        assert_eq!(flu().to_source(), expected);
    }

    #[test]
    fn to_source_empty_rule() {
        let rule = Rule::new("noop").with_description("does nothing");
        assert_eq!(
            rule.to_source(),
            "rule \"noop\" salience 0 description \"does nothing\" {\n    when\n    then\n}\n"
        );
    }

    #[test]
    fn no_loop_default_applies_when_unset() {
        assert!(Rule::new("a").no_loop_or(true));
        assert!(!Rule::new("a").with_no_loop(false).no_loop_or(true));
    }
}
