//! Lowering from syntax trees to the rule IR.
//!
//! Lowering owns every check that needs more than one token of context:
//! duplicate rule names, binding declarations, and function existence.

use std::collections::{BTreeMap, BTreeSet};

use ruleweave_facts::Value;
use ruleweave_rules::engine::builtins::is_builtin;
use ruleweave_rules::error::locate;
use ruleweave_rules::{
    Action, Condition, Expr, Goal, GoalConstraint, ParseError, Rule, Term, Test,
};

use crate::ast::{
    ActionNode, CallNode, CondNode, ExprKind, ExprNode, GoalNode, GoalTermNode, Name,
    RuleNode, Target,
};

pub(crate) struct Lowering<'a> {
    source: &'a str,
    known_functions: Option<&'a BTreeSet<String>>,
}

impl<'a> Lowering<'a> {
    pub(crate) fn new(source: &'a str, known_functions: Option<&'a BTreeSet<String>>) -> Self {
        Self {
            source,
            known_functions,
        }
    }

    pub(crate) fn rules(&self, nodes: Vec<RuleNode>) -> Result<Vec<Rule>, ParseError> {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        let mut rules = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(first) = seen.get(&node.name.text) {
                let (line, _) = locate(self.source, *first);
                return Err(self.error(
                    node.name.offset,
                    "unique rule name",
                    format!("`{}` already defined on line {line}", node.name.text),
                ));
            }
            seen.insert(node.name.text.clone(), node.name.offset);
            rules.push(self.rule(node)?);
        }
        Ok(rules)
    }

    fn rule(&self, node: RuleNode) -> Result<Rule, ParseError> {
        let mut scope = Scope::default();
        if let Some(condition) = &node.condition {
            self.declare(condition, &mut scope)?;
        }
        scope.declared = scope.bindings.keys().cloned().collect();

        let condition = match &node.condition {
            Some(condition) => self.condition(condition, &mut scope)?,
            None => None,
        };
        let actions = node
            .actions
            .iter()
            .map(|action| self.action(action, &scope))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rule = Rule::new(node.name.text).with_salience(node.salience);
        rule.actions = actions;
        rule.no_loop = node.no_loop;
        rule.description = node.description;
        rule.bindings = scope.bindings;
        rule.condition = condition.map_or_else(Condition::default, Condition::into_root);
        Ok(rule)
    }

    /// Record every explicitly named binding and its type.
    fn declare(&self, node: &CondNode, scope: &mut Scope) -> Result<(), ParseError> {
        match node {
            CondNode::All(children) | CondNode::Any(children) => {
                for child in children {
                    self.declare(child, scope)?;
                }
            }
            CondNode::Pattern {
                binding: Some(binding),
                fact_type,
                ..
            } => {
                let slot = scope.bindings.entry(binding.text.clone()).or_insert(None);
                if let Some(existing) = slot.as_deref()
                    && existing != fact_type.text
                {
                    return Err(self.error(
                        fact_type.offset,
                        format!("`{existing}` for ${}", binding.text),
                        format!("`{}`", fact_type.text),
                    ));
                }
                *slot = Some(fact_type.text.clone());
            }
            CondNode::Test(test) => {
                if let Target::Bound(binding) = &test.target {
                    scope.bindings.entry(binding.text.clone()).or_insert(None);
                }
            }
            CondNode::Pattern { binding: None, .. } | CondNode::Predicate(_) => {}
        }
        Ok(())
    }

    /// Lower a condition. `None` means the node is trivially satisfied.
    fn condition(
        &self,
        node: &CondNode,
        scope: &mut Scope,
    ) -> Result<Option<Condition>, ParseError> {
        match node {
            CondNode::All(children) => {
                let mut lowered = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(condition) = self.condition(child, scope)? {
                        lowered.push(condition);
                    }
                }
                Ok((!lowered.is_empty()).then_some(Condition::All(lowered)))
            }
            CondNode::Any(children) => {
                let mut lowered = Vec::with_capacity(children.len());
                let mut trivial = false;
                for child in children {
                    match self.condition(child, scope)? {
                        Some(condition) => lowered.push(condition),
                        None => trivial = true,
                    }
                }
                Ok((!trivial).then_some(Condition::Any(lowered)))
            }
            CondNode::Pattern {
                binding,
                fact_type,
                tests,
            } => {
                let binding = match binding {
                    Some(name) => name.text.clone(),
                    None => scope.fresh(Some(fact_type.text.clone())),
                };
                let mut lowered = Vec::with_capacity(tests.len());
                for test in tests {
                    lowered.push(Condition::Test(Test::compare(
                        binding.clone(),
                        test.attribute.clone(),
                        test.op,
                        self.expr(&test.operand, scope)?,
                    )));
                }
                Ok(match lowered.len() {
                    0 => None,
                    1 => lowered.pop(),
                    _ => Some(Condition::All(lowered)),
                })
            }
            CondNode::Test(test) => {
                let operand = self.expr(&test.operand, scope)?;
                let binding = match &test.target {
                    Target::Bare => scope.fresh(None),
                    Target::Typed(fact_type) => scope.fresh(Some(fact_type.text.clone())),
                    Target::Bound(name) => name.text.clone(),
                };
                Ok(Some(Condition::Test(Test::compare(
                    binding,
                    test.attribute.clone(),
                    test.op,
                    operand,
                ))))
            }
            CondNode::Predicate(call) => {
                let (function, args) = self.call(call, scope)?;
                Ok(Some(Condition::Test(Test::Predicate { function, args })))
            }
        }
    }

    fn action(&self, node: &ActionNode, scope: &Scope) -> Result<Action, ParseError> {
        Ok(match node {
            ActionNode::Assert { fact_type, fields } => Action::Assert {
                fact_type: fact_type.text.clone(),
                attributes: self.fields(fields, scope)?,
            },
            ActionNode::Retract { binding } => Action::Retract {
                binding: self.reference(binding, scope)?,
            },
            ActionNode::Modify { binding, fields } => Action::Modify {
                binding: self.reference(binding, scope)?,
                changes: self.fields(fields, scope)?,
            },
            ActionNode::Call(call) => {
                let (function, args) = self.call(call, scope)?;
                Action::Call { function, args }
            }
            ActionNode::Halt => Action::Halt,
        })
    }

    fn fields(
        &self,
        fields: &[(String, ExprNode)],
        scope: &Scope,
    ) -> Result<Vec<(String, Expr)>, ParseError> {
        fields
            .iter()
            .map(|(name, expr)| Ok((name.clone(), self.expr(expr, scope)?)))
            .collect()
    }

    fn call(&self, call: &CallNode, scope: &Scope) -> Result<(String, Vec<Expr>), ParseError> {
        let name = &call.function;
        if let Some(known) = self.known_functions
            && !known.contains(&name.text)
            && !is_builtin(&name.text)
        {
            return Err(self.error(
                name.offset,
                "known function",
                format!("undeclared function `{}`", name.text),
            ));
        }
        let args = call
            .args
            .iter()
            .map(|arg| self.expr(arg, scope))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((name.text.clone(), args))
    }

    fn reference(&self, binding: &Name, scope: &Scope) -> Result<String, ParseError> {
        if scope.declared.contains(&binding.text) {
            Ok(binding.text.clone())
        } else {
            Err(self.error(
                binding.offset,
                "declared binding",
                format!("undeclared binding `${}`", binding.text),
            ))
        }
    }

    fn expr(&self, node: &ExprNode, scope: &Scope) -> Result<Expr, ParseError> {
        let undeclared = |binding: &str| {
            self.error(
                node.offset,
                "declared binding",
                format!("undeclared binding `${binding}`"),
            )
        };
        Ok(match &node.kind {
            ExprKind::Null => Expr::Null,
            ExprKind::Bool(b) => Expr::Bool(*b),
            ExprKind::Int(n) => Expr::Int(*n),
            ExprKind::Float(f) => Expr::Float(*f),
            ExprKind::Str(s) => Expr::String(s.clone()),
            ExprKind::List(items) => Expr::List(
                items
                    .iter()
                    .map(|item| self.expr(item, scope))
                    .collect::<Result<_, _>>()?,
            ),
            ExprKind::Attr { binding, attribute } => {
                if !scope.declared.contains(binding) {
                    return Err(undeclared(binding));
                }
                Expr::attr(binding.clone(), attribute.clone())
            }
            ExprKind::Binding(binding) => {
                if !scope.declared.contains(binding) {
                    return Err(undeclared(binding));
                }
                Expr::Binding(binding.clone())
            }
            ExprKind::Unary(op, inner) => Expr::Unary(*op, Box::new(self.expr(inner, scope)?)),
            ExprKind::Binary(op, lhs, rhs) => Expr::Binary(
                *op,
                Box::new(self.expr(lhs, scope)?),
                Box::new(self.expr(rhs, scope)?),
            ),
            ExprKind::Call(call) => {
                let (function, args) = self.call(call, scope)?;
                Expr::Call(function, args)
            }
        })
    }

    pub(crate) fn goal(&self, node: GoalNode) -> Result<Goal, ParseError> {
        let mut goal = match node.fact_type {
            Some(fact_type) => Goal::new(fact_type),
            None => Goal::any(),
        };
        for constraint in node.constraints {
            let term = match constraint.term {
                GoalTermNode::Var(name) => {
                    if constraint.op != ruleweave_rules::CompareOp::Eq {
                        return Err(self.error(
                            name.offset,
                            "value (variables only bind with `==`)",
                            format!("`?{}`", name.text),
                        ));
                    }
                    Term::Var(name.text)
                }
                GoalTermNode::Value(expr) => Term::Value(self.literal(&expr)?),
            };
            goal.constraints.push(GoalConstraint {
                attribute: constraint.attribute,
                op: constraint.op,
                term,
            });
        }
        Ok(goal)
    }

    fn literal(&self, node: &ExprNode) -> Result<Value, ParseError> {
        Ok(match &node.kind {
            ExprKind::Null => Value::Null,
            ExprKind::Bool(b) => Value::Bool(*b),
            ExprKind::Int(n) => Value::Int(*n),
            ExprKind::Float(f) => Value::Float(*f),
            ExprKind::Str(s) => Value::String(s.clone()),
            ExprKind::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.literal(item))
                    .collect::<Result<_, _>>()?,
            ),
            _ => {
                return Err(self.error(node.offset, "literal value", "expression"));
            }
        })
    }

    fn error(
        &self,
        offset: usize,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> ParseError {
        ParseError::at(self.source, offset, expected, found)
    }
}

/// Bindings of the rule being lowered.
#[derive(Default)]
struct Scope {
    bindings: BTreeMap<String, Option<String>>,
    /// Names written in the source. Only these may be referenced.
    declared: BTreeSet<String>,
    next_anonymous: usize,
}

impl Scope {
    /// Allocate an anonymous binding `_N` that no named binding uses.
    fn fresh(&mut self, fact_type: Option<String>) -> String {
        loop {
            self.next_anonymous += 1;
            let name = format!("_{}", self.next_anonymous);
            if !self.bindings.contains_key(&name) {
                self.bindings.insert(name.clone(), fact_type);
                return name;
            }
        }
    }
}
