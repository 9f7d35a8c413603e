//! Syntax tree produced by the parser. Nodes keep the byte offset of the
//! token that introduced them so lowering can point errors at the source.

use ruleweave_rules::{BinaryOp, CompareOp, UnaryOp};

/// An identifier together with where it appeared.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Name {
    pub text: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RuleNode {
    pub name: Name,
    pub salience: i32,
    pub no_loop: Option<bool>,
    pub description: Option<String>,
    pub condition: Option<CondNode>,
    pub actions: Vec<ActionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CondNode {
    All(Vec<CondNode>),
    Any(Vec<CondNode>),
    /// `[$b:] Type(attr op operand, ...)`
    Pattern {
        binding: Option<Name>,
        fact_type: Name,
        tests: Vec<PatternTest>,
    },
    Test(TestNode),
    Predicate(CallNode),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatternTest {
    pub attribute: String,
    pub op: CompareOp,
    pub operand: ExprNode,
}

/// Which fact the left-hand side of a test reads.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    /// `attr op operand`: a fresh binding of any type.
    Bare,
    /// `Type.attr op operand`: a fresh binding of `Type`.
    Typed(Name),
    /// `$b.attr op operand`
    Bound(Name),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestNode {
    pub target: Target,
    pub attribute: String,
    pub op: CompareOp,
    pub operand: ExprNode,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallNode {
    pub function: Name,
    pub args: Vec<ExprNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExprNode {
    pub kind: ExprKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ExprNode>),
    Attr { binding: String, attribute: String },
    Binding(String),
    Unary(UnaryOp, Box<ExprNode>),
    Binary(BinaryOp, Box<ExprNode>, Box<ExprNode>),
    Call(CallNode),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ActionNode {
    Assert {
        fact_type: Name,
        fields: Vec<(String, ExprNode)>,
    },
    Retract {
        binding: Name,
    },
    Modify {
        binding: Name,
        fields: Vec<(String, ExprNode)>,
    },
    Call(CallNode),
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GoalNode {
    /// `None` for the wildcard `_`.
    pub fact_type: Option<String>,
    pub constraints: Vec<GoalConstraintNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GoalConstraintNode {
    pub attribute: String,
    pub op: CompareOp,
    pub term: GoalTermNode,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GoalTermNode {
    Var(Name),
    Value(ExprNode),
}
