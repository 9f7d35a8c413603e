//! Recursive descent over the token stream.
//!
//! Condition precedence, loosest first: `or`/`||`, `and`/`&&`, atoms.
//! Expression precedence: `+ -`, `* / %`, unary `- !`, primaries. A unary
//! minus directly before a number literal is folded into the literal.
//! Nesting deeper than [`MAX_DEPTH`] levels is rejected.

use ruleweave_rules::{BinaryOp, CompareOp, ParseError, UnaryOp};

use crate::ast::{
    ActionNode, CallNode, CondNode, ExprKind, ExprNode, GoalConstraintNode, GoalNode,
    GoalTermNode, Name, PatternTest, RuleNode, Target, TestNode,
};
use crate::lexer::{Token, TokenKind, tokenize};

/// Deepest nesting of groups, lists, calls and operators the parser accepts.
const MAX_DEPTH: usize = 128;

/// Parse a whole rule file into syntax trees.
pub(crate) fn parse_rules(source: &str) -> Result<Vec<RuleNode>, ParseError> {
    let mut stream = TokenStream::new(source)?;
    if stream.at_eof() {
        return Err(stream.error("`rule`"));
    }
    let mut rules = Vec::new();
    while !stream.at_eof() {
        rules.push(stream.rule()?);
    }
    Ok(rules)
}

/// Parse a single goal such as `Diagnosis(name == "flu", patient == ?p)`.
pub(crate) fn parse_goal(source: &str) -> Result<GoalNode, ParseError> {
    let mut stream = TokenStream::new(source)?;
    let goal = stream.goal()?;
    if !stream.at_eof() {
        return Err(stream.error("end of input"));
    }
    Ok(goal)
}

struct TokenStream<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'s> TokenStream<'s> {
    fn new(source: &'s str) -> Result<Self, ParseError> {
        let tokens = tokenize(source)?;
        check_delimiters(source, &tokens)?;
        Ok(Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    // -----------------------------------------------------------------------
    // Cursor helpers
    // -----------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn error(&self, expected: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError::at(self.source, token.offset, expected, token.kind.describe())
    }

    fn is_punct(&self, c: char) -> bool {
        self.peek().kind == TokenKind::Punct(c)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        let hit = self.is_punct(c);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.error(format!("`{c}`")))
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(w) if w == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        let hit = self.is_word(word);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect_word(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.error(format!("`{word}`")))
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let hit = matches!(self.peek().kind, TokenKind::Op(o) if o == op);
        if hit {
            self.pos += 1;
        }
        hit
    }

    /// Step one level deeper into the tree being built.
    fn descend(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("nesting depth within {MAX_DEPTH}")));
        }
        self.depth += 1;
        Ok(())
    }

    fn ident(&mut self, what: &str) -> Result<Name, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(text) => {
                self.pos += 1;
                Ok(Name {
                    text,
                    offset: token.offset,
                })
            }
            _ => Err(self.error(what)),
        }
    }

    fn var(&mut self) -> Result<Name, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Var(text) => {
                self.pos += 1;
                Ok(Name {
                    text,
                    offset: token.offset,
                })
            }
            _ => Err(self.error("binding such as `$p`")),
        }
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    fn rule(&mut self) -> Result<RuleNode, ParseError> {
        self.expect_word("rule")?;
        let token = self.peek().clone();
        let name = match token.kind {
            TokenKind::Ident(text) | TokenKind::Str(text) => {
                self.pos += 1;
                Name {
                    text,
                    offset: token.offset,
                }
            }
            _ => return Err(self.error("rule name")),
        };

        let mut node = RuleNode {
            name,
            salience: 0,
            no_loop: None,
            description: None,
            condition: None,
            actions: Vec::new(),
        };
        loop {
            if self.eat_word("salience") {
                node.salience = self.salience()?;
            } else if self.peek().kind == TokenKind::NoLoop {
                self.pos += 1;
                node.no_loop = Some(if self.eat_word("false") {
                    false
                } else {
                    self.eat_word("true");
                    true
                });
            } else if self.eat_word("description") {
                let TokenKind::Str(text) = self.peek().kind.clone() else {
                    return Err(self.error("description string"));
                };
                self.pos += 1;
                node.description = Some(text);
            } else {
                break;
            }
        }

        self.expect_punct('{')?;
        if self.eat_word("when") && !self.is_word("then") {
            node.condition = Some(self.or_condition()?);
        }
        self.expect_word("then")?;
        while !self.is_punct('}') {
            node.actions.push(self.action()?);
        }
        self.expect_punct('}')?;
        Ok(node)
    }

    fn salience(&mut self) -> Result<i32, ParseError> {
        let sign = self.peek().offset;
        let negative = self.eat_op("-");
        let token = self.peek().clone();
        let TokenKind::Int(magnitude) = token.kind else {
            return Err(self.error("salience integer"));
        };
        let value = i64::try_from(magnitude)
            .ok()
            .map(|n| if negative { -n } else { n })
            .and_then(|n| i32::try_from(n).ok());
        match value {
            Some(salience) => {
                self.pos += 1;
                Ok(salience)
            }
            None => Err(ParseError::at(
                self.source,
                sign,
                "salience within 32-bit range",
                format!("`{}{magnitude}`", if negative { "-" } else { "" }),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    fn or_condition(&mut self) -> Result<CondNode, ParseError> {
        let mut children = vec![self.and_condition()?];
        while self.eat_word("or") || self.eat_op("||") {
            children.push(self.and_condition()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            CondNode::Any(children)
        })
    }

    fn and_condition(&mut self) -> Result<CondNode, ParseError> {
        let mut children = vec![self.condition_atom()?];
        while self.eat_word("and") || self.eat_op("&&") {
            children.push(self.condition_atom()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            CondNode::All(children)
        })
    }

    fn condition_atom(&mut self) -> Result<CondNode, ParseError> {
        if self.is_punct('(') {
            self.descend()?;
            self.pos += 1;
            let inner = self.or_condition()?;
            self.expect_punct(')')?;
            self.depth -= 1;
            return Ok(inner);
        }
        let next = self.peek_at(1).kind.clone();
        match self.peek().kind.clone() {
            TokenKind::Var(_) => match next {
                TokenKind::Punct(':') => {
                    let binding = self.var()?;
                    self.pos += 1;
                    let fact_type = self.ident("fact type")?;
                    let tests = self.pattern_tests()?;
                    Ok(CondNode::Pattern {
                        binding: Some(binding),
                        fact_type,
                        tests,
                    })
                }
                TokenKind::Punct('.') => {
                    let binding = self.var()?;
                    self.pos += 1;
                    self.test(Target::Bound(binding))
                }
                _ => {
                    self.pos += 1;
                    Err(self.error("`:` or `.` after binding"))
                }
            },
            TokenKind::Ident(_) => match next {
                TokenKind::Punct('(') if self.looks_like_pattern() => {
                    let fact_type = self.ident("fact type")?;
                    let tests = self.pattern_tests()?;
                    Ok(CondNode::Pattern {
                        binding: None,
                        fact_type,
                        tests,
                    })
                }
                TokenKind::Punct('(') => Ok(CondNode::Predicate(self.call()?)),
                TokenKind::Punct('.') => {
                    let fact_type = self.ident("fact type")?;
                    self.pos += 1;
                    self.test(Target::Typed(fact_type))
                }
                _ => self.test(Target::Bare),
            },
            _ => Err(self.error("condition")),
        }
    }

    /// `Name(` opens a pattern when its first entry is `attr op ...`, or
    /// when it is empty and the name is capitalized. Otherwise it is a
    /// predicate call.
    fn looks_like_pattern(&self) -> bool {
        match &self.peek_at(2).kind {
            TokenKind::Punct(')') => matches!(
                &self.peek().kind,
                TokenKind::Ident(name) if name.starts_with(|c: char| c.is_ascii_uppercase())
            ),
            TokenKind::Ident(_) => starts_compare_op(&self.peek_at(3).kind),
            _ => false,
        }
    }

    fn pattern_tests(&mut self) -> Result<Vec<PatternTest>, ParseError> {
        self.expect_punct('(')?;
        let mut tests = Vec::new();
        if !self.is_punct(')') {
            loop {
                let attribute = self.ident("attribute")?.text;
                let op = self.compare_op()?;
                let operand = self.expr()?;
                tests.push(PatternTest {
                    attribute,
                    op,
                    operand,
                });
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        self.expect_punct(')')?;
        Ok(tests)
    }

    fn test(&mut self, target: Target) -> Result<CondNode, ParseError> {
        let attribute = self.ident("attribute")?.text;
        let op = self.compare_op()?;
        let operand = self.expr()?;
        Ok(CondNode::Test(TestNode {
            target,
            attribute,
            op,
            operand,
        }))
    }

    fn compare_op(&mut self) -> Result<CompareOp, ParseError> {
        let op = match self.peek().kind.clone() {
            TokenKind::Op("==") => CompareOp::Eq,
            TokenKind::Op("!=") => CompareOp::Ne,
            TokenKind::Op("<") => CompareOp::Lt,
            TokenKind::Op("<=") => CompareOp::Le,
            TokenKind::Op(">") => CompareOp::Gt,
            TokenKind::Op(">=") => CompareOp::Ge,
            TokenKind::Ident(word) if word == "in" => CompareOp::In,
            TokenKind::Ident(word) if word == "contains" => CompareOp::Contains,
            TokenKind::Ident(word) if word == "matches" => CompareOp::Matches,
            TokenKind::Ident(word) if word == "not" => {
                if !matches!(&self.peek_at(1).kind, TokenKind::Ident(next) if next == "in") {
                    self.pos += 1;
                    return Err(self.error("`in` after `not`"));
                }
                self.pos += 1;
                CompareOp::NotIn
            }
            _ => return Err(self.error("comparison operator")),
        };
        self.pos += 1;
        Ok(op)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    fn action(&mut self) -> Result<ActionNode, ParseError> {
        let next_is_call = self.peek_at(1).kind == TokenKind::Punct('(');
        let action = if self.is_word("assert") && !next_is_call {
            self.pos += 1;
            let fact_type = self.ident("fact type")?;
            let fields = self.fields()?;
            ActionNode::Assert { fact_type, fields }
        } else if self.is_word("retract") && !next_is_call {
            self.pos += 1;
            ActionNode::Retract {
                binding: self.var()?,
            }
        } else if self.is_word("modify") && !next_is_call {
            self.pos += 1;
            let binding = self.var()?;
            let fields = self.fields()?;
            ActionNode::Modify { binding, fields }
        } else if self.is_word("halt") && !next_is_call {
            self.pos += 1;
            ActionNode::Halt
        } else if self.is_word("call") && !next_is_call {
            self.pos += 1;
            ActionNode::Call(self.call()?)
        } else if matches!(self.peek().kind, TokenKind::Ident(_)) && next_is_call {
            ActionNode::Call(self.call()?)
        } else {
            return Err(self.error("action"));
        };
        self.expect_punct(';')?;
        Ok(action)
    }

    fn fields(&mut self) -> Result<Vec<(String, ExprNode)>, ParseError> {
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        while !self.is_punct('}') {
            let name = self.ident("attribute name")?.text;
            self.expect_punct(':')?;
            fields.push((name, self.expr()?));
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct('}')?;
        Ok(fields)
    }

    fn call(&mut self) -> Result<CallNode, ParseError> {
        let function = self.ident("function name")?;
        self.expect_punct('(')?;
        self.descend()?;
        let args = self.expr_list(')')?;
        self.depth -= 1;
        Ok(CallNode { function, args })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn expr(&mut self) -> Result<ExprNode, ParseError> {
        let entry = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOp::Add
            } else if self.eat_op("-") {
                BinaryOp::Sub
            } else {
                self.depth = entry;
                return Ok(lhs);
            };
            // Each operator nests the chain so far one level deeper.
            self.descend()?;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<ExprNode, ParseError> {
        let entry = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOp::Mul
            } else if self.eat_op("/") {
                BinaryOp::Div
            } else if self.eat_op("%") {
                BinaryOp::Mod
            } else {
                self.depth = entry;
                return Ok(lhs);
            };
            self.descend()?;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<ExprNode, ParseError> {
        let offset = self.peek().offset;
        if self.eat_op("-") {
            let folded = match self.peek().kind {
                TokenKind::Int(magnitude) => Some(negate_int(magnitude).map(ExprKind::Int)),
                TokenKind::Float(f) => Some(Some(ExprKind::Float(-f))),
                _ => None,
            };
            return match folded {
                Some(Some(kind)) => {
                    self.pos += 1;
                    Ok(ExprNode { kind, offset })
                }
                Some(None) => Err(self.error("integer within 64-bit range")),
                None => {
                    self.descend()?;
                    let inner = self.unary()?;
                    self.depth -= 1;
                    Ok(ExprNode {
                        kind: ExprKind::Unary(UnaryOp::Neg, Box::new(inner)),
                        offset,
                    })
                }
            };
        }
        if self.eat_op("!") {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(ExprNode {
                kind: ExprKind::Unary(UnaryOp::Not, Box::new(inner)),
                offset,
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<ExprNode, ParseError> {
        let token = self.peek().clone();
        let offset = token.offset;
        let kind = match token.kind {
            TokenKind::Int(n) => match i64::try_from(n) {
                Ok(n) => ExprKind::Int(n),
                Err(_) => return Err(self.error("integer within 64-bit range")),
            },
            TokenKind::Float(f) => ExprKind::Float(f),
            TokenKind::Str(s) => ExprKind::Str(s),
            TokenKind::Ident(word) => match word.as_str() {
                "true" => ExprKind::Bool(true),
                "false" => ExprKind::Bool(false),
                "null" => ExprKind::Null,
                _ if self.peek_at(1).kind == TokenKind::Punct('(') => {
                    return Ok(ExprNode {
                        kind: ExprKind::Call(self.call()?),
                        offset,
                    });
                }
                _ => return Err(self.error("expression")),
            },
            TokenKind::Var(binding) => {
                self.pos += 1;
                let kind = if self.eat_punct('.') {
                    ExprKind::Attr {
                        binding,
                        attribute: self.ident("attribute")?.text,
                    }
                } else {
                    ExprKind::Binding(binding)
                };
                return Ok(ExprNode { kind, offset });
            }
            TokenKind::Punct('[') => {
                self.descend()?;
                self.pos += 1;
                let items = self.expr_list(']')?;
                self.depth -= 1;
                return Ok(ExprNode {
                    kind: ExprKind::List(items),
                    offset,
                });
            }
            TokenKind::Punct('(') => {
                self.descend()?;
                self.pos += 1;
                let inner = self.expr()?;
                self.expect_punct(')')?;
                self.depth -= 1;
                return Ok(inner);
            }
            _ => return Err(self.error("expression")),
        };
        self.pos += 1;
        Ok(ExprNode { kind, offset })
    }

    /// Comma-separated expressions up to and including `close`.
    fn expr_list(&mut self, close: char) -> Result<Vec<ExprNode>, ParseError> {
        let mut items = Vec::new();
        while !self.is_punct(close) {
            items.push(self.expr()?);
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(close)?;
        Ok(items)
    }

    // -----------------------------------------------------------------------
    // Goals
    // -----------------------------------------------------------------------

    fn goal(&mut self) -> Result<GoalNode, ParseError> {
        let fact_type = self.ident("fact type or `_`")?.text;
        self.expect_punct('(')?;
        let mut constraints = Vec::new();
        while !self.is_punct(')') {
            let attribute = self.ident("attribute")?.text;
            let op = self.compare_op()?;
            let token = self.peek().clone();
            let term = match token.kind {
                TokenKind::Query(text) => {
                    self.pos += 1;
                    GoalTermNode::Var(Name {
                        text,
                        offset: token.offset,
                    })
                }
                _ => GoalTermNode::Value(self.expr()?),
            };
            constraints.push(GoalConstraintNode {
                attribute,
                op,
                term,
            });
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;
        Ok(GoalNode {
            fact_type: (fact_type != "_").then_some(fact_type),
            constraints,
        })
    }
}

fn binary(op: BinaryOp, lhs: ExprNode, rhs: ExprNode) -> ExprNode {
    let offset = lhs.offset;
    ExprNode {
        kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
        offset,
    }
}

fn negate_int(magnitude: u64) -> Option<i64> {
    if magnitude == i64::MIN.unsigned_abs() {
        Some(i64::MIN)
    } else {
        i64::try_from(magnitude).ok().map(|n| -n)
    }
}

fn starts_compare_op(kind: &TokenKind) -> bool {
    match kind {
        TokenKind::Op(op) => matches!(*op, "==" | "!=" | "<" | "<=" | ">" | ">="),
        TokenKind::Ident(word) => matches!(word.as_str(), "in" | "not" | "contains" | "matches"),
        _ => false,
    }
}

/// Reject unbalanced `()`, `[]` and `{}` before parsing starts.
fn check_delimiters(source: &str, tokens: &[Token]) -> Result<(), ParseError> {
    let mut open: Vec<(char, usize)> = Vec::new();
    for token in tokens {
        let TokenKind::Punct(c) = token.kind else {
            continue;
        };
        match c {
            '(' | '[' | '{' => open.push((c, token.offset)),
            ')' | ']' | '}' => match open.pop() {
                Some((opener, _)) if closer_for(opener) == c => {}
                Some((opener, _)) => {
                    return Err(ParseError::at(
                        source,
                        token.offset,
                        format!("`{}`", closer_for(opener)),
                        format!("`{c}`"),
                    ));
                }
                None => {
                    return Err(ParseError::at(
                        source,
                        token.offset,
                        "balanced delimiters",
                        format!("unmatched `{c}`"),
                    ));
                }
            },
            _ => {}
        }
    }
    if let Some((opener, offset)) = open.pop() {
        let (line, column) = ruleweave_rules::error::locate(source, offset);
        return Err(ParseError::at(
            source,
            source.len(),
            format!(
                "`{}` to close `{opener}` at line {line}, column {column}",
                closer_for(opener)
            ),
            "end of input",
        ));
    }
    Ok(())
}

fn closer_for(opener: char) -> char {
    match opener {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}
