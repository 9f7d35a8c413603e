//! Token recognition for the rule language.
//!
//! `nom` recognizes one token at a time. Whitespace and line comments
//! (`//` or `#` to end of line) are skipped between tokens, and every token
//! records the byte offset where it starts so later stages can report
//! line and column.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit1, multispace1, one_of},
    combinator::{opt, recognize, value},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{pair, preceded},
};
use ruleweave_facts::value::{render_float, render_string};
use ruleweave_rules::ParseError;

/// Operators, longest first so that `<=` wins over `<`.
const OPERATORS: [&str; 14] = [
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!",
];

/// Characters that can only start an operator.
const OPERATOR_CHARS: &str = "=!<>&|+-*/%~^@";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    /// `$name`
    Var(String),
    /// `?name`
    Query(String),
    Int(u64),
    Float(f64),
    Str(String),
    NoLoop,
    Op(&'static str),
    Punct(char),
    Eof,
}

impl TokenKind {
    /// How the token reads in an error message.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("`{name}`"),
            Self::Var(name) => format!("`${name}`"),
            Self::Query(name) => format!("`?{name}`"),
            Self::Int(n) => format!("`{n}`"),
            Self::Float(f) => format!("`{}`", render_float(*f)),
            Self::Str(s) => format!("string {}", render_string(s)),
            Self::NoLoop => "`no-loop`".to_owned(),
            Self::Op(op) => format!("`{op}`"),
            Self::Punct(c) => format!("`{c}`"),
            Self::Eof => "end of input".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Split `source` into tokens. The last token is always [`TokenKind::Eof`].
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    loop {
        if let Ok((next, ())) = trivia(rest) {
            rest = next;
        }
        let offset = source.len() - rest.len();
        if rest.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                offset,
            });
            return Ok(tokens);
        }
        match token(rest) {
            Ok((next, kind)) => {
                tokens.push(Token { kind, offset });
                rest = next;
            }
            Err(_) => return Err(lex_error(source, rest)),
        }
    }
}

// ---------------------------------------------------------------------------
// Trivia
// ---------------------------------------------------------------------------

fn trivia(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((multispace1, line_comment))))(input)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(alt((tag("//"), tag("#"))), take_till(|c| c == '\n')))(input)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

fn token(input: &str) -> IResult<&str, TokenKind> {
    alt((
        lex_string,
        lex_number,
        lex_variable,
        lex_query,
        lex_no_loop,
        lex_word,
        lex_operator,
        lex_punct,
    ))(input)
}

fn ident_str(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex_word(input: &str) -> IResult<&str, TokenKind> {
    let (rest, word) = ident_str(input)?;
    Ok((rest, TokenKind::Ident(word.to_owned())))
}

fn lex_variable(input: &str) -> IResult<&str, TokenKind> {
    let (rest, name) = preceded(char('$'), ident_str)(input)?;
    Ok((rest, TokenKind::Var(name.to_owned())))
}

fn lex_query(input: &str) -> IResult<&str, TokenKind> {
    let (rest, name) = preceded(char('?'), ident_str)(input)?;
    Ok((rest, TokenKind::Query(name.to_owned())))
}

fn lex_no_loop(input: &str) -> IResult<&str, TokenKind> {
    let (rest, _) = tag("no-loop")(input)?;
    if rest.chars().next().is_some_and(is_ident_char) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((rest, TokenKind::NoLoop))
}

/// Parse an unsigned number literal. Signs are handled by the parser.
fn lex_number(input: &str) -> IResult<&str, TokenKind> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    if text.contains('.') {
        let f: f64 = text
            .parse()
            .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Float)))?;
        Ok((rest, TokenKind::Float(f)))
    } else {
        let n: u64 = text
            .parse()
            .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::TooLarge)))?;
        Ok((rest, TokenKind::Int(n)))
    }
}

/// Parse a double-quoted string literal.
fn lex_string(input: &str) -> IResult<&str, TokenKind> {
    let (input, _) = char('"')(input)?;
    let mut result = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((&input[idx + 1..], TokenKind::Str(result))),
            '\\' => match chars.next() {
                Some((_, 'n')) => result.push('\n'),
                Some((_, 't')) => result.push('\t'),
                Some((_, 'r')) => result.push('\r'),
                Some((_, '\\')) => result.push('\\'),
                Some((_, '"')) => result.push('"'),
                Some((_, other)) => {
                    result.push('\\');
                    result.push(other);
                }
                None => break,
            },
            other => result.push(other),
        }
    }
    Err(nom::Err::Failure(Error::new(input, ErrorKind::Char)))
}

fn lex_operator(input: &str) -> IResult<&str, TokenKind> {
    match OPERATORS.iter().find(|op| input.starts_with(**op)) {
        Some(op) => Ok((&input[op.len()..], TokenKind::Op(*op))),
        None => Err(nom::Err::Error(Error::new(input, ErrorKind::Tag))),
    }
}

fn lex_punct(input: &str) -> IResult<&str, TokenKind> {
    let (rest, c) = one_of("(){}[],;:.")(input)?;
    Ok((rest, TokenKind::Punct(c)))
}

/// Describe why no token could be recognized at `rest`.
fn lex_error(source: &str, rest: &str) -> ParseError {
    let offset = source.len() - rest.len();
    let Some(first) = rest.chars().next() else {
        return ParseError::at(source, offset, "token", "end of input");
    };
    if first == '"' {
        return ParseError::at(source, source.len(), "closing `\"`", "end of input");
    }
    if first.is_ascii_digit() {
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        return ParseError::at(
            source,
            offset,
            "integer within 64-bit range",
            format!("`{digits}`"),
        );
    }
    if OPERATOR_CHARS.contains(first) {
        let run: String = rest
            .chars()
            .take_while(|c| OPERATOR_CHARS.contains(*c))
            .collect();
        return ParseError::at(
            source,
            offset,
            "known operator",
            format!("unknown operator `{run}`"),
        );
    }
    if first == '$' || first == '?' {
        let found = rest[1..]
            .chars()
            .next()
            .map_or_else(|| "end of input".to_owned(), |c| format!("`{c}`"));
        return ParseError::at(source, offset + 1, format!("name after `{first}`"), found);
    }
    ParseError::at(source, offset, "token", format!("`{first}`"))
}
