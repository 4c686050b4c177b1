//! Condition language: lexer, recursive-descent parser and paraphrase.
//!
//! ```text
//! expr       := and_expr ( "||" and_expr )*
//! and_expr   := term ( "&&" term )*
//! term       := "(" expr ")" | change | comparison
//! change     := ( "*" | ">" | "<" ) FIELD
//! comparison := FIELD op NUMBER [UNIT]
//! op         := ">" | "<" | ">=" | "<=" | "==" | "!="
//! ```
//!
//! Unit suffixes are attached to the number (`85F`, `25mph`, `10m/s`) and are
//! converted to the field's canonical unit at parse time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConditionError;
use crate::field::{Field, UnitClass, fahrenheit_to_celsius, mph_to_ms};

/// Longest condition text accepted.
pub const MAX_CONDITION_LEN: usize = 4096;

/// Deepest parenthesis nesting accepted.
pub const MAX_NESTING: usize = 32;

/// Comparison operators for threshold conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (==).
    #[serde(rename = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
}

impl CompareOp {
    /// Evaluates `left op right`. Equality is exact on normalized values.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::GreaterThanOrEqual => left >= right,
            Self::LessThan => left < right,
            Self::LessThanOrEqual => left <= right,
            Self::Equal => left == right,
            Self::NotEqual => left != right,
        }
    }

    /// Returns the operator as a string symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }

    /// English phrase used in paraphrases.
    #[must_use]
    pub const fn phrase(&self) -> &'static str {
        match self {
            Self::GreaterThan => "exceeds",
            Self::GreaterThanOrEqual => "is at least",
            Self::LessThan => "is below",
            Self::LessThanOrEqual => "is at most",
            Self::Equal => "is",
            Self::NotEqual => "is not",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// Change-detection direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// `*field`: any difference from the baseline.
    Any,
    /// `>field`: strictly greater than the baseline.
    Increase,
    /// `<field`: strictly less than the baseline.
    Decrease,
}

impl ChangeKind {
    /// Prefix symbol in condition text.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::Any => "*",
            Self::Increase => ">",
            Self::Decrease => "<",
        }
    }

    const fn phrase(self) -> &'static str {
        match self {
            Self::Any => "changes (any value)",
            Self::Increase => "increases",
            Self::Decrease => "decreases",
        }
    }
}

/// A unit suffix on a numeric literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// `F` / `f`.
    Fahrenheit,
    /// `C` / `c`.
    Celsius,
    /// `mph`, any case.
    MilesPerHour,
    /// `m/s` or `ms`, any case.
    MetersPerSecond,
}

impl Unit {
    fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "F" | "f" => Some(Self::Fahrenheit),
            "C" | "c" => Some(Self::Celsius),
            _ => match suffix.to_ascii_lowercase().as_str() {
                "mph" => Some(Self::MilesPerHour),
                "m/s" | "ms" => Some(Self::MetersPerSecond),
                _ => None,
            },
        }
    }

    const fn class(self) -> UnitClass {
        match self {
            Self::Fahrenheit | Self::Celsius => UnitClass::Temperature,
            Self::MilesPerHour | Self::MetersPerSecond => UnitClass::WindSpeed,
        }
    }

    fn to_canonical(self, value: f64) -> f64 {
        match self {
            Self::Fahrenheit => fahrenheit_to_celsius(value),
            Self::MilesPerHour => mph_to_ms(value),
            Self::Celsius | Self::MetersPerSecond => value,
        }
    }
}

/// A numeric literal as the user wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    /// The digits, including any sign.
    pub text: String,
    /// The unit suffix, if any.
    pub unit: Option<Unit>,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            None => f.write_str(&self.text),
            Some(Unit::Fahrenheit) => write!(f, "{}°F", self.text),
            Some(Unit::Celsius) => write!(f, "{}°C", self.text),
            Some(Unit::MilesPerHour) => write!(f, "{} mph", self.text),
            Some(Unit::MetersPerSecond) => write!(f, "{} m/s", self.text),
        }
    }
}

/// A threshold comparison against a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// The field being compared.
    pub field: Field,
    /// The operator.
    pub op: CompareOp,
    /// The threshold in the field's canonical unit.
    pub threshold: f64,
    /// The literal as written, for paraphrase.
    pub literal: Literal,
}

/// A change-detection test against a field's previous reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeDetection {
    /// The field being watched.
    pub field: Field,
    /// Which direction counts as a change.
    pub kind: ChangeKind,
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Both sides must hold; the right side is skipped when the left is false.
    And(Box<Condition>, Box<Condition>),
    /// Either side must hold; the right side is skipped when the left is true.
    Or(Box<Condition>, Box<Condition>),
    /// Threshold comparison.
    Compare(Comparison),
    /// Change detection.
    Change(ChangeDetection),
}

impl Condition {
    /// Renders the condition as an English sentence.
    #[must_use]
    pub fn paraphrase(&self) -> String {
        format!("When {}", self.clause())
    }

    fn clause(&self) -> String {
        match self {
            Self::Or(left, right) => format!("{} OR {}", left.clause(), right.clause()),
            Self::And(left, right) => format!("{} AND {}", left.grouped(), right.grouped()),
            Self::Compare(c) => format!(
                "{} {} {}",
                c.field.display_name(),
                c.op.phrase(),
                c.literal
            ),
            Self::Change(c) => format!("{} {}", c.field.display_name(), c.kind.phrase()),
        }
    }

    fn grouped(&self) -> String {
        match self {
            Self::Or(..) => format!("({})", self.clause()),
            _ => self.clause(),
        }
    }

    /// Returns `true` if any node uses change detection.
    #[must_use]
    pub fn has_change_detection(&self) -> bool {
        match self {
            Self::And(l, r) | Self::Or(l, r) => l.has_change_detection() || r.has_change_detection(),
            Self::Compare(_) => false,
            Self::Change(_) => true,
        }
    }
}

/// Parses condition text into an expression tree.
pub fn parse(text: &str) -> Result<Condition, ConditionError> {
    if text.trim().is_empty() {
        return Err(ConditionError::Empty);
    }
    if text.len() > MAX_CONDITION_LEN {
        return Err(ConditionError::Syntax {
            position: MAX_CONDITION_LEN,
            message: format!("condition longer than {MAX_CONDITION_LEN} bytes"),
        });
    }

    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
        depth: 0,
    };
    let condition = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(ConditionError::Syntax {
            position: token.pos,
            message: format!("unexpected {}", token.kind),
        });
    }
    Ok(condition)
}

/// Parses condition text and returns its paraphrase.
pub fn validate_condition(text: &str) -> Result<String, ConditionError> {
    parse(text).map(|c| c.paraphrase())
}

// ============ Lexer ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    Star,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Number { text: String, unit: Option<String> },
    Symbol(Symbol),
    And,
    Or,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier '{name}'"),
            Self::Number { text, unit } => {
                write!(f, "number '{text}{}'", unit.as_deref().unwrap_or(""))
            }
            Self::Symbol(s) => {
                let sym = match s {
                    Symbol::Gt => ">",
                    Symbol::Ge => ">=",
                    Symbol::Lt => "<",
                    Symbol::Le => "<=",
                    Symbol::Eq => "==",
                    Symbol::Ne => "!=",
                    Symbol::Star => "*",
                };
                write!(f, "'{sym}'")
            }
            Self::And => f.write_str("'&&'"),
            Self::Or => f.write_str("'||'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn syntax(position: usize, message: impl Into<String>) -> ConditionError {
    ConditionError::Syntax {
        position,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ConditionError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let next = bytes.get(i + 1).copied();
        let kind = match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'(' => {
                i += 1;
                TokenKind::LParen
            }
            b')' => {
                i += 1;
                TokenKind::RParen
            }
            b'&' if next == Some(b'&') => {
                i += 2;
                TokenKind::And
            }
            b'|' if next == Some(b'|') => {
                i += 2;
                TokenKind::Or
            }
            b'&' => return Err(syntax(start, "expected '&&'")),
            b'|' => return Err(syntax(start, "expected '||'")),
            b'>' | b'<' => {
                let greater = bytes[i] == b'>';
                if next == Some(b'=') {
                    i += 2;
                    TokenKind::Symbol(if greater { Symbol::Ge } else { Symbol::Le })
                } else {
                    i += 1;
                    TokenKind::Symbol(if greater { Symbol::Gt } else { Symbol::Lt })
                }
            }
            b'=' if next == Some(b'=') => {
                i += 2;
                TokenKind::Symbol(Symbol::Eq)
            }
            b'!' if next == Some(b'=') => {
                i += 2;
                TokenKind::Symbol(Symbol::Ne)
            }
            b'=' => return Err(syntax(start, "expected '=='")),
            b'!' => return Err(syntax(start, "expected '!='")),
            b'*' => {
                i += 1;
                TokenKind::Symbol(Symbol::Star)
            }
            b'-' if matches!(next, Some(b'0'..=b'9' | b'.')) => lex_number(src, &mut i),
            b'0'..=b'9' | b'.' => lex_number(src, &mut i),
            b if b.is_ascii_alphabetic() || b == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                TokenKind::Ident(src[start..i].to_string())
            }
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return Err(syntax(start, format!("unexpected character '{ch}'")));
            }
        };
        tokens.push(Token { kind, pos: start });
    }

    Ok(tokens)
}

fn lex_number(src: &str, i: &mut usize) -> TokenKind {
    let bytes = src.as_bytes();
    let start = *i;
    if bytes[*i] == b'-' {
        *i += 1;
    }
    while *i < bytes.len() && (bytes[*i].is_ascii_digit() || bytes[*i] == b'.') {
        *i += 1;
    }
    let number_end = *i;
    while *i < bytes.len() && (bytes[*i].is_ascii_alphabetic() || bytes[*i] == b'/') {
        *i += 1;
    }
    let unit = (number_end < *i).then(|| src[number_end..*i].to_string());
    TokenKind::Number {
        text: src[start..number_end].to_string(),
        unit,
    }
}

// ============ Parser ============

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek().is_some_and(|t| t.kind == TokenKind::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_term()?;
        while self.peek().is_some_and(|t| t.kind == TokenKind::And) {
            self.pos += 1;
            let right = self.parse_term()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Condition, ConditionError> {
        let Some(token) = self.next() else {
            return Err(syntax(self.end, "unexpected end of condition"));
        };

        match token.kind {
            TokenKind::LParen => {
                self.depth += 1;
                if self.depth > MAX_NESTING {
                    return Err(syntax(token.pos, format!("nesting deeper than {MAX_NESTING}")));
                }
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => {
                        self.depth -= 1;
                        Ok(inner)
                    }
                    Some(other) => Err(syntax(
                        other.pos,
                        format!("expected ')' but found {}", other.kind),
                    )),
                    None => Err(syntax(self.end, "expected ')'")),
                }
            }
            TokenKind::Symbol(sym @ (Symbol::Star | Symbol::Gt | Symbol::Lt)) => {
                let kind = match sym {
                    Symbol::Star => ChangeKind::Any,
                    Symbol::Gt => ChangeKind::Increase,
                    _ => ChangeKind::Decrease,
                };
                match self.next() {
                    Some(Token {
                        kind: TokenKind::Ident(name),
                        pos,
                    }) => Ok(Condition::Change(ChangeDetection {
                        field: resolve_field(&name, pos)?,
                        kind,
                    })),
                    Some(other) => Err(syntax(
                        other.pos,
                        format!("expected field name after '{}'", kind.as_symbol()),
                    )),
                    None => Err(syntax(self.end, "expected field name")),
                }
            }
            TokenKind::Ident(name) => {
                let field = resolve_field(&name, token.pos)?;
                let op = self.parse_operator()?;
                let (text, suffix, pos) = match self.next() {
                    Some(Token {
                        kind: TokenKind::Number { text, unit },
                        pos,
                    }) => (text, unit, pos),
                    Some(other) => {
                        return Err(syntax(
                            other.pos,
                            format!("expected number but found {}", other.kind),
                        ));
                    }
                    None => return Err(syntax(self.end, "expected number")),
                };
                let (threshold, unit) = normalize(field, &text, suffix.as_deref(), pos)?;
                Ok(Condition::Compare(Comparison {
                    field,
                    op,
                    threshold,
                    literal: Literal { text, unit },
                }))
            }
            other => Err(syntax(
                token.pos,
                format!("expected field, change operator or '(' but found {other}"),
            )),
        }
    }

    fn parse_operator(&mut self) -> Result<CompareOp, ConditionError> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Symbol(sym),
                pos,
            }) => match sym {
                Symbol::Gt => Ok(CompareOp::GreaterThan),
                Symbol::Ge => Ok(CompareOp::GreaterThanOrEqual),
                Symbol::Lt => Ok(CompareOp::LessThan),
                Symbol::Le => Ok(CompareOp::LessThanOrEqual),
                Symbol::Eq => Ok(CompareOp::Equal),
                Symbol::Ne => Ok(CompareOp::NotEqual),
                Symbol::Star => Err(syntax(pos, "expected comparison operator but found '*'")),
            },
            Some(other) => Err(syntax(
                other.pos,
                format!("expected comparison operator but found {}", other.kind),
            )),
            None => Err(syntax(self.end, "expected comparison operator")),
        }
    }
}

fn resolve_field(name: &str, position: usize) -> Result<Field, ConditionError> {
    Field::from_name(name).ok_or_else(|| ConditionError::UnknownField {
        name: name.to_string(),
        position,
    })
}

fn normalize(
    field: Field,
    text: &str,
    suffix: Option<&str>,
    position: usize,
) -> Result<(f64, Option<Unit>), ConditionError> {
    let value: f64 = text
        .parse()
        .map_err(|_| syntax(position, format!("invalid number '{text}'")))?;
    if !value.is_finite() {
        return Err(syntax(position, format!("number '{text}' is out of range")));
    }

    let Some(suffix) = suffix else {
        return Ok((value, None));
    };
    let invalid = || ConditionError::InvalidUnit {
        unit: suffix.to_string(),
        field: field.name().to_string(),
        position,
    };
    let unit = Unit::parse(suffix).ok_or_else(invalid)?;
    if unit.class() != field.unit_class() {
        return Err(invalid());
    }
    Ok((unit.to_canonical(value), Some(unit)))
}
