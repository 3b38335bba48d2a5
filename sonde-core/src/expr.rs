//! Expression language for assertions and `${{ ... }}` placeholders.
//!
//! Expressions are side-effect free and operate on JSON values. Names are
//! resolved through a [`Lookup`], so an assertion such as
//! `response.status_code == 200 && "id" in response.json` reads straight
//! from the namespace the request was executed in.
//!
//! ```text
//! or      := and (("||" | "or") and)*
//! and     := not (("&&" | "and") not)*
//! not     := ("!" | "not") not | compare
//! compare := sum (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | postfix
//! postfix := primary ("." ident | "[" or "]")*
//! primary := number | string | "true" | "false" | "null"
//!          | "[" (or ("," or)*)? "]" | "(" or ")" | ident ("(" args ")")?
//! ```
use itertools::Itertools;
use serde_json::{Number, Value};
use std::cmp::Ordering;

use crate::namespace::{Lookup, UndefinedVariable};

const KEYWORDS: &[&str] = &["true", "false", "null", "and", "or", "not", "in"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Undefined(#[from] UndefinedVariable),
    #[error("syntax error at offset {offset}: {reason}")]
    Syntax { offset: usize, reason: String },
    #[error("key \"{0}\" not found")]
    MissingKey(String),
    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("type error: {0}")]
    Type(String),
    #[error("unknown function \"{0}\"")]
    UnknownFunction(String),
    #[error("function \"{name}\" expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("division by zero")]
    DivisionByZero,
}

fn syntax(offset: usize, reason: impl Into<String>) -> EvalError {
    EvalError::Syntax {
        offset,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Name(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Parse and evaluate `src` in one go.
pub fn evaluate<L: Lookup + ?Sized>(src: &str, scope: &L) -> Result<Value, EvalError> {
    parse(src)?.eval(scope)
}

/// Parse an expression.
pub fn parse(src: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(syntax(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(syntax(parser.offset(), "unexpected trailing input"));
    }
    Ok(expr)
}

/// Parse a variable path such as `response.json.items[0]["id"]`.
///
/// Only names followed by field and literal index accessors are accepted.
pub fn parse_path(src: &str) -> Result<Expr, EvalError> {
    let expr = parse(src)?;
    if expr.is_path() {
        Ok(expr)
    } else {
        Err(syntax(0, format!("\"{}\" is not a variable path", src.trim())))
    }
}

impl Expr {
    fn is_path(&self) -> bool {
        match self {
            Expr::Name(_) => true,
            Expr::Field(base, _) => base.is_path(),
            Expr::Index(base, index) => base.is_path() && matches!(**index, Expr::Literal(_)),
            Expr::Literal(_)
            | Expr::List(_)
            | Expr::Call(..)
            | Expr::Unary(..)
            | Expr::Binary(..) => false,
        }
    }

    /// Whether the expression reads the variable `name` anywhere.
    pub fn references(&self, name: &str) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Name(n) => n == name,
            Expr::List(items) | Expr::Call(_, items) => items.iter().any(|e| e.references(name)),
            Expr::Field(base, _) | Expr::Unary(_, base) => base.references(name),
            Expr::Index(lhs, rhs) | Expr::Binary(_, lhs, rhs) => {
                lhs.references(name) || rhs.references(name)
            }
        }
    }

    pub fn eval<L: Lookup + ?Sized>(&self, scope: &L) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(items) => items
                .iter()
                .map(|item| item.eval(scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Name(name) => Ok(scope.lookup(name)?.clone()),
            Expr::Field(base, key) => field(base.eval(scope)?, key),
            Expr::Index(base, index) => {
                let base = base.eval(scope)?;
                index_value(base, &index.eval(scope)?)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| arg.eval(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, args)
            }
            Expr::Unary(UnaryOp::Not, operand) => {
                Ok(Value::Bool(!as_bool(&operand.eval(scope)?, "!")?))
            }
            Expr::Unary(UnaryOp::Neg, operand) => negate(operand.eval(scope)?),
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !as_bool(&lhs.eval(scope)?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(as_bool(&rhs.eval(scope)?, "&&")?))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if as_bool(&lhs.eval(scope)?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(as_bool(&rhs.eval(scope)?, "||")?))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = lhs.eval(scope)?;
                binary(*op, lhs, rhs.eval(scope)?)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
}

fn scan_while(bytes: &[u8], mut i: usize, pred: impl Fn(u8) -> bool) -> usize {
    while bytes.get(i).is_some_and(|b| pred(*b)) {
        i += 1;
    }
    i
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&b) = bytes.get(i) {
        let start = i;
        let token = match b {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'0'..=b'9' => {
                i = scan_while(bytes, i, |b| b.is_ascii_digit());
                let is_float = bytes.get(i) == Some(&b'.')
                    && bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
                if is_float {
                    i = scan_while(bytes, i + 1, |b| b.is_ascii_digit());
                }
                let text = &src[start..i];
                let number = if is_float {
                    text.parse::<f64>().ok().and_then(Number::from_f64)
                } else {
                    text.parse::<i64>().ok().map(Number::from)
                };
                Token::Number(
                    number.ok_or_else(|| syntax(start, format!("invalid number \"{text}\"")))?,
                )
            }
            b'"' | b'\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(syntax(start, "unterminated string")),
                        Some(&q) if q == b => {
                            i += 1;
                            break;
                        }
                        Some(b'\\') => {
                            match bytes.get(i + 1) {
                                Some(b'n') => value.push('\n'),
                                Some(b't') => value.push('\t'),
                                Some(&c) if c.is_ascii() => value.push(char::from(c)),
                                _ => return Err(syntax(i, "invalid escape sequence")),
                            }
                            i += 2;
                        }
                        Some(_) => {
                            let ch = src[i..].chars().next().unwrap_or_default();
                            value.push(ch);
                            i += ch.len_utf8();
                        }
                    }
                }
                Token::Str(value)
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                i = scan_while(bytes, i, |b| b.is_ascii_alphanumeric() || b == b'_');
                Token::Ident(src[start..i].to_string())
            }
            _ => {
                let (token, len) = match (b, bytes.get(i + 1)) {
                    (b'=', Some(b'=')) => (Token::EqEq, 2),
                    (b'!', Some(b'=')) => (Token::NotEq, 2),
                    (b'<', Some(b'=')) => (Token::Le, 2),
                    (b'>', Some(b'=')) => (Token::Ge, 2),
                    (b'&', Some(b'&')) => (Token::AndAnd, 2),
                    (b'|', Some(b'|')) => (Token::OrOr, 2),
                    (b'<', _) => (Token::Lt, 1),
                    (b'>', _) => (Token::Gt, 1),
                    (b'!', _) => (Token::Bang, 1),
                    (b'(', _) => (Token::LParen, 1),
                    (b')', _) => (Token::RParen, 1),
                    (b'[', _) => (Token::LBracket, 1),
                    (b']', _) => (Token::RBracket, 1),
                    (b',', _) => (Token::Comma, 1),
                    (b'.', _) => (Token::Dot, 1),
                    (b'+', _) => (Token::Plus, 1),
                    (b'-', _) => (Token::Minus, 1),
                    (b'*', _) => (Token::Star, 1),
                    (b'/', _) => (Token::Slash, 1),
                    (b'%', _) => (Token::Percent, 1),
                    _ => {
                        let ch = src[i..].chars().next().unwrap_or_default();
                        return Err(syntax(i, format!("unexpected character '{ch}'")));
                    }
                };
                i += len;
                token
            }
        };
        tokens.push((start, token));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.end, |(offset, _)| *offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek().cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(ident)) if ident == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), EvalError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(syntax(self.offset(), format!("expected {what}")))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Bang) || self.eat_keyword("not") {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Ident(ident)) if ident == "in" => BinaryOp::In,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let offset = self.offset();
                match self.advance() {
                    Some(Token::Ident(key)) => expr = Expr::Field(Box::new(expr), key),
                    _ => return Err(syntax(offset, "expected a field name after '.'")),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_or()?;
                self.expect(&Token::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::LBracket) => Ok(Expr::List(self.parse_items(&Token::RBracket, "']'")?)),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                keyword if KEYWORDS.contains(&keyword) => {
                    Err(syntax(offset, format!("unexpected keyword \"{keyword}\"")))
                }
                _ if self.eat(&Token::LParen) => {
                    Ok(Expr::Call(ident, self.parse_items(&Token::RParen, "')'")?))
                }
                _ => Ok(Expr::Name(ident)),
            },
            Some(_) => Err(syntax(offset, "unexpected token")),
            None => Err(syntax(offset, "unexpected end of expression")),
        }
    }

    fn parse_items(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma, &format!("',' or {what}"))?;
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn as_bool(value: &Value, op: &str) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| {
        EvalError::Type(format!(
            "operator '{op}' expects bool, got {}",
            type_name(value)
        ))
    })
}

fn field(base: Value, key: &str) -> Result<Value, EvalError> {
    match base {
        Value::Object(mut map) => map
            .remove(key)
            .ok_or_else(|| EvalError::MissingKey(key.to_string())),
        other => Err(EvalError::Type(format!(
            "cannot read field \"{key}\" of {}",
            type_name(&other)
        ))),
    }
}

fn index_value(base: Value, index: &Value) -> Result<Value, EvalError> {
    match (base, index) {
        (Value::Object(map), Value::String(key)) => field(Value::Object(map), key),
        (Value::Array(mut items), Value::Number(n)) => {
            let index = n
                .as_i64()
                .ok_or_else(|| EvalError::Type(format!("list index must be an integer, got {n}")))?;
            let len = items.len();
            let position = if index < 0 {
                i64::try_from(len).ok().and_then(|len| len.checked_add(index))
            } else {
                Some(index)
            };
            match position.and_then(|p| usize::try_from(p).ok()) {
                Some(p) if p < len => Ok(items.swap_remove(p)),
                _ => Err(EvalError::IndexOutOfRange { index, len }),
            }
        }
        (base, index) => Err(EvalError::Type(format!(
            "cannot index {} with {}",
            type_name(&base),
            type_name(index)
        ))),
    }
}

fn negate(value: Value) -> Result<Value, EvalError> {
    match &value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(i64::checked_neg) {
                return Ok(Value::from(i));
            }
            float(-n.as_f64().unwrap_or_default())
        }
        other => Err(EvalError::Type(format!(
            "cannot negate {}",
            type_name(other)
        ))),
    }
}

fn float(value: f64) -> Result<Value, EvalError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Type("arithmetic produced a non-finite number".into()))
}

fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a == b || a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, EvalError> {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b)),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        EvalError::Type(format!(
            "cannot compare {} with {}",
            type_name(lhs),
            type_name(rhs)
        ))
    })
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, EvalError> {
    match (haystack, needle) {
        (Value::String(s), Value::String(sub)) => Ok(s.contains(sub.as_str())),
        (Value::Array(items), _) => Ok(items.iter().any(|item| equals(item, needle))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(EvalError::Type(format!(
            "cannot search for {} in {}",
            type_name(needle),
            type_name(haystack)
        ))),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Number, rhs: &Number) -> Result<Value, EvalError> {
    if let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Rem if b == 0 => return Err(EvalError::DivisionByZero),
            BinaryOp::Rem => a.checked_rem(b),
            BinaryOp::Div if b == 0 => return Err(EvalError::DivisionByZero),
            BinaryOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
            _ => None,
        };
        if let Some(value) = exact {
            return Ok(Value::from(value));
        }
    }

    let (a, b) = (lhs.as_f64().unwrap_or_default(), rhs.as_f64().unwrap_or_default());
    match op {
        BinaryOp::Add => float(a + b),
        BinaryOp::Sub => float(a - b),
        BinaryOp::Mul => float(a * b),
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => Err(EvalError::DivisionByZero),
        BinaryOp::Div => float(a / b),
        BinaryOp::Rem => float(a % b),
        _ => Err(EvalError::Type(format!("{op:?} is not an arithmetic operator"))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(&lhs, &rhs))),
        BinaryOp::Lt => Ok(Value::Bool(compare(&lhs, &rhs)?.is_lt())),
        BinaryOp::Le => Ok(Value::Bool(compare(&lhs, &rhs)?.is_le())),
        BinaryOp::Gt => Ok(Value::Bool(compare(&lhs, &rhs)?.is_gt())),
        BinaryOp::Ge => Ok(Value::Bool(compare(&lhs, &rhs)?.is_ge())),
        BinaryOp::In => Ok(Value::Bool(contains(&rhs, &lhs)?)),
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (Value::Number(a), Value::Number(b)) => arithmetic(op, &a, &b),
            (a, b) => Err(EvalError::Type(format!(
                "cannot add {} and {}",
                type_name(&a),
                type_name(&b)
            ))),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
            _ => Err(EvalError::Type(format!(
                "unsupported operand types for {op:?}: {} and {}",
                type_name(&lhs),
                type_name(&rhs)
            ))),
        },
        BinaryOp::And => Ok(Value::Bool(as_bool(&lhs, "&&")? & as_bool(&rhs, "&&")?)),
        BinaryOp::Or => Ok(Value::Bool(as_bool(&lhs, "||")? | as_bool(&rhs, "||")?)),
    }
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(EvalError::Arity {
                name: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    let string = |value: &Value| -> Result<String, EvalError> {
        value.as_str().map(str::to_string).ok_or_else(|| {
            EvalError::Type(format!(
                "{name}() expects a string, got {}",
                type_name(value)
            ))
        })
    };

    match name {
        "len" => {
            arity(1)?;
            let len = match &args[..] {
                [Value::String(s)] => s.chars().count(),
                [Value::Array(items)] => items.len(),
                [Value::Object(map)] => map.len(),
                _ => {
                    return Err(EvalError::Type(format!(
                        "len() is not defined for {}",
                        args.iter().map(type_name).join(", ")
                    )))
                }
            };
            Ok(Value::from(len))
        }
        "lower" | "upper" => {
            arity(1)?;
            let s = string(&args[0])?;
            Ok(Value::String(if name == "lower" {
                s.to_lowercase()
            } else {
                s.to_uppercase()
            }))
        }
        "contains" => {
            arity(2)?;
            Ok(Value::Bool(contains(&args[0], &args[1])?))
        }
        "starts_with" | "ends_with" => {
            arity(2)?;
            let (s, affix) = (string(&args[0])?, string(&args[1])?);
            Ok(Value::Bool(if name == "starts_with" {
                s.starts_with(&affix)
            } else {
                s.ends_with(&affix)
            }))
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use test_case::test_case;

    fn scope() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "response": {
                "status_code": 200,
                "headers": {"content-type": "application/json"},
                "json": {"items": [{"id": 1}, {"id": 2}], "name": "sonde", "ratio": 0.5},
            },
            "limit": 2,
        }) else {
            unreachable!()
        };
        map
    }

    #[test_case("response.status_code == 200", json!(true); "equality")]
    #[test_case("response.status_code != 200", json!(false); "inequality")]
    #[test_case("response.status_code >= 200 && response.status_code < 300", json!(true); "range")]
    #[test_case("response.status_code == 404 or limit == 2", json!(true); "keyword or")]
    #[test_case("not (limit > 5)", json!(true); "keyword not")]
    #[test_case("len(response.json.items) == limit", json!(true); "len builtin")]
    #[test_case("response.json.items[-1].id", json!(2); "negative index")]
    #[test_case("response.headers[\"content-type\"]", json!("application/json"); "string index")]
    #[test_case("\"id\" in response.json.items[0]", json!(true); "key membership")]
    #[test_case("'son' in response.json.name", json!(true); "substring membership")]
    #[test_case("2 in [1, 2, 3]", json!(true); "list membership")]
    #[test_case("1 + 2 * 3", json!(7); "precedence")]
    #[test_case("7 / 2", json!(3.5); "float division")]
    #[test_case("8 / 2", json!(4); "exact division")]
    #[test_case("response.json.ratio * 4 == 2", json!(true); "mixed number equality")]
    #[test_case("'a' + 'b'", json!("ab"); "string concat")]
    #[test_case("upper(response.json.name)", json!("SONDE"); "upper builtin")]
    #[test_case("starts_with(response.headers['content-type'], 'application/')", json!(true); "starts_with builtin")]
    #[test_case("-limit", json!(-2); "negation")]
    #[test_case("null == null", json!(true); "null literal")]
    fn evaluates(src: &str, expected: Value) -> eyre::Result<()> {
        assert_eq!(evaluate(src, &scope())?, expected);
        Ok(())
    }

    #[test]
    fn and_short_circuits_before_undefined_name() -> eyre::Result<()> {
        assert_eq!(evaluate("false && missing", &scope())?, json!(false));
        Ok(())
    }

    #[test_case("missing == 1", EvalError::Undefined(UndefinedVariable("missing".into())); "undefined")]
    #[test_case("response.json.nope", EvalError::MissingKey("nope".into()); "missing key")]
    #[test_case("response.json.items[5]", EvalError::IndexOutOfRange { index: 5, len: 2 }; "out of range")]
    #[test_case("1 / 0", EvalError::DivisionByZero; "division by zero")]
    #[test_case("frobnicate(1)", EvalError::UnknownFunction("frobnicate".into()); "unknown function")]
    fn fails(src: &str, expected: EvalError) {
        assert_eq!(evaluate(src, &scope()), Err(expected));
    }

    #[test_case("'a' < 1"; "ordering across types")]
    #[test_case("limit && true"; "non boolean operand")]
    #[test_case("limit.field"; "field of number")]
    fn type_errors(src: &str) {
        assert!(matches!(evaluate(src, &scope()), Err(EvalError::Type(_))));
    }

    #[test_case(""; "empty")]
    #[test_case("1 +"; "dangling operator")]
    #[test_case("(1"; "unclosed paren")]
    #[test_case("'abc"; "unterminated string")]
    #[test_case("a ? b"; "unknown character")]
    #[test_case("a b"; "trailing input")]
    fn syntax_errors(src: &str) {
        assert!(matches!(parse(src), Err(EvalError::Syntax { .. })));
    }

    #[test]
    fn parse_path_accepts_accessors_only() -> eyre::Result<()> {
        parse_path("response.json.items[0][\"id\"]")?;
        assert!(parse_path("a + b").is_err());
        assert!(parse_path("a[b]").is_err());
        Ok(())
    }

    #[test]
    fn references_finds_nested_names() -> eyre::Result<()> {
        assert!(parse("len(response.json) > 0")?.references("response"));
        assert!(!parse("limit + 1")?.references("response"));
        Ok(())
    }
}
