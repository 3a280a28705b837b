//! Default filter expression engine.
//!
//! A small total expression language over packets, compiled once per
//! filter and evaluated by the filter workers:
//!
//! ```text
//! layer('Eth') != nil && attr('Tcp', 'dst_port') == 80
//! ```
//!
//! Grammar (loosest to tightest binding): `||`/`or`, `&&`/`and`,
//! comparisons (`== != < <= > >=`), unary `!`, then primaries — integer,
//! float and single-quoted string literals, `nil`/`true`/`false`,
//! parentheses, and the builtins `layer(name)`, `attr(layer, key)`,
//! `payload_len()`, `layer_count()`.
//!
//! The prelude is a sequence of `let name = expr;` bindings; identifiers
//! in filter expressions resolve against it by inlining at compile time,
//! so evaluation needs no environment. Evaluation errors (type mismatches)
//! surface as [`FilterEvalError`] and the packet counts as non-matching.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{FilterCompileError, FilterEvalError};
use crate::packet::{AttrValue, Packet};

use super::{FilterCompiler, FilterPredicate};

/// Runtime value of a (sub)expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    /// Index of a matched layer within the packet.
    Layer(usize),
}

impl Value {
    /// Truthiness for logical operators and the final filter verdict.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Layer(_) => true,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Layer(_) => "layer",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Builtin functions, resolved at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Layer,
    Attr,
    PayloadLen,
    LayerCount,
}

impl Builtin {
    fn resolve(name: &str) -> Option<(Self, usize)> {
        match name {
            "layer" => Some((Builtin::Layer, 1)),
            "attr" => Some((Builtin::Attr, 2)),
            "payload_len" => Some((Builtin::PayloadLen, 0)),
            "layer_count" => Some((Builtin::LayerCount, 0)),
            _ => None,
        }
    }
}

/// Compiled expression tree.
#[derive(Debug, Clone)]
enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Call(Builtin, Vec<Expr>),
    Not(Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    Comma,
    Semi,
    Assign,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
}

fn parse_err(offset: usize, reason: impl Into<String>) -> FilterCompileError {
    FilterCompileError::Parse {
        offset,
        reason: reason.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, FilterCompileError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((i, Token::Comma));
                i += 1;
            }
            ';' => {
                tokens.push((i, Token::Semi));
                i += 1;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::NotEq));
                    i += 2;
                } else {
                    tokens.push((i, Token::Bang));
                    i += 1;
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::EqEq));
                    i += 2;
                } else {
                    tokens.push((i, Token::Assign));
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::LtEq));
                    i += 2;
                } else {
                    tokens.push((i, Token::Lt));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::GtEq));
                    i += 2;
                } else {
                    tokens.push((i, Token::Gt));
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((i, Token::AndAnd));
                    i += 2;
                } else {
                    return Err(parse_err(i, "expected '&&'"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push((i, Token::OrOr));
                    i += 2;
                } else {
                    return Err(parse_err(i, "expected '||'"));
                }
            }
            '\'' => {
                let start = i;
                i += 1;
                let from = i;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(parse_err(start, "unterminated string literal"));
                }
                tokens.push((start, Token::Str(input[from..i].to_string())));
                i += 1;
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let is_float = i + 1 < bytes.len()
                    && bytes[i] == b'.'
                    && bytes[i + 1].is_ascii_digit();
                if is_float {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                    let v: f64 = input[start..i]
                        .parse()
                        .map_err(|_| parse_err(start, "invalid float literal"))?;
                    tokens.push((start, Token::Float(v)));
                } else {
                    let v: i64 = input[start..i]
                        .parse()
                        .map_err(|_| parse_err(start, "integer literal out of range"))?;
                    tokens.push((start, Token::Int(v)));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(input[start..i].to_string())));
            }
            _ => return Err(parse_err(i, format!("unexpected character {c:?}"))),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    bindings: &'a HashMap<String, Expr>,
    input_len: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.input_len)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<(), FilterCompileError> {
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(parse_err(self.offset(), format!("expected {what}")))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, FilterCompileError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OrOr))
            || matches!(self.peek(), Some(Token::Ident(id)) if id == "or")
        {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, FilterCompileError> {
        let mut left = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::AndAnd))
            || matches!(self.peek(), Some(Token::Ident(id)) if id == "and")
        {
            self.pos += 1;
            let right = self.parse_cmp()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, FilterCompileError> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::EqEq) => CompareOp::Eq,
            Some(Token::NotEq) => CompareOp::NotEq,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::LtEq) => CompareOp::LtEq,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::GtEq) => CompareOp::GtEq,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_unary()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn parse_unary(&mut self) -> Result<Expr, FilterCompileError> {
        if matches!(self.peek(), Some(Token::Bang)) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, FilterCompileError> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::Int(v)) => Ok(Expr::Int(v)),
            Some(Token::Float(v)) => Ok(Expr::Float(v)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(id)) => match id.as_str() {
                "nil" => Ok(Expr::Nil),
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ if self.peek() == Some(&Token::LParen) => self.parse_call(&id),
                _ => self
                    .bindings
                    .get(&id)
                    .cloned()
                    .ok_or(FilterCompileError::UnknownIdent { name: id }),
            },
            _ => Err(parse_err(offset, "expected expression")),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, FilterCompileError> {
        let (builtin, arity) = Builtin::resolve(name).ok_or_else(|| {
            FilterCompileError::UnknownFunction {
                name: name.to_string(),
            }
        })?;

        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')'")?;

        if args.len() != arity {
            return Err(FilterCompileError::BadCall {
                function: name.to_string(),
                reason: format!("expected {arity} argument(s), got {}", args.len()),
            });
        }
        Ok(Expr::Call(builtin, args))
    }
}

/// Parse a prelude: zero or more `let name = expr;` bindings. Later
/// bindings may reference earlier ones.
fn parse_prelude(input: &str) -> Result<HashMap<String, Expr>, FilterCompileError> {
    let tokens = tokenize(input)?;
    let mut bindings = HashMap::new();
    let mut pos = 0;

    while pos < tokens.len() {
        let (offset, tok) = &tokens[pos];
        match tok {
            Token::Ident(kw) if kw == "let" => pos += 1,
            _ => return Err(parse_err(*offset, "expected 'let'")),
        }

        let name = match tokens.get(pos) {
            Some((_, Token::Ident(name))) => name.clone(),
            _ => {
                return Err(parse_err(
                    tokens.get(pos).map(|(o, _)| *o).unwrap_or(input.len()),
                    "expected binding name",
                ))
            }
        };
        pos += 1;

        match tokens.get(pos) {
            Some((_, Token::Assign)) => pos += 1,
            _ => {
                return Err(parse_err(
                    tokens.get(pos).map(|(o, _)| *o).unwrap_or(input.len()),
                    "expected '='",
                ))
            }
        }

        // The binding body runs until the ';'
        let body_start = pos;
        while pos < tokens.len() && tokens[pos].1 != Token::Semi {
            pos += 1;
        }
        if pos >= tokens.len() {
            return Err(parse_err(input.len(), "expected ';' after binding"));
        }

        let mut parser = Parser {
            tokens: &tokens[body_start..pos],
            pos: 0,
            bindings: &bindings,
            input_len: input.len(),
        };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parse_err(parser.offset(), "trailing tokens in binding"));
        }

        bindings.insert(name, expr);
        pos += 1; // skip ';'
    }

    Ok(bindings)
}

fn parse_expression(
    input: &str,
    bindings: &HashMap<String, Expr>,
) -> Result<Expr, FilterCompileError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        bindings,
        input_len: input.len(),
    };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(parse_err(parser.offset(), "trailing tokens"));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn type_err(reason: String) -> FilterEvalError {
    FilterEvalError::Type { reason }
}

fn eval(expr: &Expr, pkt: &Packet) -> Result<Value, FilterEvalError> {
    match expr {
        Expr::Nil => Ok(Value::Nil),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Float(v) => Ok(Value::Float(*v)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, pkt)?.truthy())),
        Expr::And(l, r) => {
            if !eval(l, pkt)?.truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(r, pkt)?.truthy()))
        }
        Expr::Or(l, r) => {
            if eval(l, pkt)?.truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(r, pkt)?.truthy()))
        }
        Expr::Compare(op, l, r) => compare(*op, eval(l, pkt)?, eval(r, pkt)?),
        Expr::Call(builtin, args) => call(*builtin, args, pkt),
    }
}

fn call(builtin: Builtin, args: &[Expr], pkt: &Packet) -> Result<Value, FilterEvalError> {
    match builtin {
        Builtin::Layer => {
            let name = eval_str(&args[0], pkt, "layer")?;
            Ok(pkt
                .layers()
                .iter()
                .position(|l| l.name() == name)
                .map(Value::Layer)
                .unwrap_or(Value::Nil))
        }
        Builtin::Attr => {
            let layer_name = eval_str(&args[0], pkt, "attr")?;
            let key = eval_str(&args[1], pkt, "attr")?;
            let value = pkt
                .layer(&layer_name)
                .and_then(|l| l.attr(&key))
                .map(attr_to_value)
                .unwrap_or(Value::Nil);
            Ok(value)
        }
        Builtin::PayloadLen => Ok(Value::Int(pkt.payload().len() as i64)),
        Builtin::LayerCount => Ok(Value::Int(pkt.layers().len() as i64)),
    }
}

fn eval_str(expr: &Expr, pkt: &Packet, func: &str) -> Result<String, FilterEvalError> {
    match eval(expr, pkt)? {
        Value::Str(s) => Ok(s),
        other => Err(type_err(format!(
            "{func}: expected string argument, got {}",
            other.type_name()
        ))),
    }
}

fn attr_to_value(attr: &AttrValue) -> Value {
    match attr {
        AttrValue::Int(v) => Value::Int(*v),
        AttrValue::Float(v) => Value::Float(*v),
        AttrValue::Str(s) => Value::Str(s.to_string()),
        AttrValue::Bytes(b) => Value::Bytes(b.clone()),
        // Nested objects are not addressable from the expression language
        AttrValue::Nested(_) => Value::Nil,
    }
}

fn compare(op: CompareOp, left: Value, right: Value) -> Result<Value, FilterEvalError> {
    use CompareOp::*;

    // Equality is total: any two values can be compared, mismatched
    // types are simply unequal.
    if matches!(op, Eq | NotEq) {
        let eq = values_equal(&left, &right);
        return Ok(Value::Bool(if op == Eq { eq } else { !eq }));
    }

    let ordering = match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => {
            return Err(type_err(format!(
                "cannot order {} and {}",
                left.type_name(),
                right.type_name()
            )))
        }
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };

    let result = match op {
        Lt => ordering.is_lt(),
        LtEq => ordering.is_le(),
        Gt => ordering.is_gt(),
        GtEq => ordering.is_ge(),
        Eq | NotEq => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
        (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
        _ => left == right,
    }
}

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// A compiled filter program.
pub struct ExprPredicate {
    expr: Expr,
}

impl FilterPredicate for ExprPredicate {
    fn eval(&self, pkt: &Packet) -> Result<bool, FilterEvalError> {
        Ok(eval(&self.expr, pkt)?.truthy())
    }
}

/// Default [`FilterCompiler`]: the expression language above.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprCompiler;

impl ExprCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl FilterCompiler for ExprCompiler {
    fn compile(
        &self,
        prelude: &str,
        expr: &str,
    ) -> Result<Arc<dyn FilterPredicate>, FilterCompileError> {
        let bindings = parse_prelude(prelude)?;
        let expr = parse_expression(expr, &bindings)?;
        Ok(Arc::new(ExprPredicate { expr }))
    }
}
