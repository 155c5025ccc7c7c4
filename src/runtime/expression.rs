/// Restricted expression language for condition and data_transform nodes
///
/// Workflow definitions are user-authored, so config never carries host code.
/// Instead `condition` and `data_transform` accept a small expression
/// language evaluated here: literals, dotted paths into the context
/// variables, `!`/`-`, arithmetic, comparisons and `&&`/`||`.
///
/// Precedence, lowest first: `||`, `&&`, `== !=`, `< <= > >=`, `+ -`,
/// `* / %`, unary.

use crate::workflow::types::ExecutionContext;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: BinaryOp,
        left: &'static str,
        right: &'static str,
    },

    #[error("cannot apply '-' to {0}")]
    InvalidNegation(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("expression is longer than {0} tokens")]
    TooLong(usize),
}

/// Deepest nesting of parentheses and unary operators accepted
pub const MAX_DEPTH: usize = 64;

/// Longest expression accepted, bounding the depth of operator chains
pub const MAX_TOKENS: usize = 1024;

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// Dotted path, first segment names a node
    Path(Vec<String>),
    Not(Box<Expression>),
    Negate(Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
        };
        f.write_str(symbol)
    }
}

/// Parse and evaluate `source` against the context in one step
pub fn evaluate_str(source: &str, context: &ExecutionContext) -> Result<Value, ExpressionError> {
    Expression::parse(source)?.evaluate(context)
}

/// JavaScript-style truthiness over JSON values
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.len() > MAX_TOKENS {
            return Err(ExpressionError::TooLong(MAX_TOKENS));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expression = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expression),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
        }
    }

    pub fn evaluate(&self, context: &ExecutionContext) -> Result<Value, ExpressionError> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Path(segments) => Ok(context
                .lookup(segments.iter().map(String::as_str))
                .cloned()
                .unwrap_or(Value::Null)),
            Expression::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.evaluate(context)?))),
            Expression::Negate(inner) => match inner.evaluate(context)? {
                Value::Number(n) => Ok(number(-n.as_f64().unwrap_or(0.0))),
                other => Err(ExpressionError::InvalidNegation(type_name(&other))),
            },
            Expression::Binary(BinaryOp::And, left, right) => {
                if !is_truthy(&left.evaluate(context)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&right.evaluate(context)?)))
            }
            Expression::Binary(BinaryOp::Or, left, right) => {
                if is_truthy(&left.evaluate(context)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&right.evaluate(context)?)))
            }
            Expression::Binary(op, left, right) => {
                apply(*op, left.evaluate(context)?, right.evaluate(context)?)
            }
        }
    }
}

fn apply(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExpressionError> {
    let mismatch = |left: &Value, right: &Value| ExpressionError::TypeMismatch {
        op,
        left: type_name(left),
        right: type_name(right),
    };

    match op {
        BinaryOp::Equal => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Add => match (&left, &right) {
            (Value::String(a), b) => Ok(Value::String(format!("{a}{}", display(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{b}", display(a)))),
            (Value::Number(a), Value::Number(b)) => {
                Ok(number(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)))
            }
            _ => Err(mismatch(&left, &right)),
        },
        BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Err(mismatch(&left, &right));
            };
            match op {
                BinaryOp::Subtract => Ok(number(a - b)),
                BinaryOp::Multiply => Ok(number(a * b)),
                _ if b == 0.0 => Err(ExpressionError::DivisionByZero),
                BinaryOp::Divide => Ok(number(a / b)),
                _ => Ok(number(a % b)),
            }
        }
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .unwrap_or(0.0)
                    .partial_cmp(&b.as_f64().unwrap_or(0.0)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return Err(mismatch(&left, &right)),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in evaluate"),
    }
}

/// Numbers compare by value so `1 == 1.0`; everything else by JSON equality
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Integral results stay integers so `2 * 3` yields `6`, not `6.0`
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    /// Integer path segment following a dot (`items.0`)
    Index(String),
    Dot,
    LParen,
    RParen,
    Op(BinaryOp),
    Bang,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Ident(s) | Token::Index(s) => f.write_str(s),
            Token::Dot => f.write_str("."),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Op(op) => write!(f, "{op}"),
            Token::Bang => f.write_str("!"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let after_dot = matches!(tokens.last(), Some(Token::Dot));

        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(match c {
                    '+' => BinaryOp::Add,
                    '-' => BinaryOp::Subtract,
                    '*' => BinaryOp::Multiply,
                    '/' => BinaryOp::Divide,
                    _ => BinaryOp::Remainder,
                }));
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                let followed_by_eq = chars.get(i + 1) == Some(&'=');
                let token = match (c, followed_by_eq) {
                    ('<', true) => Token::Op(BinaryOp::LessEqual),
                    ('<', false) => Token::Op(BinaryOp::Less),
                    ('>', true) => Token::Op(BinaryOp::GreaterEqual),
                    ('>', false) => Token::Op(BinaryOp::Greater),
                    ('=', true) => Token::Op(BinaryOp::Equal),
                    ('!', true) => Token::Op(BinaryOp::NotEqual),
                    ('!', false) => Token::Bang,
                    _ => return Err(ExpressionError::UnexpectedChar(c, i)),
                };
                i += if followed_by_eq { 2 } else { 1 };
                tokens.push(token);
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(ExpressionError::UnexpectedChar(c, i));
                }
                tokens.push(Token::Op(if c == '&' { BinaryOp::And } else { BinaryOp::Or }));
                i += 2;
            }
            '\'' | '"' => {
                let mut literal = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(ExpressionError::UnterminatedString),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(j + 1) {
                                literal.push(*escaped);
                            }
                            j += 2;
                        }
                        Some(ch) if *ch == c => break,
                        Some(ch) => {
                            literal.push(*ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Str(literal));
                i = j + 1;
            }
            '0'..='9' if after_dot => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(Token::Index(chars[start..i].iter().collect()));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::UnexpectedChar(chars[start], start))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExpressionError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current nesting of parentheses and unary operators
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    /// Parse one nested level with `inner`, failing past `MAX_DEPTH`
    fn nested(
        &mut self,
        inner: fn(&mut Self) -> Result<Expression, ExpressionError>,
    ) -> Result<Expression, ExpressionError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    /// Consume the next token if it is one of `ops`
    fn take_op(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        let op = match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => *op,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Self) -> Result<Expression, ExpressionError>,
    ) -> Result<Expression, ExpressionError> {
        let mut left = next(self)?;
        while let Some(op) = self.take_op(ops) {
            let right = next(self)?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expression, ExpressionError> {
        self.binary_level(&[BinaryOp::Or], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expression, ExpressionError> {
        self.binary_level(&[BinaryOp::And], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expression, ExpressionError> {
        self.binary_level(&[BinaryOp::Equal, BinaryOp::NotEqual], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Expression, ExpressionError> {
        self.binary_level(
            &[
                BinaryOp::Less,
                BinaryOp::LessEqual,
                BinaryOp::Greater,
                BinaryOp::GreaterEqual,
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expression, ExpressionError> {
        self.binary_level(&[BinaryOp::Add, BinaryOp::Subtract], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ExpressionError> {
        self.binary_level(
            &[BinaryOp::Multiply, BinaryOp::Divide, BinaryOp::Remainder],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expression, ExpressionError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Expression::Not(Box::new(self.nested(Self::parse_unary)?)))
            }
            Some(Token::Op(BinaryOp::Subtract)) => {
                self.pos += 1;
                Ok(Expression::Negate(Box::new(self.nested(Self::parse_unary)?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, ExpressionError> {
        match self.next() {
            None => Err(ExpressionError::UnexpectedEnd),
            Some(Token::Number(n)) => Ok(Expression::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expression::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.nested(Self::parse_or)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ExpressionError::UnexpectedToken(other.to_string())),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expression::Literal(Value::Bool(true))),
                "false" => Ok(Expression::Literal(Value::Bool(false))),
                "null" => Ok(Expression::Literal(Value::Null)),
                _ => self.parse_path(name),
            },
            Some(other) => Err(ExpressionError::UnexpectedToken(other.to_string())),
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expression, ExpressionError> {
        let mut segments = vec![root];
        while matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(segment)) | Some(Token::Index(segment)) => segments.push(segment),
                Some(other) => return Err(ExpressionError::UnexpectedToken(other.to_string())),
                None => return Err(ExpressionError::UnexpectedEnd),
            }
        }
        Ok(Expression::Path(segments))
    }
}
