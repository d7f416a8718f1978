//! Formula expression language: tokenizer, parser and evaluator.
//!
//! Grammar, lowest precedence first:
//! `sum := product (('+' | '-') product)*`,
//! `product := unary (('*' | '/') unary)*`,
//! `unary := ('-' | '+') unary | power`,
//! `power := primary ('^' unary)?`,
//! `primary := number | name | name '(' args ')' | '(' sum ')'`.

use std::fmt::{Display, Formatter};

/// Single-argument functions.
const FUNCTIONS: &[(&str, fn(f64) -> f64)] = &[
    ("sin", f64::sin),
    ("cos", f64::cos),
    ("tan", f64::tan),
    ("asin", f64::asin),
    ("acos", f64::acos),
    ("atan", f64::atan),
    ("exp", f64::exp),
    ("ln", f64::ln),
    ("log10", f64::log10),
    ("sqrt", f64::sqrt),
    ("abs", f64::abs),
    ("floor", f64::floor),
    ("ceil", f64::ceil),
];

/// Function that reads another column at the current row.
pub const COLUMN_FUNCTION: &str = "col";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Text(String),
    Op(char),
    Open,
    Close,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    /// `col("...")`; the reference is resolved by the caller.
    Column(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: usize,
        arg: Box<Expr>,
    },
}

/// Parse failure with byte offset into the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

/// Values an expression reads while evaluating one row.
pub trait Env {
    fn variable(&self, name: &str) -> Option<f64>;
    fn column(&self, reference: &str) -> Option<f64>;
}

/// Parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parses `source`; only names in `variables` (plus `pi`) are accepted.
    pub fn parse(source: &str, variables: &[&str]) -> Result<Self, ParseError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            cursor: 0,
            variables,
            end: source.len(),
        };
        let expr = parser.sum()?;
        if let Some((_, position)) = parser.peek() {
            return Err(ParseError {
                message: "unexpected trailing input".to_string(),
                position,
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Column references in order of first appearance, without duplicates.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_references(&self.expr, &mut out);
        out
    }

    /// `None` when an input is missing or the result is NaN.
    pub fn eval(&self, env: &dyn Env) -> Option<f64> {
        eval(&self.expr, env).filter(|value| !value.is_nan())
    }
}

fn collect_references<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Column(reference) => {
            if !out.contains(&reference.as_str()) {
                out.push(reference);
            }
        }
        Expr::Negate(inner) | Expr::Call { arg: inner, .. } => collect_references(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_references(lhs, out);
            collect_references(rhs, out);
        }
        Expr::Number(_) | Expr::Variable(_) => {}
    }
}

fn eval(expr: &Expr, env: &dyn Env) -> Option<f64> {
    match expr {
        Expr::Number(value) => Some(*value),
        Expr::Variable(name) if name == "pi" => Some(std::f64::consts::PI),
        Expr::Variable(name) => env.variable(name),
        Expr::Column(reference) => env.column(reference),
        Expr::Negate(inner) => eval(inner, env).map(|value| -value),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, env)?;
            let rhs = eval(rhs, env)?;
            Some(match op {
                BinaryOp::Add => lhs + rhs,
                BinaryOp::Sub => lhs - rhs,
                BinaryOp::Mul => lhs * rhs,
                BinaryOp::Div => lhs / rhs,
                BinaryOp::Pow => lhs.powf(rhs),
            })
        }
        Expr::Call { function, arg } => {
            let (_, apply) = FUNCTIONS.get(*function)?;
            eval(arg, env).map(apply)
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        let c = bytes[index] as char;
        let start = index;
        if c.is_ascii_whitespace() {
            index += 1;
            continue;
        }
        if c.is_ascii_digit() || c == '.' {
            index += 1;
            while index < bytes.len() {
                let next = bytes[index] as char;
                let exponent_sign = (next == '+' || next == '-')
                    && matches!(bytes[index - 1] as char, 'e' | 'E');
                if next.is_ascii_digit() || next == '.' || next == 'e' || next == 'E' || exponent_sign
                {
                    index += 1;
                } else {
                    break;
                }
            }
            let text = &source[start..index];
            let value = text.parse::<f64>().map_err(|_| ParseError {
                message: format!("invalid number `{text}`"),
                position: start,
            })?;
            tokens.push((Token::Number(value), start));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            while index < bytes.len()
                && ((bytes[index] as char).is_ascii_alphanumeric() || bytes[index] == b'_')
            {
                index += 1;
            }
            tokens.push((Token::Name(source[start..index].to_string()), start));
            continue;
        }
        if c == '"' {
            let Some(length) = source[start + 1..].find('"') else {
                return Err(ParseError {
                    message: "unterminated string".to_string(),
                    position: start,
                });
            };
            let text = &source[start + 1..start + 1 + length];
            tokens.push((Token::Text(text.to_string()), start));
            index = start + length + 2;
            continue;
        }
        let token = match c {
            '+' | '-' | '*' | '/' | '^' => Token::Op(c),
            '(' => Token::Open,
            ')' => Token::Close,
            ',' => Token::Comma,
            _ => {
                let shown = source[start..].chars().next().unwrap_or(c);
                return Err(ParseError {
                    message: format!("unexpected character `{shown}`"),
                    position: start,
                });
            }
        };
        tokens.push((token, start));
        index += 1;
    }
    Ok(tokens)
}

struct Parser<'v> {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
    variables: &'v [&'v str],
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens
            .get(self.cursor)
            .map(|(token, position)| (token, *position))
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.peek().map_or(self.end, |(_, position)| position),
        }
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some((Token::Op(op), _)) if ops.contains(op) => {
                let op = *op;
                self.cursor += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some((token, _)) if token == expected => {
                self.cursor += 1;
                Ok(())
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.product()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let rhs = self.product()?;
            let op = if op == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn product(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.eat_op(&['*', '/']) {
            let rhs = self.unary()?;
            let op = if op == '*' { BinaryOp::Mul } else { BinaryOp::Div };
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.eat_op(&['-', '+']) {
            Some('-') => Ok(Expr::Negate(Box::new(self.unary()?))),
            Some(_) => self.unary(),
            None => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.primary()?;
        if self.eat_op(&['^']).is_some() {
            let exponent = self.unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some((token, position)) = self.next() else {
            return Err(self.error("unexpected end of formula"));
        };
        match token {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Open => {
                let inner = self.sum()?;
                self.expect(&Token::Close, "`)`")?;
                Ok(inner)
            }
            Token::Name(name) => {
                if matches!(self.peek(), Some((Token::Open, _))) {
                    return self.call(&name, position);
                }
                if name == "pi" || self.variables.contains(&name.as_str()) {
                    Ok(Expr::Variable(name))
                } else {
                    Err(ParseError {
                        message: format!("unknown variable `{name}`"),
                        position,
                    })
                }
            }
            Token::Text(_) => Err(ParseError {
                message: "text is only allowed inside col(...)".to_string(),
                position,
            }),
            Token::Op(op) => Err(ParseError {
                message: format!("unexpected operator `{op}`"),
                position,
            }),
            Token::Close | Token::Comma => Err(ParseError {
                message: "unexpected delimiter".to_string(),
                position,
            }),
        }
    }

    fn call(&mut self, name: &str, position: usize) -> Result<Expr, ParseError> {
        self.expect(&Token::Open, "`(`")?;
        if name == COLUMN_FUNCTION {
            let reference = match self.next() {
                Some((Token::Text(reference), _)) => reference,
                _ => return Err(self.error("col(...) takes a quoted column name")),
            };
            self.expect(&Token::Close, "`)`")?;
            return Ok(Expr::Column(reference));
        }
        let Some(function) = FUNCTIONS.iter().position(|(candidate, _)| *candidate == name) else {
            return Err(ParseError {
                message: format!("unknown function `{name}`"),
                position,
            });
        };
        let arg = self.sum()?;
        if matches!(self.peek(), Some((Token::Comma, _))) {
            return Err(self.error(format!("`{name}` takes one argument")));
        }
        self.expect(&Token::Close, "`)`")?;
        Ok(Expr::Call {
            function,
            arg: Box::new(arg),
        })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
