//! Sandboxed expression language for connector conditions and function
//! nodes. Expressions read state but cannot mutate it or touch the host.
//!
//! ```text
//! result contains "yes" and len(state["Prompt 1"]) > 3
//! not (int(Counter) >= 10)
//! lower(trim(result)) matches "^y(es)?$"
//! ```

use std::fmt;

use regex::Regex;

use weft_core::error::{Result, WeftError};
use weft_core::state::State;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Value::Num(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Result,
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Option<Expr>,
}

impl Expression {
    /// Parse `source`. Empty or whitespace-only text parses to an
    /// expression that is always true.
    pub fn parse(source: &str) -> Result<Self> {
        let err = |message: String| WeftError::ConditionEvaluation {
            expression: source.to_string(),
            message,
        };
        if source.trim().is_empty() {
            return Ok(Self {
                source: source.to_string(),
                root: None,
            });
        }
        let tokens = tokenize(source).map_err(err)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr().map_err(err)?;
        if let Some(tok) = parser.peek() {
            return Err(err(format!("unexpected token {tok:?}")));
        }
        Ok(Self {
            source: source.to_string(),
            root: Some(root),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, state: &State) -> Result<Value> {
        match &self.root {
            None => Ok(Value::Bool(true)),
            Some(root) => eval(root, state).map_err(|message| WeftError::ConditionEvaluation {
                expression: self.source.clone(),
                message,
            }),
        }
    }

    pub fn is_true(&self, state: &State) -> Result<bool> {
        Ok(self.eval(state)?.truthy())
    }
}

/// Parse and evaluate a condition in one step.
pub fn evaluate_condition(source: &str, state: &State) -> Result<bool> {
    Expression::parse(source)?.is_true(state)
}

fn tokenize(src: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' | '\'' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => break,
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => s.push(ch),
                    }
                }
                if !closed {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut s = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = s.parse().map_err(|_| format!("bad number `{s}`"))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match s.as_str() {
                    "true" | "True" => Token::Ident("true".into()),
                    "false" | "False" => Token::Ident("false".into()),
                    _ => Token::Ident(s),
                });
            }
            _ => {
                chars.next();
                let next = chars.peek().copied();
                let tok = match (c, next) {
                    ('=', Some('=')) => Token::Op("=="),
                    ('!', Some('=')) => Token::Op("!="),
                    ('<', Some('=')) => Token::Op("<="),
                    ('>', Some('=')) => Token::Op(">="),
                    ('&', Some('&')) => Token::Op("and"),
                    ('|', Some('|')) => Token::Op("or"),
                    _ => {
                        let single = match c {
                            '<' => Token::Op("<"),
                            '>' => Token::Op(">"),
                            '!' => Token::Op("not"),
                            '+' => Token::Op("+"),
                            '-' => Token::Op("-"),
                            '(' => Token::LParen,
                            ')' => Token::RParen,
                            '[' => Token::LBracket,
                            ']' => Token::RBracket,
                            '.' => Token::Dot,
                            ',' => Token::Comma,
                            other => return Err(format!("unexpected character `{other}`")),
                        };
                        tokens.push(single);
                        continue;
                    }
                };
                chars.next();
                tokens.push(tok);
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult = std::result::Result<Expr, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        let hit = match self.peek() {
            Some(Token::Ident(s)) => s == word,
            Some(Token::Op(op)) => *op == word,
            _ => false,
        };
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect(&mut self, tok: Token) -> std::result::Result<(), String> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(format!("expected {tok:?}, found {:?}", self.peek()))
        }
    }

    fn expr(&mut self) -> ParseResult {
        let mut lhs = self.and()?;
        while self.eat_word("or") {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> ParseResult {
        let mut lhs = self.not()?;
        while self.eat_word("and") {
            let rhs = self.not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> ParseResult {
        if self.eat_word("not") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult {
        let lhs = self.sum()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => CmpOp::Eq,
            Some(Token::Op("!=")) => CmpOp::Ne,
            Some(Token::Op("<")) => CmpOp::Lt,
            Some(Token::Op("<=")) => CmpOp::Le,
            Some(Token::Op(">")) => CmpOp::Gt,
            Some(Token::Op(">=")) => CmpOp::Ge,
            Some(Token::Ident(w)) => match w.as_str() {
                "contains" | "in" => CmpOp::Contains,
                "startswith" => CmpOp::StartsWith,
                "endswith" => CmpOp::EndsWith,
                "matches" => CmpOp::Matches,
                _ => return Ok(lhs),
            },
            _ => return Ok(lhs),
        };
        let reversed = matches!(self.peek(), Some(Token::Ident(w)) if w == "in");
        self.pos += 1;
        let rhs = self.sum()?;
        // `a in b` is `b contains a`
        let (lhs, rhs) = if reversed { (rhs, lhs) } else { (lhs, rhs) };
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> ParseResult {
        let mut lhs = self.unary()?;
        while self.eat(&Token::Op("+")) {
            let rhs = self.unary()?;
            lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ParseResult {
        if self.eat(&Token::Op("-")) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.identifier(name),
            other => Err(format!("unexpected {other:?}")),
        }
    }

    fn identifier(&mut self, name: String) -> ParseResult {
        match name.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "result" => return Ok(Expr::Result),
            "state" => {
                if self.eat(&Token::Dot) {
                    return match self.next() {
                        Some(Token::Ident(field)) if field == "result" => Ok(Expr::Result),
                        other => Err(format!("unknown state field {other:?}")),
                    };
                }
                if self.eat(&Token::LBracket) {
                    let key = match self.next() {
                        Some(Token::Str(s)) => s,
                        Some(Token::Ident(s)) => s,
                        other => return Err(format!("bad state key {other:?}")),
                    };
                    self.expect(Token::RBracket)?;
                    return Ok(Expr::Var(key));
                }
                return Ok(Expr::Result);
            }
            _ => {}
        }

        if self.eat(&Token::LParen) {
            let mut args = Vec::new();
            if !self.eat(&Token::RParen) {
                loop {
                    args.push(self.expr()?);
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    self.expect(Token::Comma)?;
                }
            }
            return Ok(Expr::Call(name, args));
        }
        Ok(Expr::Var(name))
    }
}

fn eval(expr: &Expr, state: &State) -> std::result::Result<Value, String> {
    Ok(match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Result => Value::Str(state.result.clone()),
        Expr::Var(name) => match state.variables.get(name) {
            Some(v) => Value::Str(v.clone()),
            None => return Err(format!("no variable named `{name}`")),
        },
        Expr::Not(inner) => Value::Bool(!eval(inner, state)?.truthy()),
        Expr::Neg(inner) => {
            let v = eval(inner, state)?;
            match v.as_number() {
                Some(n) => Value::Num(-n),
                None => return Err(format!("cannot negate `{v}`")),
            }
        }
        Expr::And(a, b) => Value::Bool(eval(a, state)?.truthy() && eval(b, state)?.truthy()),
        Expr::Or(a, b) => Value::Bool(eval(a, state)?.truthy() || eval(b, state)?.truthy()),
        Expr::Add(a, b) => match (eval(a, state)?, eval(b, state)?) {
            (Value::Num(x), Value::Num(y)) => Value::Num(x + y),
            (x, y) => Value::Str(format!("{x}{y}")),
        },
        Expr::Compare(op, a, b) => Value::Bool(compare(*op, &eval(a, state)?, &eval(b, state)?)?),
        Expr::Call(name, args) => call(name, args, state)?,
    })
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> std::result::Result<bool, String> {
    let numeric = match (a, b) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => None,
        _ => a.as_number().zip(b.as_number()),
    };
    let (sa, sb) = (a.to_string(), b.to_string());
    Ok(match op {
        CmpOp::Eq => match numeric {
            Some((x, y)) => (x - y).abs() < f64::EPSILON,
            None => sa == sb,
        },
        CmpOp::Ne => match numeric {
            Some((x, y)) => (x - y).abs() >= f64::EPSILON,
            None => sa != sb,
        },
        CmpOp::Lt => numeric.map(|(x, y)| x < y).unwrap_or(sa < sb),
        CmpOp::Le => numeric.map(|(x, y)| x <= y).unwrap_or(sa <= sb),
        CmpOp::Gt => numeric.map(|(x, y)| x > y).unwrap_or(sa > sb),
        CmpOp::Ge => numeric.map(|(x, y)| x >= y).unwrap_or(sa >= sb),
        CmpOp::Contains => sa.contains(&sb),
        CmpOp::StartsWith => sa.starts_with(&sb),
        CmpOp::EndsWith => sa.ends_with(&sb),
        CmpOp::Matches => Regex::new(&sb)
            .map_err(|e| format!("invalid regex `{sb}`: {e}"))?
            .is_match(&sa),
    })
}

fn single<'v>(name: &str, values: &'v [Value]) -> std::result::Result<&'v Value, String> {
    match values {
        [v] => Ok(v),
        _ => Err(format!("{name}() takes exactly one argument")),
    }
}

fn call(name: &str, args: &[Expr], state: &State) -> std::result::Result<Value, String> {
    let values = args
        .iter()
        .map(|a| eval(a, state))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let one = || single(name, &values);
    Ok(match name {
        "len" => Value::Num(one()?.to_string().chars().count() as f64),
        "lower" => Value::Str(one()?.to_string().to_lowercase()),
        "upper" => Value::Str(one()?.to_string().to_uppercase()),
        "trim" => Value::Str(one()?.to_string().trim().to_string()),
        "str" => Value::Str(one()?.to_string()),
        "int" => {
            let v = one()?;
            match v.as_number() {
                Some(n) => Value::Num(n.trunc()),
                None => return Err(format!("int(): `{v}` is not a number")),
            }
        }
        "var" => {
            let key = one()?.to_string();
            match state.variables.get(&key) {
                Some(v) => Value::Str(v.clone()),
                None => return Err(format!("no variable named `{key}`")),
            }
        }
        _ => return Err(format!("unknown function `{name}`")),
    })
}
