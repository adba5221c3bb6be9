//! Rule language: template placeholders and conditional expressions.
//!
//! A rule such as `inputs.target == 'production' and steps.build.result.status == 'success'`
//! is wrapped into the template `{{ <rule> }}`, rendered against the [`Context`],
//! and the rendered text is parsed back as a literal (bool, number, string, list,
//! mapping or none). Anything that does not render to a literal is a
//! `RuleEvaluation` error, and the gated step or command does not run.
//!
//! The interpreter only reads the context roots `ctx`, `env`, `inputs` and
//! `steps` (plus bare names looked up in `ctx`); there are no calls, assignments
//! or host-language escapes.
//!
//! Supported syntax:
//!
//! ```text
//! literals    1  -2  1.5  'text'  "text"  true  False  none  None  null  [1, 'a']  {'k': 1}
//! access      steps.build.result.status   env['HOME']   inputs.list[0]
//! logic       a and b   a && b   a or b   a || b   not a   !a
//! compare     ==  !=  <  <=  >  >=   x in xs   x not in xs
//! tests       x is defined   x is not defined   x is none   x is not none
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, VonzyError};
use crate::workflow::context::Context;

/// Wrapper a rule is substituted into before rendering.
pub const RULE_TEMPLATE: &str = "{{ ${expr} }}";

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A path that does not exist in the context.
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl From<&JsonValue> for Value {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::None),
            },
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            JsonValue::Object(map) => Value::from_map(map),
        }
    }
}

impl Value {
    pub fn from_map(map: &Map<String, JsonValue>) -> Self {
        Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::from(v)))
                .collect(),
        )
    }

    /// Python-style truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Literal form, parseable by [`parse_literal`].
    pub fn repr(&self) -> String {
        match self {
            Value::Undefined => String::new(),
            Value::None => "None".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => format!(
                "[{}]",
                items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
            ),
            Value::Map(map) => format!(
                "{{{}}}",
                map.iter()
                    .map(|(k, v)| format!("{}: {}", Value::Str(k.clone()).repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, _) | (_, Value::Undefined) => false,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (a, b) => a == b,
        }
    }

    fn attr(&self, key: &str) -> Value {
        match self {
            Value::Map(map) => map.get(key).cloned().unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        }
    }

    fn item(&self, index: &Value) -> Value {
        match (self, index) {
            (Value::Map(map), Value::Str(key)) => map.get(key).cloned().unwrap_or(Value::Undefined),
            (Value::List(items), Value::Int(i)) => {
                let idx = if *i < 0 { items.len() as i64 + i } else { *i };
                usize::try_from(idx)
                    .ok()
                    .and_then(|idx| items.get(idx).cloned())
                    .unwrap_or(Value::Undefined)
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = if *i < 0 { chars.len() as i64 + i } else { *i };
                usize::try_from(idx)
                    .ok()
                    .and_then(|idx| chars.get(idx))
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or(Value::Undefined)
            }
            _ => Value::Undefined,
        }
    }
}

impl fmt::Display for Value {
    /// Rendered form used in templates: strings are inserted raw.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.repr()),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
}

fn punctuation(c: char) -> Option<Token> {
    match c {
        '(' => Some(Token::LParen),
        ')' => Some(Token::RParen),
        '[' => Some(Token::LBracket),
        ']' => Some(Token::RBracket),
        '{' => Some(Token::LBrace),
        '}' => Some(Token::RBrace),
        ':' => Some(Token::Colon),
        ',' => Some(Token::Comma),
        '.' => Some(Token::Dot),
        _ => None,
    }
}

fn tokenize(src: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            c if punctuation(c).is_some() => {
                tokens.extend(punctuation(c));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| "unterminated escape sequence".to_string())?;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let is_float =
                    i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit();
                if is_float {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    let value = text
                        .parse::<f64>()
                        .map_err(|e| format!("invalid number '{}': {}", text, e))?;
                    tokens.push(Token::Float(value));
                } else {
                    let text: String = chars[start..i].iter().collect();
                    let value = text
                        .parse::<i64>()
                        .map_err(|e| format!("invalid number '{}': {}", text, e))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let op = match (c, next) {
                    ('=', Some('=')) => "==",
                    ('!', Some('=')) => "!=",
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('&', Some('&')) => "&&",
                    ('|', Some('|')) => "||",
                    ('<', _) => "<",
                    ('>', _) => ">",
                    ('!', _) => "!",
                    ('-', _) => "-",
                    _ => return Err(format!("unexpected character '{}'", c)),
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestKind {
    Defined,
    None,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Name(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    /// `needle in haystack`, negated for `not in`
    In(Box<Expr>, Box<Expr>, bool),
    /// `x is [not] defined|none`
    Test(Box<Expr>, TestKind, bool),
}

const KEYWORDS: &[&str] = &["and", "or", "not", "in", "is"];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn is_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Ident(id)) if id == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword_at(0, keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> std::result::Result<(), String> {
        match self.advance() {
            Some(ref token) if *token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn or_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") || self.eat_op("||") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") || self.eat_op("&&") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> std::result::Result<Expr, String> {
        if self.eat_keyword("not") || self.eat_op("!") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let cmp = match self.peek() {
                Some(Token::Op("==")) => Some(CmpOp::Eq),
                Some(Token::Op("!=")) => Some(CmpOp::Ne),
                Some(Token::Op("<")) => Some(CmpOp::Lt),
                Some(Token::Op("<=")) => Some(CmpOp::Le),
                Some(Token::Op(">")) => Some(CmpOp::Gt),
                Some(Token::Op(">=")) => Some(CmpOp::Ge),
                _ => None,
            };
            if let Some(op) = cmp {
                self.pos += 1;
                let right = self.unary()?;
                left = Expr::Compare(Box::new(left), op, Box::new(right));
            } else if self.eat_keyword("in") {
                let right = self.unary()?;
                left = Expr::In(Box::new(left), Box::new(right), false);
            } else if self.is_keyword_at(0, "not") && self.is_keyword_at(1, "in") {
                self.pos += 2;
                let right = self.unary()?;
                left = Expr::In(Box::new(left), Box::new(right), true);
            } else if self.eat_keyword("is") {
                let mut negated = self.eat_keyword("not");
                let kind = match self.advance() {
                    Some(Token::Ident(word)) => match word.as_str() {
                        "defined" => TestKind::Defined,
                        "undefined" => {
                            negated = !negated;
                            TestKind::Defined
                        }
                        "none" | "None" | "null" => TestKind::None,
                        other => return Err(format!("unknown test '{}'", other)),
                    },
                    other => {
                        return Err(format!("expected a test name after 'is', found {:?}", other))
                    }
                };
                left = Expr::Test(Box::new(left), kind, negated);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn unary(&mut self) -> std::result::Result<Expr, String> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> std::result::Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    expr = match self.advance() {
                        Some(Token::Ident(name)) => Expr::Attr(Box::new(expr), name),
                        Some(Token::Int(i)) => {
                            Expr::Index(Box::new(expr), Box::new(Expr::Literal(Value::Int(i))))
                        }
                        other => {
                            return Err(format!("expected a name after '.', found {:?}", other))
                        }
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.or_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> std::result::Result<Expr, String> {
        match self.advance() {
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "none" | "None" | "null" => Ok(Expr::Literal(Value::None)),
                kw if KEYWORDS.contains(&kw) => Err(format!("unexpected keyword '{}'", kw)),
                _ => Ok(Expr::Name(name)),
            },
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                while self.peek() != Some(&Token::RBracket) {
                    items.push(self.or_expr()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                while self.peek() != Some(&Token::RBrace) {
                    let key = self.or_expr()?;
                    self.expect(Token::Colon)?;
                    let value = self.or_expr()?;
                    entries.push((key, value));
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBrace)?;
                Ok(Expr::Map(entries))
            }
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn parse_expression(src: &str) -> std::result::Result<Expr, String> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected trailing token {:?}", token)),
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, ctx: &Context) -> std::result::Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => Ok(ctx.lookup(name)),
        Expr::Attr(base, key) => Ok(eval(base, ctx)?.attr(key)),
        Expr::Index(base, index) => {
            let base = eval(base, ctx)?;
            let index = eval(index, ctx)?;
            Ok(base.item(&index))
        }
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval(item, ctx))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        )),
        Expr::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                let key = match eval(key, ctx)? {
                    Value::Str(s) => s,
                    other => {
                        return Err(format!(
                            "mapping keys must be strings, got {}",
                            other.type_name()
                        ))
                    }
                };
                map.insert(key, eval(value, ctx)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, ctx)?.is_truthy())),
        Expr::Neg(inner) => match eval(inner, ctx)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(format!("bad operand type for unary -: {}", other.type_name())),
        },
        Expr::And(left, right) => {
            let left = eval(left, ctx)?;
            if left.is_truthy() {
                eval(right, ctx)
            } else {
                Ok(left)
            }
        }
        Expr::Or(left, right) => {
            let left = eval(left, ctx)?;
            if left.is_truthy() {
                Ok(left)
            } else {
                eval(right, ctx)
            }
        }
        Expr::Compare(left, op, right) => {
            let left = eval(left, ctx)?;
            let right = eval(right, ctx)?;
            compare(&left, *op, &right).map(Value::Bool)
        }
        Expr::In(needle, haystack, negated) => {
            let needle = eval(needle, ctx)?;
            let haystack = eval(haystack, ctx)?;
            let found = match (&needle, &haystack) {
                (_, Value::Undefined) => false,
                (Value::Str(n), Value::Str(h)) => h.contains(n.as_str()),
                (_, Value::Str(_)) => {
                    return Err(format!(
                        "'in <str>' requires str as left operand, not {}",
                        needle.type_name()
                    ))
                }
                (_, Value::List(items)) => items.iter().any(|item| item.loose_eq(&needle)),
                (Value::Str(n), Value::Map(map)) => map.contains_key(n),
                (_, Value::Map(_)) => false,
                (_, other) => {
                    return Err(format!(
                        "argument of type {} is not iterable",
                        other.type_name()
                    ))
                }
            };
            Ok(Value::Bool(found != *negated))
        }
        Expr::Test(inner, kind, negated) => {
            let value = eval(inner, ctx)?;
            let result = match kind {
                TestKind::Defined => value != Value::Undefined,
                TestKind::None => value == Value::None,
            };
            Ok(Value::Bool(result != *negated))
        }
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> std::result::Result<bool, String> {
    match op {
        CmpOp::Eq => return Ok(left.loose_eq(right)),
        CmpOp::Ne => return Ok(!left.loose_eq(right)),
        _ => {}
    }

    let ordering = match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };

    let ordering = ordering.ok_or_else(|| {
        format!(
            "'{}' not supported between {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )
    })?;

    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
    })
}

fn literal_value(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Literal(value) => Some(value.clone()),
        Expr::Neg(inner) => match literal_value(inner)? {
            Value::Int(i) => Some(Value::Int(-i)),
            Value::Float(f) => Some(Value::Float(-f)),
            _ => None,
        },
        Expr::List(items) => items
            .iter()
            .map(literal_value)
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
        Expr::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                match literal_value(key)? {
                    Value::Str(key) => map.insert(key, literal_value(value)?),
                    _ => return None,
                };
            }
            Some(Value::Map(map))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse `text` as a literal value. Names, operators and paths are rejected.
pub fn parse_literal(text: &str) -> std::result::Result<Value, String> {
    let expr = parse_expression(text.trim())?;
    literal_value(&expr).ok_or_else(|| format!("'{}' is not a literal", text.trim()))
}

/// Check that `expr` is a well-formed expression without evaluating it.
pub fn check_syntax(expr: &str) -> std::result::Result<(), String> {
    parse_expression(expr).map(|_| ())
}

/// Evaluate a bare expression against the context.
pub fn evaluate_expression(expr: &str, ctx: &Context) -> std::result::Result<Value, String> {
    let parsed = parse_expression(expr)?;
    eval(&parsed, ctx)
}

/// Render every `{{ expr }}` placeholder and `{root.path}` field of `template`.
///
/// Single-brace fields only apply to the `env`, `inputs` and `steps` roots, so
/// shell `${VAR}` expansions and `awk '{ ... }'` blocks pass through untouched.
/// Malformed placeholders and undefined values are a `Template` error.
pub fn render_template(template: &str, ctx: &Context) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        if let Some(after) = tail.strip_prefix("{{") {
            let end = find_placeholder_end(after).ok_or_else(|| {
                VonzyError::Template(format!("Unclosed placeholder in '{}'", template))
            })?;
            let expr = after[..end].trim();
            let value = evaluate_expression(expr, ctx)
                .map_err(|e| VonzyError::Template(format!("'{}': {}", expr, e)))?;
            if value == Value::Undefined {
                return Err(VonzyError::Template(format!("'{}' is undefined", expr)));
            }
            out.push_str(&value.to_string());
            rest = &after[end + 2..];
            continue;
        }

        let offset = template.len() - tail.len();
        let field = if template[..offset].ends_with('$') {
            None
        } else {
            field_pattern().captures(tail)
        };
        match field {
            Some(caps) => {
                let (whole, root, path) = (&caps[0], &caps[1], &caps[2]);
                let value = resolve_field(root, path, ctx);
                if value == Value::Undefined {
                    return Err(VonzyError::Template(format!("'{}' is undefined", whole)));
                }
                out.push_str(&value.to_string());
                rest = &tail[whole.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn field_pattern() -> &'static Regex {
    static FIELD: OnceLock<Regex> = OnceLock::new();
    FIELD.get_or_init(|| {
        Regex::new(r"^\{(env|inputs|steps)((?:\.[A-Za-z_][\w-]*|\[[^\[\]{}]+\])*)\}")
            .expect("static field pattern is valid")
    })
}

/// Follow `.name` and `[key]` segments from a context root. Digit-only keys
/// index lists.
fn resolve_field(root: &str, path: &str, ctx: &Context) -> Value {
    static SEGMENT: OnceLock<Regex> = OnceLock::new();
    let segment = SEGMENT.get_or_init(|| {
        Regex::new(r"\.([A-Za-z_][\w-]*)|\[([^\[\]{}]+)\]")
            .expect("static segment pattern is valid")
    });

    let mut value = ctx.lookup(root);
    for caps in segment.captures_iter(path) {
        value = match (caps.get(1), caps.get(2)) {
            (Some(name), _) => value.attr(name.as_str()),
            (_, Some(key)) => match key.as_str().parse::<i64>() {
                Ok(index) => value.item(&Value::Int(index)),
                Err(_) => value.item(&Value::Str(key.as_str().to_string())),
            },
            _ => Value::Undefined,
        };
    }
    value
}

/// Byte offset of the `}}` closing a placeholder, ignoring quoted text and
/// nested braces.
fn find_placeholder_end(src: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut quote: Option<u8> = None;
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'{' => depth += 1,
                b'}' if depth > 0 => depth -= 1,
                b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Evaluate a rule: wrap it into [`RULE_TEMPLATE`], render it, and parse the
/// rendered text as a literal.
pub fn evaluate(rule: &str, ctx: &Context) -> Result<Value> {
    let rule_error = |message: String| VonzyError::RuleEvaluation {
        rule: rule.to_string(),
        message,
    };

    let template = RULE_TEMPLATE.replace("${expr}", rule);
    let rendered = render_template(&template, ctx).map_err(|e| rule_error(e.to_string()))?;
    parse_literal(&rendered).map_err(rule_error)
}

/// Gate semantics: no rule always proceeds; otherwise proceed only when the
/// rule evaluates to a truthy value. Evaluation errors count as not matching.
pub fn matches(rule: Option<&str>, ctx: &Context) -> bool {
    let Some(rule) = rule else {
        return true;
    };
    match evaluate(rule, ctx) {
        Ok(value) => {
            tracing::debug!("[Rule] '{}' -> {}", rule, value.repr());
            value.is_truthy()
        }
        Err(e) => {
            tracing::error!("[Rule] {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> Context {
        let mut ctx = Context::new();
        ctx.merge_env(vec![("HOME", "/home/me"), ("DEBUG", "1")]);
        let mut inputs = Map::new();
        inputs.insert("target".to_string(), json!("production"));
        inputs.insert("retries".to_string(), json!(3));
        inputs.insert("features".to_string(), json!(["a", "b"]));
        inputs.insert("flag".to_string(), json!("False"));
        ctx.merge_inputs(inputs);
        ctx.record_result(
            &[],
            "build",
            json!({"status": "success", "error": null, "output": ["ok"]}),
        )
        .unwrap();
        ctx
    }

    #[test]
    fn test_literal_rules() {
        let ctx = Context::new();
        assert_eq!(evaluate("1 == 2", &ctx).unwrap(), Value::Bool(false));
        assert_eq!(evaluate("1 == 1", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(evaluate("True", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(
            evaluate("[1, 2]", &ctx).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(evaluate("-3", &ctx).unwrap(), Value::Int(-3));
        assert_eq!(evaluate("2.5 > 2", &ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_context_rules() {
        let ctx = test_context();
        assert!(matches(Some("inputs.target == 'production'"), &ctx));
        assert!(matches(Some("steps.build.result.status == 'success'"), &ctx));
        assert!(matches(Some("env.HOME == '/home/me' and inputs.retries >= 3"), &ctx));
        assert!(matches(Some("'a' in inputs.features && 'z' not in inputs.features"), &ctx));
        assert!(matches(Some("steps['build'].result.output[0] == 'ok'"), &ctx));
        assert!(matches(Some("ctx.target == 'production'"), &ctx));
        assert!(matches(Some("target == 'production'"), &ctx));
        assert!(matches(Some("steps.deploy is not defined"), &ctx));
        assert!(matches(Some("steps.build.result.error is none"), &ctx));
        assert!(!matches(Some("not (inputs.retries > 1)"), &ctx));
        assert!(matches(Some("inputs.retries < 1 || env.DEBUG == '1'"), &ctx));
    }

    #[test]
    fn test_no_rule_always_matches() {
        assert!(matches(None, &Context::new()));
    }

    #[test]
    fn test_rendered_strings_are_literal_parsed() {
        let ctx = test_context();
        // "False" renders to the literal False
        assert_eq!(evaluate("inputs.flag", &ctx).unwrap(), Value::Bool(false));
        // A plain word is not a literal
        let err = evaluate("inputs.target", &ctx).unwrap_err();
        assert!(matches!(err, VonzyError::RuleEvaluation { .. }));
        assert!(!matches(Some("inputs.target"), &ctx));
    }

    #[test]
    fn test_malformed_rules_do_not_match() {
        let ctx = test_context();
        for rule in ["1 ==", "(1 == 1", "inputs.retries > 'x'", "a = b", "", "is defined"] {
            assert!(evaluate(rule, &ctx).is_err(), "rule {:?} should fail", rule);
            assert!(!matches(Some(rule), &ctx));
        }
    }

    #[test]
    fn test_undefined_rule_is_an_error() {
        let ctx = test_context();
        assert!(evaluate("inputs.nothing", &ctx).is_err());
        assert!(!matches(Some("steps.deploy.result.status == 'success'"), &ctx));
    }

    #[test]
    fn test_render_template() {
        let ctx = test_context();
        assert_eq!(
            render_template("deploy to {{ inputs.target }} x{{inputs.retries}}", &ctx).unwrap(),
            "deploy to production x3"
        );
        assert_eq!(render_template("echo ${HOME}", &ctx).unwrap(), "echo ${HOME}");
        assert_eq!(
            render_template("{{ inputs.features }}", &ctx).unwrap(),
            "['a', 'b']"
        );
        assert_eq!(render_template("{{ '}}' }}", &ctx).unwrap(), "}}");
        assert_eq!(render_template("{{ {'k': 1}.k }}", &ctx).unwrap(), "1");
    }

    #[test]
    fn test_render_format_fields() {
        let ctx = test_context();
        assert_eq!(
            render_template("deploy {inputs.target} from {env.HOME}", &ctx).unwrap(),
            "deploy production from /home/me"
        );
        assert_eq!(
            render_template("last={steps.build.result.output[0]} {inputs[features]}", &ctx)
                .unwrap(),
            "last=ok ['a', 'b']"
        );
        assert_eq!(
            render_template("{{ inputs.retries }}x {inputs.retries}", &ctx).unwrap(),
            "3x 3"
        );
        // Other braces are shell syntax
        let untouched = [
            "awk '{print $1}'",
            "echo ${HOME} ${inputs.target}",
            "f() { true; }",
            "{target}",
        ];
        for text in untouched {
            assert_eq!(render_template(text, &ctx).unwrap(), text);
        }
        assert!(matches!(
            render_template("echo {env.MISSING}", &ctx),
            Err(VonzyError::Template(_))
        ));
    }

    #[test]
    fn test_render_template_errors() {
        let ctx = test_context();
        assert!(matches!(
            render_template("echo {{ inputs.nope }}", &ctx),
            Err(VonzyError::Template(_))
        ));
        assert!(matches!(
            render_template("echo {{ inputs.target", &ctx),
            Err(VonzyError::Template(_))
        ));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("0").unwrap(), Value::Int(0));
        assert_eq!(parse_literal(" 'x' ").unwrap(), Value::Str("x".to_string()));
        assert_eq!(parse_literal("None").unwrap(), Value::None);
        assert!(parse_literal("hello").is_err());
        assert!(parse_literal("1 + 1").is_err());
        assert!(parse_literal("").is_err());
    }

    #[test]
    fn test_repr_round_trips_through_literal_parser() {
        let value = Value::List(vec![
            Value::Str("it's".to_string()),
            Value::Float(3.0),
            Value::Bool(false),
            Value::None,
        ]);
        assert_eq!(parse_literal(&value.repr()).unwrap(), value);
    }

    #[test]
    fn test_check_syntax() {
        assert!(check_syntax("steps.a.result.status == 'success'").is_ok());
        assert!(check_syntax("steps.a.result.status === 'x'").is_err());
    }
}
