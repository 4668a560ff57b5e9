//! Condition expressions attached to permissions, and their text syntax.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `in [..]`, `contains`
//! - Boolean operators: `&&`, `||`, `!`, parentheses for grouping
//! - Dot paths on the left: `status`, `relatedCase.status` (all but the last
//!   segment name relations)
//! - Literals: numbers, `"strings"`, `true`, `false`, lists `["a", "b"]`.
//!   Strings take the escapes `\"`, `\\`, `\n`, `\t`, `\r`, `\0` and `\u{..}`
//! - Typed casts: `date("2024-05-01")`, `number("3")`, `string(..)`, `bool(..)`
//! - Principal references: `principal.id`, `principal.<attribute>`

use std::fmt;

use crate::authz::errors::AuthzError;
use crate::authz::types::{Value, ValueType};

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    Contains,
    GreaterThan,
    LessThan,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equals => "==",
            Operator::NotEquals => "!=",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A literal together with the type it must be coerced to.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub declared: ValueType,
    pub value: Value,
}

impl Literal {
    pub fn new(declared: ValueType, value: impl Into<Value>) -> Self {
        Self {
            declared,
            value: value.into(),
        }
    }

    /// Declare the literal with the type it naturally has.
    pub fn infer(value: impl Into<Value>) -> Self {
        let value = value.into();
        let declared = natural_type(&value).unwrap_or(ValueType::String);
        Self { declared, value }
    }
}

fn natural_type(value: &Value) -> Option<ValueType> {
    match value {
        Value::String(_) => Some(ValueType::String),
        Value::Number(_) => Some(ValueType::Number),
        Value::Boolean(_) => Some(ValueType::Boolean),
        Value::Date(_) => Some(ValueType::Date),
        Value::Null | Value::List(_) => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Literal),
    List(Vec<Literal>),
    /// Bound from the requesting principal at resolution time.
    Principal {
        attribute: String,
        declared: ValueType,
    },
}

impl Operand {
    /// Lists become `Operand::List`, everything else a single literal.
    pub fn value(value: impl Into<Value>) -> Self {
        match value.into() {
            Value::List(items) => Operand::List(items.into_iter().map(Literal::infer).collect()),
            other => Operand::Literal(Literal::infer(other)),
        }
    }

    pub fn principal(attribute: impl Into<String>) -> Self {
        Operand::Principal {
            attribute: attribute.into(),
            declared: ValueType::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        field: String,
        operator: Operator,
        operand: Operand,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(field: impl Into<String>, operator: Operator, operand: Operand) -> Self {
        Condition::Compare {
            field: field.into(),
            operator,
            operand,
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Equals, Operand::value(value))
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::NotEquals, Operand::value(value))
    }

    pub fn is_in(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::compare(field, Operator::In, Operand::value(values))
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Contains, Operand::value(value))
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::GreaterThan, Operand::value(value))
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::LessThan, Operand::value(value))
    }

    /// `field == principal.<attribute>`
    pub fn equals_principal(field: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::compare(field, Operator::Equals, Operand::principal(attribute))
    }

    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(conditions.into_iter().collect())
    }

    pub fn negate(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }
}

// ─── Display (renders parseable text) ───────────────────────────────────

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, natural_type(&self.value)) {
            (Value::Date(d), _) => write!(f, "date({:?})", d.to_rfc3339()),
            (value, Some(ty)) if ty == self.declared => write!(f, "{value}"),
            (value, _) => write!(f, "{}({value})", self.declared.name()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(lit) => write!(f, "{lit}"),
            Operand::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Operand::Principal {
                attribute,
                declared: ValueType::String,
            } => write!(f, "principal.{attribute}"),
            Operand::Principal {
                attribute,
                declared,
            } => write!(f, "{}(principal.{attribute})", declared.name()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn grouped(f: &mut fmt::Formatter<'_>, c: &Condition) -> fmt::Result {
            match c {
                Condition::And(_) | Condition::Or(_) => write!(f, "({c})"),
                _ => write!(f, "{c}"),
            }
        }
        fn joined(f: &mut fmt::Formatter<'_>, parts: &[Condition], sep: &str) -> fmt::Result {
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                grouped(f, part)?;
            }
            Ok(())
        }

        match self {
            Condition::Compare {
                field,
                operator,
                operand,
            } => write!(f, "{field} {operator} {operand}"),
            Condition::And(parts) if parts.is_empty() => f.write_str("true"),
            Condition::Or(parts) if parts.is_empty() => f.write_str("false"),
            Condition::And(parts) => joined(f, parts, " && "),
            Condition::Or(parts) => joined(f, parts, " || "),
            Condition::Not(inner) => match inner.as_ref() {
                Condition::Not(_) => write!(f, "!{inner}"),
                _ => write!(f, "!({inner})"),
            },
        }
    }
}

// ─── Parser ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,       // ==
    Ne,       // !=
    Gt,       // >
    Lt,       // <
    And,      // &&
    Or,       // ||
    Not,      // !
    In,       // in
    Contains, // contains
}

fn tokenize(input: &str) -> Result<Vec<Token>, AuthzError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '=' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                return Err(AuthzError::InvalidCondition(format!(
                    "operator `{}=` is not supported, use `>` or `<`",
                    chars[i]
                )));
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if i + 1 < chars.len() && chars[i + 1] == '&' => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if i + 1 < chars.len() && chars[i + 1] == '|' => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        let (unescaped, next) = unescape(&chars, i + 1)?;
                        s.push(unescaped);
                        i = next;
                        continue;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(AuthzError::InvalidCondition(
                        "unterminated string literal".into(),
                    ));
                }
                tokens.push(Token::Str(s));
                i += 1; // skip closing quote
            }
            c if c.is_ascii_digit()
                || (c == '-' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let n: f64 = num_str.parse().map_err(|_| {
                    AuthzError::InvalidCondition(format!("invalid number `{num_str}`"))
                })?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "in" => tokens.push(Token::In),
                    "contains" => tokens.push(Token::Contains),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(AuthzError::InvalidCondition(format!(
                    "unexpected character `{c}`"
                )));
            }
        }
    }
    Ok(tokens)
}

/// Decode the escape starting at `chars[at]` (just past the backslash).
/// Understands the escapes `Display` writes; any other escaped char is kept
/// as is. Returns the char and the index after the escape.
fn unescape(chars: &[char], at: usize) -> Result<(char, usize), AuthzError> {
    let decoded = match chars[at] {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        'u' if chars.get(at + 1) == Some(&'{') => {
            let digits = chars[at + 2..]
                .iter()
                .take_while(|c| c.is_ascii_hexdigit())
                .count();
            let close = at + 2 + digits;
            let hex: String = chars[at + 2..close].iter().collect();
            let decoded = u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .filter(|_| chars.get(close) == Some(&'}'))
                .ok_or_else(|| {
                    AuthzError::InvalidCondition(format!("invalid escape `\\u{{{hex}`"))
                })?;
            return Ok((decoded, close + 1));
        }
        other => other,
    };
    Ok((decoded, at + 1))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), AuthzError> {
        if self.advance() != Some(expected) {
            return Err(AuthzError::InvalidCondition(format!("expected {what}")));
        }
        Ok(())
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Condition, AuthzError> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.advance();
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::Or(parts)
        })
    }

    /// and_expr = unary ("&&" unary)*
    fn parse_and(&mut self) -> Result<Condition, AuthzError> {
        let mut parts = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.advance();
            parts.push(self.parse_unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::And(parts)
        })
    }

    /// unary = "!" unary | "(" or_expr ")" | comparison
    fn parse_unary(&mut self) -> Result<Condition, AuthzError> {
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                Ok(Condition::negate(self.parse_unary()?))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "closing parenthesis `)`")?;
                Ok(inner)
            }
            _ => self.parse_comparison(),
        }
    }

    /// comparison = path operator operand
    fn parse_comparison(&mut self) -> Result<Condition, AuthzError> {
        let field = self.parse_path()?;
        if field == "principal" || field.starts_with("principal.") {
            return Err(AuthzError::InvalidCondition(format!(
                "`{field}` must appear on the right-hand side of a comparison"
            )));
        }

        let operator = match self.advance() {
            Some(Token::Eq) => Operator::Equals,
            Some(Token::Ne) => Operator::NotEquals,
            Some(Token::Gt) => Operator::GreaterThan,
            Some(Token::Lt) => Operator::LessThan,
            Some(Token::In) => Operator::In,
            Some(Token::Contains) => Operator::Contains,
            other => {
                return Err(AuthzError::InvalidCondition(format!(
                    "expected comparison operator after `{field}`, got {other:?}"
                )));
            }
        };

        let operand = self.parse_operand()?;
        Ok(Condition::Compare {
            field,
            operator,
            operand,
        })
    }

    /// path = ident ("." ident)*
    fn parse_path(&mut self) -> Result<String, AuthzError> {
        let mut path = match self.advance() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(AuthzError::InvalidCondition(format!(
                    "expected field name, got {other:?}"
                )));
            }
        };
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            match self.advance() {
                Some(Token::Ident(seg)) => {
                    path.push('.');
                    path.push_str(&seg);
                }
                _ => {
                    return Err(AuthzError::InvalidCondition(
                        "expected identifier after `.`".into(),
                    ));
                }
            }
        }
        Ok(path)
    }

    /// operand = "[" literal ("," literal)* "]" | principal_ref | cast | literal
    fn parse_operand(&mut self) -> Result<Operand, AuthzError> {
        if self.peek() == Some(&Token::LBracket) {
            self.advance();
            let mut items = Vec::new();
            if self.peek() == Some(&Token::RBracket) {
                return Err(AuthzError::InvalidCondition(
                    "`in` needs at least one value".into(),
                ));
            }
            loop {
                items.push(self.parse_literal()?);
                match self.advance() {
                    Some(Token::Comma) => continue,
                    Some(Token::RBracket) => break,
                    _ => {
                        return Err(AuthzError::InvalidCondition(
                            "expected `,` or `]` in list".into(),
                        ));
                    }
                }
            }
            return Ok(Operand::List(items));
        }

        match self.peek().cloned() {
            Some(Token::Ident(name)) if name == "principal" => {
                let attribute = self.parse_principal_ref()?;
                Ok(Operand::Principal {
                    attribute,
                    declared: ValueType::String,
                })
            }
            Some(Token::Ident(name)) => {
                let declared = cast_type(&name)?;
                self.advance();
                self.expect(Token::LParen, &format!("`(` after `{name}`"))?;
                let operand = match self.peek().cloned() {
                    Some(Token::Ident(inner)) if inner == "principal" => Operand::Principal {
                        attribute: self.parse_principal_ref()?,
                        declared,
                    },
                    _ => Operand::Literal(Literal {
                        declared,
                        value: self.parse_raw_value()?,
                    }),
                };
                self.expect(Token::RParen, "closing parenthesis `)`")?;
                Ok(operand)
            }
            _ => Ok(Operand::Literal(self.parse_literal()?)),
        }
    }

    /// literal = number | string | bool | cast "(" raw ")"
    fn parse_literal(&mut self) -> Result<Literal, AuthzError> {
        if let Some(Token::Ident(name)) = self.peek().cloned() {
            let declared = cast_type(&name)?;
            self.advance();
            self.expect(Token::LParen, &format!("`(` after `{name}`"))?;
            let value = self.parse_raw_value()?;
            self.expect(Token::RParen, "closing parenthesis `)`")?;
            return Ok(Literal { declared, value });
        }
        Ok(Literal::infer(self.parse_raw_value()?))
    }

    fn parse_raw_value(&mut self) -> Result<Value, AuthzError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Value::Number(n)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::True) => Ok(Value::Boolean(true)),
            Some(Token::False) => Ok(Value::Boolean(false)),
            other => Err(AuthzError::InvalidCondition(format!(
                "expected a literal value, got {other:?}"
            ))),
        }
    }

    fn parse_principal_ref(&mut self) -> Result<String, AuthzError> {
        let path = self.parse_path()?;
        match path.strip_prefix("principal.") {
            Some(attr) if !attr.contains('.') => Ok(attr.to_string()),
            _ => Err(AuthzError::InvalidCondition(format!(
                "invalid principal reference `{path}` (expected principal.<attribute>)"
            ))),
        }
    }
}

fn cast_type(name: &str) -> Result<ValueType, AuthzError> {
    match name {
        "string" => Ok(ValueType::String),
        "number" => Ok(ValueType::Number),
        "bool" => Ok(ValueType::Boolean),
        "date" => Ok(ValueType::Date),
        other => Err(AuthzError::InvalidCondition(format!(
            "unexpected identifier `{other}` (field-to-field comparisons are not supported)"
        ))),
    }
}

/// Parse a condition expression string into an AST.
pub fn parse_condition(input: &str) -> Result<Condition, AuthzError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AuthzError::InvalidCondition("empty expression".into()));
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(AuthzError::InvalidCondition(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

impl std::str::FromStr for Condition {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_condition(s)
    }
}
