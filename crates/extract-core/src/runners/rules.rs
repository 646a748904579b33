//! Process matching rule expressions
//!
//! Supports expressions like:
//! `PRODUCTGUID = "a8405d50" AND (PARAMETERS.FORMAT IN (PDF, DXF) OR SURFACE > 1000)`
//!
//! Fields are resolved through [`RequestField`], an explicit accessor map
//! over [`Request`]. Text comparisons ignore case; two numeric operands are
//! compared as numbers. Geometric conditions are parsed but never match.

use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::Request;

/// Rule parsing error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    /// Expression ended too early
    #[error("unexpected end of rule")]
    UnexpectedEnd,
    /// Token not allowed here
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    /// Missing closing quote
    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),
    /// Character not part of the language
    #[error("invalid character '{0}' at position {1}")]
    InvalidCharacter(char, usize),
    /// Field not known
    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=` or `==`
    Eq,
    /// `!=` or `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

/// Geometric operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometricOp {
    /// `INTERSECTS`
    Intersects,
    /// `CONTAINS`
    Contains,
    /// `DISJOINT`
    Disjoint,
    /// `EQUALS`
    Equals,
    /// `WITHIN`
    Within,
}

/// Request attribute usable in a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestField {
    /// `ORDERLABEL`
    OrderLabel,
    /// `ORDERGUID`
    OrderGuid,
    /// `PRODUCTGUID`
    ProductGuid,
    /// `PRODUCTLABEL`
    ProductLabel,
    /// `ORGANISM`
    Organism,
    /// `CLIENT`
    Client,
    /// `TIERS`
    Tiers,
    /// `SURFACE`
    Surface,
    /// `PERIMETER`
    Perimeter,
    /// `PARAMETERS.<KEY>`
    Parameter(String),
}

impl RequestField {
    /// Resolve a field name
    pub fn parse(name: &str) -> Result<Self, RuleError> {
        let upper = name.to_uppercase();

        let field = match upper.as_str() {
            "ORDERLABEL" => Self::OrderLabel,
            "ORDERGUID" => Self::OrderGuid,
            "PRODUCTGUID" => Self::ProductGuid,
            "PRODUCTLABEL" => Self::ProductLabel,
            "ORGANISM" => Self::Organism,
            "CLIENT" => Self::Client,
            "TIERS" => Self::Tiers,
            "SURFACE" => Self::Surface,
            "PERIMETER" => Self::Perimeter,
            _ => match upper.strip_prefix("PARAMETERS.") {
                Some(key) if !key.is_empty() => Self::Parameter(key.to_string()),
                _ => return Err(RuleError::UnknownField(name.to_string())),
            },
        };

        Ok(field)
    }

    fn value(&self, request: &Request) -> Option<Operand> {
        let text = |value: &str| Some(Operand::Text(value.to_string()));

        match self {
            Self::OrderLabel => text(&request.order_label),
            Self::OrderGuid => text(&request.order_guid),
            Self::ProductGuid => text(&request.product_guid),
            Self::ProductLabel => text(&request.product_label),
            Self::Organism => text(&request.organism),
            Self::Client => text(&request.client),
            Self::Tiers => request.tiers.as_deref().and_then(text),
            Self::Surface => request.surface.map(Operand::Number),
            Self::Perimeter => request.perimeter.as_deref().and_then(text),
            Self::Parameter(key) => {
                let parameters = request.parameters.as_object()?;
                let (_, value) = parameters
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))?;

                match value {
                    Value::Null => None,
                    Value::Number(number) => number.as_f64().map(Operand::Number),
                    Value::String(s) => text(s),
                    other => Some(Operand::Text(other.to_string())),
                }
            }
        }
    }
}

/// Literal or field value
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Text value
    Text(String),
    /// Numeric value
    Number(f64),
}

impl Operand {
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_uppercase(),
        }
    }

    fn compare(&self, other: &Operand) -> Option<Ordering> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(self.as_text().cmp(&other.as_text())),
        }
    }
}

/// Parsed rule expression
#[derive(Debug, Clone, PartialEq)]
pub enum RuleExpression {
    /// Both sides match
    And(Box<RuleExpression>, Box<RuleExpression>),
    /// Either side matches
    Or(Box<RuleExpression>, Box<RuleExpression>),
    /// Inner expression does not match
    Not(Box<RuleExpression>),
    /// `TRUE` or `FALSE`
    Constant(bool),
    /// `FIELD op value`
    Compare {
        /// Compared field
        field: RequestField,
        /// Operator
        op: CompareOp,
        /// Compared value
        value: Operand,
    },
    /// `FIELD [NOT] IN (values)`
    InList {
        /// Searched field
        field: RequestField,
        /// Candidate values
        values: Vec<Operand>,
        /// `NOT IN`
        negated: bool,
    },
    /// `FIELD INTERSECTS geometry` and similar
    Geometric {
        /// Geometric field
        field: RequestField,
        /// Operator
        op: GeometricOp,
        /// Geometry as WKT
        geometry: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LeftParen,
    RightParen,
    Comma,
    And,
    Or,
    Not,
    In,
    Compare(CompareOp),
    Geometric(GeometricOp),
    Word(String),
    Text(String),
    Number(f64),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::In => write!(f, "IN"),
            Token::Compare(op) => write!(f, "{:?}", op),
            Token::Geometric(op) => write!(f, "{:?}", op),
            Token::Word(w) => write!(f, "{}", w),
            Token::Text(t) => write!(f, "\"{}\"", t),
            Token::Number(n) => write!(f, "{}", n),
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, RuleError> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some((position, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LeftParen),
            ')' => tokens.push(Token::RightParen),
            ',' => tokens.push(Token::Comma),
            '"' | '\'' => {
                let mut value = String::new();
                let mut closed = false;

                for (_, next) in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    value.push(next);
                }

                if !closed {
                    return Err(RuleError::UnterminatedString(position));
                }
                tokens.push(Token::Text(value));
            }
            '=' => {
                chars.next_if(|(_, next)| *next == '=');
                tokens.push(Token::Compare(CompareOp::Eq));
            }
            '!' => match chars.next_if(|(_, next)| *next == '=') {
                Some(_) => tokens.push(Token::Compare(CompareOp::Ne)),
                None => tokens.push(Token::Not),
            },
            '<' => {
                if chars.next_if(|(_, next)| *next == '=').is_some() {
                    tokens.push(Token::Compare(CompareOp::Le));
                } else if chars.next_if(|(_, next)| *next == '>').is_some() {
                    tokens.push(Token::Compare(CompareOp::Ne));
                } else {
                    tokens.push(Token::Compare(CompareOp::Lt));
                }
            }
            '>' => {
                if chars.next_if(|(_, next)| *next == '=').is_some() {
                    tokens.push(Token::Compare(CompareOp::Ge));
                } else {
                    tokens.push(Token::Compare(CompareOp::Gt));
                }
            }
            '&' | '|' => {
                if chars.next_if(|(_, next)| *next == c).is_none() {
                    return Err(RuleError::InvalidCharacter(c, position));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            _ => {
                let mut word = String::from(c);

                while let Some((_, next)) =
                    chars.next_if(|(_, next)| !next.is_whitespace() && !"()=,!<>\"'&|".contains(*next))
                {
                    word.push(next);
                }

                tokens.push(word_token(word));
            }
        }
    }

    Ok(tokens)
}

fn word_token(word: String) -> Token {
    match word.to_uppercase().as_str() {
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        "IN" => Token::In,
        "INTERSECTS" => Token::Geometric(GeometricOp::Intersects),
        "CONTAINS" => Token::Geometric(GeometricOp::Contains),
        "DISJOINT" => Token::Geometric(GeometricOp::Disjoint),
        "EQUALS" => Token::Geometric(GeometricOp::Equals),
        "WITHIN" => Token::Geometric(GeometricOp::Within),
        _ => match word.parse::<f64>() {
            Ok(number) => Token::Number(number),
            Err(_) => Token::Word(word),
        },
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Result<Token, RuleError> {
        let token = self
            .tokens
            .get(self.position)
            .cloned()
            .ok_or(RuleError::UnexpectedEnd)?;
        self.position += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> Result<(), RuleError> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(RuleError::UnexpectedToken(token.to_string()))
        }
    }

    fn parse_or(&mut self) -> Result<RuleExpression, RuleError> {
        let mut left = self.parse_and()?;

        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            let right = self.parse_and()?;
            left = RuleExpression::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<RuleExpression, RuleError> {
        let mut left = self.parse_unary()?;

        while self.peek() == Some(&Token::And) {
            self.position += 1;
            let right = self.parse_unary()?;
            left = RuleExpression::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<RuleExpression, RuleError> {
        match self.next()? {
            Token::Not => Ok(RuleExpression::Not(Box::new(self.parse_unary()?))),
            Token::LeftParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RightParen)?;
                Ok(inner)
            }
            Token::Word(word) => self.parse_condition(word),
            other => Err(RuleError::UnexpectedToken(other.to_string())),
        }
    }

    fn parse_condition(&mut self, word: String) -> Result<RuleExpression, RuleError> {
        match word.to_uppercase().as_str() {
            "TRUE" => return Ok(RuleExpression::Constant(true)),
            "FALSE" => return Ok(RuleExpression::Constant(false)),
            _ => {}
        }

        let field = RequestField::parse(&word)?;

        match self.next()? {
            Token::Compare(op) => Ok(RuleExpression::Compare {
                field,
                op,
                value: self.parse_operand()?,
            }),
            Token::In => Ok(RuleExpression::InList {
                field,
                values: self.parse_list()?,
                negated: false,
            }),
            Token::Not => {
                self.expect(Token::In)?;
                Ok(RuleExpression::InList {
                    field,
                    values: self.parse_list()?,
                    negated: true,
                })
            }
            Token::Geometric(op) => {
                let geometry = match self.parse_operand()? {
                    Operand::Text(text) => text,
                    Operand::Number(n) => n.to_string(),
                };
                Ok(RuleExpression::Geometric { field, op, geometry })
            }
            other => Err(RuleError::UnexpectedToken(other.to_string())),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, RuleError> {
        match self.next()? {
            Token::Text(text) | Token::Word(text) => Ok(Operand::Text(text)),
            Token::Number(number) => Ok(Operand::Number(number)),
            other => Err(RuleError::UnexpectedToken(other.to_string())),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Operand>, RuleError> {
        self.expect(Token::LeftParen)?;
        let mut values = vec![self.parse_operand()?];

        loop {
            match self.next()? {
                Token::Comma => values.push(self.parse_operand()?),
                Token::RightParen => return Ok(values),
                other => return Err(RuleError::UnexpectedToken(other.to_string())),
            }
        }
    }
}

impl RuleExpression {
    /// Parse a rule
    pub fn parse(expression: &str) -> Result<Self, RuleError> {
        let mut parser = Parser {
            tokens: tokenize(expression)?,
            position: 0,
        };

        let parsed = parser.parse_or()?;

        match parser.peek() {
            Some(token) => Err(RuleError::UnexpectedToken(token.to_string())),
            None => Ok(parsed),
        }
    }

    /// Whether a request satisfies the rule
    pub fn evaluate(&self, request: &Request) -> bool {
        match self {
            Self::And(left, right) => left.evaluate(request) && right.evaluate(request),
            Self::Or(left, right) => left.evaluate(request) || right.evaluate(request),
            Self::Not(inner) => !inner.evaluate(request),
            Self::Constant(value) => *value,
            Self::Compare { field, op, value } => match field.value(request) {
                None => *op == CompareOp::Ne,
                Some(actual) => match actual.compare(value) {
                    None => false,
                    Some(ordering) => match op {
                        CompareOp::Eq => ordering == Ordering::Equal,
                        CompareOp::Ne => ordering != Ordering::Equal,
                        CompareOp::Gt => ordering == Ordering::Greater,
                        CompareOp::Ge => ordering != Ordering::Less,
                        CompareOp::Lt => ordering == Ordering::Less,
                        CompareOp::Le => ordering != Ordering::Greater,
                    },
                },
            },
            Self::InList {
                field,
                values,
                negated,
            } => {
                let found = field.value(request).is_some_and(|actual| {
                    values
                        .iter()
                        .any(|candidate| actual.compare(candidate) == Some(Ordering::Equal))
                });
                found != *negated
            }
            Self::Geometric { field, op, .. } => {
                warn!(?field, ?op, "Geometric rule conditions are not supported, condition does not match");
                false
            }
        }
    }
}

/// Evaluate a rule text against a request; unparsable rules never match
pub fn matches(expression: &str, request: &Request) -> bool {
    match RuleExpression::parse(expression) {
        Ok(rule) => {
            let matched = rule.evaluate(request);
            debug!(request_id = request.id, rule = expression, matched, "Rule evaluated");
            matched
        }
        Err(e) => {
            warn!(rule = expression, "Could not parse the matching rule: {}", e);
            false
        }
    }
}
