use std::fmt;

use crate::error::Result;
use crate::query::constant::{Cast, CastTarget, Constant, Value};

/// A field reference, `field` or `otherDict.field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub dict_id: Option<String>,
    pub name: String,
}

impl Field {
    pub fn new(name: &str) -> Self {
        Self { dict_id: None, name: name.to_string() }
    }
    pub fn qualified(dict_id: &str, name: &str) -> Self {
        Self { dict_id: Some(dict_id.to_string()), name: name.to_string() }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.dict_id {
            Some(dict_id) => write!(f, "{}.{}", dict_id, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }
}

/// How the listed values are matched against the elements of a
/// multivalued field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    /// Every value is an element.
    All,
    /// At least one value is an element.
    Any,
}

impl Quantifier {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            _ => None,
        }
    }
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Constant(Constant),
    Cast(Cast),
}

impl Operand {
    pub fn value(&self) -> Result<Value> {
        match self {
            Operand::Constant(constant) => constant.value(),
            Operand::Cast(cast) => Ok(cast.value().clone()),
        }
    }
    pub fn cast_target(&self) -> Option<CastTarget> {
        match self {
            Operand::Constant(_) => None,
            Operand::Cast(cast) => Some(cast.target()),
        }
    }
    pub fn is_null(&self) -> bool {
        matches!(self, Operand::Constant(c) if c.raw.is_none())
    }
}

impl From<Constant> for Operand {
    fn from(constant: Constant) -> Self {
        Operand::Constant(constant)
    }
}

/// Parsed query. Every translator matches on it exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// The empty query, matching every record.
    Empty,
    Compare { field: Field, op: CompareOp, value: Operand },
    In { field: Field, values: Vec<Operand>, negated: bool },
    /// `tags all ['a', 'b']`, `tags any ['a', 'b']`.
    Quantified { field: Field, quantifier: Quantifier, values: Vec<Operand> },
    /// SQL wildcard pattern: `%` any run, `_` one character, `\` makes
    /// the next character literal.
    Like { field: Field, pattern: String, case_insensitive: bool },
    /// Inclusive range.
    Between { field: Field, low: Operand, high: Operand },
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And(Box::new(left), Box::new(right))
    }
    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or(Box::new(left), Box::new(right))
    }
    pub fn negate(inner: Expression) -> Self {
        Expression::Not(Box::new(inner))
    }
    /// Every field reference, left to right.
    pub fn fields(&self) -> Vec<&Field> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }
    fn collect_fields<'a>(&'a self, fields: &mut Vec<&'a Field>) {
        match self {
            Expression::Empty => {}
            Expression::Compare { field, .. }
            | Expression::In { field, .. }
            | Expression::Quantified { field, .. }
            | Expression::Like { field, .. }
            | Expression::Between { field, .. } => fields.push(field),
            Expression::Not(inner) => inner.collect_fields(fields),
            Expression::And(left, right) | Expression::Or(left, right) => {
                left.collect_fields(fields);
                right.collect_fields(fields);
            }
        }
    }
}
