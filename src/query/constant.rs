//! Typed literals and casts.
//!
//! Date literals are forgiving: a value is tried as a date-time with
//! offset, then as a plain date-time, then as a date with or without an
//! offset (time defaults to midnight). Offsets are dropped and the wall
//! clock time of the literal is kept.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{DictError, Result};

pub const AVAILABLE_DATE_PATTERNS: [&str; 6] = [
    "yyyy-MM-dd",
    "yyyy-MM-ddXXX",
    "yyyy-MM-dd'T'HH:mm:ss",
    "yyyy-MM-dd'T'HH:mm:ssXXX",
    "yyyy-MM-dd'T'HH:mm:ss.SSS",
    "yyyy-MM-dd'T'HH:mm:ss.SSSXXX",
];

/// Largest power of ten a decimal may carry in either direction.
pub const MAX_DECIMAL_EXPONENT: i64 = 1000;

lazy_static! {
    static ref RE_OFFSET: Regex = Regex::new(r"^(Z|z|[+-]\d{2}:\d{2})$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantType {
    Integer,
    Decimal,
    String,
    Boolean,
    Date,
    Timestamp,
    Null,
}

impl fmt::Display for ConstantType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConstantType::Integer => "INTEGER",
            ConstantType::Decimal => "DECIMAL",
            ConstantType::String => "STRING",
            ConstantType::Boolean => "BOOLEAN",
            ConstantType::Date => "DATE",
            ConstantType::Timestamp => "TIMESTAMP",
            ConstantType::Null => "NULL",
        };
        write!(f, "{}", name)
    }
}

/// Interpreted value of a constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    /// Canonical plain form, trailing zeros stripped.
    Decimal(String),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    pub ty: ConstantType,
    /// `None` only for NULL.
    pub raw: Option<String>,
}

impl Constant {
    pub fn new(raw: &str, ty: ConstantType) -> Self {
        match ty {
            ConstantType::Null => Self::null(),
            _ => Self { ty, raw: Some(raw.to_string()) },
        }
    }
    pub fn null() -> Self {
        Self { ty: ConstantType::Null, raw: None }
    }
    pub fn value(&self) -> Result<Value> {
        let Some(raw) = &self.raw else {
            return Ok(Value::Null);
        };
        match self.ty {
            ConstantType::Integer => raw
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| invalid_constant("INTEGER", raw)),
            ConstantType::Decimal => canonical_decimal(raw).map(Value::Decimal),
            ConstantType::String => Ok(Value::String(raw.clone())),
            ConstantType::Boolean => match raw.as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(invalid_constant("BOOLEAN", raw)),
            },
            ConstantType::Date => parse_date(raw).map(Value::Date),
            ConstantType::Timestamp => parse_timestamp(raw).map(Value::Timestamp),
            ConstantType::Null => Ok(Value::Null),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastTarget {
    Date,
    Timestamp,
}

impl FromStr for CastTarget {
    type Err = DictError;
    fn from_str(target: &str) -> Result<Self> {
        match target.to_ascii_lowercase().as_str() {
            "date" => Ok(CastTarget::Date),
            "timestamp" => Ok(CastTarget::Timestamp),
            _ => Err(DictError::UnsupportedCast { target: target.to_string() }),
        }
    }
}

impl fmt::Display for CastTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CastTarget::Date => write!(f, "date"),
            CastTarget::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A literal reinterpreted as a date or timestamp. Parsing happens on
/// construction so a bad literal fails before any translation.
#[derive(Debug, Clone, PartialEq)]
pub struct Cast {
    source: Constant,
    target: CastTarget,
    value: Value,
}

impl Cast {
    pub fn new(source: Constant, target: &str) -> Result<Self> {
        let target = target.parse::<CastTarget>()?;
        let raw = source.raw.clone().unwrap_or_default();
        let value = match target {
            CastTarget::Date => Value::Date(parse_date(&raw)?),
            CastTarget::Timestamp => Value::Timestamp(parse_timestamp(&raw)?),
        };
        Ok(Self { source, target, value })
    }
    pub fn source(&self) -> &Constant {
        &self.source
    }
    pub fn target(&self) -> CastTarget {
        self.target
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
}

// ------------- Parsing helpers -------------
fn invalid_constant(kind: &str, value: &str) -> DictError {
    DictError::InvalidConstant { kind: kind.to_string(), value: value.to_string() }
}

fn cast_error(literal: &str, target: CastTarget) -> DictError {
    DictError::Cast {
        literal: literal.to_string(),
        target: target.to_string(),
        patterns: AVAILABLE_DATE_PATTERNS.join(", "),
    }
}

fn date_time_chain(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.naive_local());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(date_time) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Some(date_time);
        }
    }
    if let Ok((date, remainder)) = NaiveDate::parse_and_remainder(raw, "%Y-%m-%d") {
        if remainder.is_empty() || RE_OFFSET.is_match(remainder) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    None
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    date_time_chain(raw).ok_or_else(|| cast_error(raw, CastTarget::Timestamp))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    date_time_chain(raw)
        .map(|date_time| date_time.date())
        .ok_or_else(|| cast_error(raw, CastTarget::Date))
}

/// Plain-string form of a decimal with trailing zeros removed,
/// never in scientific notation. Exponents beyond
/// [`MAX_DECIMAL_EXPONENT`] are rejected.
pub fn canonical_decimal(raw: &str) -> Result<String> {
    let decimal = BigDecimal::from_str(raw.trim()).map_err(|_| invalid_constant("DECIMAL", raw))?;
    let (_, scale) = decimal.normalized().as_bigint_and_exponent();
    if scale.unsigned_abs() > MAX_DECIMAL_EXPONENT.unsigned_abs() {
        return Err(DictError::Validation(format!(
            "Decimal '{}' is out of range, exponents are limited to {}",
            raw, MAX_DECIMAL_EXPONENT
        )));
    }
    Ok(plain_decimal(&decimal))
}

pub fn plain_decimal(decimal: &BigDecimal) -> String {
    let (digits, scale) = decimal.normalized().as_bigint_and_exponent();
    let text = digits.to_string();
    if text == "0" {
        return text;
    }
    let (sign, magnitude) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest.to_string()),
        None => ("", text),
    };
    if scale <= 0 {
        return format!("{}{}{}", sign, magnitude, "0".repeat((-scale) as usize));
    }
    let scale = scale as usize;
    if magnitude.len() > scale {
        let (whole, fraction) = magnitude.split_at(magnitude.len() - scale);
        format!("{}{}.{}", sign, whole, fraction)
    } else {
        format!("{}0.{}{}", sign, "0".repeat(scale - magnitude.len()), magnitude)
    }
}
