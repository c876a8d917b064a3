//! Evaluation of filter documents against stored documents.

use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use regex::RegexBuilder;
use serde_json::Value as Json;

use crate::error::{DictError, Result};

/// Comparable form of a document value.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Null,
    Bool(bool),
    Number(BigDecimal),
    String(String),
    /// `$date` text; the fixed format orders like the instant.
    Date(String),
    Other(Json),
}

impl Scalar {
    fn of(value: &Json) -> Scalar {
        match value {
            Json::Null => Scalar::Null,
            Json::Bool(b) => Scalar::Bool(*b),
            Json::Number(n) => BigDecimal::from_str(&n.to_string()).map_or(Scalar::Other(value.clone()), Scalar::Number),
            Json::String(s) => Scalar::String(s.clone()),
            Json::Object(o) if o.len() == 1 => match (o.get("$numberDecimal"), o.get("$date")) {
                (Some(Json::String(d)), _) => {
                    BigDecimal::from_str(d).map_or(Scalar::Other(value.clone()), Scalar::Number)
                }
                (_, Some(Json::String(d))) => Scalar::Date(d.clone()),
                _ => Scalar::Other(value.clone()),
            },
            other => Scalar::Other(other.clone()),
        }
    }

    fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => Some(a.cmp(b)),
            (Scalar::String(a), Scalar::String(b)) | (Scalar::Date(a), Scalar::Date(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn is_extended_literal(value: &Json) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.len() == 1 && (o.contains_key("$numberDecimal") || o.contains_key("$date")))
}

fn is_operator_object(value: &Json) -> bool {
    !is_extended_literal(value)
        && value
            .as_object()
            .is_some_and(|o| !o.is_empty() && o.keys().all(|k| k.starts_with('$')))
}

/// Values found at a dot path; arrays on the way are searched element
/// by element.
fn lookup<'d>(document: &'d Json, path: &str) -> Vec<&'d Json> {
    let mut current = vec![document];
    for key in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Json::Object(map) => next.extend(map.get(key)),
                Json::Array(items) => next.extend(items.iter().filter_map(|i| i.as_object()?.get(key))),
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Candidates a condition is tested on: each value and the elements of
/// array values. A missing field is null.
fn candidates(document: &Json, path: &str) -> Vec<Json> {
    let found = lookup(document, path);
    if found.is_empty() {
        return vec![Json::Null];
    }
    let mut result = Vec::new();
    for value in found {
        if let Json::Array(items) = value {
            result.extend(items.iter().cloned());
        }
        result.push(value.clone());
    }
    result
}

fn equals(candidates: &[Json], expected: &Json) -> bool {
    let expected = Scalar::of(expected);
    candidates.iter().any(|c| Scalar::of(c) == expected)
}

fn ordered(candidates: &[Json], bound: &Json, accept: impl Fn(Ordering) -> bool) -> bool {
    let bound = Scalar::of(bound);
    candidates
        .iter()
        .any(|c| Scalar::of(c).compare(&bound).is_some_and(&accept))
}

fn list<'a>(operator: &str, value: &'a Json) -> Result<&'a Vec<Json>> {
    value
        .as_array()
        .ok_or_else(|| DictError::Validation(format!("{} expects an array, got {}", operator, value)))
}

/// Whether `document` satisfies `filter`.
pub fn matches(document: &Json, filter: &Json) -> Result<bool> {
    let Json::Object(conditions) = filter else {
        return Err(DictError::Validation(format!("filter must be a document, got {}", filter)));
    };
    for (key, condition) in conditions {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for part in list(key, condition)? {
                    if !matches(document, part)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_matches(document, list(key, condition)?)?,
            "$nor" => !any_matches(document, list(key, condition)?)?,
            path => field_matches(&candidates(document, path), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_matches(document: &Json, parts: &[Json]) -> Result<bool> {
    for part in parts {
        if matches(document, part)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn field_matches(candidates: &[Json], condition: &Json) -> Result<bool> {
    if !is_operator_object(condition) {
        return Ok(equals(candidates, condition));
    }
    let Json::Object(operators) = condition else {
        return Ok(false);
    };
    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => equals(candidates, operand),
            "$ne" => !equals(candidates, operand),
            "$gt" => ordered(candidates, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(candidates, operand, |o| o != Ordering::Less),
            "$lt" => ordered(candidates, operand, |o| o == Ordering::Less),
            "$lte" => ordered(candidates, operand, |o| o != Ordering::Greater),
            "$in" => list(operator, operand)?.iter().any(|v| equals(candidates, v)),
            "$nin" => !list(operator, operand)?.iter().any(|v| equals(candidates, v)),
            "$all" => list(operator, operand)?.iter().all(|v| equals(candidates, v)),
            // one candidate has to satisfy every condition
            "$elemMatch" => {
                let mut found = false;
                for candidate in candidates {
                    if field_matches(std::slice::from_ref(candidate), operand)? {
                        found = true;
                        break;
                    }
                }
                found
            }
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| DictError::Validation(format!("$regex expects a string, got {}", operand)))?;
                let insensitive = operators.get("$options").and_then(|o| o.as_str()).is_some_and(|o| o.contains('i'));
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(insensitive)
                    .dot_matches_new_line(true)
                    .build()
                    .map_err(|e| DictError::Validation(e.to_string()))?;
                candidates.iter().any(|c| c.as_str().is_some_and(|s| regex.is_match(s)))
            }
            "$options" => true,
            other => return Err(DictError::Validation(format!("unsupported filter operator {}", other))),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}
