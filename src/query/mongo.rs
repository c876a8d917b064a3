use std::collections::BTreeSet;

use serde_json::{Map, Value as Json, json};

use crate::error::Result;
use crate::query::Translator;
use crate::query::ast::{CompareOp, Expression, Field, Quantifier};
use crate::query::catalog::{ResolvedField, TranslationContext};
use crate::query::constant::Value;
use crate::query::keyword;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// A filter document in extended JSON (`$numberDecimal`, `$date`).
#[derive(Debug, Clone, PartialEq)]
pub struct MongoFilter {
    pub document: Json,
    pub participant_dict_ids: BTreeSet<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MongoTranslator;

impl Translator for MongoTranslator {
    type Output = MongoFilter;

    fn translate(&self, expression: &Expression, context: &TranslationContext) -> Result<MongoFilter> {
        let mut participants = BTreeSet::new();
        let document = filter(expression, context, &mut participants)?;
        Ok(MongoFilter { document, participant_dict_ids: participants })
    }
}

fn filter(expression: &Expression, context: &TranslationContext, participants: &mut BTreeSet<String>) -> Result<Json> {
    match expression {
        Expression::Empty => Ok(json!({})),
        Expression::Compare { field, op, value } => {
            let (path, resolved) = resolve(field, context, participants)?;
            let value = to_json(&context.operand_value(&resolved, value)?);
            let condition = match op {
                CompareOp::Eq if value.is_null() => json!({ "$eq": null }),
                CompareOp::Ne => json!({ "$ne": value }),
                // nothing is ordered against null
                _ if value.is_null() => never(),
                CompareOp::Eq => value,
                CompareOp::Lt => json!({ "$lt": value }),
                CompareOp::Le => json!({ "$lte": value }),
                CompareOp::Gt => json!({ "$gt": value }),
                CompareOp::Ge => json!({ "$gte": value }),
            };
            Ok(single(path, condition))
        }
        Expression::In { field, values, negated } => {
            let (path, resolved) = resolve(field, context, participants)?;
            let values = values
                .iter()
                .map(|operand| context.operand_value(&resolved, operand).map(|v| to_json(&v)))
                .collect::<Result<Vec<_>>>()?;
            let operator = if *negated { "$nin" } else { "$in" };
            Ok(single(path, single(operator.to_string(), Json::Array(values))))
        }
        Expression::Quantified { field, quantifier, values } => {
            let (path, resolved) = resolve(field, context, participants)?;
            let (values, with_null) = context.element_values(&resolved, values)?;
            let values = Json::Array(values.iter().map(to_json).collect());
            let condition = match quantifier {
                Quantifier::All if with_null => never(),
                Quantifier::All => single("$all".to_string(), values),
                Quantifier::Any => single("$in".to_string(), values),
            };
            Ok(single(path, condition))
        }
        Expression::Like { field, pattern, case_insensitive } => {
            let (path, _) = resolve(field, context, participants)?;
            let mut condition = Map::new();
            condition.insert("$regex".to_string(), Json::String(like_to_regex(pattern)));
            if *case_insensitive {
                condition.insert("$options".to_string(), Json::String("i".to_string()));
            }
            Ok(single(path, Json::Object(condition)))
        }
        Expression::Between { field, low, high } => {
            let (path, resolved) = resolve(field, context, participants)?;
            let low = to_json(&context.operand_value(&resolved, low)?);
            let high = to_json(&context.operand_value(&resolved, high)?);
            if low.is_null() || high.is_null() {
                return Ok(single(path, never()));
            }
            let range = json!({ "$gte": low, "$lte": high });
            if resolved.multivalued {
                // both bounds hold for the same element
                return Ok(single(path, json!({ "$elemMatch": range })));
            }
            Ok(single(path, range))
        }
        Expression::Not(inner) => Ok(json!({ "$nor": [filter(inner, context, participants)?] })),
        Expression::And(left, right) => combine("$and", left, right, context, participants),
        Expression::Or(left, right) => combine("$or", left, right, context, participants),
    }
}

/// A condition no value satisfies.
fn never() -> Json {
    json!({ "$in": [] })
}

fn combine(
    operator: &str,
    left: &Expression,
    right: &Expression,
    context: &TranslationContext,
    participants: &mut BTreeSet<String>,
) -> Result<Json> {
    let mut operands = Vec::new();
    for side in [left, right] {
        let document = filter(side, context, participants)?;
        // a chain of the same connective becomes one array
        match document.as_object().and_then(|o| o.get(operator).filter(|_| o.len() == 1)) {
            Some(Json::Array(nested)) => operands.extend(nested.iter().cloned()),
            _ => operands.push(document),
        }
    }
    Ok(single(operator.to_string(), Json::Array(operands)))
}

fn resolve(field: &Field, context: &TranslationContext, participants: &mut BTreeSet<String>) -> Result<(String, ResolvedField)> {
    let resolved = context.resolve(field)?;
    participants.insert(resolved.dict_id.clone());
    let owner = resolved.joined.then_some(resolved.dict_id.as_str());
    Ok((keyword::document_path(owner, &resolved.id), resolved))
}

fn single(key: String, value: Json) -> Json {
    let mut map = Map::new();
    map.insert(key, value);
    Json::Object(map)
}

pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Integer(i) => json!(i),
        Value::Decimal(d) => json!({ "$numberDecimal": d }),
        Value::String(s) => Json::String(s.clone()),
        Value::Boolean(b) => Json::Bool(*b),
        Value::Date(d) => json!({ "$date": d.and_time(chrono::NaiveTime::MIN).format(TIMESTAMP_FORMAT).to_string() }),
        Value::Timestamp(ts) => json!({ "$date": ts.format(TIMESTAMP_FORMAT).to_string() }),
    }
}

/// `%` becomes `.*`, `_` becomes `.`, a backslash makes the next
/// character literal and everything else matches literally.
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => regex.push_str(&regex::escape(&escaped.to_string())),
                // never matches, like a dangling escape in SQL
                None => regex.push_str("\\b\\B"),
            },
            _ => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    regex
}
