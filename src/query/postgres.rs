use std::collections::BTreeSet;

use crate::error::Result;
use crate::model::DictFieldType;
use crate::query::Translator;
use crate::query::ast::{CompareOp, Expression, Field, Quantifier};
use crate::query::catalog::{ResolvedField, TranslationContext};
use crate::query::constant::Value;
use crate::query::keyword::QualifiedField;

/// A SQL boolean fragment with its named parameters. Constants never
/// appear in `sql` itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPredicate {
    pub sql: String,
    pub params: Vec<(String, Value)>,
    /// Dicts whose tables the fragment refers to.
    pub participant_dict_ids: BTreeSet<String>,
}

impl SqlPredicate {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresTranslator;

impl Translator for PostgresTranslator {
    type Output = SqlPredicate;

    fn translate(&self, expression: &Expression, context: &TranslationContext) -> Result<SqlPredicate> {
        let mut render = Render { context, params: Vec::new(), participants: BTreeSet::new() };
        let sql = render.expression(expression)?;
        Ok(SqlPredicate { sql, params: render.params, participant_dict_ids: render.participants })
    }
}

struct Render<'c, 'a> {
    context: &'c TranslationContext<'a>,
    params: Vec<(String, Value)>,
    participants: BTreeSet<String>,
}

impl Render<'_, '_> {
    fn expression(&mut self, expression: &Expression) -> Result<String> {
        match expression {
            Expression::Empty => Ok("true".to_string()),
            Expression::Compare { field, op, value } => {
                let (column, resolved) = self.field(field)?;
                let value = self.context.operand_value(&resolved, value)?;
                if value.is_null() {
                    return Ok(match op {
                        CompareOp::Eq => format!("{} is null", column),
                        CompareOp::Ne => format!("{} is not null", column),
                        // nothing is ordered against null
                        _ => "false".to_string(),
                    });
                }
                let param = self.bind(&resolved, value);
                Ok(match (op, resolved.multivalued) {
                    (CompareOp::Ne, true) => format!("not {}", any_element(&column, &resolved, |e| format!("{} = {}", e, param))),
                    (CompareOp::Ne, false) => format!("({0} != {1} or {0} is null)", column, param),
                    (op, true) => any_element(&column, &resolved, |e| format!("{} {} {}", e, symbol(*op), param)),
                    (op, false) => format!("{} {} {}", column, symbol(*op), param),
                })
            }
            Expression::In { field, values, negated } => {
                let (column, resolved) = self.field(field)?;
                let mut params = Vec::with_capacity(values.len());
                let mut with_null = false;
                for operand in values {
                    let value = self.context.operand_value(&resolved, operand)?;
                    if value.is_null() {
                        with_null = true;
                    } else {
                        params.push(self.bind(&resolved, value));
                    }
                }
                let listed = (!params.is_empty()).then(|| {
                    let list = params.join(", ");
                    match (resolved.multivalued, *negated) {
                        (true, false) => any_element(&column, &resolved, |e| format!("{} in ({})", e, list)),
                        (true, true) => format!("not {}", any_element(&column, &resolved, |e| format!("{} in ({})", e, list))),
                        (false, false) => format!("{} in ({})", column, list),
                        (false, true) => format!("{} not in ({})", column, list),
                    }
                });
                Ok(match (listed, *negated, with_null) {
                    (Some(listed), false, false) => listed,
                    (Some(listed), false, true) => format!("({} or {} is null)", listed, column),
                    (Some(listed), true, false) if resolved.multivalued => listed,
                    (Some(listed), true, false) => format!("({} or {} is null)", listed, column),
                    (Some(listed), true, true) => format!("({} and {} is not null)", listed, column),
                    (None, false, _) => format!("{} is null", column),
                    (None, true, _) => format!("{} is not null", column),
                })
            }
            Expression::Quantified { field, quantifier, values } => {
                let (column, resolved) = self.field(field)?;
                let (values, with_null) = self.context.element_values(&resolved, values)?;
                if values.is_empty() || (with_null && *quantifier == Quantifier::All) {
                    return Ok("false".to_string());
                }
                let count = values.len();
                let params: Vec<String> = values.into_iter().map(|value| self.bind(&resolved, value)).collect();
                let list = params.join(", ");
                Ok(match (quantifier, resolved.multivalued) {
                    (Quantifier::Any, true) => any_element(&column, &resolved, |e| format!("{} in ({})", e, list)),
                    (Quantifier::Any, false) => format!("{} in ({})", column, list),
                    (Quantifier::All, true) => format!(
                        "(select count(distinct {0}) from json_each({1}) where {0} in ({2})) = {3}",
                        element(&resolved),
                        column,
                        list,
                        count
                    ),
                    (Quantifier::All, false) if count == 1 => format!("{} = {}", column, list),
                    (Quantifier::All, false) => {
                        let equalities: Vec<String> = params.iter().map(|p| format!("{} = {}", column, p)).collect();
                        format!("({})", equalities.join(" and "))
                    }
                })
            }
            Expression::Like { field, pattern, case_insensitive } => {
                let (column, resolved) = self.field(field)?;
                let param = self.bind(&resolved, Value::String(pattern.clone()));
                let like = |subject: &str| {
                    if *case_insensitive {
                        format!("lower({}) like lower({}) escape '\\'", subject, param)
                    } else {
                        format!("{} like {} escape '\\'", subject, param)
                    }
                };
                if resolved.multivalued {
                    return Ok(any_element(&column, &resolved, like));
                }
                Ok(like(&column))
            }
            Expression::Between { field, low, high } => {
                let (column, resolved) = self.field(field)?;
                let low = self.context.operand_value(&resolved, low)?;
                let high = self.context.operand_value(&resolved, high)?;
                if low.is_null() || high.is_null() {
                    return Ok("false".to_string());
                }
                let low = self.bind(&resolved, low);
                let high = self.bind(&resolved, high);
                let between = |subject: &str| format!("{} between {} and {}", subject, low, high);
                if resolved.multivalued {
                    return Ok(any_element(&column, &resolved, between));
                }
                Ok(between(&column))
            }
            // unknown (null) counts as false before negating
            Expression::Not(inner) => Ok(format!("not coalesce({}, false)", self.expression(inner)?)),
            Expression::And(left, right) => {
                Ok(format!("({} and {})", self.expression(left)?, self.expression(right)?))
            }
            Expression::Or(left, right) => {
                Ok(format!("({} or {})", self.expression(left)?, self.expression(right)?))
            }
        }
    }

    fn field(&mut self, field: &Field) -> Result<(String, ResolvedField)> {
        let resolved = self.context.resolve(field)?;
        self.participants.insert(resolved.dict_id.clone());
        let column = QualifiedField::resolve(Some(&resolved.dict_id), &resolved.id).sql();
        Ok((column, resolved))
    }

    /// Registers `value` as `:{dict}__{field}_{n}`.
    fn bind(&mut self, resolved: &ResolvedField, value: Value) -> String {
        let name = format!(
            "{}__{}_{}",
            sanitize(&resolved.dict_id),
            sanitize(&resolved.id),
            self.params.len() + 1
        );
        let placeholder = format!(":{}", name);
        self.params.push((name, value));
        placeholder
    }
}

fn symbol(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "!=",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
    }
}

/// A multivalued column holds a JSON array; its elements are compared
/// one by one. Decimal elements are stored as strings.
fn element(resolved: &ResolvedField) -> &'static str {
    match resolved.field_type {
        DictFieldType::Decimal => "cast(value as real)",
        _ => "value",
    }
}

fn any_element(column: &str, resolved: &ResolvedField, condition: impl FnOnce(&str) -> String) -> String {
    format!("exists (select 1 from json_each({}) where {})", column, condition(element(resolved)))
}

fn sanitize(word: &str) -> String {
    word.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
