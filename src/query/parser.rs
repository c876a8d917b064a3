use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::error::{DictError, Result};
use crate::query::ast::{CompareOp, Expression, Field, Operand, Quantifier};
use crate::query::constant::{Cast, Constant, ConstantType};

#[derive(Parser)]
#[grammar = "query/query.pest"]
struct QueryGrammar;

const FRAGMENT_LENGTH: usize = 20;

/// Parses query text into an [`Expression`]. Field existence is not
/// checked here, that happens during translation.
pub fn parse(text: &str) -> Result<Expression> {
    let mut pairs = QueryGrammar::parse(Rule::query, text).map_err(|e| syntax_error(text, e))?;
    let Some(query) = pairs.next() else {
        return Ok(Expression::Empty);
    };
    match query.into_inner().find(|p| p.as_rule() == Rule::expression) {
        Some(expression) => build(expression),
        None => Ok(Expression::Empty),
    }
}

fn syntax_error(text: &str, e: pest::error::Error<Rule>) -> DictError {
    let position = match e.location {
        InputLocation::Pos(position) => position,
        InputLocation::Span((start, _)) => start,
    };
    DictError::QuerySyntax {
        message: e.variant.message().to_string(),
        position,
        fragment: fragment_at(text, position),
    }
}

pub(crate) fn fragment_at(text: &str, position: usize) -> String {
    text.get(position..)
        .unwrap_or_default()
        .chars()
        .take(FRAGMENT_LENGTH)
        .collect()
}

fn build(pair: Pair<Rule>) -> Result<Expression> {
    match pair.as_rule() {
        Rule::expression => fold(pair, Rule::or_op, Expression::or),
        Rule::conjunction => fold(pair, Rule::and_op, Expression::and),
        Rule::negation => {
            let mut negations = 0;
            let mut inner = None;
            for child in pair.into_inner() {
                match child.as_rule() {
                    Rule::not_op => negations += 1,
                    _ => inner = Some(build(child)?),
                }
            }
            let mut expression = inner.unwrap_or(Expression::Empty);
            for _ in 0..negations {
                expression = Expression::negate(expression);
            }
            Ok(expression)
        }
        Rule::comparison => {
            let mut inner = pair.into_inner();
            let field = next_field(&mut inner)?;
            let symbol = next_pair(&mut inner)?;
            let op = CompareOp::from_symbol(symbol.as_str()).ok_or_else(|| unexpected(&symbol))?;
            let value = build_operand(next_pair(&mut inner)?)?;
            Ok(Expression::Compare { field, op, value })
        }
        Rule::like => {
            let mut inner = pair.into_inner();
            let field = next_field(&mut inner)?;
            let case_insensitive = next_pair(&mut inner)?.as_str().eq_ignore_ascii_case("ilike");
            let literal = next_pair(&mut inner)?;
            let position = literal.as_span().start();
            let pattern = string_literal(literal);
            if ends_with_escape(&pattern) {
                return Err(DictError::QuerySyntax {
                    message: "like pattern must not end with the escape character".to_string(),
                    position,
                    fragment: fragment_at(&pattern, 0),
                });
            }
            Ok(Expression::Like { field, pattern, case_insensitive })
        }
        Rule::in_list => {
            let mut negated = false;
            let mut field = None;
            let mut values = Vec::new();
            for child in pair.into_inner() {
                match child.as_rule() {
                    Rule::field => field = Some(build_field(child)),
                    Rule::not_op => negated = true,
                    Rule::in_op => {}
                    _ => values.push(build_operand(child)?),
                }
            }
            let field = field.ok_or_else(|| internal("in list without a field"))?;
            Ok(Expression::In { field, values, negated })
        }
        Rule::quantified => {
            let mut quantifier = None;
            let mut field = None;
            let mut values = Vec::new();
            for child in pair.into_inner() {
                match child.as_rule() {
                    Rule::field => field = Some(build_field(child)),
                    Rule::quantifier => quantifier = Quantifier::from_keyword(child.as_str()),
                    _ => values.push(build_operand(child)?),
                }
            }
            let field = field.ok_or_else(|| internal("quantified list without a field"))?;
            let quantifier = quantifier.ok_or_else(|| internal("quantified list without all or any"))?;
            Ok(Expression::Quantified { field, quantifier, values })
        }
        Rule::between => {
            let mut operands = Vec::new();
            let mut field = None;
            for child in pair.into_inner() {
                match child.as_rule() {
                    Rule::field => field = Some(build_field(child)),
                    Rule::operand => operands.push(build_operand(child)?),
                    _ => {}
                }
            }
            let field = field.ok_or_else(|| internal("between without a field"))?;
            let mut operands = operands.into_iter();
            match (operands.next(), operands.next()) {
                (Some(low), Some(high)) => Ok(Expression::Between { field, low, high }),
                _ => Err(internal("between needs two bounds")),
            }
        }
        _ => Err(unexpected(&pair)),
    }
}

fn fold(pair: Pair<Rule>, operator: Rule, combine: fn(Expression, Expression) -> Expression) -> Result<Expression> {
    let mut result: Option<Expression> = None;
    for child in pair.into_inner().filter(|p| p.as_rule() != operator) {
        let expression = build(child)?;
        result = Some(match result {
            Some(left) => combine(left, expression),
            None => expression,
        });
    }
    result.ok_or_else(|| internal("empty logical expression"))
}

fn build_field(pair: Pair<Rule>) -> Field {
    let idents: Vec<&str> = pair.into_inner().map(|p| p.as_str()).collect();
    match idents.as_slice() {
        [dict_id, name] => Field::qualified(dict_id, name),
        [name] => Field::new(name),
        _ => Field::new(""),
    }
}

fn build_operand(pair: Pair<Rule>) -> Result<Operand> {
    let inner = match pair.as_rule() {
        Rule::operand => pair.into_inner().next().ok_or_else(|| internal("empty operand"))?,
        _ => pair,
    };
    match inner.as_rule() {
        Rule::cast => {
            let mut parts = inner.into_inner();
            let source = build_constant(next_pair(&mut parts)?)?;
            let target = next_pair(&mut parts)?;
            Ok(Operand::Cast(Cast::new(source, target.as_str())?))
        }
        _ => Ok(Operand::Constant(build_constant(inner)?)),
    }
}

fn build_constant(pair: Pair<Rule>) -> Result<Constant> {
    match pair.as_rule() {
        Rule::null => Ok(Constant::null()),
        Rule::boolean => Ok(Constant::new(&pair.as_str().to_ascii_lowercase(), ConstantType::Boolean)),
        Rule::decimal => Ok(Constant::new(pair.as_str(), ConstantType::Decimal)),
        Rule::integer => Ok(Constant::new(pair.as_str(), ConstantType::Integer)),
        Rule::string => Ok(Constant::new(&string_literal(pair), ConstantType::String)),
        _ => Err(unexpected(&pair)),
    }
}

fn string_literal(pair: Pair<Rule>) -> String {
    match pair.into_inner().next() {
        Some(body) => match body.as_rule() {
            Rule::double_quoted => body.as_str().replace("\"\"", "\""),
            _ => body.as_str().replace("''", "'"),
        },
        None => String::new(),
    }
}

/// An odd run of trailing backslashes leaves the last one escaping nothing.
fn ends_with_escape(pattern: &str) -> bool {
    pattern.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn next_pair<'i>(pairs: &mut pest::iterators::Pairs<'i, Rule>) -> Result<Pair<'i, Rule>> {
    pairs.next().ok_or_else(|| internal("unexpected end of input"))
}

fn next_field(pairs: &mut pest::iterators::Pairs<Rule>) -> Result<Field> {
    Ok(build_field(next_pair(pairs)?))
}

fn unexpected(pair: &Pair<Rule>) -> DictError {
    let position = pair.as_span().start();
    DictError::QuerySyntax {
        message: format!("unexpected {:?}", pair.as_rule()),
        position,
        fragment: pair.as_str().chars().take(FRAGMENT_LENGTH).collect(),
    }
}

fn internal(message: &str) -> DictError {
    DictError::QuerySyntax { message: message.to_string(), position: 0, fragment: String::new() }
}
