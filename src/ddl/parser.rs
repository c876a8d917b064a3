use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;

use crate::ddl::ast::*;
use crate::error::{DictError, Result};
use crate::query::CompareOp;
use crate::query::parser::fragment_at;

#[derive(Parser)]
#[grammar = "ddl/ddl.pest"]
struct DdlGrammar;

/// Parses a script into its statements, in order.
pub fn parse_ddl(text: &str) -> Result<Vec<DdlExpression>> {
    let script = DdlGrammar::parse(Rule::script, text)
        .map_err(|e| {
            let position = match e.location {
                InputLocation::Pos(position) => position,
                InputLocation::Span((start, _)) => start,
            };
            DictError::DdlSyntax {
                message: e.variant.message().to_string(),
                position,
                fragment: fragment_at(text, position),
            }
        })?
        .next();
    let Some(script) = script else {
        return Ok(Vec::new());
    };
    script
        .into_inner()
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(statement)
        .collect()
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_add
            | Rule::kw_alter
            | Rule::kw_array
            | Rule::kw_as
            | Rule::kw_column
            | Rule::kw_constraint
            | Rule::kw_create
            | Rule::kw_delete
            | Rule::kw_desc
            | Rule::kw_drop
            | Rule::kw_engine
            | Rule::kw_enum
            | Rule::kw_for
            | Rule::kw_from
            | Rule::kw_index
            | Rule::kw_insert
            | Rule::kw_into
            | Rule::kw_on
            | Rule::kw_references
            | Rule::kw_rename
            | Rule::kw_set
            | Rule::kw_table
            | Rule::kw_to
            | Rule::kw_unique
            | Rule::kw_update
            | Rule::kw_value
            | Rule::kw_values
            | Rule::kw_where
    )
}

fn parts(pair: Pair<Rule>) -> Pairs<Rule> {
    pair.into_inner()
}

/// Children of a rule without its keywords.
fn significant(pair: Pair<Rule>) -> Vec<Pair<Rule>> {
    parts(pair).filter(|p| !is_keyword(p.as_rule())).collect()
}

fn statement(pair: Pair<Rule>) -> Result<DdlExpression> {
    let rule = pair.as_rule();
    let span_start = pair.as_span().start();
    let fragment: String = pair.as_str().chars().take(20).collect();
    let children = significant(pair);
    let expression = match rule {
        Rule::create_table => {
            let mut id = String::new();
            let mut name = None;
            let mut columns = Vec::new();
            let mut engine = None;
            for child in children {
                match child.as_rule() {
                    Rule::id => id = identifier(child),
                    Rule::display_name => name = Some(display_name(child)),
                    Rule::column_definition => columns.push(column_definition(child)),
                    Rule::engine_clause => engine = significant(child).into_iter().next().map(string),
                    _ => {}
                }
            }
            DdlExpression::CreateTable { id, name, columns, engine }
        }
        Rule::create_index => {
            let mut ids = Vec::new();
            let mut fields = Vec::new();
            let mut descending = false;
            for child in children {
                match child.as_rule() {
                    Rule::id => ids.push(identifier(child)),
                    Rule::id_list => fields = id_list(child),
                    Rule::descending => descending = true,
                    _ => {}
                }
            }
            let (id, table) = two(ids);
            DdlExpression::CreateIndex(CreateIndexExpression { id, table, descending, fields })
        }
        Rule::drop_index => {
            let (id, table) = two(ids_of(children));
            DdlExpression::DropIndex { id, table }
        }
        Rule::create_enum => {
            let mut ids = Vec::new();
            let mut name = None;
            let mut values = Vec::new();
            for child in children {
                match child.as_rule() {
                    Rule::id => ids.push(identifier(child)),
                    Rule::display_name => name = Some(display_name(child)),
                    Rule::string => values.push(string(child)),
                    _ => {}
                }
            }
            let (id, table) = two(ids);
            DdlExpression::CreateEnum { id, name, table, values }
        }
        Rule::alter_table => {
            let mut children = children.into_iter();
            let table = children.next().map(identifier).unwrap_or_default();
            let operation = match children.next() {
                Some(operation) => alter_operation(operation)?,
                None => return Err(ddl_error("missing alter operation", span_start, fragment)),
            };
            DdlExpression::AlterTable { table, operation }
        }
        Rule::drop_table => DdlExpression::DropTable { table: ids_of(children).into_iter().next().unwrap_or_default() },
        Rule::insert => {
            let mut table = String::new();
            let mut columns = Vec::new();
            let mut rows = Vec::new();
            for child in children {
                match child.as_rule() {
                    Rule::id => table = identifier(child),
                    Rule::id_list => columns = id_list(child),
                    Rule::row => rows.push(parts(child).map(value).collect::<Result<Vec<_>>>()?),
                    _ => {}
                }
            }
            DdlExpression::Insert { table, columns, rows }
        }
        Rule::update => {
            let mut table = String::new();
            let mut assignments = Vec::new();
            let mut filter = None;
            for child in children {
                match child.as_rule() {
                    Rule::id => table = identifier(child),
                    Rule::assignment => assignments.push(assignment(child)?),
                    Rule::where_clause => filter = Some(where_clause(child)?),
                    _ => {}
                }
            }
            DdlExpression::Update { table, assignments, filter }
        }
        Rule::delete => {
            let mut table = String::new();
            let mut filter = None;
            for child in children {
                match child.as_rule() {
                    Rule::id => table = identifier(child),
                    Rule::where_clause => filter = Some(where_clause(child)?),
                    _ => {}
                }
            }
            DdlExpression::Delete { table, filter }
        }
        _ => return Err(ddl_error("unexpected statement", span_start, fragment)),
    };
    Ok(expression)
}

fn alter_operation(pair: Pair<Rule>) -> Result<AlterOperation> {
    let rule = pair.as_rule();
    let start = pair.as_span().start();
    let fragment: String = pair.as_str().chars().take(20).collect();
    let children = significant(pair);
    let operation = match rule {
        Rule::add_column => match children.into_iter().next() {
            Some(definition) => AlterOperation::AddColumn(column_definition(definition)),
            None => return Err(ddl_error("missing column definition", start, fragment)),
        },
        Rule::drop_column => AlterOperation::DropColumn(first_id(children)),
        Rule::rename_column => {
            let mut ids = Vec::new();
            let mut name = None;
            for child in children {
                match child.as_rule() {
                    Rule::id => ids.push(identifier(child)),
                    Rule::display_name => name = Some(display_name(child)),
                    _ => {}
                }
            }
            let (from, to) = two(ids);
            AlterOperation::RenameColumn { from, to, name }
        }
        Rule::set_parameter => {
            let mut children = children.into_iter();
            let parameter_name = children.next().map(identifier).unwrap_or_default();
            let parameter = TableParameter::from_name(&parameter_name)
                .ok_or_else(|| ddl_error(&format!("unknown table parameter '{}'", parameter_name), start, fragment.clone()))?;
            let value = children.next().filter(|p| p.as_rule() == Rule::string).map(string);
            AlterOperation::SetParameter { parameter, value }
        }
        Rule::add_constraint => {
            let mut id = String::new();
            let mut columns = Vec::new();
            for child in children {
                match child.as_rule() {
                    Rule::id => id = identifier(child),
                    Rule::id_list => columns = id_list(child),
                    _ => {}
                }
            }
            AlterOperation::AddConstraint { id, columns }
        }
        Rule::drop_constraint => AlterOperation::DropConstraint(first_id(children)),
        Rule::add_enum_value => {
            let mut enum_id = String::new();
            let mut value = String::new();
            for child in children {
                match child.as_rule() {
                    Rule::id => enum_id = identifier(child),
                    Rule::string => value = string(child),
                    _ => {}
                }
            }
            AlterOperation::AddEnumValue { enum_id, value }
        }
        Rule::drop_enum => AlterOperation::DropEnum(first_id(children)),
        _ => return Err(ddl_error("unexpected alter operation", start, fragment)),
    };
    Ok(operation)
}

fn column_definition(pair: Pair<Rule>) -> ColumnDefinition {
    let mut definition = ColumnDefinition {
        id: String::new(),
        name: None,
        column_type: String::new(),
        multivalued: false,
        required: false,
        reference: None,
    };
    for child in significant(pair) {
        match child.as_rule() {
            Rule::id => definition.id = identifier(child),
            Rule::display_name => definition.name = Some(display_name(child)),
            Rule::column_type => definition.column_type = first_id(significant(child)),
            Rule::multivalued => definition.multivalued = true,
            Rule::not_null => definition.required = true,
            Rule::reference => definition.reference = Some(first_id(significant(child))),
            _ => {}
        }
    }
    definition
}

fn assignment(pair: Pair<Rule>) -> Result<Assignment> {
    let mut children = parts(pair);
    let column = children.next().map(identifier).unwrap_or_default();
    let value = match children.next() {
        Some(target) if target.as_rule() == Rule::column_ref => AssignedValue::Column(first_id(significant(target))),
        Some(literal) => AssignedValue::Value(value(literal)?),
        None => AssignedValue::Value(DdlValue::Null),
    };
    Ok(Assignment { column, value })
}

fn where_clause(pair: Pair<Rule>) -> Result<WhereClause> {
    let mut column = String::new();
    let mut op = CompareOp::Eq;
    let mut literal = DdlValue::Null;
    for child in significant(pair) {
        match child.as_rule() {
            Rule::id => column = identifier(child),
            Rule::comparison_op => op = CompareOp::from_symbol(child.as_str()).unwrap_or(CompareOp::Eq),
            _ => literal = value(child)?,
        }
    }
    Ok(WhereClause { column, op, value: literal })
}

fn value(pair: Pair<Rule>) -> Result<DdlValue> {
    Ok(match pair.as_rule() {
        Rule::null => DdlValue::Null,
        Rule::number => DdlValue::Number(pair.as_str().to_string()),
        Rule::string => DdlValue::String(string(pair)),
        Rule::boolean => DdlValue::Boolean(pair.as_str().eq_ignore_ascii_case("true")),
        Rule::json => DdlValue::Json(parts(pair).next().map(string).unwrap_or_default()),
        Rule::array => DdlValue::Array(significant(pair).into_iter().map(value).collect::<Result<Vec<_>>>()?),
        _ => {
            let start = pair.as_span().start();
            return Err(ddl_error("unexpected value", start, pair.as_str().chars().take(20).collect()));
        }
    })
}

fn identifier(pair: Pair<Rule>) -> String {
    match parts(pair).next() {
        Some(inner) => inner.as_str().to_string(),
        None => String::new(),
    }
}

fn first_id(pairs: Vec<Pair<Rule>>) -> String {
    ids_of(pairs).into_iter().next().unwrap_or_default()
}

fn ids_of(pairs: Vec<Pair<Rule>>) -> Vec<String> {
    pairs.into_iter().filter(|p| p.as_rule() == Rule::id).map(identifier).collect()
}

fn id_list(pair: Pair<Rule>) -> Vec<String> {
    parts(pair).map(identifier).collect()
}

fn two(ids: Vec<String>) -> (String, String) {
    let mut ids = ids.into_iter();
    (ids.next().unwrap_or_default(), ids.next().unwrap_or_default())
}

fn display_name(pair: Pair<Rule>) -> String {
    parts(pair).next().map(string).unwrap_or_default()
}

fn string(pair: Pair<Rule>) -> String {
    parts(pair)
        .next()
        .map(|body| body.as_str().replace("''", "'"))
        .unwrap_or_default()
}

fn ddl_error(message: &str, position: usize, fragment: String) -> DictError {
    DictError::DdlSyntax { message: message.to_string(), position, fragment }
}
