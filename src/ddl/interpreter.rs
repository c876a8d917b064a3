use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::ddl::ast::{
    AlterOperation, AssignedValue, Assignment, ColumnDefinition, DdlExpression, DdlValue, WhereClause,
};
use crate::ddl::column_type::ColumnType;
use crate::error::{DictError, Result};
use crate::model::{DataMap, Dict, DictConstraint, DictEnum, DictField, DictFieldType, DictIndex, Direction};
use crate::query::constant::{Constant, ConstantType};
use crate::query::{Expression, Field, Operand};
use crate::service::{DictDataService, DictService};

/// Applies parsed statements to dict schemas and records.
pub struct Interpreter {
    dicts: Arc<DictService>,
    data: Arc<DictDataService>,
}

impl Interpreter {
    pub fn new(dicts: Arc<DictService>, data: Arc<DictDataService>) -> Self {
        Self { dicts, data }
    }

    /// Executes the statements in order and stops at the first failure.
    pub fn execute(&self, statements: &[DdlExpression]) -> Result<()> {
        check_single_engine(statements)?;
        // enums declared in the same script for a table it creates
        let mut declared_enums: HashMap<&str, Vec<DictEnum>> = HashMap::new();
        for statement in statements {
            if let DdlExpression::CreateEnum { id, name, table, values } = statement {
                declared_enums.entry(table.as_str()).or_default().push(DictEnum {
                    id: id.clone(),
                    name: name.clone(),
                    values: values.clone(),
                });
            }
        }
        let created_tables: BTreeSet<&str> = statements
            .iter()
            .filter_map(|s| match s {
                DdlExpression::CreateTable { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        for statement in statements {
            debug!(?statement, "executing");
            match statement {
                DdlExpression::CreateTable { id, name, columns, engine } => {
                    let mut dict = Dict::new(id, columns.iter().map(field_of).collect());
                    dict.name = name.clone();
                    dict.engine = engine.clone();
                    dict.enums = declared_enums.get(id.as_str()).cloned().unwrap_or_default();
                    self.dicts.create(dict)?;
                }
                DdlExpression::CreateEnum { id, name, table, values } => {
                    let Some(dict) = self.dicts.find(table)? else {
                        if created_tables.contains(table.as_str()) {
                            // attached when the table is created
                            continue;
                        }
                        return Err(DictError::DictNotFound { dict_id: table.clone() });
                    };
                    match dict.dict_enum(id) {
                        Some(existing) if declared_enums.get(table.as_str()).is_some_and(|e| e.contains(existing)) => {}
                        Some(_) => {
                            return Err(DictError::Validation(format!(
                                "Enum '{}' already exists in dict '{}'",
                                id, table
                            )));
                        }
                        None => {
                            self.dicts.create_enum(
                                table,
                                DictEnum { id: id.clone(), name: name.clone(), values: values.clone() },
                            )?;
                        }
                    }
                }
                DdlExpression::CreateIndex(index) => {
                    let direction = if index.descending { Direction::Desc } else { Direction::Asc };
                    self.dicts.create_index(
                        &index.table,
                        DictIndex { id: index.id.clone(), direction, fields: index.fields.clone() },
                    )?;
                }
                DdlExpression::DropIndex { id, table } => {
                    self.dicts.delete_index(table, id)?;
                }
                DdlExpression::AlterTable { table, operation } => self.alter(table, operation)?,
                DdlExpression::DropTable { table } => {
                    self.dicts.delete(table)?;
                }
                DdlExpression::Insert { table, columns, rows } => self.insert(table, columns, rows)?,
                DdlExpression::Update { table, assignments, filter } => self.update(table, assignments, filter.as_ref())?,
                DdlExpression::Delete { table, filter } => {
                    let expression = filter.as_ref().map_or(Ok(Expression::Empty), where_expression)?;
                    self.data.delete_by_expression(table, &expression, None)?;
                }
            }
        }
        Ok(())
    }

    fn alter(&self, table: &str, operation: &AlterOperation) -> Result<()> {
        match operation {
            AlterOperation::AddColumn(column) => self.dicts.add_field(table, field_of(column)),
            AlterOperation::DropColumn(column) => self.dicts.drop_field(table, column),
            AlterOperation::RenameColumn { from, to, name } => self.dicts.rename_field(table, from, to, name.clone()),
            AlterOperation::SetParameter { parameter, value } => self.dicts.set_parameter(table, *parameter, value.clone()),
            AlterOperation::AddConstraint { id, columns } => self
                .dicts
                .create_constraint(table, DictConstraint { id: id.clone(), fields: columns.clone() }),
            AlterOperation::DropConstraint(id) => self.dicts.delete_constraint(table, id),
            AlterOperation::AddEnumValue { enum_id, value } => self.dicts.add_enum_value(table, enum_id, value),
            AlterOperation::DropEnum(id) => self.dicts.delete_enum(table, id),
        }
        .map(|_| ())
    }

    fn insert(&self, table: &str, columns: &[String], rows: &[Vec<DdlValue>]) -> Result<()> {
        let columns: Vec<String> = if columns.is_empty() {
            self.dicts.get_by_id(table)?.fields.into_iter().map(|f| f.id).collect()
        } else {
            columns.to_vec()
        };
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != columns.len() {
                return Err(DictError::Validation(format!(
                    "Insert into '{}' gives {} values for {} columns",
                    table,
                    row.len(),
                    columns.len()
                )));
            }
            let data: DataMap = columns
                .iter()
                .zip(row)
                .map(|(column, value)| Ok((column.clone(), json_value(value)?)))
                .collect::<Result<_>>()?;
            items.push(data);
        }
        self.data.create_many(table, items)?;
        Ok(())
    }

    fn update(&self, table: &str, assignments: &[Assignment], filter: Option<&WhereClause>) -> Result<()> {
        let expression = filter.map_or(Ok(Expression::Empty), where_expression)?;
        for item in self.data.get_by_expression(table, &expression, false)? {
            let mut data = item.data.clone();
            for assignment in assignments {
                let value = match &assignment.value {
                    AssignedValue::Value(value) => json_value(value)?,
                    AssignedValue::Column(column) => item.data.get(column).cloned().unwrap_or(Value::Null),
                };
                data.insert(assignment.column.clone(), value);
            }
            self.data.update(table, &item.id, item.version, data)?;
        }
        Ok(())
    }
}

fn check_single_engine(statements: &[DdlExpression]) -> Result<()> {
    let engines: BTreeSet<&str> = statements.iter().filter_map(|s| s.engine()).collect();
    if engines.len() > 1 {
        return Err(DictError::Validation(format!(
            "A script may use one engine, found {}",
            engines.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }
    Ok(())
}

fn field_of(column: &ColumnDefinition) -> DictField {
    let mut field = match &column.reference {
        Some(dict_id) => DictField::new(&column.id, DictFieldType::Dict).with_reference(dict_id),
        None => match ColumnType::from_token(&column.column_type) {
            ColumnType::Enum => DictField::new(&column.id, DictFieldType::Enum).with_enum(&column.column_type),
            other => DictField::new(&column.id, other.to_dict_field_type()),
        },
    };
    field.name = column.name.clone();
    field.multivalued = column.multivalued;
    field.required = column.required;
    field
}

fn json_value(value: &DdlValue) -> Result<Value> {
    Ok(match value {
        DdlValue::Null => Value::Null,
        DdlValue::Number(n) => match n.parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(n.clone()),
        },
        DdlValue::String(s) => Value::String(s.clone()),
        DdlValue::Boolean(b) => Value::Bool(*b),
        DdlValue::Json(text) => serde_json::from_str(text)?,
        DdlValue::Array(values) => Value::Array(values.iter().map(json_value).collect::<Result<_>>()?),
    })
}

fn where_expression(clause: &WhereClause) -> Result<Expression> {
    let constant = match &clause.value {
        DdlValue::Null => Constant::null(),
        DdlValue::Number(n) if n.parse::<i64>().is_ok() => Constant::new(n, ConstantType::Integer),
        DdlValue::Number(n) => Constant::new(n, ConstantType::Decimal),
        DdlValue::String(s) => Constant::new(s, ConstantType::String),
        DdlValue::Boolean(b) => Constant::new(&b.to_string(), ConstantType::Boolean),
        other => {
            return Err(DictError::Validation(format!(
                "Condition on '{}' cannot compare with {:?}",
                clause.column, other
            )));
        }
    };
    Ok(Expression::Compare {
        field: Field::new(&clause.column),
        op: clause.op,
        value: Operand::Constant(constant),
    })
}
