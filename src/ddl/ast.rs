use crate::query::CompareOp;

#[derive(Debug, Clone, PartialEq)]
pub enum DdlExpression {
    CreateTable {
        id: String,
        name: Option<String>,
        columns: Vec<ColumnDefinition>,
        engine: Option<String>,
    },
    CreateIndex(CreateIndexExpression),
    DropIndex { id: String, table: String },
    CreateEnum { id: String, name: Option<String>, table: String, values: Vec<String> },
    AlterTable { table: String, operation: AlterOperation },
    DropTable { table: String },
    Insert { table: String, columns: Vec<String>, rows: Vec<Vec<DdlValue>> },
    Update { table: String, assignments: Vec<Assignment>, filter: Option<WhereClause> },
    Delete { table: String, filter: Option<WhereClause> },
}

impl DdlExpression {
    /// Engine named by a `create table`, if any.
    pub fn engine(&self) -> Option<&str> {
        match self {
            DdlExpression::CreateTable { engine, .. } => engine.as_deref(),
            _ => None,
        }
    }
}

/// `id ['Name'] type [[]] [not null] [references dict]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub id: String,
    pub name: Option<String>,
    /// Type token as written; an unknown token names an enum.
    pub column_type: String,
    pub multivalued: bool,
    pub required: bool,
    pub reference: Option<String>,
}

/// Index key fields stay in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIndexExpression {
    pub id: String,
    pub table: String,
    pub descending: bool,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableParameter {
    ReadPermission,
    WritePermission,
}

impl TableParameter {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "readpermission" => Some(TableParameter::ReadPermission),
            "writepermission" => Some(TableParameter::WritePermission),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterOperation {
    AddColumn(ColumnDefinition),
    DropColumn(String),
    RenameColumn { from: String, to: String, name: Option<String> },
    SetParameter { parameter: TableParameter, value: Option<String> },
    AddConstraint { id: String, columns: Vec<String> },
    DropConstraint(String),
    AddEnumValue { enum_id: String, value: String },
    DropEnum(String),
}

/// A literal in a data statement.
#[derive(Debug, Clone, PartialEq)]
pub enum DdlValue {
    Null,
    Number(String),
    String(String),
    Boolean(bool),
    /// `'…'::json`
    Json(String),
    Array(Vec<DdlValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignedValue {
    Value(DdlValue),
    /// Copy of another column of the same record.
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: AssignedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub column: String,
    pub op: CompareOp,
    pub value: DdlValue,
}
