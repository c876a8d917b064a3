//! The schema language of migration scripts: parsing into
//! [`ast::DdlExpression`]s and applying them.

pub mod ast;
pub mod column_type;
pub mod interpreter;
pub mod parser;

pub use ast::DdlExpression;
pub use column_type::ColumnType;
pub use interpreter::Interpreter;
pub use parser::parse_ddl;
