//! The query language: parsing into an [`ast::Expression`] and rendering
//! it for each backend.
//!
//! Parsing and translation are pure functions over immutable input and
//! may run on any number of threads.

pub mod ast;
pub mod catalog;
pub mod constant;
pub mod keyword;
pub mod mongo;
pub mod parser;
pub mod postgres;

use crate::error::Result;

pub use ast::{CompareOp, Expression, Field, Operand, Quantifier};
pub use catalog::{FieldCatalog, TranslationContext};
pub use mongo::{MongoFilter, MongoTranslator};
pub use parser::parse;
pub use postgres::{PostgresTranslator, SqlPredicate};

/// Renders an expression into a backend's native predicate form.
pub trait Translator {
    type Output;

    fn translate(&self, expression: &Expression, context: &TranslationContext) -> Result<Self::Output>;
}

/// Parses `text` and translates it for the dict `dict_id`.
pub fn compile<T: Translator>(
    translator: &T,
    text: &str,
    dict_id: &str,
    catalog: &dyn FieldCatalog,
) -> Result<T::Output> {
    let expression = parse(text)?;
    translator.translate(&expression, &TranslationContext::new(dict_id, catalog))
}
