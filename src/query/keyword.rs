//! Identifier quoting for the relational backend and path building for
//! the document backend.

use std::collections::HashSet;

use lazy_static::lazy_static;

use crate::model;

lazy_static! {
    /// Reserved key words of PostgreSQL (SQL:2016 reserved plus the ones
    /// Postgres reserves for itself).
    static ref POSTGRES_RESERVED: HashSet<&'static str> = [
        "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "authorization",
        "binary", "both", "case", "cast", "check", "collate", "collation", "column", "concurrently",
        "constraint", "create", "cross", "current_catalog", "current_date", "current_role",
        "current_schema", "current_time", "current_timestamp", "current_user", "default",
        "deferrable", "desc", "distinct", "do", "else", "end", "except", "false", "fetch", "for",
        "foreign", "freeze", "from", "full", "grant", "group", "having", "ilike", "in", "initially",
        "inner", "intersect", "into", "is", "isnull", "join", "lateral", "leading", "left", "like",
        "limit", "localtime", "localtimestamp", "natural", "not", "notnull", "null", "offset", "on",
        "only", "or", "order", "outer", "overlaps", "placing", "primary", "references", "returning",
        "right", "select", "session_user", "similar", "some", "symmetric", "system_user", "table",
        "tablesample", "then", "to", "trailing", "true", "union", "unique", "user", "using",
        "variadic", "verbose", "when", "where", "window", "with",
        // words SQLite refuses as bare identifiers as well
        "abort", "action", "add", "after", "alter", "attach", "autoincrement", "before", "begin",
        "between", "by", "cascade", "commit", "conflict", "database", "deferred", "delete",
        "detach", "drop", "each", "escape", "exclusive", "exists", "explain", "fail", "glob", "if",
        "ignore", "immediate", "index", "indexed", "insert", "instead", "key", "match", "no",
        "nothing", "of", "plan", "pragma", "query", "raise", "recursive", "regexp", "reindex",
        "release", "rename", "replace", "restrict", "row", "rollback", "savepoint", "set", "temp",
        "temporary", "transaction", "trigger", "update", "vacuum", "values", "view", "virtual",
    ]
    .into_iter()
    .collect();
}

pub fn is_reserved(word: &str) -> bool {
    POSTGRES_RESERVED.contains(word.to_ascii_lowercase().as_str())
}

fn needs_quoting(word: &str) -> bool {
    is_reserved(word)
        || word.chars().next().is_none_or(|c| c.is_ascii_digit())
        || !word.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Double-quotes an identifier when it is reserved, starts with a digit
/// or would be case-folded.
pub fn quote_identifier(word: &str) -> String {
    if needs_quoting(word) {
        format!("\"{}\"", word.replace('"', "\"\""))
    } else {
        word.to_string()
    }
}

/// A `dict.field` reference in SQL form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedField {
    pub dict_id: Option<String>,
    pub field_id: String,
}

impl QualifiedField {
    pub fn resolve(dict_id: Option<&str>, field_id: &str) -> Self {
        Self { dict_id: dict_id.map(quote_identifier), field_id: quote_identifier(field_id) }
    }
    pub fn sql(&self) -> String {
        match &self.dict_id {
            Some(dict_id) => format!("{}.{}", dict_id, self.field_id),
            None => self.field_id.clone(),
        }
    }
}

/// Key under which referenced documents are embedded while filtering.
/// Field ids never start with `$`, so it cannot shadow a stored field.
pub const LOOKUP_KEY: &str = "$lookup";

/// Dot path of a field in a stored document. Fields of referenced dicts
/// live under `$lookup.<dict id>`; `id` is stored as `_id`.
pub fn document_path(dict_id: Option<&str>, field_id: &str) -> String {
    let field_id = if field_id == model::ID { model::MONGO_ID } else { field_id };
    match dict_id {
        Some(dict_id) => format!("{}.{}.{}", LOOKUP_KEY, dict_id, field_id),
        None => field_id.to_string(),
    }
}
