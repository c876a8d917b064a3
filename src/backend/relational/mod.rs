//! The `postgres` engine: dicts as tables, queried with the SQL the
//! Postgres translator renders. [`SqliteSession`] runs it embedded.

mod backend;
pub mod session;

pub use backend::RelationalBackend;
pub use session::{SqlRow, SqlSession, SqliteSession};
