//! Versioned schema scripts and their application history.

pub mod engine;
pub mod version;

pub use engine::{MigrationEngine, MigrationScript, MigrationState, load_scripts};
pub use version::{MigrationVersion, compute_version, order_migrations};
