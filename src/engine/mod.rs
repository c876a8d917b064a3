//! Storage engines and the capabilities a backend provides for one.
//!
//! A backend implements every capability for a single engine name; the
//! [`registry::EngineRegistry`] maps names to implementations and
//! [`updater::DictEngineUpdater`] assigns engines to dicts that have none.

pub mod registry;
pub mod storage_migration;
pub mod updater;

use std::sync::Arc;

use tracing::error;

use crate::error::Result;
use crate::model::{Dict, DictItem, VersionScheme};
use crate::query::Expression;

pub use registry::{BackendProvider, EngineRegistry};
pub use storage_migration::DictStorageMigrationService;
pub use updater::DictEngineUpdater;

/// Atomic edit of a stored item: receives the stored state, returns the new one.
pub type ItemMutation<'a> = &'a mut dyn FnMut(DictItem) -> Result<DictItem>;

pub trait Engine: Send + Sync {
    fn engine_name(&self) -> &str;
    /// Whether the dict metadata store has been created.
    fn dict_exists(&self) -> Result<bool>;
    /// Whether the migration history store has been created.
    fn version_scheme_exists(&self) -> Result<bool>;
}

/// Dict metadata.
pub trait DictBackend: Engine {
    fn create_dict_store(&self) -> Result<()>;
    fn get_dict(&self, dict_id: &str) -> Result<Option<Dict>>;
    fn all_dicts(&self) -> Result<Vec<Dict>>;
    /// Inserts or replaces the metadata of `dict`.
    fn save_dict(&self, dict: &Dict) -> Result<()>;
    fn remove_dict(&self, dict_id: &str) -> Result<()>;
}

/// Physical structure (table or collection) of each dict.
pub trait DictSchemeBackend: Engine {
    fn scheme_exists(&self, dict_id: &str) -> Result<bool>;
    fn create_scheme(&self, dict: &Dict) -> Result<()>;
    /// Brings the structure of `previous` in line with `current`; renames
    /// are applied separately through [`DictSchemeBackend::rename_field`].
    fn update_scheme(&self, previous: &Dict, current: &Dict) -> Result<()>;
    fn rename_field(&self, dict: &Dict, from: &str, to: &str) -> Result<()>;
    fn drop_scheme(&self, dict: &Dict) -> Result<()>;
}

/// Records of dicts.
pub trait DictDataBackend: Engine {
    fn insert(&self, dict: &Dict, item: &DictItem) -> Result<()>;
    fn get_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>>;
    /// `catalog` holds `dict` and the dicts it references.
    fn find(&self, dict: &Dict, catalog: &[Dict], filter: &Expression, include_deleted: bool) -> Result<Vec<DictItem>>;
    /// Applies `mutation` to the stored item in one atomic step. When
    /// `expected_version` is given and differs from the stored version the
    /// item is left untouched and `DictConcurrentUpdate` is returned.
    fn modify(&self, dict: &Dict, item_id: &str, expected_version: Option<i64>, mutation: ItemMutation) -> Result<DictItem>;
    fn all_items(&self, dict: &Dict) -> Result<Vec<DictItem>>;
}

/// Applied-migration history.
pub trait VersionSchemeBackend: Engine {
    fn create_version_store(&self) -> Result<()>;
    fn versions(&self, target: &str) -> Result<Vec<VersionScheme>>;
    fn record_version(&self, row: &VersionScheme) -> Result<()>;
}

/// Transaction boundary. Transactions nest and belong to the calling
/// thread until the outermost one ends.
pub trait TransactionBackend: Engine {
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}

/// Everything a full backend implements.
pub trait FullBackend: DictBackend + DictSchemeBackend + DictDataBackend + VersionSchemeBackend + TransactionBackend {}

impl<T> FullBackend for T where T: DictBackend + DictSchemeBackend + DictDataBackend + VersionSchemeBackend + TransactionBackend {}

/// Runs `action` inside a transaction spanning all of `backends`:
/// committed together on success, rolled back together on failure.
/// Every transaction begun here is ended before returning, also when a
/// commit fails or `action` panics.
pub fn in_transaction<T>(backends: &[Arc<dyn TransactionBackend>], action: impl FnOnce() -> Result<T>) -> Result<T> {
    let mut open = OpenTransactions { backends: Vec::with_capacity(backends.len()) };
    for backend in backends {
        backend.begin()?;
        open.backends.push(backend.clone());
    }
    match action() {
        Ok(result) => {
            open.commit()?;
            Ok(result)
        }
        Err(e) => {
            open.rollback();
            Err(e)
        }
    }
}

/// Transactions begun by [`in_transaction`], in begin order. Whatever is
/// still open on drop is rolled back.
struct OpenTransactions {
    backends: Vec<Arc<dyn TransactionBackend>>,
}

impl OpenTransactions {
    /// Commits the last begun first. Once a commit fails the rest are
    /// rolled back and the first error is returned.
    fn commit(&mut self) -> Result<()> {
        let mut failure = None;
        while let Some(backend) = self.backends.pop() {
            let result = if failure.is_none() { backend.commit() } else { backend.rollback() };
            if let Err(e) = result {
                error!(engine = backend.engine_name(), error = %e, "ending transaction failed");
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    fn rollback(&mut self) {
        while let Some(backend) = self.backends.pop() {
            if let Err(e) = backend.rollback() {
                error!(engine = backend.engine_name(), error = %e, "rollback failed");
            }
        }
    }
}

impl Drop for OpenTransactions {
    fn drop(&mut self) {
        self.rollback();
    }
}
