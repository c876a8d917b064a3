use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::Result;
use crate::model::{self, DataMap, DictItem};

/// How many prior states of an item are kept inline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryRetention {
    #[default]
    KeepAll,
    /// Keeps the newest `n` snapshots.
    KeepLast(usize),
}

impl HistoryRetention {
    /// Appends the current state of `item` to its history and returns the
    /// snapshots that fell out of the retained window, oldest first, for
    /// the caller to archive.
    pub fn record(&self, item: &mut DictItem) -> Vec<DataMap> {
        item.history.push(snapshot(item));
        match self {
            HistoryRetention::KeepAll => Vec::new(),
            HistoryRetention::KeepLast(n) => {
                let overflow = item.history.len().saturating_sub(*n);
                item.history.drain(..overflow).collect()
            }
        }
    }
}

/// Field values of the item plus the version and time they belonged to.
pub fn snapshot(item: &DictItem) -> DataMap {
    let mut snapshot = item.data.clone();
    snapshot.insert(model::VERSION.to_string(), Value::from(item.version));
    snapshot.insert(model::UPDATED.to_string(), Value::String(model::format_timestamp(&item.updated)));
    snapshot
}

/// Destination of snapshots that fell out of an item's retained history.
/// Called inside the transaction of the update or delete that evicted
/// them; an error undoes that change.
pub trait HistoryArchive: Send + Sync {
    fn archive(&self, dict_id: &str, item_id: &str, snapshots: Vec<DataMap>) -> Result<()>;
}

/// Keeps archived snapshots in memory, per dict and item.
#[derive(Default)]
pub struct MemoryHistoryArchive {
    archived: Mutex<BTreeMap<(String, String), Vec<DataMap>>>,
}

impl MemoryHistoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archived snapshots of one item, oldest first.
    pub fn snapshots(&self, dict_id: &str, item_id: &str) -> Result<Vec<DataMap>> {
        let archived = self.archived.lock()?;
        Ok(archived.get(&(dict_id.to_string(), item_id.to_string())).cloned().unwrap_or_default())
    }
}

impl HistoryArchive for MemoryHistoryArchive {
    fn archive(&self, dict_id: &str, item_id: &str, snapshots: Vec<DataMap>) -> Result<()> {
        let mut archived = self.archived.lock()?;
        archived.entry((dict_id.to_string(), item_id.to_string())).or_default().extend(snapshots);
        Ok(())
    }
}
