//! Dict schema and record services on top of the engine registry, plus
//! export and JSON import of records.

pub mod data;
pub mod dict;
pub mod export;
pub mod history;
pub mod import;
pub mod validation;

pub use data::DictDataService;
pub use dict::DictService;
pub use export::{DictExportService, ExportFormat};
pub use history::{HistoryArchive, HistoryRetention, MemoryHistoryArchive};
pub use import::ImportJsonService;
