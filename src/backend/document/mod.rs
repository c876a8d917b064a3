//! The `mongo` engine: dicts as collections of extended-JSON documents,
//! queried with the filter documents the Mongo translator renders.
//! [`MemoryDocumentStore`] evaluates them in memory.

mod backend;
pub mod filter;
pub mod store;

pub use backend::DocumentBackend;
pub use store::{DocumentSession, Lookup, MemoryDocumentStore};
