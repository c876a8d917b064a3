use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use serde_json::{Map, Value as Json};
use tracing::error;

use crate::backend::document::filter;
use crate::error::{DictError, Result};
use crate::model;
use crate::query::keyword;

/// Embeds the document of `from` whose `_id` equals `local_field` at
/// `$lookup.<as_field>` while filtering, as a `$lookup` followed by
/// `$unwind` would. Found documents are returned as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub from: String,
    pub local_field: String,
    pub as_field: String,
}

/// Collections of JSON documents keyed by `_id`. Transactions nest; while
/// one is open every other thread waits.
pub trait DocumentSession: Send + Sync {
    fn collection_exists(&self, collection: &str) -> Result<bool>;
    /// Does nothing when the collection exists.
    fn create_collection(&self, collection: &str) -> Result<()>;
    fn drop_collection(&self, collection: &str) -> Result<()>;
    /// Fails when a document with the same `_id` exists.
    fn insert_one(&self, collection: &str, document: Json) -> Result<()>;
    fn find(&self, collection: &str, filter: &Json, lookups: &[Lookup]) -> Result<Vec<Json>>;
    /// Replaces the first match, returns the number replaced.
    fn replace_one(&self, collection: &str, filter: &Json, document: Json) -> Result<usize>;
    fn delete_one(&self, collection: &str, filter: &Json) -> Result<usize>;
    /// Renames a top-level key in every document.
    fn rename_key(&self, collection: &str, from: &str, to: &str) -> Result<()>;
    /// Removes a top-level key from every document.
    fn unset_key(&self, collection: &str, key: &str) -> Result<()>;
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Json>> {
        Ok(self.find(collection, &by_id(id), &[])?.into_iter().next())
    }

    /// Runs `action` in a (nested) transaction.
    fn atomically<T>(&self, action: impl FnOnce() -> Result<T>) -> Result<T>
    where
        Self: Sized,
    {
        self.begin()?;
        match action() {
            Ok(result) => {
                self.commit()?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_error) = self.rollback() {
                    error!(error = %rollback_error, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// `{ "_id": id }`
pub fn by_id(id: &str) -> Json {
    let mut filter = Map::new();
    filter.insert(model::MONGO_ID.to_string(), Json::String(id.to_string()));
    Json::Object(filter)
}

type Collections = BTreeMap<String, Vec<Json>>;

#[derive(Default)]
struct Inner {
    collections: Collections,
    /// State at each open transaction, innermost last.
    snapshots: Vec<Collections>,
    owner: Option<ThreadId>,
}

/// In-memory document store evaluating filter documents itself.
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
    released: Condvar,
}

fn id_of(document: &Json) -> Option<&str> {
    document.get(model::MONGO_ID).and_then(|id| id.as_str())
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other thread holds a transaction.
    fn turn(&self) -> Result<MutexGuard<'_, Inner>> {
        let me = thread::current().id();
        let mut inner = self.inner.lock()?;
        while inner.owner.is_some_and(|owner| owner != me) {
            inner = self.released.wait(inner)?;
        }
        Ok(inner)
    }

    fn end(&self, rollback: bool) -> Result<()> {
        let mut inner = self.turn()?;
        let snapshot = inner
            .snapshots
            .pop()
            .ok_or_else(|| DictError::Persistence("no transaction is open".to_string()))?;
        if rollback {
            inner.collections = snapshot;
        }
        if inner.snapshots.is_empty() {
            inner.owner = None;
            self.released.notify_all();
        }
        Ok(())
    }
}

fn collection<'c>(collections: &'c mut Collections, name: &str) -> Result<&'c mut Vec<Json>> {
    collections
        .get_mut(name)
        .ok_or_else(|| DictError::Persistence(format!("collection '{}' does not exist", name)))
}

fn first_match(documents: &[Json], filter: &Json) -> Result<Option<usize>> {
    for (position, document) in documents.iter().enumerate() {
        if filter::matches(document, filter)? {
            return Ok(Some(position));
        }
    }
    Ok(None)
}

fn embed(collections: &Collections, document: &Json, lookups: &[Lookup]) -> Json {
    let mut document = document.clone();
    for lookup in lookups {
        let joined = document
            .get(&lookup.local_field)
            .and_then(|id| id.as_str())
            .and_then(|id| collections.get(&lookup.from)?.iter().find(|d| id_of(d) == Some(id)))
            .cloned()
            .unwrap_or(Json::Null);
        if let Json::Object(map) = &mut document {
            let embedded = map.entry(keyword::LOOKUP_KEY).or_insert_with(|| Json::Object(Map::new()));
            if let Json::Object(embedded) = embedded {
                embedded.insert(lookup.as_field.clone(), joined);
            }
        }
    }
    document
}

impl DocumentSession for MemoryDocumentStore {
    fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.turn()?.collections.contains_key(collection))
    }

    fn create_collection(&self, collection: &str) -> Result<()> {
        self.turn()?.collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        self.turn()?.collections.remove(collection);
        Ok(())
    }

    fn insert_one(&self, name: &str, document: Json) -> Result<()> {
        let mut inner = self.turn()?;
        let documents = collection(&mut inner.collections, name)?;
        let id = id_of(&document).ok_or_else(|| DictError::Persistence("document has no _id".to_string()))?;
        if documents.iter().any(|d| id_of(d) == Some(id)) {
            return Err(DictError::Persistence(format!("duplicate _id '{}' in '{}'", id, name)));
        }
        documents.push(document);
        Ok(())
    }

    fn find(&self, name: &str, filter: &Json, lookups: &[Lookup]) -> Result<Vec<Json>> {
        let inner = self.turn()?;
        let documents = inner
            .collections
            .get(name)
            .ok_or_else(|| DictError::Persistence(format!("collection '{}' does not exist", name)))?;
        let mut found = Vec::new();
        for document in documents {
            let embedded = embed(&inner.collections, document, lookups);
            if filter::matches(&embedded, filter)? {
                found.push(document.clone());
            }
        }
        Ok(found)
    }

    fn replace_one(&self, name: &str, filter: &Json, document: Json) -> Result<usize> {
        let mut inner = self.turn()?;
        let documents = collection(&mut inner.collections, name)?;
        match first_match(documents, filter)? {
            Some(position) => {
                documents[position] = document;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn delete_one(&self, name: &str, filter: &Json) -> Result<usize> {
        let mut inner = self.turn()?;
        let documents = collection(&mut inner.collections, name)?;
        match first_match(documents, filter)? {
            Some(position) => {
                documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn rename_key(&self, name: &str, from: &str, to: &str) -> Result<()> {
        let mut inner = self.turn()?;
        for document in collection(&mut inner.collections, name)?.iter_mut() {
            if let Json::Object(map) = document {
                if let Some(value) = map.remove(from) {
                    map.insert(to.to_string(), value);
                }
            }
        }
        Ok(())
    }

    fn unset_key(&self, name: &str, key: &str) -> Result<()> {
        let mut inner = self.turn()?;
        for document in collection(&mut inner.collections, name)?.iter_mut() {
            if let Json::Object(map) = document {
                map.remove(key);
            }
        }
        Ok(())
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.turn()?;
        let snapshot = inner.collections.clone();
        inner.snapshots.push(snapshot);
        inner.owner = Some(thread::current().id());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.end(false)
    }

    fn rollback(&self) -> Result<()> {
        self.end(true)
    }
}
