/// In-process document store. Clones share one backend, so every client
/// session opened on the same `MemoryStore` sees the others' writes.
use super::watch::WatchRegistry;
use super::{
    doc_path, merge_patch, stamp_id, Document, DocumentStore, Query, ServerClock, StoreError,
    StoreResult, Subscription,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type Collections = HashMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
struct Inner {
    collections: Mutex<Collections>,
    watchers: WatchRegistry,
    clock: ServerClock,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Collections>> {
        self.inner
            .collections
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn write(&self, collection: &str, id: &str, data: Value) -> StoreResult<Document> {
        let mut collections = self.lock()?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data.clone());
        self.inner.watchers.notify(collection, id, Some(&data));
        Ok(Document {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        })
    }

    fn snapshot(collections: &Collections, query: &Query) -> Vec<Document> {
        collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| query.matches_data(data))
                    .map(|(id, data)| Document {
                        collection: query.collection.clone(),
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl DocumentStore for MemoryStore {
    fn create(&self, collection: &str, data: Value) -> StoreResult<Document> {
        let id = uuid::Uuid::new_v4().to_string();
        self.set(collection, &id, data)
    }

    fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<Document> {
        let data = stamp_id(data, id)?;
        debug!("set {}", doc_path(collection, id));
        self.write(collection, id, data)
    }

    fn update(&self, collection: &str, id: &str, patch: Map<String, Value>) -> StoreResult<Document> {
        let mut collections = self.lock()?;
        let data = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(doc_path(collection, id)))?;
        merge_patch(data, patch);
        let data = data.clone();
        self.inner.watchers.notify(collection, id, Some(&data));
        Ok(Document {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        })
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut collections = self.lock()?;
        let removed = collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        if removed.is_some() {
            self.inner.watchers.notify(collection, id, None);
        }
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let collections = self.lock()?;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document {
                collection: collection.to_string(),
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let collections = self.lock()?;
        Ok(Self::snapshot(&collections, query))
    }

    fn subscribe(&self, query: Query) -> StoreResult<Subscription> {
        // Hold the collection lock so no write lands between snapshot and registration
        let collections = self.lock()?;
        let initial = Self::snapshot(&collections, &query);
        self.inner.watchers.register(query, initial)
    }

    fn server_time(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }
}
