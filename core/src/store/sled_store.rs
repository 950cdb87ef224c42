/// Persistent document store backed by sled. One tree per collection,
/// JSON document bodies keyed by id.
use super::watch::WatchRegistry;
use super::{
    doc_path, merge_patch, stamp_id, Document, DocumentStore, Query, ServerClock, StoreError,
    StoreResult, Subscription,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    watchers: Arc<WatchRegistry>,
    clock: Arc<ServerClock>,
    /// Serializes read-modify-write so watchers see writes in commit order
    write_lock: Arc<Mutex<()>>,
}

impl SledStore {
    /// Open (or create) the store in the given data directory
    pub fn new(data_dir: &Path) -> StoreResult<Self> {
        let db_path = data_dir.join("documents.db");
        debug!("Opening document store at {:?}", db_path);

        let db = sled::open(&db_path)
            .map_err(|e| StoreError::Backend(format!("Failed to open document store: {}", e)))?;

        info!("Document store initialized at {:?}", db_path);
        Ok(Self {
            db,
            watchers: Arc::new(WatchRegistry::default()),
            clock: Arc::new(ServerClock::default()),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn tree(&self, collection: &str) -> StoreResult<sled::Tree> {
        self.db
            .open_tree(collection)
            .map_err(|e| StoreError::Backend(format!("Failed to open {}: {}", collection, e)))
    }

    fn guard(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Backend("document store lock poisoned".to_string()))
    }

    fn read(&self, tree: &sled::Tree, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        match tree.get(id.as_bytes()) {
            Ok(Some(raw)) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::InvalidDocument(format!("{}: {}", doc_path(collection, id), e))),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("Failed to read {}: {}", doc_path(collection, id), e))),
        }
    }

    fn persist(&self, tree: &sled::Tree, collection: &str, id: &str, data: &Value) -> StoreResult<()> {
        let raw = serde_json::to_vec(data)
            .map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
        tree.insert(id.as_bytes(), raw)
            .map_err(|e| StoreError::Backend(format!("Failed to write {}: {}", doc_path(collection, id), e)))?;
        tree.flush()
            .map_err(|e| StoreError::Backend(format!("Failed to flush {}: {}", collection, e)))?;
        Ok(())
    }

    fn scan(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let tree = self.tree(&query.collection)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (key, raw) = entry
                .map_err(|e| StoreError::Backend(format!("Failed to scan {}: {}", query.collection, e)))?;
            let Ok(data) = serde_json::from_slice::<Value>(&raw) else {
                continue;
            };
            if query.matches_data(&data) {
                out.push(Document {
                    collection: query.collection.clone(),
                    id: String::from_utf8_lossy(&key).to_string(),
                    data,
                });
            }
        }
        Ok(out)
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> StoreResult<usize> {
        Ok(self.tree(collection)?.len())
    }
}

impl DocumentStore for SledStore {
    fn create(&self, collection: &str, data: Value) -> StoreResult<Document> {
        let id = uuid::Uuid::new_v4().to_string();
        self.set(collection, &id, data)
    }

    fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<Document> {
        let data = stamp_id(data, id)?;
        let _guard = self.guard()?;
        let tree = self.tree(collection)?;
        self.persist(&tree, collection, id, &data)?;
        self.watchers.notify(collection, id, Some(&data));
        Ok(Document {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        })
    }

    fn update(&self, collection: &str, id: &str, patch: Map<String, Value>) -> StoreResult<Document> {
        let _guard = self.guard()?;
        let tree = self.tree(collection)?;
        let mut data = self
            .read(&tree, collection, id)?
            .ok_or_else(|| StoreError::NotFound(doc_path(collection, id)))?;
        merge_patch(&mut data, patch);
        self.persist(&tree, collection, id, &data)?;
        self.watchers.notify(collection, id, Some(&data));
        Ok(Document {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        })
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let _guard = self.guard()?;
        let tree = self.tree(collection)?;
        let removed = tree
            .remove(id.as_bytes())
            .map_err(|e| StoreError::Backend(format!("Failed to delete {}: {}", doc_path(collection, id), e)))?;
        if removed.is_some() {
            self.watchers.notify(collection, id, None);
        }
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let tree = self.tree(collection)?;
        Ok(self.read(&tree, collection, id)?.map(|data| Document {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }))
    }

    fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.scan(query)
    }

    fn subscribe(&self, query: Query) -> StoreResult<Subscription> {
        let _guard = self.guard()?;
        let initial = self.scan(&query)?;
        self.watchers.register(query, initial)
    }

    fn server_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
