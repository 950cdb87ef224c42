/// Remote document store: collection-scoped documents with live query subscriptions.
///
/// Subscriptions push incremental diffs. The first batch a subscriber receives
/// is the full current result set, delivered as `Added` changes; every later
/// batch carries only what was added, modified or removed.
pub mod memory;
pub mod rules;
pub mod sled_store;
mod watch;

pub use memory::MemoryStore;
pub use rules::{AccessRequest, AccessRules, AuthorizedStore, OpenRules, TeamRules};
pub use sled_store::SledStore;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

pub const MESSAGES: &str = "messages";
pub const CALLS: &str = "calls";
pub const PRESENCE: &str = "presence";
pub const SUGGESTIONS: &str = "suggestions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Get => "get",
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// What was attempted when the store refused an operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionContext {
    pub path: String,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl fmt::Display for PermissionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.operation, self.path)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Missing or insufficient permissions: {0}")]
    PermissionDenied(PermissionContext),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn permission_context(&self) -> Option<&PermissionContext> {
        match self {
            StoreError::PermissionDenied(ctx) => Some(ctx),
            _ => None,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn path(&self) -> String {
        doc_path(&self.collection, &self.id)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| StoreError::InvalidDocument(format!("{}: {}", self.path(), e)))
    }
}

pub fn doc_path(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, id)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equals(String, Value),
    ArrayContains(String, Value),
}

impl Filter {
    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Equals(field, value) => data.get(field) == Some(value),
            Filter::ArrayContains(field, value) => data
                .get(field)
                .and_then(Value::as_array)
                .map(|items| items.contains(value))
                .unwrap_or(false),
        }
    }
}

/// Collection query; all filters must match
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Equals(field.to_string(), value.into()));
        self
    }

    pub fn array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn matches_data(&self, data: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(data))
    }

    /// Whether the query is constrained by `field array-contains value`
    pub fn is_scoped_to(&self, field: &str, value: &str) -> bool {
        self.filters.iter().any(|f| {
            matches!(f, Filter::ArrayContains(name, Value::String(v)) if name == field && v == value)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    Added(Document),
    Modified(Document),
    Removed(String),
}

impl DocumentChange {
    pub fn id(&self) -> &str {
        match self {
            DocumentChange::Added(doc) | DocumentChange::Modified(doc) => &doc.id,
            DocumentChange::Removed(id) => id,
        }
    }
}

/// Live query handle. Dropping it ends the subscription.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Vec<DocumentChange>>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Vec<DocumentChange>>) -> Self {
        Self { rx }
    }

    /// Next pending batch without waiting
    pub fn try_next(&mut self) -> Option<Vec<DocumentChange>> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next batch; `None` once the store is gone
    pub async fn next(&mut self) -> Option<Vec<DocumentChange>> {
        self.rx.recv().await
    }

    /// All pending changes, in delivery order
    pub fn drain(&mut self) -> Vec<DocumentChange> {
        let mut out = Vec::new();
        while let Some(batch) = self.try_next() {
            out.extend(batch);
        }
        out
    }
}

/// Push-subscribable document store
pub trait DocumentStore: Send + Sync {
    /// Create a document with a generated id
    fn create(&self, collection: &str, data: Value) -> StoreResult<Document>;

    /// Create or overwrite the document at `collection/id`
    fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<Document>;

    /// Merge top-level fields into an existing document
    fn update(&self, collection: &str, id: &str, patch: Map<String, Value>) -> StoreResult<Document>;

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    fn subscribe(&self, query: Query) -> StoreResult<Subscription>;

    /// Store-assigned timestamp for new documents
    fn server_time(&self) -> DateTime<Utc>;
}

/// Strictly increasing wall clock for store-assigned timestamps
#[derive(Default)]
pub(crate) struct ServerClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ServerClock {
    pub fn now(&self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Ok(mut last) = self.last.lock() {
            if let Some(prev) = *last {
                if now <= prev {
                    now = prev + chrono::Duration::microseconds(1);
                }
            }
            *last = Some(now);
        }
        now
    }
}

/// Ensure the document body is an object and carries its own id
pub(crate) fn stamp_id(mut data: Value, id: &str) -> StoreResult<Value> {
    match data.as_object_mut() {
        Some(obj) => {
            obj.insert("id".to_string(), Value::String(id.to_string()));
            Ok(data)
        }
        None => Err(StoreError::InvalidDocument(format!(
            "document body for {} must be an object",
            id
        ))),
    }
}

pub(crate) fn merge_patch(data: &mut Value, patch: Map<String, Value>) {
    if let Some(obj) = data.as_object_mut() {
        for (k, v) in patch {
            if k != "id" {
                obj.insert(k, v);
            }
        }
    }
}

/// Build an update patch from a `json!({...})` literal
pub fn patch(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filters() {
        let data = json!({"participants": ["alice", "bob"], "status": "ringing"});
        assert!(Filter::ArrayContains("participants".into(), json!("bob")).matches(&data));
        assert!(!Filter::ArrayContains("participants".into(), json!("carol")).matches(&data));
        assert!(Filter::Equals("status".into(), json!("ringing")).matches(&data));
        assert!(!Filter::Equals("missing".into(), json!("x")).matches(&data));
    }

    #[test]
    fn test_query_scope() {
        let q = Query::collection(MESSAGES).array_contains("participants", "alice");
        assert!(q.is_scoped_to("participants", "alice"));
        assert!(!q.is_scoped_to("participants", "bob"));
    }

    #[test]
    fn test_server_clock_strictly_increases() {
        let clock = ServerClock::default();
        let mut prev = clock.now();
        for _ in 0..100 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_stamp_id_rejects_non_objects() {
        assert!(stamp_id(json!([1, 2]), "x").is_err());
        let v = stamp_id(json!({"a": 1}), "x").unwrap();
        assert_eq!(v["id"], "x");
    }
}
