/// Access rules and the authenticated store wrapper that enforces them
use super::{
    doc_path, merge_patch, Document, DocumentStore, Operation, PermissionContext, Query,
    StoreError, StoreResult, Subscription, CALLS, MESSAGES, PRESENCE,
};
use crate::models::CallStatus;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// One operation as seen by the rules
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub operation: Operation,
    pub collection: &'a str,
    pub id: Option<&'a str>,
    /// Stored document before the operation
    pub existing: Option<&'a Value>,
    /// Document as it would be after the operation
    pub incoming: Option<&'a Value>,
    pub query: Option<&'a Query>,
}

pub trait AccessRules: Send + Sync {
    fn allows(&self, auth: Option<&str>, request: &AccessRequest<'_>) -> bool;
}

/// Allows everything
pub struct OpenRules;

impl AccessRules for OpenRules {
    fn allows(&self, _auth: Option<&str>, _request: &AccessRequest<'_>) -> bool {
        true
    }
}

/// Rules for the team workspace:
///
/// - messages: only participants read; the sender creates; participants may
///   update read state and delete flags but never content; no hard deletes.
/// - calls: only participants read and update; the caller creates.
/// - presence: a user writes only their own document.
/// - everything else: any signed-in user.
pub struct TeamRules;

const IMMUTABLE_MESSAGE_FIELDS: [&str; 4] = ["content", "senderId", "recipientId", "timestamp"];

fn str_field<'a>(doc: Option<&'a Value>, field: &str) -> Option<&'a str> {
    doc.and_then(|d| d.get(field)).and_then(Value::as_str)
}

fn list_contains(doc: Option<&Value>, field: &str, uid: &str) -> bool {
    doc.and_then(|d| d.get(field))
        .and_then(Value::as_array)
        .map(|items| items.iter().any(|v| v.as_str() == Some(uid)))
        .unwrap_or(false)
}

/// A call's status stays put or advances; ended sessions are never revived
fn status_moves_forward(existing: Option<&Value>, incoming: Option<&Value>) -> bool {
    let status = |doc: Option<&Value>| {
        doc.and_then(|d| d.get("status"))
            .and_then(|v| serde_json::from_value::<CallStatus>(v.clone()).ok())
    };
    match (status(existing), status(incoming)) {
        (Some(from), Some(to)) => from == to || from.can_advance_to(to),
        _ => false,
    }
}

impl TeamRules {
    fn messages(uid: &str, req: &AccessRequest<'_>) -> bool {
        match req.operation {
            Operation::List => req
                .query
                .map(|q| q.is_scoped_to("participants", uid))
                .unwrap_or(false),
            Operation::Get => list_contains(req.existing, "participants", uid),
            Operation::Create => {
                str_field(req.incoming, "senderId") == Some(uid)
                    && list_contains(req.incoming, "participants", uid)
            }
            Operation::Update => {
                list_contains(req.existing, "participants", uid)
                    && IMMUTABLE_MESSAGE_FIELDS.iter().all(|f| {
                        req.existing.and_then(|d| d.get(*f)) == req.incoming.and_then(|d| d.get(*f))
                    })
            }
            Operation::Delete => false,
        }
    }

    fn calls(uid: &str, req: &AccessRequest<'_>) -> bool {
        match req.operation {
            Operation::List => req
                .query
                .map(|q| q.is_scoped_to("participantIds", uid))
                .unwrap_or(false),
            Operation::Get => list_contains(req.existing, "participantIds", uid),
            Operation::Update => {
                list_contains(req.existing, "participantIds", uid)
                    && status_moves_forward(req.existing, req.incoming)
            }
            Operation::Create => {
                str_field(req.incoming, "callerId") == Some(uid)
                    && list_contains(req.incoming, "participantIds", uid)
            }
            Operation::Delete => false,
        }
    }

    fn presence(uid: &str, req: &AccessRequest<'_>) -> bool {
        match req.operation {
            Operation::Get | Operation::List => true,
            Operation::Create | Operation::Update | Operation::Delete => req.id == Some(uid),
        }
    }
}

impl AccessRules for TeamRules {
    fn allows(&self, auth: Option<&str>, req: &AccessRequest<'_>) -> bool {
        let Some(uid) = auth else {
            return false;
        };
        match req.collection {
            MESSAGES => Self::messages(uid, req),
            CALLS => Self::calls(uid, req),
            PRESENCE => Self::presence(uid, req),
            _ => true,
        }
    }
}

/// A client session on a shared store: every operation runs as `auth` and
/// is checked against the rules before it reaches the backend.
#[derive(Clone)]
pub struct AuthorizedStore {
    inner: Arc<dyn DocumentStore>,
    auth: Option<String>,
    rules: Arc<dyn AccessRules>,
}

impl AuthorizedStore {
    pub fn new(inner: Arc<dyn DocumentStore>, auth: Option<String>, rules: Arc<dyn AccessRules>) -> Self {
        Self { inner, auth, rules }
    }

    pub fn auth(&self) -> Option<&str> {
        self.auth.as_deref()
    }

    fn check(&self, request: AccessRequest<'_>) -> StoreResult<()> {
        if self.rules.allows(self.auth.as_deref(), &request) {
            return Ok(());
        }
        let path = match request.id {
            Some(id) => doc_path(request.collection, id),
            None => request.collection.to_string(),
        };
        warn!(
            "Permission denied: {} {} as {:?}",
            request.operation, path, self.auth
        );
        Err(StoreError::PermissionDenied(PermissionContext {
            path,
            operation: request.operation,
            payload: request.incoming.cloned(),
        }))
    }
}

impl DocumentStore for AuthorizedStore {
    fn create(&self, collection: &str, data: Value) -> StoreResult<Document> {
        self.check(AccessRequest {
            operation: Operation::Create,
            collection,
            id: None,
            existing: None,
            incoming: Some(&data),
            query: None,
        })?;
        self.inner.create(collection, data)
    }

    fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<Document> {
        let existing = self.inner.get(collection, id)?;
        let operation = if existing.is_some() {
            Operation::Update
        } else {
            Operation::Create
        };
        self.check(AccessRequest {
            operation,
            collection,
            id: Some(id),
            existing: existing.as_ref().map(|d| &d.data),
            incoming: Some(&data),
            query: None,
        })?;
        self.inner.set(collection, id, data)
    }

    fn update(&self, collection: &str, id: &str, patch: Map<String, Value>) -> StoreResult<Document> {
        let existing = self
            .inner
            .get(collection, id)?
            .ok_or_else(|| StoreError::NotFound(doc_path(collection, id)))?;
        let mut merged = existing.data.clone();
        merge_patch(&mut merged, patch.clone());
        self.check(AccessRequest {
            operation: Operation::Update,
            collection,
            id: Some(id),
            existing: Some(&existing.data),
            incoming: Some(&merged),
            query: None,
        })?;
        self.inner.update(collection, id, patch)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let existing = self.inner.get(collection, id)?;
        self.check(AccessRequest {
            operation: Operation::Delete,
            collection,
            id: Some(id),
            existing: existing.as_ref().map(|d| &d.data),
            incoming: None,
            query: None,
        })?;
        self.inner.delete(collection, id)
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let Some(doc) = self.inner.get(collection, id)? else {
            return Ok(None);
        };
        self.check(AccessRequest {
            operation: Operation::Get,
            collection,
            id: Some(id),
            existing: Some(&doc.data),
            incoming: None,
            query: None,
        })?;
        Ok(Some(doc))
    }

    fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.check(AccessRequest {
            operation: Operation::List,
            collection: &query.collection,
            id: None,
            existing: None,
            incoming: None,
            query: Some(query),
        })?;
        self.inner.query(query)
    }

    fn subscribe(&self, query: Query) -> StoreResult<Subscription> {
        self.check(AccessRequest {
            operation: Operation::List,
            collection: &query.collection,
            id: None,
            existing: None,
            incoming: None,
            query: Some(&query),
        })?;
        self.inner.subscribe(query)
    }

    fn server_time(&self) -> DateTime<Utc> {
        self.inner.server_time()
    }
}
