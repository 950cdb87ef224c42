/// Live-query bookkeeping shared by the store backends
use super::{Document, DocumentChange, Query, StoreError, StoreResult, Subscription};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

struct Watcher {
    query: Query,
    /// Ids currently inside the watcher's result set
    matched: HashSet<String>,
    tx: mpsc::UnboundedSender<Vec<DocumentChange>>,
}

#[derive(Default)]
pub(crate) struct WatchRegistry {
    watchers: Mutex<Vec<Watcher>>,
}

impl WatchRegistry {
    /// Register a watcher and deliver `initial` as its first batch
    pub fn register(&self, query: Query, initial: Vec<Document>) -> StoreResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let matched = initial.iter().map(|d| d.id.clone()).collect();
        let batch = initial.into_iter().map(DocumentChange::Added).collect();
        // Receiver is alive here, send cannot fail
        let _ = tx.send(batch);

        let mut watchers = self
            .watchers
            .lock()
            .map_err(|_| StoreError::Backend("watch registry lock poisoned".to_string()))?;
        debug!("New live query on {} ({} watchers)", query.collection, watchers.len() + 1);
        watchers.push(Watcher { query, matched, tx });
        Ok(Subscription::new(rx))
    }

    /// Fan out one document write. `data` is `None` for a delete.
    pub fn notify(&self, collection: &str, id: &str, data: Option<&Value>) {
        let Ok(mut watchers) = self.watchers.lock() else {
            return;
        };

        watchers.retain_mut(|w| {
            if w.tx.is_closed() {
                return false;
            }
            if w.query.collection != collection {
                return true;
            }

            let was = w.matched.contains(id);
            let now = data.map(|d| w.query.matches_data(d)).unwrap_or(false);
            let change = match (was, now, data) {
                (false, true, Some(d)) => {
                    w.matched.insert(id.to_string());
                    Some(DocumentChange::Added(doc(collection, id, d)))
                }
                (true, true, Some(d)) => Some(DocumentChange::Modified(doc(collection, id, d))),
                (true, false, _) => {
                    w.matched.remove(id);
                    Some(DocumentChange::Removed(id.to_string()))
                }
                _ => None,
            };

            match change {
                Some(c) => w.tx.send(vec![c]).is_ok(),
                None => true,
            }
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.watchers.lock().map(|w| w.len()).unwrap_or(0)
    }
}

fn doc(collection: &str, id: &str, data: &Value) -> Document {
    Document {
        collection: collection.to_string(),
        id: id.to_string(),
        data: data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_added_modified_removed() {
        let registry = WatchRegistry::default();
        let query = Query::collection("calls").where_eq("status", "ringing");
        let mut sub = registry.register(query, Vec::new()).unwrap();
        assert_eq!(sub.try_next(), Some(Vec::new()));

        registry.notify("calls", "c1", Some(&json!({"status": "ringing"})));
        registry.notify("calls", "c1", Some(&json!({"status": "ringing", "x": 1})));
        registry.notify("calls", "c1", Some(&json!({"status": "ended"})));
        registry.notify("other", "c2", Some(&json!({"status": "ringing"})));

        let changes = sub.drain();
        assert_eq!(changes.len(), 3);
        assert!(matches!(changes[0], DocumentChange::Added(_)));
        assert!(matches!(changes[1], DocumentChange::Modified(_)));
        assert_eq!(changes[2], DocumentChange::Removed("c1".to_string()));
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let registry = WatchRegistry::default();
        let sub = registry
            .register(Query::collection("messages"), Vec::new())
            .unwrap();
        assert_eq!(registry.len(), 1);
        drop(sub);
        registry.notify("messages", "m1", Some(&json!({})));
        assert_eq!(registry.len(), 0);
    }
}
