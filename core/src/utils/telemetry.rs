/// Telemetry side channel: fans server events out to live subscribers and logs them
use crate::events::ServerEvent;
use crate::store::StoreError;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Telemetry {
    source: String,
    tx: broadcast::Sender<ServerEvent>,
}

impl Telemetry {
    pub fn new(source: String) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { source, tx }
    }

    pub fn emit(&self, event: ServerEvent) {
        if let Ok(payload) = serde_json::to_string(&event) {
            debug!(target: "telemetry", source = %self.source, "{}", payload);
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Report a refused or failed store operation
    pub fn store_error(&self, err: &StoreError) {
        let context = err.permission_context().cloned();
        warn!(target: "telemetry", source = %self.source, "store error: {}", err);
        self.emit(ServerEvent::StoreError {
            message: err.to_string(),
            context,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}
