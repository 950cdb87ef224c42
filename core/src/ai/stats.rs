/// Usage statistics for the assistant flows
/// Counts requests and fallbacks and tracks model latency per flow
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowUsage {
    pub flow: String,
    pub requests: u64,
    /// Requests answered with the static fallback
    pub fallbacks: u64,
    pub average_latency_ms: Option<u64>,
}

impl FlowUsage {
    fn new(flow: &str) -> Self {
        Self {
            flow: flow.to_string(),
            requests: 0,
            fallbacks: 0,
            average_latency_ms: None,
        }
    }

    /// Share of requests that got a real model answer (0.0 to 1.0)
    pub fn success_rate(&self) -> f32 {
        if self.requests == 0 {
            return 1.0;
        }
        1.0 - self.fallbacks as f32 / self.requests as f32
    }
}

#[derive(Clone, Default)]
pub struct FlowStats {
    usage: Arc<RwLock<HashMap<String, FlowUsage>>>,
}

impl FlowStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished flow run
    pub async fn record(&self, flow: &str, latency: Duration, fell_back: bool) {
        let mut usage = self.usage.write().await;
        let entry = usage
            .entry(flow.to_string())
            .or_insert_with(|| FlowUsage::new(flow));
        entry.requests += 1;
        if fell_back {
            entry.fallbacks += 1;
        }

        // Simple moving average
        let ms = latency.as_millis() as u64;
        entry.average_latency_ms = Some(
            entry
                .average_latency_ms
                .map(|old| (old + ms) / 2)
                .unwrap_or(ms),
        );
    }

    pub async fn get(&self, flow: &str) -> Option<FlowUsage> {
        self.usage.read().await.get(flow).cloned()
    }

    /// All flows, sorted by name
    pub async fn snapshot(&self) -> Vec<FlowUsage> {
        let mut all: Vec<FlowUsage> = self.usage.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.flow.cmp(&b.flow));
        all
    }
}
