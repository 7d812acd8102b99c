//! Batch wire document.
//!
//! A batch is one JSON document per delivery:
//!
//! ```text
//! {
//!   "batchId": "...", "sessionId": "...", "userId": null,
//!   "attributes": {...}, "metadata": {...},
//!   "events": [...], "consoleLogs": [...], "networkRequests": [...],
//!   "timestamp": 1700000000000, "duration": 12345
//! }
//! ```
//!
//! Events are split by category; each carries its buffer `seq` so the
//! original interleaving can be rebuilt.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::capture::{CapturedEvent, Event};
use crate::session::{Attributes, SessionMetadata, SessionSnapshot};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub batch_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub attributes: Attributes,
    pub metadata: Option<Arc<SessionMetadata>>,
    pub events: Vec<CapturedEvent>,
    pub console_logs: Vec<CapturedEvent>,
    pub network_requests: Vec<CapturedEvent>,
    /// Batch send time (Unix timestamp ms)
    pub timestamp: u64,
    /// Session duration at send time (ms)
    pub duration: u64,
}

impl Batch {
    /// Build a batch from a drained snapshot. Input order is preserved
    /// within each category.
    pub fn assemble(captured: Vec<CapturedEvent>, session: SessionSnapshot, timestamp: u64) -> Self {
        let mut events = Vec::new();
        let mut console_logs = Vec::new();
        let mut network_requests = Vec::new();
        for item in captured {
            match item.event {
                Event::Interaction(_) => events.push(item),
                Event::Console(_) => console_logs.push(item),
                Event::Network(_) => network_requests.push(item),
            }
        }

        Batch {
            batch_id: Uuid::new_v4().to_string(),
            session_id: session.session_id,
            user_id: session.user_id,
            attributes: session.attributes,
            metadata: session.metadata,
            events,
            console_logs,
            network_requests,
            timestamp,
            duration: session.duration_ms,
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len() + self.console_logs.len() + self.network_requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }

    /// All events of the batch back in capture order.
    pub fn in_capture_order(&self) -> Vec<&CapturedEvent> {
        let mut all: Vec<&CapturedEvent> = self
            .events
            .iter()
            .chain(&self.console_logs)
            .chain(&self.network_requests)
            .collect();
        all.sort_by_key(|c| c.seq);
        all
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| format!("Failed to serialize batch: {}", e))
    }
}
