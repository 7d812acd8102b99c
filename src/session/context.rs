//! Session identity, metadata and runtime-mutable user state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::types::now_ms;

/// Attribute map shared by reference with in-flight batches. Never mutated
/// in place; updates build a new map.
pub type Attributes = Arc<BTreeMap<String, Value>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Page facts the host environment reports at session start.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub user_agent: String,
    pub url: String,
    pub referrer: Option<String>,
    pub viewport: Viewport,
    pub timezone: String,
    pub language: String,
}

/// Metadata captured once per session. Immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub user_agent: String,
    pub url: String,
    pub referrer: Option<String>,
    pub viewport: Viewport,
    /// Session start (Unix timestamp ms)
    pub timestamp: u64,
    pub timezone: String,
    pub language: String,
}

impl SessionMetadata {
    pub fn capture(page: PageInfo, timestamp: u64) -> Self {
        SessionMetadata {
            user_agent: page.user_agent,
            url: page.url,
            referrer: page.referrer,
            viewport: page.viewport,
            timestamp,
            timezone: page.timezone,
            language: page.language,
        }
    }
}

/// The embedding environment (a browser page, a webview, a test harness).
pub trait HostEnvironment: Send + Sync {
    /// The user's Do-Not-Track preference, read fresh on every call.
    fn do_not_track(&self) -> bool;

    fn page_info(&self) -> PageInfo;
}

/// Host with fixed answers, for native embeddings and tests.
#[derive(Debug, Default)]
pub struct StaticHost {
    do_not_track: AtomicBool,
    page: PageInfo,
}

impl StaticHost {
    pub fn new(page: PageInfo) -> Self {
        StaticHost {
            do_not_track: Default::default(),
            page,
        }
    }

    pub fn set_do_not_track(&self, enabled: bool) {
        self.do_not_track.store(enabled, Ordering::Release);
    }
}

impl HostEnvironment for StaticHost {
    fn do_not_track(&self) -> bool {
        self.do_not_track.load(Ordering::Acquire)
    }

    fn page_info(&self) -> PageInfo {
        self.page.clone()
    }
}

/// Everything a batch needs from the session, captured at one instant.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub attributes: Attributes,
    pub metadata: Option<Arc<SessionMetadata>>,
    pub duration_ms: u64,
}

/// Live session state shared between the manager and the upload scheduler.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    session_id: Option<String>,
    started_at: Option<Instant>,
    metadata: Option<Arc<SessionMetadata>>,
    user_id: Option<String>,
    attributes: Attributes,
}

impl SessionContext {
    /// Allocate a fresh session id and capture metadata. User id and
    /// attributes carry over.
    pub fn begin(&mut self, page: PageInfo) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.session_id = Some(session_id.clone());
        self.started_at = Some(Instant::now());
        self.metadata = Some(Arc::new(SessionMetadata::capture(page, now_ms())));
        session_id
    }

    /// Release every field and invalidate the session id.
    pub fn reset(&mut self) {
        *self = SessionContext::default();
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn metadata(&self) -> Option<&Arc<SessionMetadata>> {
        self.metadata.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn set_user_id(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Shallow last-write-wins merge into a new map. Snapshots holding the
    /// previous map are unaffected.
    pub fn merge_attributes<I>(&mut self, updates: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut merged = BTreeMap::clone(&self.attributes);
        merged.extend(updates);
        self.attributes = Arc::new(merged);
    }

    /// Milliseconds since the session started, 0 if it never started.
    pub fn duration_ms(&self) -> u64 {
        self.started_at
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            attributes: self.attributes.clone(),
            metadata: self.metadata.clone(),
            duration_ms: self.duration_ms(),
        }
    }
}
