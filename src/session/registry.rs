//! Process-wide session handle.
//!
//! Holds at most one live [`SessionManager`]. [`init`] creates it (or
//! re-initializes the live one), [`get_instance`] hands it out anywhere in
//! host code, and [`destroy`] tears it down and empties the slot.

use std::sync::Arc;

use parking_lot::{const_mutex, Mutex};

use super::context::HostEnvironment;
use super::manager::{SessionManager, SessionState};
use crate::capture::EventProducer;
use crate::config::SdkOptions;
use crate::error::Result;
use crate::upload::Transport;

static INSTANCE: Mutex<Option<Arc<SessionManager>>> = const_mutex(None);

/// Initialize the global session.
///
/// If a live instance exists it is re-initialized with `options` and the
/// collaborators passed here are discarded. A destroyed instance is replaced.
pub fn init(
    host: Arc<dyn HostEnvironment>,
    producer: Box<dyn EventProducer>,
    transport: Arc<dyn Transport>,
    options: SdkOptions,
) -> Result<Arc<SessionManager>> {
    let mut slot = INSTANCE.lock();
    if let Some(existing) = slot.as_ref() {
        if existing.state() != SessionState::Destroyed {
            existing.init(options)?;
            return Ok(existing.clone());
        }
    }

    let manager = Arc::new(SessionManager::new(host, producer, transport));
    manager.init(options)?;
    *slot = Some(manager.clone());
    Ok(manager)
}

/// The live global session, if any.
pub fn get_instance() -> Option<Arc<SessionManager>> {
    INSTANCE.lock().clone()
}

/// Destroy the global session and clear the slot. Idempotent.
pub fn destroy() {
    let manager = INSTANCE.lock().take();
    if let Some(manager) = manager {
        manager.destroy();
    }
}
