//! # Session Manager
//!
//! Top-level state machine and public API.
//!
//! ```text
//! uninitialized --init--> idle --start_recording--> recording --stop--> stopped
//!                          ^  \___ (Do-Not-Track: stays idle)             |
//!                          |__________________init________________________|
//!                  any state --destroy--> destroyed (terminal)
//! ```
//!
//! The manager wires producer -> privacy gate -> buffer -> scheduler ->
//! delivery for each recording, and owns the user id and attributes, which
//! outlive individual recordings until `destroy`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;

use super::context::{HostEnvironment, SessionContext};
use crate::buffer::EventBuffer;
use crate::capture::{EventProducer, EventSink};
use crate::config::{SdkConfig, SdkOptions};
use crate::error::{Result, SdkError};
use crate::privacy::PrivacyGate;
use crate::upload::{
    DeliveryClient, DeliveryReport, FailureListener, HttpTransport, SchedulerConfig, Transport,
    UploadScheduler, UploadStats,
};

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Idle,
    Recording,
    Stopped,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Stopped => "stopped",
            SessionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Pipeline pieces owned by one recording.
struct Recording {
    buffer: Arc<EventBuffer>,
    sink: EventSink,
    scheduler: Arc<UploadScheduler>,
}

struct ManagerInner {
    state: SessionState,
    config: Option<Arc<SdkConfig>>,
    gate: Option<Arc<PrivacyGate>>,
    recording: Option<Recording>,
}

pub struct SessionManager {
    inner: Mutex<ManagerInner>,
    context: Arc<RwLock<SessionContext>>,
    host: Arc<dyn HostEnvironment>,
    producer: Mutex<Box<dyn EventProducer>>,
    transport: Arc<dyn Transport>,
    failure_listener: Arc<RwLock<Option<FailureListener>>>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}

impl SessionManager {
    /// Create an uninitialized manager around its collaborators.
    pub fn new(
        host: Arc<dyn HostEnvironment>,
        producer: Box<dyn EventProducer>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        SessionManager {
            inner: Mutex::new(ManagerInner {
                state: SessionState::Uninitialized,
                config: None,
                gate: None,
                recording: None,
            }),
            context: Arc::new(RwLock::new(SessionContext::default())),
            host,
            producer: Mutex::new(producer),
            transport,
            failure_listener: Arc::new(RwLock::new(None)),
        }
    }

    /// Create and `init` a manager delivering over HTTP.
    pub fn with_http(
        host: Arc<dyn HostEnvironment>,
        producer: Box<dyn EventProducer>,
        options: SdkOptions,
    ) -> Result<Self> {
        let timeout = SdkConfig::resolve(options.clone())?.request_timeout;
        let transport = HttpTransport::new(timeout).map_err(SdkError::Capability)?;
        let manager = SessionManager::new(host, producer, Arc::new(transport));
        manager.init(options)?;
        Ok(manager)
    }

    // ============================================================================================
    // LIFECYCLE
    // ============================================================================================

    /// Validate and install configuration. Allowed from `uninitialized`,
    /// `idle` (replaces the configuration) and `stopped`.
    pub fn init(&self, options: SdkOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Destroyed => return Err(SdkError::Destroyed),
            SessionState::Recording => {
                return Err(SdkError::InvalidState {
                    operation: "init",
                    state: inner.state,
                })
            }
            SessionState::Uninitialized | SessionState::Idle | SessionState::Stopped => {}
        }

        let config = SdkConfig::resolve(options)?;
        let gate = PrivacyGate::new(&config.record)?;

        inner.config = Some(Arc::new(config));
        inner.gate = Some(Arc::new(gate));
        inner.recording = None;
        inner.state = SessionState::Idle;
        info!("Session SDK initialized");
        Ok(())
    }

    /// Begins a recording.
    ///
    /// Reads the host's Do-Not-Track flag first; when it is set the call
    /// succeeds, the state stays `idle` and no session id is allocated.
    /// Otherwise a fresh buffer, sink and upload scheduler are created, the
    /// producer is started, and a new session id and metadata are captured.
    /// User id and attributes carry over from earlier sessions.
    ///
    /// Must be called from inside a Tokio runtime; the upload timer is
    /// spawned on the current one.
    ///
    /// # Returns
    /// - `Ok(())`: recording, already recording, or suppressed by Do-Not-Track
    /// - `Err(SdkError::InvalidState)`: not initialized
    /// - `Err(SdkError::Destroyed)`: after `destroy`
    /// - `Err(SdkError::Capability)`: no runtime, or the producer failed to start
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use session_sdk::{ManualProducer, PageInfo, SdkOptions, SessionManager, StaticHost};
    ///
    /// # async fn run() -> session_sdk::Result<()> {
    /// let (producer, handle) = ManualProducer::new();
    /// let manager = SessionManager::with_http(
    ///     Arc::new(StaticHost::new(PageInfo::default())),
    ///     Box::new(producer),
    ///     SdkOptions::with_api_key("key"),
    /// )?;
    /// manager.start_recording()?;
    /// println!("session {:?}, capturing: {}", manager.session_id(), handle.is_running());
    /// # Ok(())
    /// # }
    /// ```
    pub fn start_recording(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Recording => return Ok(()),
            SessionState::Destroyed => return Err(SdkError::Destroyed),
            SessionState::Uninitialized => {
                return Err(SdkError::InvalidState {
                    operation: "start recording",
                    state: inner.state,
                })
            }
            SessionState::Idle | SessionState::Stopped => {}
        }

        if self.host.do_not_track() {
            info!("Do-Not-Track is enabled, recording suppressed");
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| {
            SdkError::Capability("recording requires a running Tokio runtime".to_string())
        })?;

        let (config, gate) = match (&inner.config, &inner.gate) {
            (Some(config), Some(gate)) => (config.clone(), gate.clone()),
            _ => {
                return Err(SdkError::InvalidState {
                    operation: "start recording",
                    state: inner.state,
                })
            }
        };

        let buffer = Arc::new(EventBuffer::new(
            config.max_buffered_events,
            config.overflow_policy,
        ));
        let sink = EventSink::new(gate, buffer.clone());

        if let Err(e) = self.producer.lock().start(&config.record, sink.clone()) {
            sink.close();
            warn!("Event producer failed to start: {}", e);
            return Err(e);
        }

        let session_id = self.context.write().begin(self.host.page_info());

        let delivery = Arc::new(DeliveryClient::new(&config, self.transport.clone()));
        let scheduler = Arc::new(UploadScheduler::new(
            buffer.clone(),
            delivery,
            self.context.clone(),
            SchedulerConfig {
                upload_interval: config.upload_interval,
            },
            runtime,
            Some(self.failure_forwarder()),
        ));
        scheduler.start();

        inner.recording = Some(Recording {
            buffer,
            sink,
            scheduler,
        });
        inner.state = SessionState::Recording;
        info!("Recording session {}", session_id);
        Ok(())
    }

    /// Stops capture and delivers everything captured so far.
    ///
    /// Order: the producer is stopped and the sink closed, the upload timer
    /// is cancelled, the remaining buffer goes out as one final batch, and
    /// finally deliveries spawned by earlier ticks are awaited. Each of
    /// those waits is bounded by the retry budget. A `destroy` issued while
    /// this is pending cancels the outstanding deliveries and lets it return.
    ///
    /// # Returns
    /// - `Ok(Some(report))`: outcome of the final batch
    /// - `Ok(None)`: nothing was buffered, already stopped, or cancelled by `destroy`
    /// - `Err(SdkError::InvalidState)`: uninitialized or idle
    /// - `Err(SdkError::Destroyed)`: after `destroy`
    ///
    /// # Example
    /// ```rust,no_run
    /// # async fn run(manager: &session_sdk::SessionManager) -> session_sdk::Result<()> {
    /// if let Some(report) = manager.stop().await? {
    ///     println!("final batch: {} events, {:?}", report.event_count, report.outcome);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn stop(&self) -> Result<Option<DeliveryReport>> {
        let (sink, scheduler) = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Recording => {}
                SessionState::Stopped => return Ok(None),
                SessionState::Destroyed => return Err(SdkError::Destroyed),
                state => {
                    return Err(SdkError::InvalidState {
                        operation: "stop",
                        state,
                    })
                }
            }
            inner.state = SessionState::Stopped;
            match inner.recording.as_ref() {
                Some(rec) => (rec.sink.clone(), rec.scheduler.clone()),
                None => return Ok(None),
            }
        };

        self.producer.lock().stop();
        sink.close();
        scheduler.stop_timer();

        let report = scheduler.force_flush().await;
        scheduler.wait_in_flight().await;

        match &report {
            Some(r) => info!(
                "Recording stopped; final batch of {} events {}",
                r.event_count,
                if r.is_delivered() { "delivered" } else { "dropped" }
            ),
            None => info!("Recording stopped; nothing left to send"),
        }
        Ok(report)
    }

    /// Drain and deliver now, outside the timer. Only while recording.
    pub async fn flush(&self) -> Result<Option<DeliveryReport>> {
        let scheduler = {
            let inner = self.inner.lock();
            match (inner.state, inner.recording.as_ref()) {
                (SessionState::Recording, Some(rec)) => rec.scheduler.clone(),
                (SessionState::Destroyed, _) => return Err(SdkError::Destroyed),
                (state, _) => {
                    return Err(SdkError::InvalidState {
                        operation: "flush",
                        state,
                    })
                }
            }
        };
        Ok(scheduler.force_flush().await)
    }

    /// Hard teardown.
    ///
    /// Stops the producer, cancels the upload timer and every delivery in
    /// flight (including one a pending `stop` is awaiting), discards buffered
    /// events without sending them, and clears session id, user id,
    /// attributes and the failure listener. Every later mutating call
    /// returns `SdkError::Destroyed`; reads return empty values. Idempotent.
    ///
    /// # Example
    /// ```rust,no_run
    /// # fn run(manager: &session_sdk::SessionManager) {
    /// manager.destroy();
    /// assert!(manager.session_id().is_none());
    /// assert!(manager.set_user_id("u").is_err());
    /// # }
    /// ```
    pub fn destroy(&self) {
        let (was_recording, recording) = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Destroyed {
                return;
            }
            let was_recording = inner.state == SessionState::Recording;
            inner.state = SessionState::Destroyed;
            inner.config = None;
            inner.gate = None;
            (was_recording, inner.recording.take())
        };

        if was_recording {
            self.producer.lock().stop();
        }
        if let Some(rec) = recording {
            rec.sink.close();
            rec.scheduler.abort();
            let discarded = rec.buffer.clear();
            if discarded > 0 {
                debug!("Discarded {} unsent events on destroy", discarded);
            }
        }
        self.context.write().reset();
        *self.failure_listener.write() = None;
        info!("Session destroyed");
    }

    // ============================================================================================
    // USER STATE
    // ============================================================================================

    pub fn set_user_id(&self, user_id: impl Into<String>) -> Result<()> {
        let _inner = self.ensure_mutable("set user id")?;
        self.context.write().set_user_id(Some(user_id.into()));
        Ok(())
    }

    pub fn clear_user_id(&self) -> Result<()> {
        let _inner = self.ensure_mutable("clear user id")?;
        self.context.write().set_user_id(None);
        Ok(())
    }

    /// Shallow merge; keys in `attributes` override existing ones.
    pub fn set_attributes<I, K>(&self, attributes: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let _inner = self.ensure_mutable("set attributes")?;
        self.context
            .write()
            .merge_attributes(attributes.into_iter().map(|(k, v)| (k.into(), v)));
        Ok(())
    }

    /// Register a callback for batches dropped after exhausting retries.
    pub fn on_delivery_failure<F>(&self, listener: F)
    where
        F: Fn(&DeliveryReport) + Send + Sync + 'static,
    {
        *self.failure_listener.write() = Some(Arc::new(listener));
    }

    // ============================================================================================
    // READS
    // ============================================================================================

    pub fn session_id(&self) -> Option<String> {
        self.context.read().session_id().map(str::to_string)
    }

    /// Milliseconds since the session started, 0 if it never started.
    pub fn session_duration(&self) -> u64 {
        self.context.read().duration_ms()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Recording
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn user_id(&self) -> Option<String> {
        self.context.read().user_id().map(str::to_string)
    }

    pub fn attributes(&self) -> BTreeMap<String, Value> {
        BTreeMap::clone(self.context.read().attributes())
    }

    pub fn config(&self) -> Option<Arc<SdkConfig>> {
        self.inner.lock().config.clone()
    }

    /// Upload counters for the current or most recent recording.
    pub fn stats(&self) -> UploadStats {
        self.inner
            .lock()
            .recording
            .as_ref()
            .map(|rec| rec.scheduler.stats())
            .unwrap_or_default()
    }

    /// Events waiting for the next flush.
    pub fn buffered_events(&self) -> usize {
        self.inner
            .lock()
            .recording
            .as_ref()
            .map(|rec| rec.buffer.len())
            .unwrap_or(0)
    }

    fn ensure_mutable(
        &self,
        operation: &'static str,
    ) -> Result<parking_lot::MutexGuard<'_, ManagerInner>> {
        let inner = self.inner.lock();
        match inner.state {
            SessionState::Destroyed => Err(SdkError::Destroyed),
            SessionState::Uninitialized => Err(SdkError::InvalidState {
                operation,
                state: inner.state,
            }),
            _ => Ok(inner),
        }
    }

    /// Listener handed to schedulers; resolves the registered callback at
    /// call time so late registration still applies.
    fn failure_forwarder(&self) -> FailureListener {
        let slot = self.failure_listener.clone();
        Arc::new(move |report: &DeliveryReport| {
            let listener = slot.read().clone();
            if let Some(listener) = listener {
                listener(report);
            }
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let was_recording = inner.state == SessionState::Recording;
        if let Some(rec) = inner.recording.take() {
            if was_recording {
                self.producer.get_mut().stop();
            }
            rec.sink.close();
            rec.scheduler.abort();
        }
    }
}
