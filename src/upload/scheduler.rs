//! Upload scheduler - periodic drain-and-deliver of the event buffer.
//!
//! On every tick of `upload_interval` the scheduler drains the buffer into a
//! [`Batch`], attaching the session snapshot current at that moment, and
//! hands it to the [`DeliveryClient`] on a separate task. New events keep
//! accumulating while earlier batches are still retrying, so several
//! deliveries can be in flight at once. Batch construction order always
//! follows capture order; confirmation order between batches does not.
//!
//! # Shutdown
//!
//! - Graceful (`stop`): cancel the timer, [`UploadScheduler::force_flush`]
//!   what is left and await it, then await the deliveries already in flight.
//!   Every wait is bounded by the retry budget.
//! - Hard (`destroy`): [`UploadScheduler::abort`] cancels the timer and every
//!   in-flight delivery immediately, including a `force_flush` or
//!   `wait_in_flight` another caller is still awaiting.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::batch::Batch;
use super::delivery::{DeliveryClient, DeliveryReport};
use crate::buffer::EventBuffer;
use crate::session::SessionContext;
use crate::types::now_ms;

/// Callback for batches dropped after exhausting their retries.
pub type FailureListener = Arc<dyn Fn(&DeliveryReport) + Send + Sync>;

/// Configuration for the upload scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between periodic flushes
    pub upload_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            upload_interval: Duration::from_millis(crate::config::DEFAULT_UPLOAD_INTERVAL_MS),
        }
    }
}

/// Upload counters for one recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub events_sent: u64,
    /// Events lost to the buffer overflow policy
    pub events_dropped: u64,
}

impl UploadStats {
    pub fn failure_rate(&self) -> f64 {
        let total = self.batches_sent + self.batches_failed;
        if total == 0 {
            0.0
        } else {
            self.batches_failed as f64 / total as f64
        }
    }
}

pub struct UploadScheduler {
    buffer: Arc<EventBuffer>,
    delivery: Arc<DeliveryClient>,
    context: Arc<RwLock<SessionContext>>,
    config: SchedulerConfig,
    runtime: Handle,
    listener: Option<FailureListener>,
    stats: Arc<RwLock<UploadStats>>,
    /// Timestamp of the last batch handed to delivery
    last_flush_at: RwLock<Option<u64>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<JoinSet<()>>,
    /// Flips to `true` once on `abort`; every awaiting flush watches it
    cancelled: watch::Sender<bool>,
}

impl UploadScheduler {
    /// Creates a scheduler for one recording.
    ///
    /// # Arguments
    /// - `buffer`: Buffer the scheduler drains on every tick
    /// - `delivery`: Client that sends each batch, with retries
    /// - `context`: Live session state; snapshotted into every batch
    /// - `config`: Tick interval
    /// - `runtime`: Runtime the timer and background deliveries are spawned on
    /// - `listener`: Called once for every batch dropped after its last retry
    ///
    /// # Returns
    /// An idle scheduler. Nothing runs until [`UploadScheduler::start`].
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use parking_lot::RwLock;
    /// use session_sdk::session::SessionContext;
    /// use session_sdk::upload::{DeliveryClient, SchedulerConfig, UploadScheduler};
    /// use session_sdk::{EventBuffer, HttpTransport, SdkConfig, SdkOptions};
    ///
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = SdkConfig::resolve(SdkOptions::with_api_key("key"))?;
    /// let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
    /// let scheduler = Arc::new(UploadScheduler::new(
    ///     Arc::new(EventBuffer::unbounded()),
    ///     Arc::new(DeliveryClient::new(&config, transport)),
    ///     Arc::new(RwLock::new(SessionContext::default())),
    ///     SchedulerConfig { upload_interval: Duration::from_secs(30) },
    ///     tokio::runtime::Handle::current(),
    ///     None,
    /// ));
    /// scheduler.start();
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        buffer: Arc<EventBuffer>,
        delivery: Arc<DeliveryClient>,
        context: Arc<RwLock<SessionContext>>,
        config: SchedulerConfig,
        runtime: Handle,
        listener: Option<FailureListener>,
    ) -> Self {
        Self {
            buffer,
            delivery,
            context,
            config,
            runtime,
            listener,
            stats: Arc::new(RwLock::new(UploadStats::default())),
            last_flush_at: RwLock::new(None),
            ticker: Mutex::new(None),
            in_flight: Mutex::new(JoinSet::new()),
            cancelled: watch::channel(false).0,
        }
    }

    /// Spawn the periodic timer. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }
        info!(
            "Starting upload scheduler with {}ms interval",
            self.config.upload_interval.as_millis()
        );
        let scheduler = Arc::clone(self);
        *ticker = Some(self.runtime.spawn(scheduler.run()));
    }

    async fn run(self: Arc<Self>) {
        let period = self.config.upload_interval;
        // First tick one full period after start.
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.flush_in_background();
        }
    }

    /// Cancel the periodic timer. In-flight deliveries continue.
    pub fn stop_timer(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            debug!("Upload timer cancelled");
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Drain the buffer into a batch, or `None` if there is nothing to send.
    fn take_batch(&self) -> Option<Batch> {
        let captured = self.buffer.drain_snapshot();
        if captured.is_empty() {
            return None;
        }
        let session = self.context.read().snapshot();
        Some(Batch::assemble(captured, session, now_ms()))
    }

    /// One timer tick: drain and deliver on a background task.
    fn flush_in_background(&self) {
        if self.is_aborted() {
            return;
        }
        let Some(batch) = self.take_batch() else {
            debug!("Upload tick: buffer empty, nothing to send");
            return;
        };
        *self.last_flush_at.write() = Some(batch.timestamp);
        debug!("Upload tick: sending batch {} ({} events)", batch.batch_id, batch.event_count());

        let delivery = self.delivery.clone();
        let stats = self.stats.clone();
        let listener = self.listener.clone();

        let mut in_flight = self.in_flight.lock();
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn_on(
            async move {
                deliver(batch, &delivery, &stats, listener.as_ref()).await;
            },
            &self.runtime,
        );
    }

    /// Drains the buffer and delivers it now, outside the timer.
    ///
    /// Runs in the caller's task and returns once the batch is delivered or
    /// its retries are exhausted, so the wait is bounded by
    /// `SdkConfig::retry_budget` plus request time. An [`UploadScheduler::abort`]
    /// issued meanwhile cancels the delivery along with its pending retries.
    ///
    /// # Returns
    /// - `Some(report)`: the batch was delivered or dropped after its last retry
    /// - `None`: the buffer was empty, or the scheduler was aborted
    ///
    /// # Example
    /// ```rust,no_run
    /// # async fn run(scheduler: &session_sdk::upload::UploadScheduler) {
    /// if let Some(report) = scheduler.force_flush().await {
    ///     println!("batch {} delivered: {}", report.batch_id, report.is_delivered());
    /// }
    /// # }
    /// ```
    pub async fn force_flush(&self) -> Option<DeliveryReport> {
        if self.is_aborted() {
            return None;
        }
        let batch = self.take_batch()?;
        *self.last_flush_at.write() = Some(batch.timestamp);

        tokio::select! {
            biased;
            _ = aborted(self.cancelled.subscribe()) => {
                debug!("Forced flush cancelled by abort");
                None
            }
            report = deliver(batch, &self.delivery, &self.stats, self.listener.as_ref()) => Some(report),
        }
    }

    /// Wait for every delivery spawned by timer ticks to finish, or until
    /// [`UploadScheduler::abort`].
    pub async fn wait_in_flight(&self) {
        let mut pending = std::mem::take(&mut *self.in_flight.lock());
        let outstanding = pending.len();
        tokio::select! {
            biased;
            _ = aborted(self.cancelled.subscribe()) => {
                // Dropping the set aborts whatever is still running.
                debug!("Abandoning up to {} in-flight deliveries", outstanding);
            }
            _ = async { while pending.join_next().await.is_some() {} } => {}
        }
    }

    /// Cancel the timer, every in-flight delivery and any flush currently
    /// awaited by another caller. Irreversible.
    pub fn abort(&self) {
        self.cancelled.send_replace(true);
        self.stop_timer();
        self.in_flight.lock().abort_all();
    }

    pub fn is_aborted(&self) -> bool {
        *self.cancelled.borrow()
    }

    pub fn stats(&self) -> UploadStats {
        let mut stats = self.stats.read().clone();
        stats.events_dropped = self.buffer.dropped();
        stats
    }

    /// Send time of the most recent batch, if any.
    pub fn last_flush(&self) -> Option<u64> {
        *self.last_flush_at.read()
    }
}

/// Resolves once the abort flag is set (or its sender is gone).
async fn aborted(mut flag: watch::Receiver<bool>) {
    while !*flag.borrow_and_update() {
        if flag.changed().await.is_err() {
            return;
        }
    }
}

async fn deliver(
    batch: Batch,
    delivery: &DeliveryClient,
    stats: &RwLock<UploadStats>,
    listener: Option<&FailureListener>,
) -> DeliveryReport {
    match delivery.send(&batch).await {
        Ok(report) => {
            let mut stats = stats.write();
            stats.batches_sent += 1;
            stats.events_sent += report.event_count as u64;
            report
        }
        Err(e) => {
            error!(
                "Dropping batch {} ({} events): {}",
                batch.batch_id,
                batch.event_count(),
                e
            );
            stats.write().batches_failed += 1;
            let report = DeliveryReport::failed(&batch, &e);
            if let Some(listener) = listener {
                listener(&report);
            }
            report
        }
    }
}
