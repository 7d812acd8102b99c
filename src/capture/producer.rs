//! Event producer seam.
//!
//! Capture itself (DOM, console and network hooks) lives outside this crate.
//! A producer is started with the record options and an [`EventSink`], and
//! pushes every raw item into the sink until it is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::events::RawEvent;
use crate::buffer::{AppendOutcome, EventBuffer};
use crate::config::RecordOptions;
use crate::error::{Result, SdkError};
use crate::privacy::PrivacyGate;

/// External capture collaborator.
pub trait EventProducer: Send {
    /// Begin capturing. Events are delivered through `sink` until `stop`.
    fn start(&mut self, options: &RecordOptions, sink: EventSink) -> Result<()>;

    /// Stop capturing. Must be safe to call when not started.
    fn stop(&mut self);
}

/// Entry point from the producer into the pipeline: privacy gate, then
/// buffer. Cloneable and callable from any thread.
#[derive(Clone, Debug)]
pub struct EventSink {
    gate: Arc<PrivacyGate>,
    buffer: Arc<EventBuffer>,
    open: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new(gate: Arc<PrivacyGate>, buffer: Arc<EventBuffer>) -> Self {
        EventSink {
            gate,
            buffer,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Gate and buffer one raw event. Returns whether it was stored.
    pub fn emit(&self, raw: RawEvent) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.gate.filter(raw) {
            Some(event) => !matches!(self.buffer.append(event), AppendOutcome::Rejected),
            None => false,
        }
    }

    /// Refuse all further events. Shared by every clone.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Producer driven by host code through a [`ProducerHandle`]. Suits hosts
/// that already own their capture hooks and only need the pipeline.
#[derive(Debug, Default)]
pub struct ManualProducer {
    sink: Arc<Mutex<Option<EventSink>>>,
    unsupported: Option<String>,
}

impl ManualProducer {
    pub fn new() -> (Self, ProducerHandle) {
        let producer = ManualProducer::default();
        let handle = ProducerHandle {
            sink: producer.sink.clone(),
        };
        (producer, handle)
    }

    /// A producer whose `start` always fails, as on a host without capture
    /// support.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        ManualProducer {
            sink: Arc::default(),
            unsupported: Some(reason.into()),
        }
    }
}

impl EventProducer for ManualProducer {
    fn start(&mut self, _options: &RecordOptions, sink: EventSink) -> Result<()> {
        if let Some(reason) = &self.unsupported {
            return Err(SdkError::Capability(reason.clone()));
        }
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().take();
    }
}

/// Push side of a [`ManualProducer`].
#[derive(Clone, Debug)]
pub struct ProducerHandle {
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl ProducerHandle {
    /// Forward an event. Returns `false` when not recording or when the
    /// event was filtered out.
    pub fn emit(&self, raw: RawEvent) -> bool {
        let sink = self.sink.lock().clone();
        sink.map(|s| s.emit(raw)).unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.sink.lock().as_ref().map(EventSink::is_open).unwrap_or(false)
    }
}
