//! # Session SDK
//!
//! Client-side session recording pipeline. Raw interaction, console and
//! network events from an external producer pass through a privacy gate
//! into an ordered buffer; an upload scheduler periodically drains the
//! buffer into batches, attaches session metadata and delivers them to a
//! collector with fixed-delay retry.
//!
//! ```text
//! producer -> PrivacyGate -> EventBuffer -> (tick) -> Batch -> DeliveryClient -> collector
//! ```
//!
//! [`SessionManager`] drives the lifecycle; [`session::registry`] exposes a
//! single process-wide instance.

pub mod buffer;
pub mod capture;
pub mod config;
pub mod error;
pub mod privacy;
pub mod session;
pub mod types;
pub mod upload;

pub use buffer::{AppendOutcome, EventBuffer};
pub use capture::{EventProducer, EventSink, ManualProducer, ProducerHandle, RawEvent};
pub use config::{MaskInputOptions, OverflowPolicy, RecordOptions, SdkConfig, SdkOptions};
pub use error::{Result, SdkError};
pub use privacy::{PrivacyGate, MASK_MARKER};
pub use session::{registry, HostEnvironment, PageInfo, SessionManager, SessionState, StaticHost};
pub use upload::{Batch, DeliveryReport, HttpTransport, Transport, UploadStats};
