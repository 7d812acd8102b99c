//! Batch upload pipeline.
//!
//! Two delivery paths share one [`DeliveryClient`]:
//! 1. **Scheduled flush** ([`UploadScheduler`]): periodic tick, delivery on a background task
//! 2. **Forced flush** ([`UploadScheduler::force_flush`]): on `stop` or host request, awaited by the caller

pub mod batch;
pub mod delivery;
pub mod scheduler;
pub mod transport;

pub use batch::Batch;
pub use delivery::{DeliveryClient, DeliveryOutcome, DeliveryReport};
pub use scheduler::{FailureListener, SchedulerConfig, UploadScheduler, UploadStats};
pub use transport::{HttpTransport, OutboundRequest, Transport};
