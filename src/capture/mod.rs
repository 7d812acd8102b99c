//! Captured event types and the producer seam.

pub mod events;
pub mod producer;
pub mod replay;

pub use events::{
    CapturedEvent, ConsoleLevel, ConsoleRecord, ElementNode, Event, InteractionKind,
    InteractionRecord, NetworkRecord, RawEvent,
};
pub use producer::{EventProducer, EventSink, ManualProducer, ProducerHandle};
pub use replay::{ReplayProducer, ReplayProgress};
