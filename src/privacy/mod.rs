//! Privacy gating applied before events reach the buffer.

pub mod gate;
pub mod selector;

pub use gate::{PrivacyGate, MASK_MARKER};
pub use selector::BlockSelector;
