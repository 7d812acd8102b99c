//! # Privacy Gate
//!
//! Pure filter/transform between the event producer and the buffer:
//! - capture toggles drop whole categories,
//! - blocked elements (block class or block selector, on the target or any
//!   ancestor) produce no events,
//! - masked input values are replaced with [`MASK_MARKER`] and their
//!   producer payload is dropped,
//! - mouse movement is admitted with probability `mousemove_sampling`.
//!
//! The gate holds only its configuration and is `Send + Sync`, so any number
//! of event sources may call [`PrivacyGate::filter`] concurrently.

use rand::Rng;

use super::selector::BlockSelector;
use crate::capture::{ElementNode, Event, InteractionKind, InteractionRecord, RawEvent};
use crate::config::RecordOptions;
use crate::error::Result;

/// Fixed-length replacement for redacted input values.
pub const MASK_MARKER: &str = "********";

#[derive(Debug, Clone)]
pub struct PrivacyGate {
    options: RecordOptions,
    block_selector: Option<BlockSelector>,
}

impl PrivacyGate {
    /// Build a gate, compiling the block selector once.
    pub fn new(options: &RecordOptions) -> Result<Self> {
        let block_selector = options
            .block_selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(BlockSelector::parse)
            .transpose()?;

        Ok(PrivacyGate {
            options: options.clone(),
            block_selector,
        })
    }

    pub fn options(&self) -> &RecordOptions {
        &self.options
    }

    /// Apply every privacy rule to a raw event. `None` means the event must
    /// not be recorded.
    pub fn filter(&self, raw: RawEvent) -> Option<Event> {
        match raw {
            RawEvent::Interaction(record) => self.filter_interaction(record).map(Event::Interaction),
            RawEvent::Console(record) => self.options.console.then_some(Event::Console(record)),
            RawEvent::Network(record) => self.options.network.then_some(Event::Network(record)),
        }
    }

    /// Whether the target (`path[0]`) or any of its ancestors is blocked.
    pub fn is_blocked(&self, path: &[ElementNode]) -> bool {
        let class = self.options.block_class.as_str();
        (0..path.len()).any(|i| {
            (!class.is_empty() && path[i].has_class(class))
                || self
                    .block_selector
                    .as_ref()
                    .map(|s| s.matches_at(path, i))
                    .unwrap_or(false)
        })
    }

    /// Redacted form of `value` for a field of `input_type`, or the value
    /// unchanged when that type is not masked.
    pub fn mask_value(&self, input_type: &str, value: String) -> String {
        if self.options.mask_input_options.masks(input_type) {
            MASK_MARKER.to_string()
        } else {
            value
        }
    }

    /// Independent per-event sampling decision for mouse movement.
    pub fn admit_mousemove(&self) -> bool {
        let rate = self.options.mousemove_sampling;
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            rand::thread_rng().gen_bool(rate)
        }
    }

    fn captures(&self, kind: InteractionKind) -> bool {
        match kind {
            InteractionKind::MouseMove => self.options.mousemove,
            InteractionKind::MouseInteraction => self.options.mouse_interaction,
            InteractionKind::Scroll => self.options.scroll,
            InteractionKind::Input => self.options.input,
            InteractionKind::ViewportResize => self.options.viewport_resize,
            InteractionKind::Canvas => self.options.canvas,
            InteractionKind::Mutation => true,
        }
    }

    fn filter_interaction(&self, mut record: InteractionRecord) -> Option<InteractionRecord> {
        if !self.captures(record.kind) || self.is_blocked(&record.target) {
            return None;
        }
        if record.kind == InteractionKind::MouseMove && !self.admit_mousemove() {
            return None;
        }
        if record.kind == InteractionKind::Input {
            // Non form-control targets (contenteditable and the like) count as text.
            let input_type = record
                .target
                .first()
                .and_then(ElementNode::input_type)
                .unwrap_or_else(|| "text".to_string());
            if self.options.mask_input_options.masks(&input_type) {
                record.value = record.value.map(|v| self.mask_value(&input_type, v));
                // Producer payloads may echo the raw text.
                record.data = serde_json::Value::Null;
            }
        }
        Some(record)
    }
}
