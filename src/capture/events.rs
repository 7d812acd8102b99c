//! Event data structures.
//!
//! [`RawEvent`] is what the producer emits before privacy gating.
//! [`Event`] is what the gate lets through, and [`CapturedEvent`] is an
//! event stamped with its buffer sequence number.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One element on the path from an event target up to the document root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    /// Lower-case tag name
    pub tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        ElementNode {
            tag: tag.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Effective input type: the `type` attribute for `<input>` (default
    /// `text`), or the tag name for `<textarea>` and `<select>`.
    pub fn input_type(&self) -> Option<String> {
        match self.tag.as_str() {
            "input" => Some(
                self.attributes
                    .get("type")
                    .map(|t| t.to_ascii_lowercase())
                    .unwrap_or_else(|| "text".to_string()),
            ),
            "textarea" | "select" => Some(self.tag.clone()),
            _ => None,
        }
    }
}

/// Interaction categories, each switchable through `RecordOptions`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InteractionKind {
    MouseMove,
    MouseInteraction,
    Scroll,
    Input,
    ViewportResize,
    Canvas,
    /// DOM snapshots and mutations, opaque to this crate.
    Mutation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    /// Capture time (Unix timestamp ms)
    pub timestamp: u64,

    pub kind: InteractionKind,

    /// Target element first, then its ancestors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<ElementNode>,

    /// Current field value for input events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Producer-specific payload, passed through untouched except on input
    /// events whose type is masked, where it is dropped.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleRecord {
    pub timestamp: u64,
    pub level: ConsoleLevel,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    pub timestamp: u64,
    pub method: String,
    pub url: String,
    /// `None` when the request failed before a response arrived.
    #[serde(default)]
    pub status: Option<u16>,
    pub duration_ms: u64,
}

/// Raw producer output. Same shape as [`Event`] but not yet gated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RawEvent {
    Interaction(InteractionRecord),
    Console(ConsoleRecord),
    Network(NetworkRecord),
}

/// An event admitted by the privacy gate.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    Interaction(InteractionRecord),
    Console(ConsoleRecord),
    Network(NetworkRecord),
}

impl Event {
    pub fn timestamp(&self) -> u64 {
        match self {
            Event::Interaction(r) => r.timestamp,
            Event::Console(r) => r.timestamp,
            Event::Network(r) => r.timestamp,
        }
    }
}

/// An event together with its position in capture order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CapturedEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_type_resolution() {
        assert_eq!(ElementNode::new("INPUT").input_type().as_deref(), Some("text"));
        assert_eq!(
            ElementNode::new("input")
                .with_attribute("type", "Password")
                .input_type()
                .as_deref(),
            Some("password")
        );
        assert_eq!(ElementNode::new("textarea").input_type().as_deref(), Some("textarea"));
        assert_eq!(ElementNode::new("div").input_type(), None);
    }

    #[test]
    fn test_raw_event_json_shape() {
        let raw: RawEvent = serde_json::from_str(
            r#"{"type":"console","timestamp":5,"level":"warn","args":["low disk"]}"#,
        )
        .unwrap();
        match raw {
            RawEvent::Console(record) => {
                assert_eq!(record.level, ConsoleLevel::Warn);
                assert_eq!(record.args, vec!["low disk".to_string()]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_captured_event_flattens() {
        let captured = CapturedEvent {
            seq: 7,
            event: Event::Network(NetworkRecord {
                timestamp: 10,
                method: "GET".to_string(),
                url: "/api".to_string(),
                status: Some(200),
                duration_ms: 12,
            }),
        };
        let json = serde_json::to_value(&captured).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "network");
        assert_eq!(json["status"], 200);
        assert_eq!(json["durationMs"], 12);
    }
}
