//! Event types flowing through the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open key-value annotations attached to an event.
///
/// Values are restricted to a small closed set of kinds; anything else in
/// an inbound payload is a decode failure at the boundary rather than a
/// surprise at access time.
pub type MetaMap = BTreeMap<String, MetaValue>;

/// A single metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Number(f64),
    Map(MetaMap),
}

/// An inbound domain event, the unit of work for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique per logical event
    pub id: String,

    /// Raw text to enrich
    pub text: String,

    /// What the generation service should produce
    #[serde(default = "default_generate_type")]
    pub generate_type: String,

    /// Timing and caller annotations, mutated during processing
    #[serde(default)]
    pub meta: MetaMap,
}

impl Event {
    /// Stamp the receipt time (epoch seconds) into `meta`
    pub fn stamp_received_at(&mut self, epoch_secs: f64) {
        self.meta
            .insert("received_at".to_string(), MetaValue::Number(epoch_secs));
    }
}

/// Response of the preprocessing service
#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessResult {
    pub clean_text: String,

    #[serde(default)]
    pub features: serde_json::Map<String, serde_json::Value>,
}

/// Response of the generation service
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResult {
    pub url: String,

    #[serde(default = "default_status")]
    pub status: String,
}

/// The transformed event published to the outbound queue.
///
/// Immutable once constructed; serialized and published exactly once per
/// successfully processed [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub id: String,
    pub status: String,
    pub artifact_url: String,
    pub meta: MetaMap,
}

impl OutboundEvent {
    pub fn new(event: &Event, generation: GenerationResult) -> Self {
        Self {
            id: event.id.clone(),
            status: generation.status,
            artifact_url: generation.url,
            meta: event.meta.clone(),
        }
    }
}

fn default_generate_type() -> String {
    "image".to_string()
}

fn default_status() -> String {
    "ok".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_defaults() {
        let event: Event = serde_json::from_value(json!({
            "id": "1",
            "text": "hello"
        }))
        .unwrap();

        assert_eq!(event.generate_type, "image");
        assert!(event.meta.is_empty());
    }

    #[test]
    fn test_event_meta_kinds() {
        let event: Event = serde_json::from_value(json!({
            "id": "1",
            "text": "hello",
            "meta": {
                "source": "mobile",
                "attempt": 2,
                "nested": {"region": "eu"}
            }
        }))
        .unwrap();

        assert_eq!(
            event.meta.get("source"),
            Some(&MetaValue::String("mobile".to_string()))
        );
        assert_eq!(event.meta.get("attempt"), Some(&MetaValue::Number(2.0)));
        assert!(matches!(event.meta.get("nested"), Some(MetaValue::Map(_))));
    }

    #[test]
    fn test_event_rejects_unsupported_meta_kind() {
        let result: Result<Event, _> = serde_json::from_value(json!({
            "id": "1",
            "text": "hello",
            "meta": {"flags": [1, 2, 3]}
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_stamp_received_at() {
        let mut event: Event =
            serde_json::from_value(json!({"id": "1", "text": "hello"})).unwrap();
        event.stamp_received_at(1700000000.5);

        assert_eq!(
            event.meta.get("received_at"),
            Some(&MetaValue::Number(1700000000.5))
        );
    }

    #[test]
    fn test_generation_result_default_status() {
        let result: GenerationResult =
            serde_json::from_value(json!({"url": "http://img"})).unwrap();
        assert_eq!(result.status, "ok");
    }

    #[test]
    fn test_outbound_event_shape() {
        let mut event: Event =
            serde_json::from_value(json!({"id": "42", "text": "hi"})).unwrap();
        event.stamp_received_at(100.0);

        let outbound = OutboundEvent::new(
            &event,
            GenerationResult {
                url: "http://img".to_string(),
                status: "ok".to_string(),
            },
        );

        let value = serde_json::to_value(&outbound).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "42",
                "status": "ok",
                "artifact_url": "http://img",
                "meta": {"received_at": 100.0}
            })
        );
    }
}
