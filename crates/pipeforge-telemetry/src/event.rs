//! Wire-format event types for the analytics collector.

use serde::Serialize;
use serde_json::{Map, Value};

/// One event in a collector batch.
///
/// Serializes as `{"type": "track", ...}` or `{"type": "identify", ...}`,
/// matching the collector's batch endpoint contract.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Track {
        user_id: String,
        event: String,
        properties: Map<String, Value>,
        debug: bool,
    },
    Identify {
        user_id: String,
        traits: Map<String, Value>,
        debug: bool,
    },
}

impl Event {
    /// Event name for track events, the literal `"identify"` otherwise.
    /// Used only for dev-mode logging.
    pub fn name(&self) -> &str {
        match self {
            Event::Track { event, .. } => event,
            Event::Identify { .. } => "identify",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn track_event_wire_shape() {
        let mut properties = Map::new();
        properties.insert("tool_name".into(), json!("list_pipelines"));
        let event = Event::Track {
            user_id: "a6e2b0a4-9f2c-4c57-9f62-0af24f3f0f11".into(),
            event: "Tool Called".into(),
            properties,
            debug: false,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "track");
        assert_eq!(value["event"], "Tool Called");
        assert_eq!(value["properties"]["tool_name"], "list_pipelines");
        assert_eq!(value["debug"], false);
    }

    #[test]
    fn identify_event_wire_shape() {
        let mut traits = Map::new();
        traits.insert("os".into(), json!("linux"));
        let event = Event::Identify {
            user_id: "a6e2b0a4-9f2c-4c57-9f62-0af24f3f0f11".into(),
            traits,
            debug: true,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "identify");
        assert_eq!(value["traits"]["os"], "linux");
        assert!(value.get("event").is_none());
    }
}
