//! Telemetry packets emitted by data sources

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// One telemetry dimension. Bounds are descriptive only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousValue {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub unit: String,
}

impl ContinuousValue {
    pub fn new(value: f64, min: f64, max: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            min,
            max,
            unit: unit.into(),
        }
    }

    /// A bare value; its bounds collapse onto the value itself
    pub fn raw(value: f64) -> Self {
        Self::new(value, value, value, "")
    }
}

/// A discrete occurrence attached to a packet (emergency, new contact, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEvent {
    #[serde(rename = "type")]
    pub kind: String,

    /// 0.0 - 1.0
    pub severity: f64,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DataEvent {
    pub fn new(kind: impl Into<String>, severity: f64) -> Self {
        Self {
            kind: kind.into(),
            severity: severity.clamp(0.0, 1.0),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One sample for one tracked entity.
///
/// `source_id` is the entity identity and the join key for every
/// per-entity map downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPacket {
    pub source_type: String,
    pub source_id: String,

    /// Milliseconds since the Unix epoch
    pub timestamp: u64,

    #[serde(default)]
    pub continuous: HashMap<String, ContinuousValue>,

    #[serde(default)]
    pub events: Vec<DataEvent>,
}

impl DataPacket {
    /// Create an empty packet stamped with the current time
    pub fn new(source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_id: source_id.into(),
            timestamp: now_millis(),
            continuous: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Add a field with no descriptive bounds
    pub fn with_value(mut self, field: impl Into<String>, value: f64) -> Self {
        self.continuous.insert(field.into(), ContinuousValue::raw(value));
        self
    }

    pub fn with_continuous(mut self, field: impl Into<String>, value: ContinuousValue) -> Self {
        self.continuous.insert(field.into(), value);
        self
    }

    pub fn with_event(mut self, event: DataEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Look up a field's current value
    pub fn value(&self, field: &str) -> Option<f64> {
        self.continuous.get(field).map(|cv| cv.value)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_builder() {
        let packet = DataPacket::new("flight", "a1b2c3")
            .with_value("altitude", 10_000.0)
            .with_continuous("velocity", ContinuousValue::new(220.0, 0.0, 300.0, "m/s"))
            .with_event(DataEvent::new("emergency", 1.0).with_metadata("squawk", "7700"));

        assert_eq!(packet.source_type, "flight");
        assert_eq!(packet.source_id, "a1b2c3");
        assert_eq!(packet.value("altitude"), Some(10_000.0));
        assert_eq!(packet.value("velocity"), Some(220.0));
        assert_eq!(packet.value("heading"), None);
        assert_eq!(packet.events.len(), 1);
        assert_eq!(packet.events[0].metadata["squawk"], "7700");
        assert!(packet.timestamp > 0);
    }

    #[test]
    fn test_event_severity_clamped() {
        assert_eq!(DataEvent::new("x", 3.0).severity, 1.0);
        assert_eq!(DataEvent::new("x", -1.0).severity, 0.0);
    }

    #[test]
    fn test_packet_json_shape() {
        let packet = DataPacket::new("flight", "abc")
            .with_value("altitude", 1.0)
            .with_event(DataEvent::new("on_ground", 0.2));
        let json = serde_json::to_value(&packet).unwrap();

        assert_eq!(json["sourceType"], "flight");
        assert_eq!(json["sourceId"], "abc");
        assert_eq!(json["events"][0]["type"], "on_ground");

        let back: DataPacket = serde_json::from_value(json).unwrap();
        assert_eq!(back.source_id, "abc");
    }
}
