//! Telemetry events emitted by the engine.
//!
//! Emission is fire-and-forget: sinks must never block a motion step. The
//! channel sink drops events with `try_send` when its buffer is full.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::force::ForceReadings;
use crate::joint::JointState;

/// Kind of telemetry event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JointUpdate,
    Gesture,
    Calibration,
    Error,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::JointUpdate => "joint_update",
            EventType::Gesture => "gesture",
            EventType::Calibration => "calibration",
            EventType::Error => "error",
        };
        f.write_str(s)
    }
}

/// One telemetry record, in the shape the telemetry store persists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: EventType,
    pub joint_data: JointState,
    pub force_data: BTreeMap<String, u8>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TelemetryEvent {
    /// Build an event stamped with the current wall-clock time (ISO-8601, UTC).
    pub fn new(event_type: EventType, pose: JointState, forces: &ForceReadings) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "timestamp".to_string(),
            serde_json::Value::String(
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            ),
        );
        Self {
            event_type,
            joint_data: pose,
            force_data: forces.to_map(),
            metadata,
        }
    }

    /// Add a metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The ISO-8601 timestamp, if present.
    pub fn timestamp(&self) -> Option<&str> {
        self.metadata.get("timestamp").and_then(|v| v.as_str())
    }
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Hand off an event. Must return without waiting on I/O.
    fn emit(&self, event: TelemetryEvent);
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that writes events to the tracing log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&self, event: TelemetryEvent) {
        tracing::info!(
            event_type = %event.event_type,
            pose = ?event.joint_data.to_array(),
            grip = event.force_data.get("grip").copied().unwrap_or(0),
            "telemetry"
        );
    }
}

/// Bounded channel sink. The receiving half is drained by whoever persists
/// or forwards telemetry.
#[derive(Clone, Debug)]
pub struct TelemetryChannel {
    tx: mpsc::Sender<TelemetryEvent>,
}

impl TelemetryChannel {
    /// Create a sink with room for `capacity` undelivered events.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl TelemetrySink for TelemetryChannel {
    fn emit(&self, event: TelemetryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!("Telemetry buffer full, dropping {} event", event.event_type);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Telemetry receiver closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let pose = JointState::hand(90, 90, 90, 90, 90);
        let event = TelemetryEvent::new(
            EventType::JointUpdate,
            pose,
            &ForceReadings::from_pose(&pose, true),
        )
        .with_meta("success", true);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "joint_update");
        assert_eq!(json["joint_data"]["ring"], 90);
        assert_eq!(json["force_data"]["grip"], 90);
        assert_eq!(json["force_data"]["ring"], 100);
        assert_eq!(json["metadata"]["success"], true);
        let ts = json["metadata"]["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_channel_drops_when_full() {
        let (sink, mut rx) = TelemetryChannel::new(1);
        let event = TelemetryEvent::new(
            EventType::Gesture,
            JointState::ZERO,
            &ForceReadings::default(),
        );
        sink.emit(event.clone());
        sink.emit(event.with_meta("second", true));
        let first = rx.try_recv().unwrap();
        assert!(!first.metadata.contains_key("second"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_type_display_matches_serde() {
        for t in [
            EventType::JointUpdate,
            EventType::Gesture,
            EventType::Calibration,
            EventType::Error,
        ] {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json.as_str().unwrap(), t.to_string());
        }
    }
}
