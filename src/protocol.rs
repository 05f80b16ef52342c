// Live feed wire protocol
//
// Inbound messages are JSON envelopes of the form
//   {"type": "Event", "payload": {"event_type": ..., "payload": {"data": ...}}}
// Decoding happens once here; everything downstream sees typed values.

use serde::Deserialize;
use std::fmt::{Display, Formatter};

use crate::entity::{EntityUpdate, GeoPosition, TelemetryUpdate};
use crate::route::{Route, resolve};

pub const EVENT_MESSAGE_TYPE: &str = "Event";
pub const DRONE_POSITION_UPDATED: &str = "DRONE_POSITION_UPDATED";
/// Server envelopes other than `Event`: heartbeats, snapshots, batches and errors
pub const CONTROL_MESSAGE_TYPES: [&str; 4] = ["Ping", "InitialState", "EventBatch", "Error"];

#[derive(Debug)]
pub enum ProtocolError {
    /// Not valid JSON
    Parse(serde_json::Error),
    /// Valid JSON that is not an event envelope we understand
    UnexpectedShape(String),
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Parse(e) => write!(f, "invalid JSON: {}", e),
            ProtocolError::UnexpectedShape(reason) => write!(f, "unexpected shape: {}", reason),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for crate::error::SyncError {
    fn from(e: ProtocolError) -> Self {
        crate::error::SyncError::Parse(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct EventFrame {
    event_type: String,
    payload: EventBody,
}

#[derive(Debug, Deserialize)]
struct EventBody {
    data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PositionDto {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryDto {
    pub battery_level: f64,
    pub fuel_level: f64,
    pub speed: f64,
    pub system_health: f64,
    #[serde(default)]
    pub heading: Option<f64>,
}

/// Data of a DRONE_POSITION_UPDATED event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PositionReport {
    pub drone_id: String,
    pub position: PositionDto,
    pub telemetry: TelemetryDto,
}

impl PositionReport {
    /// Full-field update; the feed carries no route indices so they are
    /// derived from the reported position.
    pub fn to_update(&self, route: &Route) -> EntityUpdate {
        let position = GeoPosition::new(
            self.position.latitude,
            self.position.longitude,
            self.position.altitude,
        );
        let placement = resolve(&position, route);
        EntityUpdate {
            position: Some(position),
            telemetry: TelemetryUpdate {
                battery_percent: Some(self.telemetry.battery_level),
                fuel_percent: Some(self.telemetry.fuel_level),
                speed: Some(self.telemetry.speed),
                system_health: Some(self.telemetry.system_health),
                heading: self.telemetry.heading,
            },
            route_index: Some(placement.route_index),
            route_progress: Some(placement.route_progress),
            ..Default::default()
        }
    }
}

/// A successfully decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    PositionUpdated(PositionReport),
    /// Well-formed event of a type this client does not act on
    Ignored { event_type: String },
    /// Known non-event envelope such as a heartbeat
    Control { message_type: String },
}

/// Decode one text frame from the live feed
pub fn decode_message(text: &str) -> Result<FeedMessage, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::Parse)?;

    let message_type = value.get("type").and_then(|t| t.as_str());
    if let Some(control) = message_type.filter(|t| CONTROL_MESSAGE_TYPES.contains(t)) {
        return Ok(FeedMessage::Control {
            message_type: control.to_string(),
        });
    }
    if message_type != Some(EVENT_MESSAGE_TYPE) {
        return Err(ProtocolError::UnexpectedShape(format!(
            "message type {:?}",
            message_type.unwrap_or("<missing>")
        )));
    }

    let payload = value
        .get("payload")
        .cloned()
        .ok_or_else(|| ProtocolError::UnexpectedShape("missing payload".to_string()))?;
    let frame: EventFrame = serde_json::from_value(payload)
        .map_err(|e| ProtocolError::UnexpectedShape(format!("event frame: {}", e)))?;

    match frame.event_type.as_str() {
        DRONE_POSITION_UPDATED => {
            let report: PositionReport = serde_json::from_value(frame.payload.data)
                .map_err(|e| ProtocolError::UnexpectedShape(format!("position data: {}", e)))?;
            Ok(FeedMessage::PositionUpdated(report))
        }
        _ => Ok(FeedMessage::Ignored {
            event_type: frame.event_type,
        }),
    }
}
