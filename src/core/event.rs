//! Classified gaze events.
//!
//! One [`GazeEvent`] is emitted per classified center frame. Fields that a
//! stage could not produce are `None` rather than zero.

use crate::ingest::ScreenPoint;
use crate::vision::Point;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Eye-movement label for a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Fixation,
    Saccade,
    /// No velocity could be computed for this frame
    #[default]
    None,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixation => "fixation",
            Self::Saccade => "saccade",
            Self::None => "none",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one ingest stream (one client session/video).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Classification result for one center frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazeEvent {
    /// Capture time of the classified frame
    pub timestamp: DateTime<Utc>,
    pub face_detected: bool,
    pub normalised_eye_speed: Option<f64>,
    pub head_yaw: Option<f64>,
    pub head_pitch: Option<f64>,
    pub head_roll: Option<f64>,
    pub eye_aspect_ratio: Option<f64>,
    pub blink_detected: bool,
    pub iris_centroid_left: Option<Point>,
    pub iris_centroid_right: Option<Point>,
    /// Head still and frontal enough for iris tracking
    pub focus: bool,
    pub iris_velocity_left: Option<f64>,
    pub iris_velocity_right: Option<f64>,
    pub movement_type: MovementType,
    /// Client-side screen-gaze estimate carried through from ingress
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub screen_gaze: Option<ScreenPoint>,
}

impl GazeEvent {
    /// An event with every classification field absent.
    pub fn unclassified(timestamp: DateTime<Utc>, blink_detected: bool) -> Self {
        Self {
            timestamp,
            face_detected: false,
            normalised_eye_speed: None,
            head_yaw: None,
            head_pitch: None,
            head_roll: None,
            eye_aspect_ratio: None,
            blink_detected,
            iris_centroid_left: None,
            iris_centroid_right: None,
            focus: false,
            iris_velocity_left: None,
            iris_velocity_right: None,
            movement_type: MovementType::None,
            screen_gaze: None,
        }
    }

    /// Whether any iris centroid was found.
    pub fn has_iris(&self) -> bool {
        self.iris_centroid_left.is_some() || self.iris_centroid_right.is_some()
    }
}

/// A gaze event addressed to the sink, keyed by `(stream_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedGazeEvent {
    pub stream_id: StreamId,
    #[serde(flatten)]
    pub event: GazeEvent,
}

impl KeyedGazeEvent {
    pub fn key(&self) -> (StreamId, DateTime<Utc>) {
        (self.stream_id, self.event.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&MovementType::Saccade).unwrap(),
            "\"saccade\""
        );
        assert_eq!(MovementType::None.to_string(), "none");
    }

    #[test]
    fn test_unclassified_event_has_no_fields() {
        let ts = DateTime::<Utc>::from_timestamp_millis(10).unwrap();
        let event = GazeEvent::unclassified(ts, true);
        assert!(event.blink_detected);
        assert!(!event.face_detected);
        assert!(!event.has_iris());
        assert_eq!(event.movement_type, MovementType::None);
    }

    #[test]
    fn test_keyed_event_flattens() {
        let ts = DateTime::<Utc>::from_timestamp_millis(10).unwrap();
        let keyed = KeyedGazeEvent {
            stream_id: StreamId::new(),
            event: GazeEvent::unclassified(ts, false),
        };
        let json = serde_json::to_value(&keyed).unwrap();
        assert!(json.get("stream_id").is_some());
        assert_eq!(json["movement_type"], "none");
        assert!(json.get("screen_gaze").is_none());
        assert_eq!(keyed.key(), (keyed.stream_id, ts));
    }
}
