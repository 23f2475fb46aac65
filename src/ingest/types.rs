//! Ingress records for the Gaze Event Agent.
//!
//! A frame message is what the transport hands to a stream: the frame
//! payload, its capture time, and a few side-channel fields that ride along
//! with the frame but play no part in classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the client wants a frame handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// Normal classification and persistence
    #[default]
    Reading,
    /// Live preview: the frame feeds the window like any other, but its
    /// event is never delivered to the sink
    Diagnostic,
}

impl FrameMode {
    /// Whether events for this frame are delivered to the sink.
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Reading)
    }
}

/// Overlay switches for the diagnostic path.
///
/// These are handed to the face detector untouched; they never change
/// a classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderFlags {
    pub draw_mesh: bool,
    pub draw_contours: bool,
    pub show_axis: bool,
    pub draw_eye: bool,
}

/// Where on screen the client believes the user is looking, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// A single frame as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMessage<F> {
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub mode: FrameMode,
    #[serde(default, rename = "xCoordinatePx", alias = "x_coordinate_px")]
    pub x_coordinate_px: Option<f64>,
    #[serde(default, rename = "yCoordinatePx", alias = "y_coordinate_px")]
    pub y_coordinate_px: Option<f64>,
    #[serde(flatten)]
    pub render: RenderFlags,
    /// The frame itself
    pub frame: F,
}

impl<F> FrameMessage<F> {
    /// Create a reading-mode message with no side-channel data.
    pub fn new(timestamp_ms: i64, frame: F) -> Self {
        Self {
            timestamp: timestamp_ms,
            mode: FrameMode::Reading,
            x_coordinate_px: None,
            y_coordinate_px: None,
            render: RenderFlags::default(),
            frame,
        }
    }

    pub fn with_mode(mut self, mode: FrameMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attach the client's screen-gaze estimate.
    pub fn with_screen_gaze(mut self, x: f64, y: f64) -> Self {
        self.x_coordinate_px = Some(x);
        self.y_coordinate_px = Some(y);
        self
    }

    /// Capture time on the stream clock, if representable.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
    }

    /// Screen-gaze side channel, present only when both axes were sent.
    pub fn screen_gaze(&self) -> Option<ScreenPoint> {
        match (self.x_coordinate_px, self.y_coordinate_px) {
            (Some(x), Some(y)) => Some(ScreenPoint { x, y }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_message_defaults_from_json() {
        let json = r#"{"timestamp": 1700000000000, "frame": 7}"#;
        let message: FrameMessage<u32> = serde_json::from_str(json).unwrap();

        assert_eq!(message.mode, FrameMode::Reading);
        assert_eq!(message.render, RenderFlags::default());
        assert!(message.screen_gaze().is_none());
        assert_eq!(message.frame, 7);
    }

    #[test]
    fn test_side_channel_fields_parse() {
        let json = r#"{
            "timestamp": 1700000000000,
            "mode": "diagnostic",
            "xCoordinatePx": 120.5,
            "yCoordinatePx": 64.0,
            "draw_mesh": true,
            "frame": null
        }"#;
        let message: FrameMessage<Option<u8>> = serde_json::from_str(json).unwrap();

        assert_eq!(message.mode, FrameMode::Diagnostic);
        assert!(!message.mode.is_persisted());
        assert!(message.render.draw_mesh);
        assert!(!message.render.show_axis);
        assert_eq!(message.screen_gaze(), Some(ScreenPoint { x: 120.5, y: 64.0 }));
    }

    #[test]
    fn test_captured_at_converts_millis() {
        let message = FrameMessage::new(1_500, ());
        let at = message.captured_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_500);

        let bad = FrameMessage::new(i64::MAX, ());
        assert!(bad.captured_at().is_none());
    }

    #[test]
    fn test_half_screen_gaze_is_absent() {
        let mut message = FrameMessage::new(0, ());
        message.x_coordinate_px = Some(1.0);
        assert!(message.screen_gaze().is_none());
    }
}
