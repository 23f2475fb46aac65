//! Face gating, iris extraction and fixation/saccade classification.
//!
//! Each call runs a short pipeline with early exits:
//!
//! ```text
//! face/pose ──▶ gate (motion, yaw, pitch) ──▶ iris (eyes open only) ──▶ movement
//!     │                 │
//!     ▼                 ▼
//!  no face          not focused
//! ```
//!
//! The only memory carried between frames is [`GazeState`]: the previous
//! centroids, their timestamp and the last movement label.

use crate::config::GazeConfig;
use crate::core::event::{GazeEvent, MovementType};
use crate::ingest::RenderFlags;
use crate::vision::{EyeRegion, FaceObservation, Point, VisionBackend, VisionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which gate a frame stopped at.
///
/// Re-evaluated from scratch for every frame; nothing here depends on the
/// previous frame's stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeStage {
    #[default]
    NoFace,
    FaceNoFocus,
    FocusedBlinkClosed,
    FocusedIrisTracked,
}

/// Per-stream memory of the movement classifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GazeState {
    pub previous_left: Option<Point>,
    pub previous_right: Option<Point>,
    pub previous_timestamp: Option<DateTime<Utc>>,
    pub movement_state: MovementType,
    pub stage: GazeStage,
}

impl GazeState {
    /// Advance the clock without any centroid, so the next tracked frame
    /// starts from "no previous centroid".
    fn clear_tracking(&mut self, timestamp: DateTime<Utc>) {
        self.previous_left = None;
        self.previous_right = None;
        self.previous_timestamp = Some(timestamp);
        self.movement_state = MovementType::None;
    }
}

/// Per-eye velocities and the combined label for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementReading {
    pub left_velocity: Option<f64>,
    pub right_velocity: Option<f64>,
    pub movement: MovementType,
}

/// Velocity-threshold (I-VT style) fixation/saccade classifier.
#[derive(Debug, Clone)]
pub struct MovementClassifier {
    saccade_velocity_threshold: f64,
}

impl MovementClassifier {
    pub fn new(saccade_velocity_threshold: f64) -> Self {
        Self {
            saccade_velocity_threshold,
        }
    }

    /// Classify the current centroids against `state` and advance it.
    ///
    /// Velocity is frame-normalised displacement per second:
    /// `hypot(dx / width, dy / height) / dt`. The faster eye decides the
    /// label; with no velocity for either eye the label is `None`.
    pub fn update(
        &self,
        state: &mut GazeState,
        left: Option<Point>,
        right: Option<Point>,
        frame_size: (u32, u32),
        timestamp: DateTime<Utc>,
    ) -> MovementReading {
        let elapsed = state
            .previous_timestamp
            .map(|prev| (timestamp - prev).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6)
            .filter(|secs| *secs > 0.0);

        let velocity = |current: Option<Point>, previous: Option<Point>| -> Option<f64> {
            let (current, previous, dt) = (current?, previous?, elapsed?);
            let (width, height) = (frame_size.0.max(1) as f64, frame_size.1.max(1) as f64);
            let dx = (current.x - previous.x) / width;
            let dy = (current.y - previous.y) / height;
            Some(dx.hypot(dy) / dt)
        };

        let left_velocity = velocity(left, state.previous_left);
        let right_velocity = velocity(right, state.previous_right);

        let fastest = match (left_velocity, right_velocity) {
            (Some(l), Some(r)) => Some(l.max(r)),
            (l, r) => l.or(r),
        };
        let movement = match fastest {
            Some(v) if v > self.saccade_velocity_threshold => MovementType::Saccade,
            Some(_) => MovementType::Fixation,
            None => MovementType::None,
        };

        state.previous_left = left;
        state.previous_right = right;
        state.previous_timestamp = Some(timestamp);
        state.movement_state = movement;

        MovementReading {
            left_velocity,
            right_velocity,
            movement,
        }
    }
}

/// Face, iris and movement classification for one stream.
///
/// Owns the stream's [`GazeState`]; callers serialise access by holding
/// `&mut self`.
#[derive(Debug, Clone)]
pub struct GazeClassifier {
    config: GazeConfig,
    movement: MovementClassifier,
    state: GazeState,
}

impl GazeClassifier {
    pub fn new(config: GazeConfig) -> Self {
        let movement = MovementClassifier::new(config.saccade_velocity_threshold);
        Self {
            config,
            movement,
            state: GazeState::default(),
        }
    }

    pub fn state(&self) -> &GazeState {
        &self.state
    }

    /// Classify one frame.
    ///
    /// "Not found" results are absent fields in the event. An `Err` means a
    /// vision routine failed on malformed input; the state is left as it
    /// was before the call.
    pub fn classify<B: VisionBackend>(
        &mut self,
        backend: &B,
        frame: &B::Frame,
        render: &RenderFlags,
        blink_detected: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<GazeEvent, VisionError> {
        let face = backend.detect_face(frame, render)?;
        let mut event = GazeEvent::unclassified(timestamp, blink_detected);
        event.face_detected = face.detected;

        if !face.detected || (face.left_eye.is_none() && face.right_eye.is_none()) {
            self.state.clear_tracking(timestamp);
            self.state.stage = GazeStage::NoFace;
            return Ok(event);
        }

        event.normalised_eye_speed = Some(face.eye_speed);
        event.head_yaw = Some(face.yaw);
        event.head_pitch = Some(face.pitch);
        event.head_roll = Some(face.roll);

        if !self.is_focused(&face) {
            tracing::debug!(
                eye_speed = face.eye_speed,
                yaw = face.yaw,
                pitch = face.pitch,
                "gated: head motion or extreme pose"
            );
            self.state.clear_tracking(timestamp);
            self.state.stage = GazeStage::FaceNoFocus;
            return Ok(event);
        }
        event.focus = true;

        let (left, right) = if blink_detected {
            (None, None)
        } else {
            let locate = |region: Option<EyeRegion>| match region {
                Some(region) => backend.locate_iris(frame, &region),
                None => Ok(None),
            };
            (locate(face.left_eye)?, locate(face.right_eye)?)
        };

        let reading = self.movement.update(
            &mut self.state,
            left,
            right,
            backend.frame_size(frame),
            timestamp,
        );
        self.state.stage = if blink_detected {
            GazeStage::FocusedBlinkClosed
        } else {
            GazeStage::FocusedIrisTracked
        };

        event.iris_centroid_left = left;
        event.iris_centroid_right = right;
        event.iris_velocity_left = reading.left_velocity;
        event.iris_velocity_right = reading.right_velocity;
        event.movement_type = reading.movement;
        Ok(event)
    }

    fn is_focused(&self, face: &FaceObservation) -> bool {
        face.eye_speed <= self.config.max_eye_speed
            && face.yaw.abs() <= self.config.max_yaw_deg
            && face.pitch.abs() <= self.config.max_pitch_deg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{FrameMeasurements, ReplayBackend};

    const FRAME_MS: i64 = 33;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    fn classify(
        classifier: &mut GazeClassifier,
        frame: &FrameMeasurements,
        blink: bool,
        ms: i64,
    ) -> GazeEvent {
        classifier
            .classify(&ReplayBackend::new(), frame, &RenderFlags::default(), blink, at(ms))
            .unwrap()
    }

    #[test]
    fn test_first_tracked_frame_has_no_movement() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        let event = classify(&mut classifier, &FrameMeasurements::steady(0.3), false, 0);

        assert!(event.face_detected);
        assert!(event.focus);
        assert!(event.has_iris());
        assert_eq!(event.movement_type, MovementType::None);
        assert_eq!(classifier.state().stage, GazeStage::FocusedIrisTracked);
    }

    #[test]
    fn test_large_displacement_is_a_saccade() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        let start = FrameMeasurements::steady(0.3);
        classify(&mut classifier, &start, false, 0);

        // 50 px in one frame interval
        let moved = start.shift_irises(50.0);
        let event = classify(&mut classifier, &moved, false, FRAME_MS);
        assert_eq!(event.movement_type, MovementType::Saccade);
        let velocity = event.iris_velocity_left.unwrap();
        assert!((velocity - 50.0 / 640.0 / 0.033).abs() < 1e-6);
    }

    #[test]
    fn test_small_displacement_is_a_fixation() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        let start = FrameMeasurements::steady(0.3);
        classify(&mut classifier, &start, false, 0);

        let event = classify(&mut classifier, &start.clone().shift_irises(1.0), false, FRAME_MS);
        assert_eq!(event.movement_type, MovementType::Fixation);
        assert_eq!(classifier.state().movement_state, MovementType::Fixation);
    }

    #[test]
    fn test_high_eye_speed_disables_iris_stage() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        let mut frame = FrameMeasurements::steady(0.3);
        if let Some(face) = frame.face.as_mut() {
            face.eye_speed = 0.5;
        }

        let event = classify(&mut classifier, &frame, false, 0);
        assert!(event.face_detected);
        assert!(!event.focus);
        assert_eq!(event.normalised_eye_speed, Some(0.5));
        assert!(event.head_yaw.is_some());
        assert!(!event.has_iris());
        assert!(event.iris_velocity_left.is_none());
        assert_eq!(event.movement_type, MovementType::None);
        assert_eq!(classifier.state().stage, GazeStage::FaceNoFocus);
    }

    #[test]
    fn test_extreme_pose_disables_iris_stage() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        for (yaw, pitch) in [(-30.0, 0.0), (0.0, 35.0)] {
            let mut frame = FrameMeasurements::steady(0.3);
            if let Some(face) = frame.face.as_mut() {
                face.yaw = yaw;
                face.pitch = pitch;
            }
            let event = classify(&mut classifier, &frame, false, 0);
            assert!(!event.focus, "yaw {yaw} pitch {pitch}");
            assert!(!event.has_iris());
        }
    }

    #[test]
    fn test_no_face_short_circuits() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        let event = classify(
            &mut classifier,
            &FrameMeasurements::steady(0.3).without_face(),
            false,
            0,
        );
        assert!(!event.face_detected);
        assert!(event.head_yaw.is_none());
        assert!(!event.focus);
        assert_eq!(classifier.state().stage, GazeStage::NoFace);
    }

    #[test]
    fn test_blink_skips_iris_but_advances_state() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        let frame = FrameMeasurements::steady(0.3);
        classify(&mut classifier, &frame, false, 0);

        let blink = classify(&mut classifier, &frame, true, FRAME_MS);
        assert!(blink.focus);
        assert!(blink.blink_detected);
        assert!(!blink.has_iris());
        assert_eq!(blink.movement_type, MovementType::None);
        assert_eq!(classifier.state().previous_timestamp, Some(at(FRAME_MS)));
        assert_eq!(classifier.state().stage, GazeStage::FocusedBlinkClosed);

        // Prior frame had no centroid, so no velocity yet
        let after = classify(&mut classifier, &frame.clone().shift_irises(50.0), false, 2 * FRAME_MS);
        assert_eq!(after.movement_type, MovementType::None);
    }

    #[test]
    fn test_eyes_are_located_independently() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        let mut frame = FrameMeasurements::steady(0.3);
        frame.right_iris = None;

        let event = classify(&mut classifier, &frame, false, 0);
        assert!(event.iris_centroid_left.is_some());
        assert!(event.iris_centroid_right.is_none());
    }

    #[test]
    fn test_vision_error_leaves_state_untouched() {
        let mut classifier = GazeClassifier::new(GazeConfig::default());
        classify(&mut classifier, &FrameMeasurements::steady(0.3), false, 0);
        let before = classifier.state().clone();

        let mut broken = FrameMeasurements::steady(0.3);
        broken.height = 0;
        let result = classifier.classify(
            &ReplayBackend::new(),
            &broken,
            &RenderFlags::default(),
            false,
            at(FRAME_MS),
        );
        assert!(result.is_err());
        assert_eq!(classifier.state(), &before);
    }

    #[test]
    fn test_movement_classifier_needs_elapsed_time() {
        let classifier = MovementClassifier::new(0.2);
        let mut state = GazeState::default();
        let p = Some(Point::new(10.0, 10.0));

        classifier.update(&mut state, p, None, (640, 480), at(0));
        // Same timestamp: no velocity
        let reading = classifier.update(&mut state, p, None, (640, 480), at(0));
        assert_eq!(reading.movement, MovementType::None);
    }
}
