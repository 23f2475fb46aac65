//! Numeric vision collaborators.
//!
//! Landmark fitting, eye-aspect-ratio computation and iris localisation are
//! black boxes to the classification core. They are reached through
//! [`VisionBackend`]; an `Err` from any method means the routine choked on
//! its input, while "nothing found" is an ordinary `Ok(None)` or a
//! [`FaceObservation`] with `detected == false`.
//!
//! The shipped backend, [`ReplayBackend`], replays measurements that an
//! upstream landmark model already attached to each frame.

use crate::ingest::RenderFlags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A pixel position in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned eye bounding box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl EyeRegion {
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// Output of the face/pose routine for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceObservation {
    pub detected: bool,
    pub left_eye: Option<EyeRegion>,
    pub right_eye: Option<EyeRegion>,
    /// Eye-region landmark displacement since the previous frame, normalised
    /// by face size
    pub eye_speed: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl FaceObservation {
    /// No face in frame.
    pub fn missing() -> Self {
        Self::default()
    }
}

/// A numeric routine failed on malformed input.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VisionError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("{routine} failed: {reason}")]
    Routine {
        routine: &'static str,
        reason: String,
    },
}

/// The EAR, face and iris routines the classifier depends on.
///
/// Implementations must be callable from blocking worker threads.
pub trait VisionBackend: Send + Sync + 'static {
    /// Decoded frame payload the routines operate on.
    type Frame: Send + Sync + 'static;

    /// Frame dimensions in pixels (width, height).
    fn frame_size(&self, frame: &Self::Frame) -> (u32, u32);

    fn compute_ear(&self, frame: &Self::Frame) -> Result<Option<f64>, VisionError>;

    fn detect_face(
        &self,
        frame: &Self::Frame,
        render: &RenderFlags,
    ) -> Result<FaceObservation, VisionError>;

    fn locate_iris(
        &self,
        frame: &Self::Frame,
        eye: &EyeRegion,
    ) -> Result<Option<Point>, VisionError>;
}

/// Head pose and eye geometry as measured by an upstream landmark model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMeasurement {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    #[serde(default)]
    pub eye_speed: f64,
    pub left_eye: Option<EyeRegion>,
    pub right_eye: Option<EyeRegion>,
}

/// Everything the upstream model extracted from one camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMeasurements {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub ear: Option<f64>,
    #[serde(default)]
    pub face: Option<FaceMeasurement>,
    #[serde(default)]
    pub left_iris: Option<Point>,
    #[serde(default)]
    pub right_iris: Option<Point>,
}

/// Eye boxes used by [`FrameMeasurements::steady`].
const STEADY_LEFT_EYE: EyeRegion = EyeRegion {
    x: 170.0,
    y: 200.0,
    width: 120.0,
    height: 30.0,
};
const STEADY_RIGHT_EYE: EyeRegion = EyeRegion {
    x: 350.0,
    y: 200.0,
    width: 120.0,
    height: 30.0,
};

impl FrameMeasurements {
    /// A 640×480 frame with a still, frontal face, open eyes and both irises
    /// centred in their eye boxes.
    pub fn steady(ear: f64) -> Self {
        Self {
            width: 640,
            height: 480,
            ear: Some(ear),
            face: Some(FaceMeasurement {
                yaw: 0.0,
                pitch: 0.0,
                roll: 0.0,
                eye_speed: 0.0,
                left_eye: Some(STEADY_LEFT_EYE),
                right_eye: Some(STEADY_RIGHT_EYE),
            }),
            left_iris: Some(Point::new(230.0, 215.0)),
            right_iris: Some(Point::new(410.0, 215.0)),
        }
    }

    /// Same frame with no face found.
    pub fn without_face(mut self) -> Self {
        self.face = None;
        self.left_iris = None;
        self.right_iris = None;
        self
    }

    /// Shift both irises horizontally by `dx` pixels.
    pub fn shift_irises(mut self, dx: f64) -> Self {
        for iris in [&mut self.left_iris, &mut self.right_iris].into_iter().flatten() {
            iris.x += dx;
        }
        self
    }
}

/// Replays pre-extracted [`FrameMeasurements`].
///
/// With `mirror` set, x coordinates are reflected about the frame centre,
/// matching a selfie-view camera.
#[derive(Debug, Clone, Default)]
pub struct ReplayBackend {
    mirror: bool,
}

impl ReplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mirrored() -> Self {
        Self { mirror: true }
    }

    fn check(frame: &FrameMeasurements) -> Result<(), VisionError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(VisionError::MalformedFrame(format!(
                "frame has zero area ({}x{})",
                frame.width, frame.height
            )));
        }
        Ok(())
    }

    fn mirror_region(&self, frame: &FrameMeasurements, region: EyeRegion) -> EyeRegion {
        if !self.mirror {
            return region;
        }
        EyeRegion {
            x: frame.width as f64 - (region.x + region.width),
            ..region
        }
    }

    fn mirror_point(&self, frame: &FrameMeasurements, point: Point) -> Point {
        if !self.mirror {
            return point;
        }
        Point::new(frame.width as f64 - point.x, point.y)
    }
}

impl VisionBackend for ReplayBackend {
    type Frame = FrameMeasurements;

    fn frame_size(&self, frame: &FrameMeasurements) -> (u32, u32) {
        (frame.width, frame.height)
    }

    fn compute_ear(&self, frame: &FrameMeasurements) -> Result<Option<f64>, VisionError> {
        Self::check(frame)?;
        match frame.ear {
            Some(ear) if !ear.is_finite() => Err(VisionError::Routine {
                routine: "compute_ear",
                reason: format!("non-finite EAR {ear}"),
            }),
            other => Ok(other),
        }
    }

    fn detect_face(
        &self,
        frame: &FrameMeasurements,
        _render: &RenderFlags,
    ) -> Result<FaceObservation, VisionError> {
        Self::check(frame)?;
        let Some(face) = &frame.face else {
            return Ok(FaceObservation::missing());
        };

        Ok(FaceObservation {
            detected: true,
            left_eye: face.left_eye.map(|r| self.mirror_region(frame, r)),
            right_eye: face.right_eye.map(|r| self.mirror_region(frame, r)),
            eye_speed: face.eye_speed,
            yaw: face.yaw,
            pitch: face.pitch,
            roll: face.roll,
        })
    }

    fn locate_iris(
        &self,
        frame: &FrameMeasurements,
        eye: &EyeRegion,
    ) -> Result<Option<Point>, VisionError> {
        Self::check(frame)?;
        let found = [frame.left_iris, frame.right_iris]
            .into_iter()
            .flatten()
            .map(|p| self.mirror_point(frame, p))
            .find(|p| eye.contains(*p));
        Ok(found)
    }
}
