//! Core classification for the Gaze Event Agent.
//!
//! This module contains:
//! - Frame buffering and window materialisation
//! - Windowed blink detection
//! - Face gating and fixation/saccade classification
//! - The emitted event types

pub mod blink;
pub mod event;
pub mod gaze;
pub mod windowing;

// Re-export commonly used types
pub use blink::{BlinkDetector, BlinkDip};
pub use event::{GazeEvent, KeyedGazeEvent, MovementType, StreamId};
pub use gaze::{GazeClassifier, GazeStage, GazeState, MovementClassifier, MovementReading};
pub use windowing::{BufferError, FrameBuffer, FrameSample, Window};
