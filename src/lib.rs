//! Gaze Event Agent - windowed eye-state classification for webcam frames.
//!
//! This library turns a stream of timestamped camera frames into gaze
//! events: whether the eyes blinked, whether the head was still and frontal
//! enough to track, and whether the irises were fixating or in a saccade.
//!
//! # Windowed Classification
//!
//! - **Delayed**: each frame is classified once the frames on both sides of
//!   it have arrived, so a blink can be told apart from a sustained closure
//! - **Ordered**: events leave a stream in capture-time order
//! - **Bounded**: at most `2 × time_window` of frames is held per stream, and
//!   raw frames are released as soon as they have been classified
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Gaze Event Agent                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │   Ingest    │──▶│  Windowing  │──▶│    Blink    │        │
//! │  │  (frames)   │   │ (2 × window)│   │  (EAR dip)  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │                                              │              │
//! │                                              ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐        │
//! │  │    Sink     │◀────────────────────│    Gaze     │        │
//! │  │  (events)   │                     │ (face/iris) │        │
//! │  └─────────────┘                     └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gaze_event_agent::{
//!     config::PipelineConfig, ingest::FrameMessage, pipeline::spawn_stream,
//!     sink::MemorySink, vision::{FrameMeasurements, ReplayBackend},
//! };
//!
//! # async fn demo() -> Result<(), gaze_event_agent::pipeline::PipelineError> {
//! let sink = MemorySink::new();
//! let stream = spawn_stream(PipelineConfig::default(), ReplayBackend::new(), sink.clone())?;
//!
//! for i in 0..90 {
//!     stream.push(FrameMessage::new(i * 33, FrameMeasurements::steady(0.3))).await?;
//! }
//! let summary = stream.finish().await?;
//! assert_eq!(summary.events_emitted as usize, sink.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod ingest;
pub mod pipeline;
pub mod sink;
pub mod stats;
pub mod vision;

// Re-export key types at crate root for convenience
pub use config::{BlinkConfig, Config, ConfigError, GazeConfig, PipelineConfig};
pub use crate::core::{
    BlinkDetector, FrameBuffer, GazeClassifier, GazeEvent, KeyedGazeEvent, MovementType, StreamId,
};
pub use ingest::FrameMessage;
pub use pipeline::{spawn_stream, PipelineError, StreamHandle, StreamSummary, WindowedPipeline};
pub use sink::{EventSink, JsonlSink, MemorySink, SinkError};
pub use stats::{PipelineStats, SharedStats};
pub use vision::{ReplayBackend, VisionBackend, VisionError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
