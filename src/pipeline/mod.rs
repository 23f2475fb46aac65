//! Per-stream orchestration.
//!
//! [`WindowedPipeline`] is the synchronous buffer/window core;
//! [`spawn_stream`] wraps it in an async runtime with a frame queue, a
//! classifier worker and cancellation.

pub mod stream;
pub mod windowed;

pub use stream::{
    spawn_stream, spawn_stream_with_stats, PipelineError, StreamCanceller, StreamHandle,
    StreamSummary,
};
pub use windowed::{classify_center, CenterJob, CenterOutcome, WindowedPipeline};
