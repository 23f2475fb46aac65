//! Frame ingress for the Gaze Event Agent.
//!
//! The transport itself lives outside this crate; this module only defines
//! what a delivered frame looks like.

pub mod types;

// Re-export commonly used types
pub use types::{FrameMessage, FrameMode, RenderFlags, ScreenPoint};
