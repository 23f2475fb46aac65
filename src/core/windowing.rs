//! Frame buffering and window materialisation.
//!
//! Frames are appended in capture order and held for `2 × time_window`.
//! A [`Window`] is a borrowed, time-ordered view over the buffered samples
//! between two instants; it is computed on demand, never stored.
//!
//! Raw payloads live shorter than sample metadata: once a center frame has
//! been handed to the classifier its payload is released, while its
//! timestamp and EAR stay available to later windows until eviction.

use crate::ingest::{FrameMode, RenderFlags, ScreenPoint};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// One buffered frame.
#[derive(Debug)]
pub struct FrameSample<F> {
    timestamp: DateTime<Utc>,
    eye_aspect_ratio: Option<f64>,
    screen_gaze: Option<ScreenPoint>,
    render: RenderFlags,
    mode: FrameMode,
    payload: Option<Arc<F>>,
}

impl<F> FrameSample<F> {
    pub fn new(timestamp: DateTime<Utc>, eye_aspect_ratio: Option<f64>, payload: F) -> Self {
        Self {
            timestamp,
            eye_aspect_ratio,
            screen_gaze: None,
            render: RenderFlags::default(),
            mode: FrameMode::Reading,
            payload: Some(Arc::new(payload)),
        }
    }

    /// A sample whose payload is already shared with other owners.
    pub fn from_shared(
        timestamp: DateTime<Utc>,
        eye_aspect_ratio: Option<f64>,
        payload: Arc<F>,
    ) -> Self {
        Self {
            timestamp,
            eye_aspect_ratio,
            screen_gaze: None,
            render: RenderFlags::default(),
            mode: FrameMode::Reading,
            payload: Some(payload),
        }
    }

    /// A sample carrying only metadata.
    pub fn without_payload(timestamp: DateTime<Utc>, eye_aspect_ratio: Option<f64>) -> Self {
        Self {
            timestamp,
            eye_aspect_ratio,
            screen_gaze: None,
            render: RenderFlags::default(),
            mode: FrameMode::Reading,
            payload: None,
        }
    }

    pub fn with_side_channel(mut self, screen_gaze: Option<ScreenPoint>, render: RenderFlags) -> Self {
        self.screen_gaze = screen_gaze;
        self.render = render;
        self
    }

    pub fn with_mode(mut self, mode: FrameMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn eye_aspect_ratio(&self) -> Option<f64> {
        self.eye_aspect_ratio
    }

    pub fn screen_gaze(&self) -> Option<ScreenPoint> {
        self.screen_gaze
    }

    pub fn render(&self) -> RenderFlags {
        self.render
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Shared handle to the raw frame, if it has not been released.
    pub fn payload(&self) -> Option<Arc<F>> {
        self.payload.clone()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

/// Buffer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BufferError {
    /// Timestamp does not advance past the last appended sample.
    #[error("invalid sample at {timestamp}: not after last appended sample at {last}")]
    InvalidSample {
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

/// A time-ordered view over buffered samples with
/// `start <= timestamp <= end`.
#[derive(Debug)]
pub struct Window<'a, F> {
    /// Start time of the window
    pub start: DateTime<Utc>,
    /// End time of the window (inclusive)
    pub end: DateTime<Utc>,
    samples: Vec<&'a FrameSample<F>>,
}

impl<'a, F> Window<'a, F> {
    pub fn samples(&self) -> &[&'a FrameSample<F>] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The sample at the count midpoint, `samples[len / 2]`.
    ///
    /// Selection is by sample count, not elapsed time, so irregular frame
    /// spacing shifts the center away from the temporal midpoint.
    pub fn center(&self) -> Option<&'a FrameSample<F>> {
        self.samples.get(self.samples.len() / 2).copied()
    }

    /// `(timestamp, EAR)` pairs in order, EAR absent where unknown.
    pub fn ear_series(&self) -> Vec<(DateTime<Utc>, Option<f64>)> {
        self.samples
            .iter()
            .map(|s| (s.timestamp, s.eye_aspect_ratio))
            .collect()
    }
}

/// Append-only, time-ordered store of recent frames for one stream.
#[derive(Debug)]
pub struct FrameBuffer<F> {
    samples: VecDeque<FrameSample<F>>,
    /// Last accepted timestamp; survives eviction so ordering is enforced
    /// for the lifetime of the stream
    last_timestamp: Option<DateTime<Utc>>,
}

impl<F> Default for FrameBuffer<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> FrameBuffer<F> {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            last_timestamp: None,
        }
    }

    /// Check whether a sample at `timestamp` would be accepted.
    pub fn accepts(&self, timestamp: DateTime<Utc>) -> Result<(), BufferError> {
        match self.last_timestamp {
            Some(last) if timestamp <= last => Err(BufferError::InvalidSample { timestamp, last }),
            _ => Ok(()),
        }
    }

    /// Append a sample. Timestamps must strictly increase; a rejected
    /// sample leaves the buffer unchanged.
    pub fn append(&mut self, sample: FrameSample<F>) -> Result<(), BufferError> {
        self.accepts(sample.timestamp)?;
        self.last_timestamp = Some(sample.timestamp);
        self.samples.push_back(sample);
        Ok(())
    }

    /// Whether any sample is strictly older than `timestamp`.
    pub fn exists_before(&self, timestamp: DateTime<Utc>) -> bool {
        self.samples
            .front()
            .is_some_and(|s| s.timestamp < timestamp)
    }

    /// Samples with `start <= timestamp <= end`, oldest first.
    pub fn range_inclusive(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Window<'_, F> {
        let from = self.samples.partition_point(|s| s.timestamp < start);
        let to = self.samples.partition_point(|s| s.timestamp <= end);
        let samples = if from < to {
            self.samples.range(from..to).collect()
        } else {
            Vec::new()
        };
        Window {
            start,
            end,
            samples,
        }
    }

    /// Drop every sample older than `timestamp`. Returns how many were
    /// removed; calling it with nothing to evict is a no-op.
    pub fn evict_before(&mut self, timestamp: DateTime<Utc>) -> usize {
        let count = self.samples.partition_point(|s| s.timestamp < timestamp);
        self.samples.drain(..count);
        count
    }

    /// Release the raw payload of the sample at `timestamp`, keeping its
    /// metadata. Returns whether a payload was released.
    pub fn release_payload(&mut self, timestamp: DateTime<Utc>) -> bool {
        let idx = self.samples.partition_point(|s| s.timestamp < timestamp);
        match self.samples.get_mut(idx) {
            Some(sample) if sample.timestamp == timestamp => sample.payload.take().is_some(),
            _ => false,
        }
    }

    /// Release every retained payload. Returns how many were released.
    pub fn release_all_payloads(&mut self) -> usize {
        self.samples
            .iter_mut()
            .filter_map(|s| s.payload.take())
            .count()
    }

    /// Number of buffered samples still holding a payload.
    pub fn retained_payloads(&self) -> usize {
        self.samples.iter().filter(|s| s.has_payload()).count()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    fn filled(timestamps: &[i64]) -> FrameBuffer<i64> {
        let mut buffer = FrameBuffer::new();
        for &ms in timestamps {
            buffer
                .append(FrameSample::new(at(ms), Some(0.3), ms))
                .unwrap();
        }
        buffer
    }

    #[test]
    fn test_range_preserves_order() {
        let stamps: Vec<i64> = (0..20).map(|i| i * 33).collect();
        let buffer = filled(&stamps);

        let window = buffer.range_inclusive(at(0), at(10_000));
        let got: Vec<i64> = window
            .samples()
            .iter()
            .map(|s| s.timestamp().timestamp_millis())
            .collect();
        assert_eq!(got, stamps);
    }

    #[test]
    fn test_range_is_inclusive_on_both_ends() {
        let buffer = filled(&[0, 100, 200, 300]);
        let window = buffer.range_inclusive(at(100), at(200));
        assert_eq!(window.len(), 2);
        let ends: Vec<i64> = window
            .samples()
            .iter()
            .map(|s| s.timestamp().timestamp_millis())
            .collect();
        assert_eq!(ends, vec![100, 200]);
    }

    #[test]
    fn test_non_increasing_timestamp_is_rejected() {
        let mut buffer = filled(&[0, 100]);

        let duplicate = buffer.append(FrameSample::new(at(100), None, 1));
        assert!(matches!(duplicate, Err(BufferError::InvalidSample { .. })));

        let older = buffer.append(FrameSample::new(at(50), None, 1));
        assert!(older.is_err());

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.last_timestamp(), Some(at(100)));
    }

    #[test]
    fn test_ordering_survives_eviction() {
        let mut buffer = filled(&[0, 100]);
        buffer.evict_before(at(1_000));
        assert!(buffer.is_empty());
        assert!(buffer.append(FrameSample::new(at(100), None, 0)).is_err());
        assert!(buffer.append(FrameSample::new(at(101), None, 0)).is_ok());
    }

    #[test]
    fn test_evict_before_clears_older_only() {
        let mut buffer = filled(&[0, 100, 200, 300]);
        assert_eq!(buffer.evict_before(at(200)), 2);

        assert!(buffer.range_inclusive(at(0), at(199)).is_empty());
        assert_eq!(buffer.range_inclusive(at(200), at(300)).len(), 2);

        // Idempotent
        assert_eq!(buffer.evict_before(at(200)), 0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_exists_before() {
        let buffer = filled(&[100, 200]);
        assert!(!buffer.exists_before(at(100)));
        assert!(buffer.exists_before(at(101)));

        let empty: FrameBuffer<i64> = FrameBuffer::new();
        assert!(!empty.exists_before(at(1_000)));
    }

    #[test]
    fn test_center_is_count_midpoint() {
        let buffer = filled(&[0, 10, 20, 500]);
        let window = buffer.range_inclusive(at(0), at(500));
        // Four samples: index 2, regardless of the uneven spacing
        assert_eq!(window.center().unwrap().timestamp(), at(20));
    }

    #[test]
    fn test_release_payload_keeps_metadata() {
        let mut buffer = filled(&[0, 100, 200]);
        assert!(buffer.release_payload(at(100)));
        assert!(!buffer.release_payload(at(100)));
        assert!(!buffer.release_payload(at(150)));

        let window = buffer.range_inclusive(at(100), at(100));
        let sample = window.center().unwrap();
        assert!(!sample.has_payload());
        assert_eq!(sample.eye_aspect_ratio(), Some(0.3));
        assert_eq!(buffer.retained_payloads(), 2);

        assert_eq!(buffer.release_all_payloads(), 2);
        assert_eq!(buffer.retained_payloads(), 0);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_ear_series_keeps_missing_values() {
        let mut buffer = FrameBuffer::new();
        buffer
            .append(FrameSample::new(at(0), Some(0.3), ()))
            .unwrap();
        buffer.append(FrameSample::new(at(33), None, ())).unwrap();

        let series = buffer.range_inclusive(at(0), at(33)).ear_series();
        assert_eq!(series, vec![(at(0), Some(0.3)), (at(33), None)]);
    }
}
