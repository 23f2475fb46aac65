//! Synchronous windowing core.
//!
//! [`WindowedPipeline`] owns a stream's [`FrameBuffer`] and decides, for each
//! appended frame, whether a center frame is ready. Classification itself is
//! done by [`classify_center`], which the async runtime runs on a blocking
//! worker and which can also be called inline.

use crate::config::{ConfigError, PipelineConfig};
use crate::core::{
    BlinkDetector, BufferError, FrameBuffer, FrameSample, GazeClassifier, GazeEvent,
};
use crate::ingest::{FrameMode, RenderFlags, ScreenPoint};
use crate::vision::{VisionBackend, VisionError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Everything the classifier needs about one center frame.
///
/// Built while the buffer is borrowed, then handed off so the buffer can
/// keep accepting frames while the job waits for the worker.
#[derive(Debug)]
pub struct CenterJob<F> {
    pub timestamp: DateTime<Utc>,
    /// The window's `(timestamp, EAR)` series
    pub ear_series: Vec<(DateTime<Utc>, Option<f64>)>,
    pub eye_aspect_ratio: Option<f64>,
    pub screen_gaze: Option<ScreenPoint>,
    pub render: RenderFlags,
    pub mode: FrameMode,
    /// `None` if the payload was gone when the window was materialised
    pub payload: Option<Arc<F>>,
}

impl<F> CenterJob<F> {
    /// Event for a center that could not be classified. Keeps the blink
    /// flag and the side-channel fields.
    pub fn unclassified(&self, blink_detected: bool) -> GazeEvent {
        let mut event = GazeEvent::unclassified(self.timestamp, blink_detected);
        event.eye_aspect_ratio = self.eye_aspect_ratio;
        event.screen_gaze = self.screen_gaze;
        event
    }
}

/// How a center frame was turned into an event.
#[derive(Debug, Clone, PartialEq)]
pub enum CenterOutcome {
    Classified,
    /// Payload was already released; the event carries the blink flag only
    MissingPayload,
    /// A vision routine failed; the event carries the blink flag only
    ComputationError(VisionError),
}

/// Per-stream buffer and window bookkeeping.
#[derive(Debug)]
pub struct WindowedPipeline<F> {
    buffer: FrameBuffer<F>,
    span: Duration,
    last_center: Option<DateTime<Utc>>,
}

impl<F> WindowedPipeline<F> {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            buffer: FrameBuffer::new(),
            span: config.buffer_span(),
            last_center: None,
        })
    }

    /// Check a timestamp against the buffer's ordering rule without
    /// appending anything.
    pub fn accepts(&self, timestamp: DateTime<Utc>) -> Result<(), BufferError> {
        self.buffer.accepts(timestamp)
    }

    /// Append one frame and return the center frame it makes ready, if any.
    ///
    /// Nothing is emitted until the buffer holds a sample older than
    /// `timestamp - 2 × time_window`. A center is returned at most once and
    /// centers come out in increasing time order. The center's payload is
    /// released from the buffer as it is handed out, and samples older than
    /// the window start are evicted afterwards.
    pub fn ingest(&mut self, sample: FrameSample<F>) -> Result<Option<CenterJob<F>>, BufferError> {
        let now = sample.timestamp();
        self.buffer.append(sample)?;

        let window_start = now - self.span;
        if !self.buffer.exists_before(window_start) {
            return Ok(None);
        }

        let job = {
            let window = self.buffer.range_inclusive(window_start, now);
            window
                .center()
                .filter(|center| self.last_center.map_or(true, |last| center.timestamp() > last))
                .map(|center| CenterJob {
                    timestamp: center.timestamp(),
                    ear_series: window.ear_series(),
                    eye_aspect_ratio: center.eye_aspect_ratio(),
                    screen_gaze: center.screen_gaze(),
                    render: center.render(),
                    mode: center.mode(),
                    payload: center.payload(),
                })
        };

        if let Some(job) = &job {
            self.last_center = Some(job.timestamp);
            self.buffer.release_payload(job.timestamp);
        }
        self.buffer.evict_before(window_start);

        Ok(job)
    }

    /// Drop every buffered payload. Used on stream end and cancellation.
    pub fn release_all_payloads(&mut self) -> usize {
        self.buffer.release_all_payloads()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn retained_payloads(&self) -> usize {
        self.buffer.retained_payloads()
    }

    pub fn last_center(&self) -> Option<DateTime<Utc>> {
        self.last_center
    }
}

/// Run blink detection and gaze classification for one center frame.
///
/// Always produces an event. A missing payload or a failing vision routine
/// yields an unclassified event that still carries the blink flag.
pub fn classify_center<B: VisionBackend>(
    backend: &B,
    classifier: &mut GazeClassifier,
    detector: &BlinkDetector,
    job: &CenterJob<B::Frame>,
) -> (GazeEvent, CenterOutcome) {
    let blink = detector.detect(&job.ear_series, job.timestamp);

    let Some(frame) = &job.payload else {
        return (job.unclassified(blink), CenterOutcome::MissingPayload);
    };
    match classifier.classify(backend, frame, &job.render, blink, job.timestamp) {
        Ok(mut event) => {
            event.eye_aspect_ratio = job.eye_aspect_ratio;
            event.screen_gaze = job.screen_gaze;
            (event, CenterOutcome::Classified)
        }
        Err(e) => (job.unclassified(blink), CenterOutcome::ComputationError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MovementType;
    use crate::vision::{FrameMeasurements, ReplayBackend};

    const FRAME_MS: i64 = 33;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    fn sample(i: i64, frame: FrameMeasurements) -> FrameSample<FrameMeasurements> {
        let ear = frame.ear;
        FrameSample::new(at(i * FRAME_MS), ear, frame)
    }

    fn pipeline() -> WindowedPipeline<FrameMeasurements> {
        WindowedPipeline::new(&PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_no_center_until_history_exists() {
        let mut pipeline = pipeline();
        // 0..=30 spans exactly 990ms, all inside the first 1000ms
        for i in 0..=30 {
            let job = pipeline
                .ingest(sample(i, FrameMeasurements::steady(0.3)))
                .unwrap();
            assert!(job.is_none(), "frame {i} produced a center");
        }

        let job = pipeline
            .ingest(sample(31, FrameMeasurements::steady(0.3)))
            .unwrap()
            .expect("center once history exists");
        assert!(job.timestamp < at(31 * FRAME_MS));
        assert!(job.payload.is_some());
    }

    #[test]
    fn test_center_job_carries_frame_mode() {
        let mut pipeline = pipeline();
        let mut job = None;
        for i in 0..=31 {
            let mode = if i == 16 { FrameMode::Diagnostic } else { FrameMode::Reading };
            job = pipeline
                .ingest(sample(i, FrameMeasurements::steady(0.3)).with_mode(mode))
                .unwrap();
        }

        let job = job.expect("center at frame 31");
        assert_eq!(job.timestamp, at(16 * FRAME_MS));
        assert_eq!(job.mode, FrameMode::Diagnostic);
    }

    #[test]
    fn test_centers_advance_and_payloads_are_released() {
        let mut pipeline = pipeline();
        let mut centers = Vec::new();
        for i in 0..60 {
            if let Some(job) = pipeline
                .ingest(sample(i, FrameMeasurements::steady(0.3)))
                .unwrap()
            {
                centers.push(job.timestamp);
            }
        }

        assert!(!centers.is_empty());
        assert!(centers.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(pipeline.last_center(), centers.last().copied());
        // Centers handed out no longer hold a payload in the buffer
        assert!(pipeline.retained_payloads() < pipeline.buffered());
    }

    #[test]
    fn test_buffer_stays_bounded() {
        let mut pipeline = pipeline();
        for i in 0..300 {
            pipeline
                .ingest(sample(i, FrameMeasurements::steady(0.3)))
                .unwrap();
        }
        // 2 × 500ms at 33ms per frame, plus the inclusive end
        assert!(pipeline.buffered() <= 32);
    }

    #[test]
    fn test_out_of_order_frame_is_rejected() {
        let mut pipeline = pipeline();
        pipeline
            .ingest(sample(5, FrameMeasurements::steady(0.3)))
            .unwrap();
        let err = pipeline
            .ingest(sample(5, FrameMeasurements::steady(0.3)))
            .unwrap_err();
        assert!(matches!(err, BufferError::InvalidSample { .. }));
        assert_eq!(pipeline.buffered(), 1);
    }

    #[test]
    fn test_release_all_payloads() {
        let mut pipeline = pipeline();
        for i in 0..10 {
            pipeline
                .ingest(sample(i, FrameMeasurements::steady(0.3)))
                .unwrap();
        }
        assert_eq!(pipeline.release_all_payloads(), 10);
        assert_eq!(pipeline.retained_payloads(), 0);
    }

    #[test]
    fn test_classify_center_steady_frame() {
        let backend = ReplayBackend::new();
        let mut classifier = GazeClassifier::new(Default::default());
        let detector = BlinkDetector::default();
        let mut pipeline = pipeline();

        let mut events = Vec::new();
        for i in 0..40 {
            let frame = FrameMeasurements::steady(0.3);
            let message = sample(i, frame)
                .with_side_channel(Some(ScreenPoint { x: 10.0, y: 20.0 }), RenderFlags::default());
            if let Some(job) = pipeline.ingest(message).unwrap() {
                let (event, outcome) = classify_center(&backend, &mut classifier, &detector, &job);
                assert_eq!(outcome, CenterOutcome::Classified);
                events.push(event);
            }
        }

        assert!(!events.is_empty());
        for event in &events {
            assert!(!event.blink_detected);
            assert!(event.focus);
            assert_eq!(event.eye_aspect_ratio, Some(0.3));
            assert_eq!(event.screen_gaze, Some(ScreenPoint { x: 10.0, y: 20.0 }));
        }
        // First event has no previous centroid; the rest are still irises
        assert_eq!(events[0].movement_type, MovementType::None);
        assert!(events[1..]
            .iter()
            .all(|e| e.movement_type == MovementType::Fixation));
    }

    #[test]
    fn test_missing_payload_still_emits_blink_flag() {
        let backend = ReplayBackend::new();
        let mut classifier = GazeClassifier::new(Default::default());
        let detector = BlinkDetector::default();
        let mut pipeline: WindowedPipeline<FrameMeasurements> = pipeline();

        // Open eyes with a three-frame dip that the first center lands in
        let closed = [14, 15, 16];
        let mut job = None;
        for i in 0..=31 {
            let ear = if closed.contains(&i) { 0.02 } else { 0.3 };
            let s = FrameSample::without_payload(at(i * FRAME_MS), Some(ear));
            job = pipeline.ingest(s).unwrap();
        }

        let job = job.expect("center at frame 31");
        let (event, outcome) = classify_center(&backend, &mut classifier, &detector, &job);
        assert_eq!(outcome, CenterOutcome::MissingPayload);
        assert!(event.blink_detected);
        assert!(!event.face_detected);
        assert_eq!(event.movement_type, MovementType::None);
    }

    #[test]
    fn test_vision_failure_yields_unclassified_event() {
        let backend = ReplayBackend::new();
        let mut classifier = GazeClassifier::new(Default::default());
        let detector = BlinkDetector::default();

        let mut broken = FrameMeasurements::steady(0.3);
        broken.height = 0;
        let job = CenterJob {
            timestamp: at(0),
            ear_series: vec![(at(0), Some(0.3))],
            eye_aspect_ratio: Some(0.3),
            screen_gaze: None,
            render: RenderFlags::default(),
            mode: FrameMode::Reading,
            payload: Some(Arc::new(broken)),
        };

        let (event, outcome) = classify_center(&backend, &mut classifier, &detector, &job);
        assert!(matches!(outcome, CenterOutcome::ComputationError(_)));
        assert!(!event.face_detected);
        assert_eq!(event.eye_aspect_ratio, Some(0.3));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = PipelineConfig::default();
        config.time_window = std::time::Duration::ZERO;
        assert!(WindowedPipeline::<FrameMeasurements>::new(&config).is_err());
    }
}
