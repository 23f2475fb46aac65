//! Async per-stream runtime.
//!
//! Each stream runs two tasks:
//!
//! ```text
//!  push() ──▶ [frame queue] ──▶ ingest task ──▶ [job queue] ──▶ classifier worker ──▶ sink
//!                                 │  EAR on a                     │  blink + gaze on a
//!                                 │  blocking thread              │  blocking thread
//!                                 ▼                               ▼
//!                           FrameBuffer                      GazeState
//! ```
//!
//! The ingest task keeps appending while the worker is busy. The worker
//! takes jobs in order and owns the classifier, so gaze state is mutated by
//! one job at a time and events reach the sink in center-timestamp order.
//!
//! Both queues hold at most `frame_queue_capacity` entries. A worker that
//! falls behind fills the job queue, which parks the ingest task, which in
//! turn makes `push` wait.
//!
//! Diagnostic frames are windowed and classified like any other, but their
//! events are counted instead of delivered.

use super::windowed::{classify_center, CenterJob, CenterOutcome, WindowedPipeline};
use crate::config::{ConfigError, GazeConfig, PipelineConfig};
use crate::core::{BlinkDetector, FrameSample, GazeClassifier, KeyedGazeEvent, StreamId};
use crate::ingest::FrameMessage;
use crate::sink::EventSink;
use crate::stats::{create_shared_stats, SharedStats};
use crate::vision::VisionBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Errors surfaced by the stream runtime.
///
/// Per-frame problems never appear here; they are logged, counted and the
/// stream keeps going.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("stream is no longer accepting frames")]
    StreamClosed,

    #[error("frame queue is full")]
    QueueFull,

    #[error("stream task failed: {0}")]
    Join(String),
}

/// What a stream did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: Option<StreamId>,
    pub frames_accepted: u64,
    pub frames_rejected: u64,
    pub centers_dispatched: u64,
    pub events_emitted: u64,
    pub lost_payloads: u64,
    pub computation_errors: u64,
    pub sink_errors: u64,
    /// Diagnostic-mode centers classified but not delivered to the sink
    pub diagnostic_withheld: u64,
    /// Payloads still buffered when the stream stopped
    pub payloads_released: u64,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct IngestReport {
    frames_accepted: u64,
    frames_rejected: u64,
    centers_dispatched: u64,
    computation_errors: u64,
    payloads_released: u64,
}

#[derive(Debug, Default)]
struct WorkerReport {
    events_emitted: u64,
    lost_payloads: u64,
    computation_errors: u64,
    sink_errors: u64,
    diagnostic_withheld: u64,
}

/// Handle to a running stream.
///
/// Dropping the handle closes the frame queue; the stream then drains on
/// its own as if [`StreamHandle::finish`] had been called.
pub struct StreamHandle<F> {
    stream_id: StreamId,
    frames: mpsc::Sender<FrameMessage<F>>,
    cancel: Arc<watch::Sender<bool>>,
    ingest: JoinHandle<IngestReport>,
    worker: JoinHandle<WorkerReport>,
}

impl<F: Send + Sync + 'static> StreamHandle<F> {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Queue a frame, waiting while the frame queue is full.
    pub async fn push(&self, message: FrameMessage<F>) -> Result<(), PipelineError> {
        self.frames
            .send(message)
            .await
            .map_err(|_| PipelineError::StreamClosed)
    }

    /// Queue a frame without waiting.
    pub fn try_push(&self, message: FrameMessage<F>) -> Result<(), PipelineError> {
        self.frames.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PipelineError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PipelineError::StreamClosed,
        })
    }

    /// Stop accepting frames, classify everything already queued and wait
    /// for the sink to be flushed.
    pub async fn finish(self) -> Result<StreamSummary, PipelineError> {
        let Self {
            stream_id,
            frames,
            cancel,
            ingest,
            worker,
        } = self;
        drop(frames);
        let summary = join(stream_id, ingest, worker, false).await;
        drop(cancel);
        summary
    }

    /// Abandon the stream: queued frames and jobs are dropped, buffered
    /// payloads released and any classification in flight is discarded.
    pub async fn cancel(self) -> Result<StreamSummary, PipelineError> {
        let Self {
            stream_id,
            frames,
            cancel,
            ingest,
            worker,
        } = self;
        // Receivers may already be gone if the stream finished on its own
        let _ = cancel.send(true);
        drop(frames);
        join(stream_id, ingest, worker, true).await
    }

    /// A sender that can signal cancellation from outside async code
    /// (for example a Ctrl+C handler).
    pub fn canceller(&self) -> StreamCanceller {
        StreamCanceller {
            cancel: Arc::clone(&self.cancel),
        }
    }
}

/// Cloneable cancellation trigger for a stream.
#[derive(Clone)]
pub struct StreamCanceller {
    cancel: Arc<watch::Sender<bool>>,
}

impl StreamCanceller {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

async fn join(
    stream_id: StreamId,
    ingest: JoinHandle<IngestReport>,
    worker: JoinHandle<WorkerReport>,
    cancelled: bool,
) -> Result<StreamSummary, PipelineError> {
    let ingest = ingest
        .await
        .map_err(|e| PipelineError::Join(format!("ingest task: {e}")))?;
    let worker = worker
        .await
        .map_err(|e| PipelineError::Join(format!("classifier worker: {e}")))?;

    let summary = StreamSummary {
        stream_id: Some(stream_id),
        frames_accepted: ingest.frames_accepted,
        frames_rejected: ingest.frames_rejected,
        centers_dispatched: ingest.centers_dispatched,
        events_emitted: worker.events_emitted,
        lost_payloads: worker.lost_payloads,
        computation_errors: ingest.computation_errors + worker.computation_errors,
        sink_errors: worker.sink_errors,
        diagnostic_withheld: worker.diagnostic_withheld,
        payloads_released: ingest.payloads_released,
        cancelled,
    };
    tracing::info!(
        stream_id = %stream_id,
        accepted = summary.frames_accepted,
        rejected = summary.frames_rejected,
        events = summary.events_emitted,
        cancelled,
        "stream stopped"
    );
    Ok(summary)
}

/// Start a stream with its own counters.
///
/// Must be called from within a tokio runtime. The only error is an
/// invalid configuration.
pub fn spawn_stream<B, S>(
    config: PipelineConfig,
    backend: B,
    sink: S,
) -> Result<StreamHandle<B::Frame>, PipelineError>
where
    B: VisionBackend,
    S: EventSink,
{
    spawn_stream_with_stats(config, Arc::new(backend), sink, create_shared_stats())
}

/// Start a stream that shares a backend and counters with other streams.
pub fn spawn_stream_with_stats<B, S>(
    config: PipelineConfig,
    backend: Arc<B>,
    sink: S,
    stats: SharedStats,
) -> Result<StreamHandle<B::Frame>, PipelineError>
where
    B: VisionBackend,
    S: EventSink,
{
    let pipeline = WindowedPipeline::new(&config)?;
    let stream_id = StreamId::new();

    let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue_capacity);
    // Bounded too, so a lagging worker stalls ingest and, through the frame
    // queue, push()
    let (job_tx, job_rx) = mpsc::channel(config.frame_queue_capacity);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let ingest = tokio::spawn(run_ingest(
        stream_id,
        pipeline,
        Arc::clone(&backend),
        frame_rx,
        job_tx,
        cancel_rx.clone(),
        Arc::clone(&stats),
    ));

    let worker = tokio::spawn(run_worker(
        stream_id,
        backend,
        config.gaze.clone(),
        BlinkDetector::new(config.blink.clone()),
        job_rx,
        sink,
        cancel_rx,
        stats,
    ));

    tracing::info!(
        stream_id = %stream_id,
        time_window_ms = config.time_window.as_millis() as u64,
        "stream started"
    );

    Ok(StreamHandle {
        stream_id,
        frames: frame_tx,
        cancel: Arc::new(cancel_tx),
        ingest,
        worker,
    })
}

/// Resolves once cancellation is signalled. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

async fn run_ingest<B: VisionBackend>(
    stream_id: StreamId,
    mut pipeline: WindowedPipeline<B::Frame>,
    backend: Arc<B>,
    mut frames: mpsc::Receiver<FrameMessage<B::Frame>>,
    jobs: mpsc::Sender<CenterJob<B::Frame>>,
    mut cancel: watch::Receiver<bool>,
    stats: SharedStats,
) -> IngestReport {
    let mut report = IngestReport::default();

    loop {
        let message = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            message = frames.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        stats.record_frame_received();

        let Some(timestamp) = message.captured_at() else {
            tracing::warn!(stream_id = %stream_id, timestamp = message.timestamp, "frame timestamp out of range, dropped");
            stats.record_frame_rejected();
            report.frames_rejected += 1;
            continue;
        };
        if let Err(e) = pipeline.accepts(timestamp) {
            tracing::warn!(stream_id = %stream_id, "{e}");
            stats.record_frame_rejected();
            report.frames_rejected += 1;
            continue;
        }

        let screen_gaze = message.screen_gaze();
        let render = message.render;
        let mode = message.mode;
        let frame = Arc::new(message.frame);

        let ear = {
            let backend = Arc::clone(&backend);
            let frame = Arc::clone(&frame);
            let computed = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                joined = tokio::task::spawn_blocking(move || backend.compute_ear(&frame)) => joined,
            };
            match computed {
                Ok(Ok(ear)) => ear,
                Ok(Err(e)) => {
                    tracing::warn!(stream_id = %stream_id, %timestamp, "EAR unavailable: {e}");
                    stats.record_computation_error();
                    report.computation_errors += 1;
                    None
                }
                Err(e) => {
                    tracing::warn!(stream_id = %stream_id, %timestamp, "EAR task failed: {e}");
                    stats.record_computation_error();
                    report.computation_errors += 1;
                    None
                }
            }
        };

        let sample = FrameSample::from_shared(timestamp, ear, frame)
            .with_side_channel(screen_gaze, render)
            .with_mode(mode);
        match pipeline.ingest(sample) {
            Ok(Some(job)) => {
                tracing::debug!(stream_id = %stream_id, center = %job.timestamp, "center dispatched");
                report.frames_accepted += 1;
                report.centers_dispatched += 1;
                let sent = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => break,
                    sent = jobs.send(job) => sent,
                };
                if sent.is_err() {
                    tracing::warn!(stream_id = %stream_id, "classifier worker gone, stopping ingest");
                    break;
                }
            }
            Ok(None) => report.frames_accepted += 1,
            Err(e) => {
                tracing::warn!(stream_id = %stream_id, "{e}");
                stats.record_frame_rejected();
                report.frames_rejected += 1;
            }
        }
    }

    report.payloads_released = pipeline.release_all_payloads() as u64;
    tracing::debug!(
        stream_id = %stream_id,
        released = report.payloads_released,
        "ingest stopped"
    );
    report
}

#[allow(clippy::too_many_arguments)]
async fn run_worker<B: VisionBackend, S: EventSink>(
    stream_id: StreamId,
    backend: Arc<B>,
    gaze: GazeConfig,
    detector: BlinkDetector,
    mut jobs: mpsc::Receiver<CenterJob<B::Frame>>,
    mut sink: S,
    mut cancel: watch::Receiver<bool>,
    stats: SharedStats,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    let mut classifier = GazeClassifier::new(gaze.clone());
    let detector = Arc::new(detector);

    loop {
        let job = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        if is_cancelled(&cancel) {
            break;
        }

        // The classifier moves onto the blocking thread and comes back with
        // the result, so only one job ever touches it.
        let job = Arc::new(job);
        let task = {
            let backend = Arc::clone(&backend);
            let detector = Arc::clone(&detector);
            let job = Arc::clone(&job);
            tokio::task::spawn_blocking(move || {
                let (event, outcome) = classify_center(&*backend, &mut classifier, &detector, &job);
                (classifier, event, outcome)
            })
        };
        let joined = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            joined = task => joined,
        };

        let event = match joined {
            Ok((returned, event, outcome)) => {
                classifier = returned;
                match outcome {
                    CenterOutcome::Classified => {}
                    CenterOutcome::MissingPayload => {
                        tracing::warn!(stream_id = %stream_id, center = %event.timestamp, "center payload missing");
                        stats.record_lost_payload();
                        report.lost_payloads += 1;
                    }
                    CenterOutcome::ComputationError(e) => {
                        tracing::warn!(stream_id = %stream_id, center = %event.timestamp, "classification failed: {e}");
                        stats.record_computation_error();
                        report.computation_errors += 1;
                    }
                }
                event
            }
            Err(e) => {
                // A panicking routine takes the gaze state with it
                tracing::error!(stream_id = %stream_id, center = %job.timestamp, "classification task failed: {e}");
                classifier = GazeClassifier::new(gaze.clone());
                stats.record_computation_error();
                report.computation_errors += 1;
                job.unclassified(detector.detect(&job.ear_series, job.timestamp))
            }
        };

        if is_cancelled(&cancel) {
            break;
        }

        tracing::debug!(
            stream_id = %stream_id,
            timestamp = %event.timestamp,
            face = event.face_detected,
            blink = event.blink_detected,
            focus = event.focus,
            movement = %event.movement_type,
            "gaze event"
        );
        if !job.mode.is_persisted() {
            report.diagnostic_withheld += 1;
            continue;
        }
        let keyed = KeyedGazeEvent { stream_id, event };
        match sink.accept(keyed.clone()) {
            Ok(()) => {
                stats.record_event(&keyed.event);
                report.events_emitted += 1;
            }
            Err(e) => {
                tracing::warn!(stream_id = %stream_id, "sink rejected event: {e}");
                stats.record_sink_error();
                report.sink_errors += 1;
            }
        }
    }

    if let Err(e) = sink.flush() {
        tracing::warn!(stream_id = %stream_id, "sink flush failed: {e}");
        stats.record_sink_error();
        report.sink_errors += 1;
    }
    report
}
