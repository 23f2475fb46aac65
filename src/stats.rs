//! Pipeline counters.
//!
//! Counts what the agent has processed across all streams. Counters are
//! lock-free and can optionally be persisted so totals survive restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current process.
#[derive(Debug)]
pub struct PipelineStats {
    /// Frames handed to any stream
    frames_received: AtomicU64,
    /// Frames dropped for a non-advancing timestamp
    frames_rejected: AtomicU64,
    /// Gaze events delivered to a sink
    events_emitted: AtomicU64,
    blinks: AtomicU64,
    saccades: AtomicU64,
    fixations: AtomicU64,
    /// Center frames whose payload was gone before classification
    lost_payloads: AtomicU64,
    /// Vision routine failures
    computation_errors: AtomicU64,
    /// Events a sink refused
    sink_errors: AtomicU64,
    /// Process start time
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            blinks: AtomicU64::new(0),
            saccades: AtomicU64::new(0),
            fixations: AtomicU64::new(0),
            lost_payloads: AtomicU64::new(0),
            computation_errors: AtomicU64::new(0),
            sink_errors: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create counters that load from, and save to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("could not load previous stats: {e}");
        }

        stats
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an emitted event along with what it was classified as.
    pub fn record_event(&self, event: &crate::core::GazeEvent) {
        use crate::core::MovementType;

        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        if event.blink_detected {
            self.blinks.fetch_add(1, Ordering::Relaxed);
        }
        match event.movement_type {
            MovementType::Saccade => self.saccades.fetch_add(1, Ordering::Relaxed),
            MovementType::Fixation => self.fixations.fetch_add(1, Ordering::Relaxed),
            MovementType::None => 0,
        };
    }

    pub fn record_lost_payload(&self) {
        self.lost_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_computation_error(&self) {
        self.computation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            blinks: self.blinks.load(Ordering::Relaxed),
            saccades: self.saccades.load(Ordering::Relaxed),
            fixations: self.fixations.load(Ordering::Relaxed),
            lost_payloads: self.lost_payloads.load(Ordering::Relaxed),
            computation_errors: self.computation_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Frames received: {}\n\
             - Frames rejected: {}\n\
             - Events emitted: {}\n\
             - Blinks: {}\n\
             - Saccades: {}\n\
             - Fixations: {}\n\
             - Lost payloads: {}\n\
             - Computation errors: {}\n\
             - Sink errors: {}\n\
             - Uptime: {} seconds",
            stats.frames_received,
            stats.frames_rejected,
            stats.events_emitted,
            stats.blinks,
            stats.saccades,
            stats.fixations,
            stats.lost_payloads,
            stats.computation_errors,
            stats.sink_errors,
            stats.uptime_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                frames_received: stats.frames_received,
                frames_rejected: stats.frames_rejected,
                events_emitted: stats.events_emitted,
                blinks: stats.blinks,
                saccades: stats.saccades,
                fixations: stats.fixations,
                lost_payloads: stats.lost_payloads,
                computation_errors: stats.computation_errors,
                sink_errors: stats.sink_errors,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;

        self.frames_received
            .store(persisted.frames_received, Ordering::Relaxed);
        self.frames_rejected
            .store(persisted.frames_rejected, Ordering::Relaxed);
        self.events_emitted
            .store(persisted.events_emitted, Ordering::Relaxed);
        self.blinks.store(persisted.blinks, Ordering::Relaxed);
        self.saccades.store(persisted.saccades, Ordering::Relaxed);
        self.fixations.store(persisted.fixations, Ordering::Relaxed);
        self.lost_payloads
            .store(persisted.lost_payloads, Ordering::Relaxed);
        self.computation_errors
            .store(persisted.computation_errors, Ordering::Relaxed);
        self.sink_errors
            .store(persisted.sink_errors, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub events_emitted: u64,
    pub blinks: u64,
    pub saccades: u64,
    pub fixations: u64,
    pub lost_payloads: u64,
    pub computation_errors: u64,
    pub sink_errors: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    frames_received: u64,
    frames_rejected: u64,
    events_emitted: u64,
    blinks: u64,
    saccades: u64,
    fixations: u64,
    lost_payloads: u64,
    computation_errors: u64,
    #[serde(default)]
    sink_errors: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared counters.
pub type SharedStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(PipelineStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(PipelineStats::with_persistence(path))
}
