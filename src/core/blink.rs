//! Windowed blink detection.
//!
//! A blink is a short, transient dip in eye-aspect-ratio. Because the
//! detector sees the whole window around the frame being classified, it can
//! require the eye to have been open both before and after the dip, which a
//! frame-by-frame detector cannot.

use crate::config::BlinkConfig;
use chrono::{DateTime, Duration, Utc};
use statrs::statistics::{Data, Median};

/// A contiguous run of below-threshold EAR samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkDip {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub min_ear: f64,
}

impl BlinkDip {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Decides whether a window's center frame falls inside a blink.
#[derive(Debug, Clone)]
pub struct BlinkDetector {
    config: BlinkConfig,
}

impl BlinkDetector {
    pub fn new(config: BlinkConfig) -> Self {
        Self { config }
    }

    /// Whether the frame at `center` is part of a blink.
    ///
    /// `series` is the window's `(timestamp, EAR)` sequence in time order.
    /// Samples with no EAR are skipped. Fewer than two usable samples is
    /// reported as "no blink".
    pub fn detect(&self, series: &[(DateTime<Utc>, Option<f64>)], center: DateTime<Utc>) -> bool {
        let adjacency = Duration::from_std(self.config.adjacency).unwrap_or_else(|_| Duration::zero());
        let hit = self
            .find_dips(series)
            .into_iter()
            .find(|dip| center >= dip.start - adjacency && center <= dip.end + adjacency);

        if let Some(dip) = hit {
            tracing::debug!(
                center = %center,
                dip_ms = dip.duration().num_milliseconds(),
                min_ear = dip.min_ear,
                "blink"
            );
            return true;
        }
        false
    }

    /// All blink-shaped dips in the window.
    pub fn find_dips(&self, series: &[(DateTime<Utc>, Option<f64>)]) -> Vec<BlinkDip> {
        let present: Vec<(DateTime<Utc>, f64)> = series
            .iter()
            .filter_map(|&(ts, ear)| ear.filter(|v| v.is_finite()).map(|v| (ts, v)))
            .collect();

        if present.len() < 2 {
            return Vec::new();
        }

        let baseline = Data::new(present.iter().map(|&(_, ear)| ear).collect::<Vec<_>>()).median();
        if baseline < self.config.min_open_ear {
            // Closed (or unmeasurable) for the whole window: nothing transient
            return Vec::new();
        }
        let threshold = baseline * self.config.dip_ratio;
        let max_duration = Duration::from_std(self.config.max_blink_duration)
            .unwrap_or_else(|_| Duration::zero());

        let mut dips = Vec::new();
        let mut i = 0;
        while i < present.len() {
            if present[i].1 >= threshold {
                i += 1;
                continue;
            }

            let first = i;
            let mut min_ear = present[i].1;
            while i + 1 < present.len() && present[i + 1].1 < threshold {
                i += 1;
                min_ear = min_ear.min(present[i].1);
            }
            let last = i;
            i += 1;

            // Must recover on both sides within the window
            if first == 0 || last == present.len() - 1 {
                continue;
            }

            let dip = BlinkDip {
                start: present[first].0,
                end: present[last].0,
                min_ear,
            };
            if dip.duration() <= max_duration {
                dips.push(dip);
            }
        }

        dips
    }
}

impl Default for BlinkDetector {
    fn default() -> Self {
        Self::new(BlinkConfig::default())
    }
}
