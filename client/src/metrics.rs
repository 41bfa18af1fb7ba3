//! Latency history and the client's metrics feed

use serde::Serialize;
use std::collections::VecDeque;

/// Divisor of the RFC 3550 interarrival jitter filter
const JITTER_GAIN: f64 = 16.0;

/// Fixed-capacity ring buffer of one-way latency samples in milliseconds
#[derive(Debug, Clone)]
pub struct LatencyHistory {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyHistory {
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Adds a sample, evicting the oldest once full.
    pub fn record(&mut self, latency_ms: u64) {
        self.samples.push_back(latency_ms);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_samples
    }

    /// Samples from oldest to newest
    pub fn samples(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().copied()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let total: u128 = self.samples.iter().map(|s| *s as u128).sum();
        Some(total as f64 / self.samples.len() as f64)
    }

    /// Nearest-rank 95th percentile
    pub fn p95(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (sorted.len() as f64 * 0.95).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }

    pub fn min(&self) -> Option<u64> {
        self.samples.iter().copied().min()
    }

    pub fn max(&self) -> Option<u64> {
        self.samples.iter().copied().max()
    }

    /// Mean absolute difference between consecutive samples in the window
    pub fn jitter(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let total: u64 = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(a, b)| a.abs_diff(*b))
            .sum();
        Some(total as f64 / (self.samples.len() - 1) as f64)
    }

    /// RFC 3550 style filtered jitter, replayed over the window from zero
    pub fn smoothed_jitter(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let jitter = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(a, b)| a.abs_diff(*b) as f64)
            .fold(0.0, |jitter, delta| jitter + (delta - jitter) / JITTER_GAIN);
        Some(jitter)
    }
}

/// Snapshot intake counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotCounters {
    pub accepted: u64,
    pub stale_dropped: u64,
    pub malformed_dropped: u64,
}

/// Point-in-time metrics feed. Latency fields are `None` until data exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsReport {
    pub samples: usize,
    pub avg_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<u64>,
    pub min_latency_ms: Option<u64>,
    pub max_latency_ms: Option<u64>,
    /// Mean absolute difference of consecutive samples in the window
    pub jitter_ms: Option<f64>,
    /// RFC 3550 filtered jitter over the same window
    pub smoothed_jitter_ms: Option<f64>,
    pub counters: SnapshotCounters,
    /// No snapshot accepted within the staleness window
    pub stale: bool,
}

impl MetricsReport {
    pub fn from_history(history: &LatencyHistory, counters: SnapshotCounters, stale: bool) -> Self {
        Self {
            samples: history.len(),
            avg_latency_ms: history.average(),
            p95_latency_ms: history.p95(),
            min_latency_ms: history.min(),
            max_latency_ms: history.max(),
            jitter_ms: history.jitter(),
            smoothed_jitter_ms: history.smoothed_jitter(),
            counters,
            stale,
        }
    }
}
