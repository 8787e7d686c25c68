//! Rolling timing statistics for enroll and recognize calls.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Most recent durations kept per operation.
const HISTORY: usize = 1000;

#[derive(Debug, Default)]
struct TimingWindow {
    recent: VecDeque<Duration>,
    total: u64,
}

impl TimingWindow {
    fn record(&mut self, d: Duration) {
        if self.recent.len() == HISTORY {
            self.recent.pop_front();
        }
        self.recent.push_back(d);
        self.total += 1;
    }

    fn summary(&self) -> TimingSummary {
        let ms = |d: &Duration| d.as_secs_f64() * 1000.0;
        let count = self.recent.len();
        let (min, max, sum) = self.recent.iter().map(ms).fold(
            (f64::INFINITY, 0.0f64, 0.0f64),
            |(min, max, sum), v| (min.min(v), max.max(v), sum + v),
        );
        TimingSummary {
            total: self.total,
            window: count,
            avg_ms: if count > 0 { sum / count as f64 } else { 0.0 },
            min_ms: if count > 0 { min } else { 0.0 },
            max_ms: max,
        }
    }
}

/// Summary over the recent window; `total` counts every call since start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSummary {
    pub total: u64,
    pub window: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub uptime_secs: u64,
    pub recognitions: TimingSummary,
    pub enrollments: TimingSummary,
}

#[derive(Debug)]
pub struct PerformanceMetrics {
    started: Instant,
    recognitions: TimingWindow,
    enrollments: TimingWindow,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            recognitions: TimingWindow::default(),
            enrollments: TimingWindow::default(),
        }
    }

    pub fn record_recognition(&mut self, d: Duration) {
        self.recognitions.record(d);
    }

    pub fn record_enrollment(&mut self, d: Duration) {
        self.enrollments.record(d);
    }

    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            uptime_secs: self.started.elapsed().as_secs(),
            recognitions: self.recognitions.summary(),
            enrollments: self.enrollments.summary(),
        }
    }
}
