//! Worker stats registry.
//!
//! Counters are written only from job-completion paths; readers get a
//! consistent snapshot. Latency is a rolling window over the most recent
//! completions.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// How many recent completions feed the average latency.
const LATENCY_WINDOW: usize = 50;

#[derive(Debug, Default)]
struct Counters {
    succeeded: u64,
    failed: u64,
    timed_out: u64,
    latencies: VecDeque<f64>,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub total_completed: u64,
    /// Failures and timeouts over all completions, 0.0 when idle
    pub error_rate: f64,
    /// Mean of the rolling latency window, seconds
    pub avg_latency_secs: f64,
    /// Seconds since the registry was created
    pub uptime_secs: u64,
}

/// Shared registry of completion counters.
pub struct StatsRegistry {
    counters: Mutex<Counters>,
    started: Instant,
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started: Instant::now(),
        }
    }

    pub fn record_success(&self, latency_secs: f64) {
        let mut c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        c.succeeded += 1;
        push_latency(&mut c.latencies, latency_secs);
        metrics::counter!("fswap_jobs_succeeded_total").increment(1);
        metrics::histogram!("fswap_job_latency_seconds").record(latency_secs);
    }

    pub fn record_failure(&self, latency_secs: f64) {
        let mut c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        c.failed += 1;
        push_latency(&mut c.latencies, latency_secs);
        metrics::counter!("fswap_jobs_failed_total").increment(1);
    }

    pub fn record_timeout(&self, latency_secs: f64) {
        let mut c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        c.timed_out += 1;
        push_latency(&mut c.latencies, latency_secs);
        metrics::counter!("fswap_jobs_timed_out_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let total = c.succeeded + c.failed + c.timed_out;
        let error_rate = if total == 0 {
            0.0
        } else {
            (c.failed + c.timed_out) as f64 / total as f64
        };
        let avg_latency_secs = if c.latencies.is_empty() {
            0.0
        } else {
            c.latencies.iter().sum::<f64>() / c.latencies.len() as f64
        };
        StatsSnapshot {
            succeeded: c.succeeded,
            failed: c.failed,
            timed_out: c.timed_out,
            total_completed: total,
            error_rate,
            avg_latency_secs,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

fn push_latency(window: &mut VecDeque<f64>, latency_secs: f64) {
    if window.len() == LATENCY_WINDOW {
        window.pop_front();
    }
    window.push_back(latency_secs);
}
