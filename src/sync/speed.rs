//! Aggregate transfer throughput sampling.
//!
//! A ring buffer of per-second byte totals across every in-flight
//! transfer. Transfer workers record chunk deltas; the HTTP API reads the
//! history and the current rate.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use utoipa::ToSchema;

/// Seconds of history retained
const CAPACITY: usize = 300;

/// Averaging window for the current rate
const RATE_WINDOW_SECS: i64 = 5;

/// One second of aggregate throughput
#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema)]
pub struct SpeedSample {
    /// Unix timestamp of the second this sample covers
    pub timestamp: i64,
    /// Bytes transferred during that second
    pub bytes: u64,
}

/// Ring buffer of per-second throughput samples
#[derive(Clone, Default)]
pub struct SpeedSampler {
    inner: Arc<Mutex<VecDeque<SpeedSample>>>,
}

impl SpeedSampler {
    /// Create an empty sampler
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes transferred now
    ///
    /// Called from transfer workers (including blocking threads); cheap
    /// enough to run per chunk.
    pub fn record(&self, bytes: u64) {
        let now = chrono::Utc::now().timestamp();
        let mut samples = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match samples.back_mut() {
            Some(last) if last.timestamp == now => last.bytes += bytes,
            _ => {
                samples.push_back(SpeedSample {
                    timestamp: now,
                    bytes,
                });
                while samples.len() > CAPACITY {
                    samples.pop_front();
                }
            }
        }
    }

    /// Current aggregate rate in bytes per second
    ///
    /// Averaged over the last few seconds so a single large chunk does
    /// not spike the reading.
    pub fn current_bps(&self) -> u64 {
        let now = chrono::Utc::now().timestamp();
        let samples = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let total: u64 = samples
            .iter()
            .rev()
            .take_while(|s| s.timestamp > now - RATE_WINDOW_SECS)
            .map(|s| s.bytes)
            .sum();
        total / RATE_WINDOW_SECS as u64
    }

    /// The retained history, oldest first
    pub fn history(&self) -> Vec<SpeedSample> {
        match self.inner.lock() {
            Ok(guard) => guard.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        }
    }
}
