//! Device-side end of a capture session
//!
//! ```text
//! device callback ──▶ CaptureTap::push
//!                        │
//!                        ├──▶ rtrb ring (lock-free, wait-free) ──▶ send loop
//!                        │
//!                        └──▶ scope buffer (try_lock, skipped if busy) ──▶ frame loop
//! ```
//!
//! `push` never blocks: when the ring is full the overflow is counted and
//! dropped, and when the frame loop holds the scope the update is skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Counters shared between the device callback and the session.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub callbacks: AtomicU64,
    pub samples_captured: AtomicU64,
    pub overruns: AtomicU64,
    pub batches_sent: AtomicU64,
    pub batches_dropped: AtomicU64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "callbacks": self.callbacks.load(Ordering::Relaxed),
            "samples_captured": self.samples_captured.load(Ordering::Relaxed),
            "overruns": self.overruns.load(Ordering::Relaxed),
            "batches_sent": self.batches_sent.load(Ordering::Relaxed),
            "batches_dropped": self.batches_dropped.load(Ordering::Relaxed),
        })
    }
}

/// Fixed-size circular buffer of the most recent samples.
#[derive(Debug)]
pub struct ScopeBuffer {
    data: Vec<f32>,
    pos: usize,
}

impl ScopeBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0.0; size.max(1)],
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn extend(&mut self, samples: &[f32]) {
        let size = self.data.len();
        // Only the tail can survive
        let samples = &samples[samples.len().saturating_sub(size)..];
        for &s in samples {
            self.data[self.pos] = s;
            self.pos = (self.pos + 1) % size;
        }
    }

    /// Copy out oldest to newest.
    pub fn snapshot_into(&self, out: &mut Vec<f32>) {
        out.clear();
        out.extend_from_slice(&self.data[self.pos..]);
        out.extend_from_slice(&self.data[..self.pos]);
    }
}

/// Handed to a [`super::CaptureDevice`] on start; the device pushes mono f32
/// samples into it from its callback.
pub struct CaptureTap {
    producer: rtrb::Producer<f32>,
    scope: Arc<Mutex<ScopeBuffer>>,
    stats: Arc<CaptureStats>,
}

impl std::fmt::Debug for CaptureTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureTap")
            .field("free_slots", &self.producer.slots())
            .finish_non_exhaustive()
    }
}

impl CaptureTap {
    pub(crate) fn new(
        producer: rtrb::Producer<f32>,
        scope: Arc<Mutex<ScopeBuffer>>,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            producer,
            scope,
            stats,
        }
    }

    /// Push samples. Returns how many made it into the send ring.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
        self.stats
            .samples_captured
            .fetch_add(samples.len() as u64, Ordering::Relaxed);

        let writable = self.producer.slots().min(samples.len());
        let written = match self.producer.write_chunk_uninit(writable) {
            Ok(chunk) => chunk.fill_from_iter(samples[..writable].iter().copied()),
            Err(_) => 0,
        };
        let dropped = samples.len() - written;
        if dropped > 0 {
            self.stats
                .overruns
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }

        if let Ok(mut scope) = self.scope.try_lock() {
            scope.extend(samples);
        }

        written
    }
}
