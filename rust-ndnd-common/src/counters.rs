//! Counter primitives and the per-face counter set.

use std::sync::atomic::{AtomicU64, Ordering};

/* ---------------------------------------------------------------- *
 * Simple Counter
 * ---------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        let c = Counter::new();
        c.value
            .store(self.value.load(Ordering::Relaxed), Ordering::Relaxed);
        c
    }
}

/* ---------------------------------------------------------------- *
 * Aggregate face counters
 * ---------------------------------------------------------------- */

/// Per-face counters, shared by the face, its link service, and its
/// transport. Monotonically nondecreasing while the face is not CLOSED.
///
/// Byte counts cover wire-format size including framing. The ping/pong
/// counters move only on transports that perform link keep-alive.
#[derive(Debug, Default, Clone)]
pub struct FaceCounters {
    pub n_in_interests: Counter,
    pub n_in_data: Counter,
    pub n_in_nacks: Counter,
    pub n_out_interests: Counter,
    pub n_out_data: Counter,
    pub n_out_nacks: Counter,
    pub n_in_bytes: Counter,
    pub n_out_bytes: Counter,
    pub n_out_pings: Counter,
    pub n_in_pongs: Counter,
    /// Blocks of unrecognized TLV type, counted and dropped.
    pub n_unknown: Counter,
    /// Send failures (oversize blocks, queue-to-closed-transport).
    pub n_dropped: Counter,
}

impl FaceCounters {
    pub fn new() -> Self {
        Self::default()
    }
}
