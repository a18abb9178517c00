//! Traffic counters for replicas.
//!
//! # Toyota Way: Visual Management (目で見る管理)
//! Make replica load visible at a glance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::types::TrafficSnapshot;

/// Thread-safe traffic counters that can be shared across async tasks.
#[derive(Debug, Clone)]
pub struct TrafficMetrics {
    inner: Arc<TrafficInner>,
}

#[derive(Debug)]
struct TrafficInner {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    blocks: AtomicU64,
    start_time: Instant,
}

impl TrafficMetrics {
    /// Creates a new set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrafficInner {
                bytes_in: AtomicU64::new(0),
                bytes_out: AtomicU64::new(0),
                messages_in: AtomicU64::new(0),
                messages_out: AtomicU64::new(0),
                blocks: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Inbound
    // ═══════════════════════════════════════════════════════════════════════════

    /// Records one received message of `bytes` bytes.
    pub fn record_in(&self, bytes: u64) {
        self.inner.bytes_in.fetch_add(bytes, Ordering::Relaxed);
        self.inner.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns total bytes received.
    #[must_use]
    pub fn bytes_in(&self) -> u64 {
        self.inner.bytes_in.load(Ordering::Relaxed)
    }

    /// Returns total messages received.
    #[must_use]
    pub fn messages_in(&self) -> u64 {
        self.inner.messages_in.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Outbound
    // ═══════════════════════════════════════════════════════════════════════════

    /// Records `deliveries` copies of a message of `bytes` bytes sent out.
    pub fn record_out(&self, bytes: u64, deliveries: u64) {
        self.inner
            .bytes_out
            .fetch_add(bytes.saturating_mul(deliveries), Ordering::Relaxed);
        self.inner
            .messages_out
            .fetch_add(deliveries, Ordering::Relaxed);
    }

    /// Returns total bytes sent.
    #[must_use]
    pub fn bytes_out(&self) -> u64 {
        self.inner.bytes_out.load(Ordering::Relaxed)
    }

    /// Returns total messages sent.
    #[must_use]
    pub fn messages_out(&self) -> u64 {
        self.inner.messages_out.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Blocks
    // ═══════════════════════════════════════════════════════════════════════════

    /// Increments the produced-block counter.
    pub fn record_block(&self) {
        self.inner.blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of blocks produced.
    #[must_use]
    pub fn blocks(&self) -> u64 {
        self.inner.blocks.load(Ordering::Relaxed)
    }

    /// Returns blocks per second since the counters were created.
    #[must_use]
    pub fn blocks_per_second(&self) -> f64 {
        let elapsed = self.inner.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.blocks() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns a copy of the byte counters.
    #[must_use]
    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            bytes_in: self.bytes_in(),
            bytes_out: self.bytes_out(),
        }
    }
}

impl Default for TrafficMetrics {
    fn default() -> Self {
        Self::new()
    }
}
