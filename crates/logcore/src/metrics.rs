//! Global atomic flags and per-log counters (§5). The "bandwidth-seen" /
//! "serve-usecs-seen" flags and the `lp.ts` fetch-max are the handful of
//! places the original relies on atomics rather than exclusive ownership;
//! kept as idiomatic atomics here too, per SPEC_FULL.md §9.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Forces the wrapped data onto its own cache line, avoiding false
/// sharing between counters workers update concurrently.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T>(pub T);

/// Process-wide atomic flags, set once via CAS and read thereafter.
#[derive(Debug, Default)]
pub struct GlobalFlags {
    bandwidth_seen: CacheAligned<AtomicBool>,
    serve_time_seen: CacheAligned<AtomicBool>,
    stop_processing: CacheAligned<AtomicBool>,
}

impl GlobalFlags {
    pub fn mark_bandwidth_seen(&self) {
        let _ = self
            .bandwidth_seen
            .0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn mark_serve_time_seen(&self) {
        let _ = self
            .serve_time_seen
            .0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn bandwidth_seen(&self) -> bool {
        self.bandwidth_seen.0.load(Ordering::Acquire)
    }

    pub fn serve_time_seen(&self) -> bool {
        self.serve_time_seen.0.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop_processing.0.store(true, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.stop_processing.0.load(Ordering::Acquire)
    }
}

/// Per-log counters updated from worker tasks (§5): `processed`,
/// `invalid`, `bytes`, `read` plus the monotonic-maximum `lp.ts`.
#[derive(Debug, Default)]
pub struct PerLogCounters {
    processed: CacheAligned<AtomicU64>,
    invalid: CacheAligned<AtomicU64>,
    bytes: CacheAligned<AtomicU64>,
    read: CacheAligned<AtomicU64>,
    last_ts: CacheAligned<AtomicI64>,
}

impl PerLogCounters {
    pub fn count_processed(&self) {
        self.processed.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_invalid(&self) {
        self.invalid.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uncount_processed(&self) {
        self.processed.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn uncount_invalid(&self) {
        self.invalid.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_read(&self, n: u64) {
        self.read.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Atomic compare-and-swap loop preserving a monotonic maximum across
    /// concurrent parses — equivalent to a fetch-max (§9, kept verbatim).
    pub fn observe_timestamp(&self, candidate: i64) {
        let mut current = self.last_ts.0.load(Ordering::Relaxed);
        while candidate > current {
            match self.last_ts.0.compare_exchange_weak(
                current,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            processed: self.processed.0.load(Ordering::Relaxed),
            invalid: self.invalid.0.load(Ordering::Relaxed),
            bytes: self.bytes.0.load(Ordering::Relaxed),
            read: self.read.0.load(Ordering::Relaxed),
            last_ts: self.last_ts.0.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CounterSnapshot {
    pub processed: u64,
    pub invalid: u64,
    pub bytes: u64,
    pub read: u64,
    pub last_ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_set_once() {
        let flags = GlobalFlags::default();
        assert!(!flags.bandwidth_seen());
        flags.mark_bandwidth_seen();
        flags.mark_bandwidth_seen();
        assert!(flags.bandwidth_seen());
    }

    #[test]
    fn counters_roundtrip() {
        let counters = PerLogCounters::default();
        counters.count_processed();
        counters.count_processed();
        counters.count_invalid();
        counters.uncount_invalid();
        let snap = counters.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.invalid, 0);
    }

    #[test]
    fn observe_timestamp_keeps_maximum() {
        let counters = PerLogCounters::default();
        counters.observe_timestamp(5);
        counters.observe_timestamp(3);
        counters.observe_timestamp(9);
        counters.observe_timestamp(7);
        assert_eq!(counters.snapshot().last_ts, 9);
    }
}
