//! Error injection controller for buffer tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Forces specific failure conditions on the buffer: full buffer, failed
/// writes/fetches/acks/nacks, artificial latencies.
#[derive(Debug, Default)]
pub struct ErrorInjector {
    /// Force the buffer to appear full.
    pub force_buffer_full: AtomicBool,
    fail_next_writes: AtomicUsize,
    fail_next_fetches: AtomicUsize,
    fail_next_acks: AtomicUsize,
    fail_next_nacks: AtomicUsize,
    write_latency_ms: AtomicU64,
    fetch_latency_ms: AtomicU64,
}

impl ErrorInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_buffer_full(&self, full: bool) {
        self.force_buffer_full.store(full, Ordering::Relaxed);
    }

    /// Fail the next N write operations.
    pub fn fail_writes(&self, count: usize) {
        self.fail_next_writes.store(count, Ordering::Relaxed);
    }

    /// Fail the next N fetch operations.
    pub fn fail_fetches(&self, count: usize) {
        self.fail_next_fetches.store(count, Ordering::Relaxed);
    }

    /// Fail the next N ack operations.
    pub fn fail_acks(&self, count: usize) {
        self.fail_next_acks.store(count, Ordering::Relaxed);
    }

    /// Fail the next N nack operations.
    pub fn fail_nacks(&self, count: usize) {
        self.fail_next_nacks.store(count, Ordering::Relaxed);
    }

    pub fn set_write_latency(&self, ms: u64) {
        self.write_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub fn set_fetch_latency(&self, ms: u64) {
        self.fetch_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn should_fail_write(&self) -> bool {
        Self::decrement_counter(&self.fail_next_writes)
    }

    pub(crate) fn should_fail_fetch(&self) -> bool {
        Self::decrement_counter(&self.fail_next_fetches)
    }

    pub(crate) fn should_fail_ack(&self) -> bool {
        Self::decrement_counter(&self.fail_next_acks)
    }

    pub(crate) fn should_fail_nack(&self) -> bool {
        Self::decrement_counter(&self.fail_next_nacks)
    }

    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok()
    }

    pub(crate) async fn apply_write_latency(&self) {
        Self::apply_latency(&self.write_latency_ms).await;
    }

    pub(crate) async fn apply_fetch_latency(&self) {
        Self::apply_latency(&self.fetch_latency_ms).await;
    }

    async fn apply_latency(latency_ms: &AtomicU64) {
        let ms = latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}
