//! In-memory message buffer with the delivery contract of a real broker.
//!
//! The buffer is the transport between the producer and the sink stages. It
//! tracks every message through `Pending → InFlight → {Acked | Failed}`,
//! redelivers nacked messages until their delivery budget is exhausted, and
//! exposes terminal counters so a caller can observe drain. Error injection
//! covers write, fetch, ack and nack paths.
//!
//! # Example
//! ```ignore
//! use localpipe_stores::buffer::MessageBuffer;
//!
//! let buffer = MessageBuffer::new(100, 0, "raw-events");
//! let writer = buffer.writer();
//! let reader = buffer.reader();
//! ```

/// Slot states and internal buffer state.
mod state;
/// Error types.
mod error;
/// Error injector for tests.
mod error_injector;
/// Reader implementation.
mod reader;
/// Writer implementation.
mod writer;

pub use error::{BufferError, Result};
pub use error_injector::ErrorInjector;
pub use reader::BufferReader;
pub use state::{Offset, ReadMessage};
pub use writer::{BufferWriter, WriteError, WriteResult};

use std::sync::Arc;

use parking_lot::RwLock;

use state::BufferState;

const DEFAULT_USAGE_LIMIT: f64 = 0.8;
const DEFAULT_MAX_DELIVERIES: u32 = 3;

/// Shared in-memory buffer that one writer and a pool of readers operate on.
///
/// Cloning is cheap; all clones share the same slots, counters and error
/// injector.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    /// Shared slot state.
    state: Arc<RwLock<BufferState>>,
    /// Buffer name, usually the downstream stage name.
    name: &'static str,
    /// Partition index of this buffer.
    partition_idx: u16,
    /// Error injector shared by readers and writers.
    error_injector: Arc<ErrorInjector>,
}

impl MessageBuffer {
    /// Create a buffer with the default usage limit and delivery budget.
    pub fn new(capacity: usize, partition_idx: u16, name: &'static str) -> Self {
        Self::with_config(
            capacity,
            partition_idx,
            name,
            DEFAULT_USAGE_LIMIT,
            DEFAULT_MAX_DELIVERIES,
        )
    }

    /// Create a buffer with explicit usage limit and delivery budget.
    ///
    /// `max_deliveries` is the number of times a message may be handed to a
    /// consumer before a nack finalizes it as Failed instead of requeueing.
    pub fn with_config(
        capacity: usize,
        partition_idx: u16,
        name: &'static str,
        usage_limit: f64,
        max_deliveries: u32,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(BufferState::new(
                capacity,
                usage_limit,
                max_deliveries,
            ))),
            name,
            partition_idx,
            error_injector: Arc::new(ErrorInjector::new()),
        }
    }

    /// Error injector for this buffer.
    pub fn error_injector(&self) -> &Arc<ErrorInjector> {
        &self.error_injector
    }

    /// Create a writer for this buffer.
    pub fn writer(&self) -> BufferWriter {
        BufferWriter {
            state: Arc::clone(&self.state),
            name: self.name,
            partition_idx: self.partition_idx,
            error_injector: Arc::clone(&self.error_injector),
        }
    }

    /// Create a reader for this buffer.
    pub fn reader(&self) -> BufferReader {
        BufferReader {
            state: Arc::clone(&self.state),
            name: self.name,
            partition_idx: self.partition_idx,
            error_injector: Arc::clone(&self.error_injector),
        }
    }

    /// Number of messages written but not yet fetched.
    pub fn pending_count(&self) -> usize {
        self.state.read().pending_count()
    }

    /// Number of messages fetched but without a terminal outcome.
    pub fn in_flight_count(&self) -> usize {
        self.state.read().in_flight_count()
    }

    /// Number of messages acknowledged so far.
    pub fn acked_count(&self) -> u64 {
        self.state.read().acked_total
    }

    /// Number of messages finalized as failed (delivery budget exhausted).
    pub fn failed_count(&self) -> u64 {
        self.state.read().failed_total
    }

    /// Total messages with a terminal outcome. Drain is observed as
    /// `terminal_count() == produced`.
    pub fn terminal_count(&self) -> u64 {
        let state = self.state.read();
        state.acked_total + state.failed_total
    }

    /// Whether the buffer is over its usage limit.
    pub fn is_full(&self) -> bool {
        self.state.read().is_full()
    }

    /// Buffer name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn test_write_fetch_ack() {
        let buffer = MessageBuffer::new(10, 0, "test-buffer");
        let writer = buffer.writer();
        let reader = buffer.reader();

        let result = writer
            .write("unit-1", Bytes::from_static(b"hello"), HashMap::new())
            .await
            .unwrap();
        assert!(!result.is_duplicate);
        assert_eq!(result.offset.sequence, 1);

        let messages = reader.fetch(10, Duration::from_millis(100)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, Bytes::from_static(b"hello"));

        reader.ack(&messages[0].offset).await.unwrap();
        assert_eq!(buffer.pending_count(), 0);
        assert_eq!(buffer.in_flight_count(), 0);
        assert_eq!(buffer.acked_count(), 1);
    }

    #[tokio::test]
    async fn test_nack_redelivers_until_budget_exhausted() {
        let buffer = MessageBuffer::with_config(10, 0, "test-buffer", 0.8, 2);
        let writer = buffer.writer();
        let reader = buffer.reader();

        writer
            .write("unit-1", Bytes::from_static(b"hello"), HashMap::new())
            .await
            .unwrap();

        // First delivery, nacked: goes back to pending.
        let messages = reader.fetch(10, Duration::from_millis(100)).await.unwrap();
        assert_eq!(messages.len(), 1);
        reader.nack(&messages[0].offset).await.unwrap();
        assert_eq!(buffer.pending_count(), 1);
        assert_eq!(buffer.failed_count(), 0);

        // Second delivery, nacked: budget of 2 is exhausted, finalized as Failed.
        let messages = reader.fetch(10, Duration::from_millis(100)).await.unwrap();
        assert_eq!(messages.len(), 1);
        reader.nack(&messages[0].offset).await.unwrap();
        assert_eq!(buffer.pending_count(), 0);
        assert_eq!(buffer.failed_count(), 1);
        assert_eq!(buffer.terminal_count(), 1);
    }

    #[tokio::test]
    async fn test_buffer_full_at_usage_limit() {
        let buffer = MessageBuffer::with_config(5, 0, "test-buffer", 0.8, 3);
        let writer = buffer.writer();

        for i in 0..4 {
            writer
                .write(&format!("unit-{i}"), Bytes::from_static(b"x"), HashMap::new())
                .await
                .unwrap();
        }

        let result = writer
            .write("unit-4", Bytes::from_static(b"x"), HashMap::new())
            .await;
        assert!(matches!(result, Err(WriteError::BufferFull)));
    }

    #[tokio::test]
    async fn test_duplicate_detection() {
        let buffer = MessageBuffer::new(10, 0, "test-buffer");
        let writer = buffer.writer();

        let first = writer
            .write("same-id", Bytes::from_static(b"a"), HashMap::new())
            .await
            .unwrap();
        let second = writer
            .write("same-id", Bytes::from_static(b"a"), HashMap::new())
            .await
            .unwrap();
        assert!(!first.is_duplicate);
        assert!(second.is_duplicate);
        assert_eq!(first.offset, second.offset);
    }

    #[tokio::test]
    async fn test_injected_write_failures() {
        let buffer = MessageBuffer::new(10, 0, "test-buffer");
        let writer = buffer.writer();

        buffer.error_injector().fail_writes(1);
        let result = writer
            .write("unit-1", Bytes::from_static(b"x"), HashMap::new())
            .await;
        assert!(matches!(result, Err(WriteError::WriteFailed(_))));

        // Next write succeeds.
        writer
            .write("unit-2", Bytes::from_static(b"x"), HashMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_timeout_on_empty_buffer() {
        let buffer = MessageBuffer::new(10, 0, "test-buffer");
        let reader = buffer.reader();

        let messages = reader.fetch(10, Duration::from_millis(50)).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_ack_unknown_offset() {
        let buffer = MessageBuffer::new(10, 0, "test-buffer");
        let reader = buffer.reader();

        let result = reader.ack(&Offset::new(999, 0)).await;
        assert!(matches!(result, Err(BufferError::OffsetNotFound(_))));
    }
}
