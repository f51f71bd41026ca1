//! Message buffer writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use parking_lot::RwLock;

use super::error_injector::ErrorInjector;
use super::state::{BufferSlot, BufferState, Offset, SlotState};

/// Error types for write operations. Both variants are retryable from the
/// caller's point of view.
#[derive(Debug, Clone)]
pub enum WriteError {
    /// Buffer is over its usage limit.
    BufferFull,
    /// Write rejected (injected or transient).
    WriteFailed(String),
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::BufferFull => write!(f, "buffer is full"),
            WriteError::WriteFailed(msg) => write!(f, "write failed: {msg}"),
        }
    }
}

impl std::error::Error for WriteError {}

/// Result of a successful write.
#[derive(Debug, Clone)]
pub struct WriteResult {
    pub offset: Offset,
    pub is_duplicate: bool,
}

/// Writer handle for one buffer.
#[derive(Debug, Clone)]
pub struct BufferWriter {
    pub(super) state: Arc<RwLock<BufferState>>,
    pub(super) name: &'static str,
    pub(super) partition_idx: u16,
    pub(super) error_injector: Arc<ErrorInjector>,
}

impl BufferWriter {
    /// Write a message, assigning it the next sequence offset.
    ///
    /// Writes with an id already in the dedup window return the original
    /// offset with `is_duplicate` set instead of storing a second copy.
    pub async fn write(
        &self,
        id: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> std::result::Result<WriteResult, WriteError> {
        self.error_injector.apply_write_latency().await;

        if self.error_injector.should_fail_write() {
            return Err(WriteError::WriteFailed(
                "injected write failure".to_string(),
            ));
        }
        if self.error_injector.force_buffer_full.load(Ordering::SeqCst) {
            return Err(WriteError::BufferFull);
        }

        let mut state = self.state.write();

        if state.is_full() {
            return Err(WriteError::BufferFull);
        }

        if let Some(&existing_seq) = state.dedup_window.get(id) {
            return Ok(WriteResult {
                offset: Offset::new(existing_seq, self.partition_idx),
                is_duplicate: true,
            });
        }

        state.reclaim_terminal();
        if state.slots.len() >= state.capacity {
            return Err(WriteError::BufferFull);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let offset = Offset::new(sequence, self.partition_idx);

        let index = state.slots.len();
        state.slots.push_back(BufferSlot {
            payload,
            headers,
            id: id.to_string(),
            offset: offset.clone(),
            state: SlotState::Pending,
            delivery_count: 0,
        });
        state.offset_to_index.insert(offset.clone(), index);
        state.dedup_window.insert(id.to_string(), sequence);

        Ok(WriteResult {
            offset,
            is_duplicate: false,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_full(&self) -> bool {
        if self.error_injector.force_buffer_full.load(Ordering::SeqCst) {
            return true;
        }
        self.state.read().is_full()
    }
}
