//! Internal slot state and core types for the message buffer.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

/// Offset identifying one message in the buffer.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Offset {
    /// Monotonically increasing sequence number.
    pub sequence: i64,
    /// Partition index of the buffer.
    pub partition_idx: u16,
}

impl Offset {
    pub fn new(sequence: i64, partition_idx: u16) -> Self {
        Self {
            sequence,
            partition_idx,
        }
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.sequence, self.partition_idx)
    }
}

/// Message handed to a consumer: payload, headers and the offset used for
/// ack/nack.
#[derive(Debug, Clone)]
pub struct ReadMessage {
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
    pub offset: Offset,
    /// How many times this message has been delivered, including this one.
    pub delivery_count: u32,
}

/// A slot in the buffer.
#[derive(Debug, Clone)]
pub(crate) struct BufferSlot {
    pub(crate) payload: Bytes,
    pub(crate) headers: HashMap<String, String>,
    /// Caller-supplied id used for deduplication.
    pub(crate) id: String,
    pub(crate) offset: Offset,
    pub(crate) state: SlotState,
    pub(crate) delivery_count: u32,
}

/// State of a message in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Written but not yet fetched.
    Pending,
    /// Fetched, waiting for a terminal outcome.
    InFlight,
    /// Acknowledged; the slot can be reclaimed.
    Acked,
    /// Delivery budget exhausted; the slot can be reclaimed.
    Failed,
}

impl SlotState {
    fn is_terminal(self) -> bool {
        matches!(self, SlotState::Acked | SlotState::Failed)
    }
}

/// Shared state behind the reader/writer handles.
#[derive(Debug)]
pub(crate) struct BufferState {
    pub(crate) slots: VecDeque<BufferSlot>,
    pub(crate) capacity: usize,
    pub(crate) next_sequence: i64,
    /// Offset -> index into `slots` for fast lookup.
    pub(crate) offset_to_index: HashMap<Offset, usize>,
    /// Dedup window: message id -> assigned sequence.
    pub(crate) dedup_window: HashMap<String, i64>,
    /// Usage fraction at which the buffer reports full.
    pub(crate) usage_limit: f64,
    /// Deliveries allowed before a nack finalizes the slot as Failed.
    pub(crate) max_deliveries: u32,
    /// Running total of acked messages (survives slot reclamation).
    pub(crate) acked_total: u64,
    /// Running total of failed messages (survives slot reclamation).
    pub(crate) failed_total: u64,
}

impl BufferState {
    pub(crate) fn new(capacity: usize, usage_limit: f64, max_deliveries: u32) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 1,
            offset_to_index: HashMap::new(),
            dedup_window: HashMap::new(),
            usage_limit,
            max_deliveries,
            acked_total: 0,
            failed_total: 0,
        }
    }

    /// Current usage as a fraction of capacity, terminal slots excluded.
    pub(crate) fn usage(&self) -> f64 {
        let active = self
            .slots
            .iter()
            .filter(|s| !s.state.is_terminal())
            .count();
        active as f64 / self.capacity as f64
    }

    pub(crate) fn is_full(&self) -> bool {
        self.usage() >= self.usage_limit
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Pending)
            .count()
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::InFlight)
            .count()
    }

    /// Reclaim terminal slots from the front of the buffer.
    pub(crate) fn reclaim_terminal(&mut self) {
        while let Some(front) = self.slots.front() {
            if !front.state.is_terminal() {
                break;
            }
            let slot = self.slots.pop_front().expect("front exists");
            self.offset_to_index.remove(&slot.offset);
            self.dedup_window.remove(&slot.id);
            for (_, idx) in self.offset_to_index.iter_mut() {
                if *idx > 0 {
                    *idx -= 1;
                }
            }
        }
    }

    pub(crate) fn find_slot_mut(&mut self, offset: &Offset) -> Option<&mut BufferSlot> {
        self.offset_to_index
            .get(offset)
            .copied()
            .and_then(|idx| self.slots.get_mut(idx))
    }
}
