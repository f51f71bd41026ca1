//! Message buffer reader.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::error::{BufferError, Result};
use super::error_injector::ErrorInjector;
use super::state::{BufferState, Offset, ReadMessage, SlotState};

/// Reader handle; every clone shares the same underlying buffer so multiple
/// workers can consume from one buffer concurrently.
#[derive(Debug, Clone)]
pub struct BufferReader {
    pub(super) state: Arc<RwLock<BufferState>>,
    pub(super) name: &'static str,
    #[allow(dead_code)]
    pub(super) partition_idx: u16,
    pub(super) error_injector: Arc<ErrorInjector>,
}

impl BufferReader {
    /// Fetch up to `max` pending messages, waiting up to `timeout`.
    ///
    /// Fetched messages move to InFlight and their delivery count is
    /// incremented. Returns an empty vec on timeout.
    pub async fn fetch(&self, max: usize, timeout: Duration) -> Result<Vec<ReadMessage>> {
        self.error_injector.apply_fetch_latency().await;

        if self.error_injector.should_fail_fetch() {
            return Err(BufferError::Fetch("injected fetch failure".to_string()));
        }

        let start = std::time::Instant::now();
        loop {
            {
                let mut state = self.state.write();
                let mut messages = Vec::new();
                for slot in state.slots.iter_mut() {
                    if slot.state == SlotState::Pending {
                        slot.state = SlotState::InFlight;
                        slot.delivery_count += 1;
                        messages.push(ReadMessage {
                            payload: slot.payload.clone(),
                            headers: slot.headers.clone(),
                            offset: slot.offset.clone(),
                            delivery_count: slot.delivery_count,
                        });
                        if messages.len() >= max {
                            break;
                        }
                    }
                }
                if !messages.is_empty() {
                    return Ok(messages);
                }
            }

            if start.elapsed() >= timeout {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Acknowledge successful processing; the message is finalized.
    pub async fn ack(&self, offset: &Offset) -> Result<()> {
        if self.error_injector.should_fail_ack() {
            return Err(BufferError::Ack("injected ack failure".to_string()));
        }

        let mut state = self.state.write();
        let slot = state
            .find_slot_mut(offset)
            .ok_or_else(|| BufferError::OffsetNotFound(offset.to_string()))?;

        if slot.state != SlotState::InFlight {
            return Err(BufferError::Ack(format!(
                "message not in-flight, current state: {:?}",
                slot.state
            )));
        }

        slot.state = SlotState::Acked;
        state.acked_total += 1;
        Ok(())
    }

    /// Negative acknowledgment. The message is requeued for redelivery while
    /// it has delivery budget left, otherwise it is finalized as Failed.
    pub async fn nack(&self, offset: &Offset) -> Result<()> {
        if self.error_injector.should_fail_nack() {
            return Err(BufferError::Nack("injected nack failure".to_string()));
        }

        let mut state = self.state.write();
        let max_deliveries = state.max_deliveries;
        let slot = state
            .find_slot_mut(offset)
            .ok_or_else(|| BufferError::OffsetNotFound(offset.to_string()))?;

        if slot.state != SlotState::InFlight {
            return Err(BufferError::Nack(format!(
                "message not in-flight, current state: {:?}",
                slot.state
            )));
        }

        if slot.delivery_count >= max_deliveries {
            slot.state = SlotState::Failed;
            state.failed_total += 1;
        } else {
            slot.state = SlotState::Pending;
        }
        Ok(())
    }

    /// Number of pending (unfetched) messages.
    pub fn pending(&self) -> usize {
        self.state.read().pending_count()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
