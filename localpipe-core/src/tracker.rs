//! Per-stage outcome tracker.
//!
//! Each sink stage has one tracker actor. Workers report the units they
//! fetched and the terminal outcome they produced; the tracker enforces
//! at-most-one terminal outcome per offset and exposes the counts the
//! orchestrator polls for drain. Units that were begun but never resolved
//! (forced stop) are the unknown-outcome set.

use std::collections::HashMap;

use localpipe_stores::buffer::Offset;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    InFlight,
    Acked,
    Failed,
}

/// Terminal outcome counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerCounts {
    pub acked: u64,
    pub failed: u64,
    pub in_flight: u64,
}

impl TrackerCounts {
    pub fn terminal(&self) -> u64 {
        self.acked + self.failed
    }
}

enum ActorMessage {
    Begin {
        offset: Offset,
    },
    ResolveAck {
        offset: Offset,
        respond_to: oneshot::Sender<bool>,
    },
    ResolveFail {
        offset: Offset,
        respond_to: oneshot::Sender<bool>,
    },
    Retry {
        offset: Offset,
    },
    Counts {
        respond_to: oneshot::Sender<TrackerCounts>,
    },
    Unresolved {
        respond_to: oneshot::Sender<Vec<Offset>>,
    },
}

struct Tracker {
    entries: HashMap<Offset, EntryState>,
    receiver: mpsc::Receiver<ActorMessage>,
    acked: u64,
    failed: u64,
}

impl Tracker {
    fn new(receiver: mpsc::Receiver<ActorMessage>) -> Self {
        Self {
            entries: HashMap::new(),
            receiver,
            acked: 0,
            failed: 0,
        }
    }

    async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, msg: ActorMessage) {
        match msg {
            ActorMessage::Begin { offset } => {
                // Redeliveries re-open an in-flight entry; a terminal entry
                // must never be reopened.
                self.entries.entry(offset).or_insert(EntryState::InFlight);
            }
            ActorMessage::ResolveAck { offset, respond_to } => {
                let _ = respond_to.send(self.resolve(offset, EntryState::Acked));
            }
            ActorMessage::ResolveFail { offset, respond_to } => {
                let _ = respond_to.send(self.resolve(offset, EntryState::Failed));
            }
            ActorMessage::Retry { offset } => {
                // Unit was nacked with delivery budget left: it stays
                // in-flight from the tracker's point of view until a later
                // delivery resolves it.
                self.entries.entry(offset).or_insert(EntryState::InFlight);
            }
            ActorMessage::Counts { respond_to } => {
                let in_flight = self
                    .entries
                    .values()
                    .filter(|s| **s == EntryState::InFlight)
                    .count() as u64;
                let _ = respond_to.send(TrackerCounts {
                    acked: self.acked,
                    failed: self.failed,
                    in_flight,
                });
            }
            ActorMessage::Unresolved { respond_to } => {
                let mut unresolved: Vec<Offset> = self
                    .entries
                    .iter()
                    .filter(|(_, s)| **s == EntryState::InFlight)
                    .map(|(o, _)| o.clone())
                    .collect();
                unresolved.sort();
                let _ = respond_to.send(unresolved);
            }
        }
    }

    /// Move an entry to a terminal state. Returns false (and changes
    /// nothing) if the entry already has a terminal outcome.
    fn resolve(&mut self, offset: Offset, terminal: EntryState) -> bool {
        match self.entries.get_mut(&offset) {
            Some(state @ EntryState::InFlight) => {
                *state = terminal;
                match terminal {
                    EntryState::Acked => self.acked += 1,
                    EntryState::Failed => self.failed += 1,
                    EntryState::InFlight => unreachable!("terminal state expected"),
                }
                true
            }
            Some(_) => {
                warn!(offset = %offset, "Duplicate outcome for offset, ignoring");
                false
            }
            None => {
                warn!(offset = %offset, "Outcome for unknown offset, ignoring");
                false
            }
        }
    }
}

/// Cloneable handle to a stage's tracker actor.
#[derive(Clone)]
pub struct TrackerHandle {
    sender: mpsc::Sender<ActorMessage>,
}

impl TrackerHandle {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(256);
        tokio::spawn(Tracker::new(receiver).run());
        Self { sender }
    }

    /// Record that a unit was handed to a worker.
    pub async fn begin(&self, offset: Offset) {
        let _ = self.sender.send(ActorMessage::Begin { offset }).await;
    }

    /// Record a successful outcome. Returns false if the offset already had
    /// a terminal outcome.
    pub async fn resolve_ack(&self, offset: Offset) -> bool {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .sender
            .send(ActorMessage::ResolveAck {
                offset,
                respond_to: tx,
            })
            .await;
        rx.await.unwrap_or(false)
    }

    /// Record a terminal failure. Returns false if the offset already had a
    /// terminal outcome.
    pub async fn resolve_fail(&self, offset: Offset) -> bool {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .sender
            .send(ActorMessage::ResolveFail {
                offset,
                respond_to: tx,
            })
            .await;
        rx.await.unwrap_or(false)
    }

    /// Record a retriable failure (the transport will redeliver).
    pub async fn retry(&self, offset: Offset) {
        let _ = self.sender.send(ActorMessage::Retry { offset }).await;
    }

    pub async fn counts(&self) -> TrackerCounts {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .sender
            .send(ActorMessage::Counts { respond_to: tx })
            .await;
        rx.await.unwrap_or_default()
    }

    /// Offsets begun but never resolved. Non-empty after a forced stop means
    /// those units have an unknown outcome.
    pub async fn unresolved(&self) -> Vec<Offset> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .sender
            .send(ActorMessage::Unresolved { respond_to: tx })
            .await;
        rx.await.unwrap_or_default()
    }
}

impl Default for TrackerHandle {
    fn default() -> Self {
        Self::new()
    }
}
