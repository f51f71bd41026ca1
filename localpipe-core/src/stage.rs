//! Sink worker stage.
//!
//! A stage is a fixed pool of workers draining one stage buffer into one
//! sink. Each worker owns its own sink instance, fetches one unit at a time,
//! runs it through the shared execution policy, reports the outcome to the
//! stage tracker, and acks or nacks the transport. A graceful stop lets the
//! in-flight unit finish; after the grace period workers are aborted and any
//! unit without a terminal outcome is reported as unknown, never as success.

use std::time::Duration;

use localpipe_stores::buffer::{BufferReader, Offset};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::message::{DeliveryOutcome, WorkUnit};
use crate::sink::{Sink, process_unit};
use crate::tracker::{TrackerCounts, TrackerHandle};

/// How a stage came to a stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStop {
    /// Workers did not finish within the grace period and were aborted.
    pub forced: bool,
    /// Offsets with no terminal outcome at stop time.
    pub unknown: Vec<Offset>,
}

/// Running sink stage.
pub struct SinkStage {
    name: &'static str,
    tracker: TrackerHandle,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl SinkStage {
    /// Start `parallelism` workers, each with its own sink instance built by
    /// `make_sink`.
    pub fn start<S, F>(
        name: &'static str,
        reader: BufferReader,
        parallelism: usize,
        fetch_timeout: Duration,
        max_deliveries: u32,
        mut make_sink: F,
    ) -> Self
    where
        S: Sink + Send + 'static,
        F: FnMut() -> S,
    {
        let tracker = TrackerHandle::new();
        let cancel = CancellationToken::new();

        let workers = (0..parallelism)
            .map(|worker_idx| {
                let sink = make_sink();
                let reader = reader.clone();
                let tracker = tracker.clone();
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(
                    name,
                    worker_idx,
                    sink,
                    reader,
                    tracker,
                    cancel,
                    fetch_timeout,
                    max_deliveries,
                ))
            })
            .collect();

        info!(stage = name, parallelism, "Sink stage started");
        Self {
            name,
            tracker,
            workers,
            cancel,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Terminal outcome counts, polled by the orchestrator for drain.
    pub async fn counts(&self) -> TrackerCounts {
        self.tracker.counts().await
    }

    /// Stop the stage: signal workers, wait up to `grace` for them to finish
    /// their in-flight unit, then abort what is left.
    pub async fn stop(mut self, grace: Duration) -> StageStop {
        self.cancel.cancel();

        let deadline = Instant::now() + grace;
        let mut forced = false;
        for worker in self.workers.drain(..) {
            let abort = worker.abort_handle();
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, worker).await {
                Ok(_) => {}
                Err(_) => {
                    abort.abort();
                    forced = true;
                }
            }
        }

        let unknown = self.tracker.unresolved().await;
        if forced {
            warn!(stage = self.name, "Stage workers aborted after grace period");
        }
        for offset in &unknown {
            warn!(stage = self.name, offset = %offset, "Unit outcome unknown at stop");
        }
        info!(stage = self.name, "Sink stage stopped");
        StageStop { forced, unknown }
    }
}

/// Owns a worker's sink and guarantees its release on every exit path.
///
/// On the normal path the worker closes the sink in place; if the worker
/// task is aborted instead, dropping the guard spawns the close so the
/// connection is still released.
struct SinkGuard<S: Sink + Send + 'static>(Option<S>);

impl<S: Sink + Send + 'static> SinkGuard<S> {
    async fn close(&mut self) -> crate::Result<()> {
        match self.0.take() {
            Some(mut sink) => sink.close().await,
            None => Ok(()),
        }
    }
}

impl<S: Sink + Send + 'static> Drop for SinkGuard<S> {
    fn drop(&mut self) {
        let Some(mut sink) = self.0.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = sink.close().await {
                    warn!(error = %e, "Sink close failed after abort");
                }
            });
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop<S: Sink + Send + 'static>(
    stage: &'static str,
    worker_idx: usize,
    sink: S,
    reader: BufferReader,
    tracker: TrackerHandle,
    cancel: CancellationToken,
    fetch_timeout: Duration,
    max_deliveries: u32,
) {
    let mut guard = SinkGuard(Some(sink));

    while !cancel.is_cancelled() {
        let messages = match reader.fetch(1, fetch_timeout).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(stage, worker_idx, error = %Error::from(e), "Fetch failed, retrying");
                continue;
            }
        };

        for message in messages {
            let unit = WorkUnit::from(message);
            tracker.begin(unit.offset.clone()).await;

            // The guard holds the sink until the close below.
            let Some(sink) = guard.0.as_mut() else {
                return;
            };
            match process_unit(sink, &unit).await {
                DeliveryOutcome::Ack(offset) => {
                    if tracker.resolve_ack(offset.clone()).await
                        && let Err(e) = reader.ack(&offset).await
                    {
                        error!(stage, offset = %offset, error = %Error::from(e), "Ack failed");
                    }
                }
                DeliveryOutcome::Fail(offset, cause) => {
                    if unit.delivery_count >= max_deliveries {
                        if tracker.resolve_fail(offset.clone()).await {
                            warn!(stage, offset = %offset, cause, "Delivery budget exhausted, unit failed");
                        }
                    } else {
                        tracker.retry(offset.clone()).await;
                    }
                    if let Err(e) = reader.nack(&offset).await {
                        error!(stage, offset = %offset, error = %Error::from(e), "Nack failed");
                    }
                }
            }
        }
    }

    if let Err(e) = guard.close().await {
        warn!(stage, worker_idx, error = %e, "Sink close failed");
    }
}
