//! Pipeline run orchestration.
//!
//! Owns the service handles and the run state machine:
//! `Idle → Starting(i) → Running → Submitted → Draining → Stopping(j) → Done`.
//! Startup rolls back in reverse on any failure, submission wires the
//! producer, buffers and sink stages strictly from live connection info,
//! drain polls the stage trackers, and teardown stops everything in strict
//! reverse start order regardless of individual failures.

use std::sync::Arc;
use std::time::Duration;

use localpipe_stores::docstore::{DocStore, Durability};
use localpipe_stores::localfs::LocalFs;
use localpipe_stores::registry::Registry;
use localpipe_stores::tablestore::{Column, TableSchema, TableStore};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::producer::Producer;
use crate::service::{BrokerService, ServiceHandle, ServiceKind};
use crate::sink::{DocStoreSink, TextFileSink};
use crate::stage::SinkStage;

pub const DOCSTORE_STAGE: &str = "docstore-stage";
pub const TEXTFILE_STAGE: &str = "textfile-stage";

const LINE_DELIMITER: &str = "|";
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Starting the i-th service handle.
    Starting(usize),
    Running,
    Submitted,
    Draining,
    /// Stopping the j-th service handle (reverse order).
    Stopping(usize),
    Done,
}

/// Result of waiting for the pipeline to drain. A timeout is a signal the
/// caller acts on, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStatus {
    Drained,
    TimedOut { remaining: u64 },
}

type SkipPredicate = Arc<dyn Fn(usize) -> bool + Send + Sync>;

pub struct Orchestrator {
    settings: Settings,
    handles: Vec<ServiceHandle>,
    stages: Vec<SinkStage>,
    state: RunState,
    produced: usize,
    skip: Option<SkipPredicate>,
    kill_timed_out: bool,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        let registry = Registry::new();
        let broker = BrokerService::new(
            settings.buffer_capacity,
            settings.buffer_usage_limit,
            settings.max_deliveries,
        );
        let base = settings.base_port;
        let handles = vec![
            ServiceHandle::new(
                "coordination",
                ServiceKind::Coordination(registry.clone()),
                registry.clone(),
                base,
            ),
            ServiceHandle::new(
                "broker",
                ServiceKind::Broker(broker),
                registry.clone(),
                base + 1,
            ),
            ServiceHandle::new(
                "filesystem",
                ServiceKind::Filesystem(LocalFs::new()),
                registry.clone(),
                base + 2,
            ),
            ServiceHandle::new(
                "docstore",
                ServiceKind::DocStore(DocStore::new()),
                registry.clone(),
                base + 3,
            ),
            ServiceHandle::new(
                "metastore",
                ServiceKind::Metastore(TableStore::new()),
                registry,
                base + 4,
            ),
        ];

        Self {
            settings,
            handles,
            stages: Vec::new(),
            state: RunState::Idle,
            produced: 0,
            skip: None,
            kill_timed_out: false,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether the last teardown had to abort stage workers.
    pub fn kill_timed_out(&self) -> bool {
        self.kill_timed_out
    }

    /// Mark units matching the predicate so filtering sinks skip them.
    pub fn set_skip_predicate<F>(&mut self, predicate: F)
    where
        F: Fn(usize) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
    }

    pub fn handle_mut(&mut self, name: &str) -> Option<&mut ServiceHandle> {
        self.handles.iter_mut().find(|h| h.name() == name)
    }

    pub fn docstore(&self) -> Option<DocStore> {
        self.handles.iter().find_map(|h| match h.kind() {
            ServiceKind::DocStore(store) => Some(store.clone()),
            _ => None,
        })
    }

    pub fn filesystem(&self) -> Option<LocalFs> {
        self.handles.iter().find_map(|h| match h.kind() {
            ServiceKind::Filesystem(fs) => Some(fs.clone()),
            _ => None,
        })
    }

    pub fn metastore(&self) -> Option<TableStore> {
        self.handles.iter().find_map(|h| match h.kind() {
            ServiceKind::Metastore(store) => Some(store.clone()),
            _ => None,
        })
    }

    pub fn broker(&self) -> Option<BrokerService> {
        self.handles.iter().find_map(|h| match h.kind() {
            ServiceKind::Broker(broker) => Some(broker.clone()),
            _ => None,
        })
    }

    /// Start every service handle in order. On any failure, already-started
    /// handles are stopped in reverse order before the original error is
    /// surfaced.
    pub fn start_all(&mut self) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start services from {:?}",
                self.state
            )));
        }

        for i in 0..self.handles.len() {
            self.state = RunState::Starting(i);
            let coordination_addr = if i == 0 {
                None
            } else {
                Some(self.handles[0].connection_info()?)
            };

            if let Err(e) = self.handles[i].start(coordination_addr.as_deref()) {
                error!(service = self.handles[i].name(), error = %e, "Service start failed, rolling back");
                for j in (0..i).rev() {
                    if let Err(stop_err) = self.handles[j].stop(true) {
                        warn!(service = self.handles[j].name(), error = %stop_err, "Rollback stop failed");
                    }
                }
                self.state = RunState::Idle;
                return Err(e);
            }
        }

        self.state = RunState::Running;
        info!("All services running");
        Ok(())
    }

    /// Wire producer → buffers → sink stages and emit the configured number
    /// of units. Wiring uses only live connection info; a stopped service
    /// makes submission fail.
    pub async fn submit(&mut self) -> Result<()> {
        if self.state != RunState::Running {
            return Err(Error::InvalidState(format!(
                "cannot submit from {:?}",
                self.state
            )));
        }
        for handle in &self.handles {
            handle.connection_info()?;
        }

        let broker = self
            .broker()
            .ok_or_else(|| Error::NotReady("broker".to_string()))?;
        let fs = self
            .filesystem()
            .ok_or_else(|| Error::NotReady("filesystem".to_string()))?;
        let docstore = self
            .docstore()
            .ok_or_else(|| Error::NotReady("docstore".to_string()))?;
        let metastore = self
            .metastore()
            .ok_or_else(|| Error::NotReady("metastore".to_string()))?;
        let fs_root = self
            .handles
            .iter()
            .find_map(|h| h.temp_root())
            .ok_or_else(|| Error::NotReady("filesystem".to_string()))?
            .to_string();

        // Output directory lives under the per-run filesystem root; the
        // output table points at it.
        let output_dir = format!("{fs_root}{}", self.settings.output_dir);
        fs.mkdir(&output_dir, "777")
            .map_err(|e| Error::Start(e.to_string()))?;
        metastore
            .create_table(TableSchema {
                database: self.settings.database.clone(),
                name: self.settings.table.clone(),
                columns: vec![Column::new("id", "int"), Column::new("msg", "string")],
                partition_keys: vec![],
                location: output_dir.clone(),
            })
            .map_err(|e| Error::Start(e.to_string()))?;

        let docstore_buffer = broker.buffer(DOCSTORE_STAGE);
        let textfile_buffer = broker.buffer(TEXTFILE_STAGE);

        let mut producer = Producer::new(
            vec![docstore_buffer.writer(), textfile_buffer.writer()],
            &self.settings.topic,
            &self.settings.payload_template,
        );
        if let Some(skip) = self.skip.clone() {
            producer = producer.with_skip_predicate(move |seq| skip(seq));
        }
        self.produced = producer.produce(self.settings.message_count).await?;

        let collection = self.settings.collection.clone();
        let sink_store = docstore.clone();
        self.stages.push(SinkStage::start(
            DOCSTORE_STAGE,
            docstore_buffer.reader(),
            self.settings.sink_parallelism,
            self.settings.fetch_timeout,
            self.settings.max_deliveries,
            move || DocStoreSink::new(sink_store.clone(), &collection, Durability::Acknowledged),
        ));
        let sink_fs = fs.clone();
        let sink_dir = output_dir.clone();
        self.stages.push(SinkStage::start(
            TEXTFILE_STAGE,
            textfile_buffer.reader(),
            self.settings.sink_parallelism,
            self.settings.fetch_timeout,
            self.settings.max_deliveries,
            move || TextFileSink::new(sink_fs.clone(), &sink_dir, LINE_DELIMITER),
        ));

        self.state = RunState::Submitted;
        info!(produced = self.produced, "Pipeline submitted");
        Ok(())
    }

    /// Wait until every stage has a terminal outcome for every produced
    /// unit, or until the timeout elapses.
    pub async fn drain(&mut self, timeout: Duration) -> Result<DrainStatus> {
        if !matches!(self.state, RunState::Submitted | RunState::Draining) {
            return Err(Error::InvalidState(format!(
                "cannot drain from {:?}",
                self.state
            )));
        }
        self.state = RunState::Draining;

        let expected = self.produced as u64;
        let deadline = Instant::now() + timeout;
        loop {
            let mut remaining = 0;
            for stage in &self.stages {
                let counts = stage.counts().await;
                remaining += expected.saturating_sub(counts.terminal());
            }
            if remaining == 0 {
                info!(produced = self.produced, "Pipeline drained");
                return Ok(DrainStatus::Drained);
            }
            if Instant::now() >= deadline {
                warn!(remaining, "Drain timed out");
                return Ok(DrainStatus::TimedOut { remaining });
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Tear everything down: stop the stages first (graceful, then forced
    /// after the kill timeout), then the service handles in strict reverse
    /// start order, continuing past individual failures. Idempotent.
    pub async fn stop_all(&mut self) -> Result<()> {
        if self.state == RunState::Done {
            return Ok(());
        }

        for stage in self.stages.drain(..) {
            let name = stage.name();
            let stop = stage.stop(self.settings.kill_timeout).await;
            if stop.forced {
                warn!(stage = name, "Kill timeout elapsed, stage aborted");
                self.kill_timed_out = true;
            }
        }

        for j in (0..self.handles.len()).rev() {
            self.state = RunState::Stopping(j);
            if let Err(e) = self.handles[j].stop(true) {
                error!(service = self.handles[j].name(), error = %e, "Stop failed, continuing teardown");
            }
        }

        self.state = RunState::Done;
        info!("Teardown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::service::ServiceState;
    use crate::validator::{validate_docstore, validate_files};

    fn test_settings() -> Settings {
        Settings {
            drain_timeout: Duration::from_secs(5),
            kill_timeout: Duration::from_millis(500),
            fetch_timeout: Duration::from_millis(50),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_full_run_conserves_counts() {
        let mut orch = Orchestrator::new(test_settings());
        orch.start_all().unwrap();
        orch.submit().await.unwrap();

        let status = orch.drain(orch.settings().drain_timeout).await.unwrap();
        assert_eq!(status, DrainStatus::Drained);

        // Ten units in, ten documents and ten lines out.
        let expected: HashSet<i64> = (1..=10).collect();
        let docs = validate_docstore(&orch.docstore().unwrap(), "units", &expected);
        assert!(docs.is_valid(), "mismatches: {:?}", docs.mismatches);

        let files = validate_files(
            &orch.filesystem().unwrap(),
            &orch.metastore().unwrap(),
            "default",
            "units",
            10,
        )
        .unwrap();
        assert!(files.is_valid(), "mismatches: {:?}", files.mismatches);

        orch.stop_all().await.unwrap();
        assert_eq!(*orch.state(), RunState::Done);
        assert!(!orch.kill_timed_out());
    }

    #[tokio::test]
    async fn test_partial_filter_acks_without_writing() {
        let mut orch = Orchestrator::new(test_settings());
        // Four of ten units are marked for skipping.
        orch.set_skip_predicate(|seq| seq <= 4);
        orch.start_all().unwrap();
        orch.submit().await.unwrap();

        let status = orch.drain(orch.settings().drain_timeout).await.unwrap();
        assert_eq!(status, DrainStatus::Drained);

        // Filtered units are excluded from the expected document set; the
        // text sink does not filter and still writes all ten lines.
        let expected: HashSet<i64> = (5..=10).collect();
        let docs = validate_docstore(&orch.docstore().unwrap(), "units", &expected);
        assert!(docs.is_valid(), "mismatches: {:?}", docs.mismatches);

        let files = validate_files(
            &orch.filesystem().unwrap(),
            &orch.metastore().unwrap(),
            "default",
            "units",
            10,
        )
        .unwrap();
        assert!(files.is_valid(), "mismatches: {:?}", files.mismatches);

        orch.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_is_isolated() {
        let mut settings = test_settings();
        settings.max_deliveries = 1;
        let mut orch = Orchestrator::new(settings);
        orch.start_all().unwrap();

        // Make the document store reject exactly unit 7.
        orch.docstore()
            .unwrap()
            .error_injector()
            .fail_saves_matching(Some("\"id\":7".to_string()));

        orch.submit().await.unwrap();
        let status = orch.drain(orch.settings().drain_timeout).await.unwrap();
        assert_eq!(status, DrainStatus::Drained);

        // Nine documents; unit 7 failed without disturbing the others.
        let docstore = orch.docstore().unwrap();
        assert_eq!(docstore.count("units"), 9);
        let broker = orch.broker().unwrap();
        assert_eq!(broker.buffer(DOCSTORE_STAGE).failed_count(), 1);
        assert_eq!(broker.buffer(DOCSTORE_STAGE).acked_count(), 9);

        // The text sink is unaffected.
        let files = validate_files(
            &orch.filesystem().unwrap(),
            &orch.metastore().unwrap(),
            "default",
            "units",
            10,
        )
        .unwrap();
        assert!(files.is_valid(), "mismatches: {:?}", files.mismatches);

        orch.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_on_partial_startup() {
        let mut orch = Orchestrator::new(test_settings());
        orch.handle_mut("docstore").unwrap().inject_start_failure();

        let err = orch.start_all().unwrap_err();
        assert!(matches!(err, Error::Start(_)));
        assert_eq!(*orch.state(), RunState::Idle);

        // Everything started before the failure was rolled back.
        for name in ["coordination", "broker", "filesystem"] {
            assert_eq!(
                orch.handle_mut(name).unwrap().state(),
                ServiceState::Stopped
            );
        }
        assert_eq!(
            orch.handle_mut("docstore").unwrap().state(),
            ServiceState::Failed
        );
        assert_eq!(
            orch.handle_mut("metastore").unwrap().state(),
            ServiceState::Unstarted
        );
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut orch = Orchestrator::new(test_settings());
        orch.start_all().unwrap();
        orch.submit().await.unwrap();
        orch.drain(orch.settings().drain_timeout).await.unwrap();

        orch.stop_all().await.unwrap();
        orch.stop_all().await.unwrap();
        assert_eq!(*orch.state(), RunState::Done);
    }

    #[tokio::test]
    async fn test_teardown_continues_past_stop_failures() {
        let mut orch = Orchestrator::new(test_settings());
        orch.start_all().unwrap();
        orch.handle_mut("filesystem").unwrap().inject_stop_failure();

        orch.stop_all().await.unwrap();
        for name in ["coordination", "broker", "filesystem", "docstore", "metastore"] {
            assert_eq!(
                orch.handle_mut(name).unwrap().state(),
                ServiceState::Stopped
            );
        }
    }

    #[tokio::test]
    async fn test_submit_requires_running_services() {
        let mut orch = Orchestrator::new(test_settings());
        let err = orch.submit().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_drain_timeout_reports_remaining() {
        let mut orch = Orchestrator::new(test_settings());
        orch.start_all().unwrap();

        // Slow the stage buffers down so the first drain cannot finish.
        let broker = orch.broker().unwrap();
        broker.buffer(DOCSTORE_STAGE).error_injector().set_fetch_latency(100);
        broker.buffer(TEXTFILE_STAGE).error_injector().set_fetch_latency(100);

        orch.submit().await.unwrap();
        let status = orch.drain(Duration::from_millis(1)).await.unwrap();
        match status {
            DrainStatus::TimedOut { remaining } => assert!(remaining > 0),
            DrainStatus::Drained => panic!("expected timeout"),
        }

        // A second drain with the latency cleared completes.
        broker.buffer(DOCSTORE_STAGE).error_injector().set_fetch_latency(0);
        broker.buffer(TEXTFILE_STAGE).error_injector().set_fetch_latency(0);
        let status = orch.drain(orch.settings().drain_timeout).await.unwrap();
        assert_eq!(status, DrainStatus::Drained);

        orch.stop_all().await.unwrap();
    }
}
