//! Service lifecycle handles.
//!
//! Every collaborator the pipeline needs (coordination, broker, filesystem,
//! document store, metastore) is wrapped in a [`ServiceHandle`] with an
//! explicit state machine. A handle is started exactly once, registers its
//! per-run address with the coordination service, hands out connection info
//! only while running, and stops idempotently.

use std::collections::HashMap;
use std::sync::Arc;

use localpipe_stores::buffer::MessageBuffer;
use localpipe_stores::docstore::DocStore;
use localpipe_stores::localfs::LocalFs;
use localpipe_stores::registry::{Registry, Session};
use localpipe_stores::tablestore::TableStore;
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unstarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Broker backend: owns the stage buffers and the transport settings they
/// are created with.
#[derive(Clone)]
pub struct BrokerService {
    buffers: Arc<RwLock<HashMap<&'static str, MessageBuffer>>>,
    capacity: usize,
    usage_limit: f64,
    max_deliveries: u32,
}

impl BrokerService {
    pub fn new(capacity: usize, usage_limit: f64, max_deliveries: u32) -> Self {
        Self {
            buffers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            usage_limit,
            max_deliveries,
        }
    }

    /// Buffer for a stage, created on first use.
    pub fn buffer(&self, name: &'static str) -> MessageBuffer {
        self.buffers
            .write()
            .entry(name)
            .or_insert_with(|| {
                MessageBuffer::with_config(
                    self.capacity,
                    0,
                    name,
                    self.usage_limit,
                    self.max_deliveries,
                )
            })
            .clone()
    }

    fn clear(&self) {
        self.buffers.write().clear();
    }
}

/// The backend a handle manages. Enum dispatch; every variant holds a
/// cloneable client handle to the in-process store.
#[derive(Clone)]
pub enum ServiceKind {
    Coordination(Registry),
    Broker(BrokerService),
    Filesystem(LocalFs),
    DocStore(DocStore),
    Metastore(TableStore),
}

/// One managed service with lifecycle state.
pub struct ServiceHandle {
    name: &'static str,
    kind: ServiceKind,
    state: ServiceState,
    /// Shared coordination backend all handles register through.
    registry: Registry,
    port: u16,
    addr: Option<String>,
    session: Option<Session>,
    /// Unique per-run root directory (filesystem service only).
    temp_root: Option<String>,
    fail_start: bool,
    fail_stop: bool,
}

impl ServiceHandle {
    pub fn new(name: &'static str, kind: ServiceKind, registry: Registry, port: u16) -> Self {
        Self {
            name,
            kind,
            state: ServiceState::Unstarted,
            registry,
            port,
            addr: None,
            session: None,
            temp_root: None,
            fail_start: false,
            fail_stop: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn kind(&self) -> &ServiceKind {
        &self.kind
    }

    /// Per-run root directory, set once the filesystem service is running.
    pub fn temp_root(&self) -> Option<&str> {
        self.temp_root.as_deref()
    }

    /// Make the next start attempt fail.
    pub fn inject_start_failure(&mut self) {
        self.fail_start = true;
    }

    /// Make the next backend stop fail.
    pub fn inject_stop_failure(&mut self) {
        self.fail_stop = true;
    }

    /// Start the service. Valid only from Unstarted; assigns the per-run
    /// address and registers it with the coordination service.
    pub fn start(&mut self, coordination_addr: Option<&str>) -> Result<()> {
        if self.state != ServiceState::Unstarted {
            return Err(Error::InvalidState(format!(
                "cannot start {} from {:?}",
                self.name, self.state
            )));
        }
        self.state = ServiceState::Starting;
        let addr = format!("localhost:{}", self.port);

        if let Err(e) = self.start_backend(coordination_addr, &addr) {
            self.state = ServiceState::Failed;
            return Err(e);
        }

        self.addr = Some(addr);
        self.state = ServiceState::Running;
        info!(service = self.name, addr = self.addr.as_deref(), "Service started");
        Ok(())
    }

    fn start_backend(&mut self, coordination_addr: Option<&str>, addr: &str) -> Result<()> {
        if self.fail_start {
            return Err(Error::Start(format!("{} refused to start", self.name)));
        }

        match &self.kind {
            ServiceKind::Coordination(registry) => {
                registry.serve(addr);
            }
            kind => {
                let coordination_addr = coordination_addr.ok_or_else(|| {
                    Error::Start(format!("{} needs a coordination address", self.name))
                })?;
                let session = self
                    .registry
                    .connect(coordination_addr)
                    .map_err(|e| Error::Start(e.to_string()))?;
                session
                    .register(self.name, addr)
                    .map_err(|e| Error::Start(e.to_string()))?;

                if let ServiceKind::Filesystem(fs) = kind {
                    let root = format!("/run-{}", Uuid::new_v4().simple());
                    fs.mkdir(&root, "777")
                        .map_err(|e| Error::Start(e.to_string()))?;
                    self.temp_root = Some(root);
                }
                self.session = Some(session);
            }
        }
        Ok(())
    }

    /// Address of the service, readable only while it is running.
    pub fn connection_info(&self) -> Result<String> {
        match self.state {
            ServiceState::Running => Ok(self.addr.clone().unwrap_or_default()),
            _ => Err(Error::NotReady(self.name.to_string())),
        }
    }

    /// Stop the service. A no-op on an Unstarted or already Stopped handle.
    /// A backend stop failure is propagated when `force` is false and
    /// swallowed with a warning when `force` is true; either way the handle
    /// ends Stopped.
    pub fn stop(&mut self, force: bool) -> Result<()> {
        match self.state {
            ServiceState::Unstarted | ServiceState::Stopped => return Ok(()),
            _ => {}
        }
        self.state = ServiceState::Stopping;

        if let Some(session) = self.session.take() {
            session.close();
        }

        let backend_result = if self.fail_stop {
            self.fail_stop = false;
            Err(Error::Stop(format!("{} backend refused to stop", self.name)))
        } else {
            match &self.kind {
                ServiceKind::Coordination(registry) => {
                    registry.shutdown();
                    Ok(())
                }
                ServiceKind::Broker(broker) => {
                    broker.clear();
                    Ok(())
                }
                ServiceKind::Filesystem(fs) => {
                    if let Some(root) = &self.temp_root {
                        fs.delete(root, true)
                            .map_err(|e| Error::Stop(e.to_string()))
                    } else {
                        Ok(())
                    }
                }
                ServiceKind::DocStore(_) | ServiceKind::Metastore(_) => Ok(()),
            }
        };

        self.state = ServiceState::Stopped;
        match backend_result {
            Ok(()) => {
                info!(service = self.name, "Service stopped");
                Ok(())
            }
            Err(e) if force => {
                warn!(service = self.name, error = %e, "Stop failure swallowed under force");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
