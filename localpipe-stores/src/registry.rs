//! In-memory service registry.
//!
//! Stands in for the coordination service the other stores would announce
//! themselves through: clients `connect` to get a session, services
//! `register` their address under a well-known name, and consumers `lookup`
//! that name to find them. Entries registered through a session are removed
//! when the session closes, mirroring ephemeral-node semantics.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("Failed to connect to registry at {0}")]
    Connect(String),

    #[error("Service not registered: {0}")]
    NotRegistered(String),

    #[error("Session is closed")]
    SessionClosed,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, String>,
    next_session_id: u64,
}

/// The registry itself. Cheap to clone; all clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    state: Arc<RwLock<RegistryState>>,
    connect_string: Arc<RwLock<Option<String>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the registry up on the given connect string.
    pub fn serve(&self, connect_string: &str) {
        *self.connect_string.write() = Some(connect_string.to_string());
    }

    /// Stop serving. Existing sessions fail their next call.
    pub fn shutdown(&self) {
        *self.connect_string.write() = None;
        self.state.write().entries.clear();
    }

    /// Open a session. The connect string must match what the registry is
    /// serving on.
    pub fn connect(&self, connect_string: &str) -> Result<Session> {
        match self.connect_string.read().as_deref() {
            Some(served) if served == connect_string => {}
            _ => return Err(RegistryError::Connect(connect_string.to_string())),
        }

        let session_id = {
            let mut state = self.state.write();
            state.next_session_id += 1;
            state.next_session_id
        };
        Ok(Session {
            state: Arc::clone(&self.state),
            session_id,
            owned: Arc::new(RwLock::new(Some(Vec::new()))),
        })
    }
}

/// One client session. Registrations made through it are ephemeral: closing
/// the session removes them.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<RwLock<RegistryState>>,
    session_id: u64,
    // None once closed.
    owned: Arc<RwLock<Option<Vec<String>>>>,
}

impl Session {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Register a service address under `name`, replacing any previous
    /// registration.
    pub fn register(&self, name: &str, addr: &str) -> Result<()> {
        let mut owned = self.owned.write();
        let owned = owned.as_mut().ok_or(RegistryError::SessionClosed)?;
        self.state
            .write()
            .entries
            .insert(name.to_string(), addr.to_string());
        owned.push(name.to_string());
        Ok(())
    }

    /// Resolve a service name to its registered address.
    pub fn lookup(&self, name: &str) -> Result<String> {
        if self.owned.read().is_none() {
            return Err(RegistryError::SessionClosed);
        }
        self.state
            .read()
            .entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    /// Close the session and remove its registrations. Idempotent.
    pub fn close(&self) {
        if let Some(names) = self.owned.write().take() {
            let mut state = self.state.write();
            for name in names {
                state.entries.remove(&name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        registry.serve("localhost:2000");

        let session = registry.connect("localhost:2000").unwrap();
        session.register("broker", "localhost:9092").unwrap();

        let other = registry.connect("localhost:2000").unwrap();
        assert_eq!(other.lookup("broker").unwrap(), "localhost:9092");
    }

    #[test]
    fn test_connect_requires_serving() {
        let registry = Registry::new();
        assert!(matches!(
            registry.connect("localhost:2000"),
            Err(RegistryError::Connect(_))
        ));

        registry.serve("localhost:2000");
        assert!(matches!(
            registry.connect("localhost:9999"),
            Err(RegistryError::Connect(_))
        ));
    }

    #[test]
    fn test_close_removes_registrations() {
        let registry = Registry::new();
        registry.serve("localhost:2000");

        let session = registry.connect("localhost:2000").unwrap();
        session.register("docstore", "localhost:27017").unwrap();
        session.close();

        let other = registry.connect("localhost:2000").unwrap();
        assert!(matches!(
            other.lookup("docstore"),
            Err(RegistryError::NotRegistered(_))
        ));

        // Closed sessions reject further calls; closing again is a no-op.
        assert!(matches!(
            session.register("x", "y"),
            Err(RegistryError::SessionClosed)
        ));
        session.close();
    }

    #[test]
    fn test_lookup_unknown_name() {
        let registry = Registry::new();
        registry.serve("localhost:2000");
        let session = registry.connect("localhost:2000").unwrap();
        assert!(matches!(
            session.lookup("metastore"),
            Err(RegistryError::NotRegistered(_))
        ));
    }
}
