//! In-memory table metastore.
//!
//! Holds table schemas the way a warehouse metastore does: a table lives in
//! a database, has typed columns and optional partition keys, and points at
//! a storage location on the filesystem. The harness creates a table whose
//! location is the text sink's output directory, and validation resolves
//! that location back through `get_table`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Error, Debug, Clone)]
pub enum TableError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    #[error("Failed to insert row: {0}")]
    Insert(String),
}

/// One column definition: name and type string (e.g. "string", "int").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub col_type: String,
}

impl Column {
    pub fn new(name: &str, col_type: &str) -> Self {
        Self {
            name: name.to_string(),
            col_type: col_type.to_string(),
        }
    }
}

/// Schema of a registered table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub database: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub partition_keys: Vec<Column>,
    /// Filesystem directory backing this table's data.
    pub location: String,
}

impl TableSchema {
    fn key(database: &str, name: &str) -> String {
        format!("{database}.{name}")
    }
}

#[derive(Debug, Default)]
struct TableStoreState {
    tables: HashMap<String, TableSchema>,
    rows: HashMap<String, Vec<Vec<String>>>,
}

/// Client handle to the metastore. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct TableStore {
    state: Arc<RwLock<TableStoreState>>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Fails if a table with the same qualified name
    /// already exists.
    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        let key = TableSchema::key(&schema.database, &schema.name);
        let mut state = self.state.write();
        if state.tables.contains_key(&key) {
            return Err(TableError::AlreadyExists(key));
        }
        state.tables.insert(key, schema);
        Ok(())
    }

    /// Drop a table and its rows. With `if_exists` set, dropping a missing
    /// table is a no-op.
    pub fn drop_table(&self, database: &str, name: &str, if_exists: bool) -> Result<()> {
        let key = TableSchema::key(database, name);
        let mut state = self.state.write();
        match state.tables.remove(&key) {
            Some(_) => {
                state.rows.remove(&key);
                Ok(())
            }
            None if if_exists => Ok(()),
            None => Err(TableError::TableNotFound(key)),
        }
    }

    /// Look up a table's schema.
    pub fn get_table(&self, database: &str, name: &str) -> Result<TableSchema> {
        let key = TableSchema::key(database, name);
        self.state
            .read()
            .tables
            .get(&key)
            .cloned()
            .ok_or(TableError::TableNotFound(key))
    }

    /// Insert one row of column values into a table.
    pub fn insert_row(&self, database: &str, name: &str, values: Vec<String>) -> Result<()> {
        let key = TableSchema::key(database, name);
        let mut state = self.state.write();
        let schema = state
            .tables
            .get(&key)
            .ok_or_else(|| TableError::TableNotFound(key.clone()))?;
        if values.len() != schema.columns.len() {
            return Err(TableError::Insert(format!(
                "expected {} values, got {}",
                schema.columns.len(),
                values.len()
            )));
        }
        state.rows.entry(key).or_default().push(values);
        Ok(())
    }

    /// All rows inserted into a table, in insertion order.
    pub fn scan(&self, database: &str, name: &str) -> Result<Vec<Vec<String>>> {
        let key = TableSchema::key(database, name);
        let state = self.state.read();
        if !state.tables.contains_key(&key) {
            return Err(TableError::TableNotFound(key));
        }
        Ok(state.rows.get(&key).cloned().unwrap_or_default())
    }
}
