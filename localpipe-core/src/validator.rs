//! Post-run validation.
//!
//! Compares what the sinks actually persisted against what the producer
//! emitted: document counts and ids in the document store, and line counts
//! across the files under the output table's registered location.

use std::collections::HashSet;

use localpipe_stores::docstore::DocStore;
use localpipe_stores::localfs::LocalFs;
use localpipe_stores::tablestore::TableStore;
use tracing::info;

use crate::error::{Error, Result};

/// Divergent records are sampled up to this many per validation.
const MISMATCH_SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationResult {
    pub expected: usize,
    pub observed: usize,
    /// Bounded sample of divergences, human readable.
    pub mismatches: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.expected == self.observed && self.mismatches.is_empty()
    }
}

/// Check that the document store holds exactly the expected unit ids in
/// `collection`, no more and no fewer.
pub fn validate_docstore(
    store: &DocStore,
    collection: &str,
    expected_ids: &HashSet<i64>,
) -> ValidationResult {
    let docs = store.scan(collection);
    let mut observed_ids = HashSet::new();
    let mut mismatches = Vec::new();

    for doc in &docs {
        match doc.get("id").and_then(|v| v.as_i64()) {
            Some(id) => {
                if !observed_ids.insert(id) && mismatches.len() < MISMATCH_SAMPLE_LIMIT {
                    mismatches.push(format!("duplicate document id {id}"));
                }
                if !expected_ids.contains(&id) && mismatches.len() < MISMATCH_SAMPLE_LIMIT {
                    mismatches.push(format!("unexpected document id {id}"));
                }
            }
            None => {
                if mismatches.len() < MISMATCH_SAMPLE_LIMIT {
                    mismatches.push(format!("document without id: {doc}"));
                }
            }
        }
    }
    for id in expected_ids {
        if !observed_ids.contains(id) && mismatches.len() < MISMATCH_SAMPLE_LIMIT {
            mismatches.push(format!("missing document id {id}"));
        }
    }

    let result = ValidationResult {
        expected: expected_ids.len(),
        observed: docs.len(),
        mismatches,
    };
    info!(
        collection,
        expected = result.expected,
        observed = result.observed,
        "Document store validated"
    );
    result
}

/// Resolve the output table's location from the metastore and count the
/// non-empty lines across every file under it.
pub fn validate_files(
    fs: &LocalFs,
    metastore: &TableStore,
    database: &str,
    table: &str,
    expected_lines: usize,
) -> Result<ValidationResult> {
    let schema = metastore
        .get_table(database, table)
        .map_err(|e| Error::Validation(e.to_string()))?;

    let mut observed = 0;
    let mut mismatches = Vec::new();
    for file in fs.list_files(&schema.location, true) {
        let data = fs
            .open(&file.path)
            .map_err(|e| Error::Validation(e.to_string()))?;
        let lines = data.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
        if lines == 0 && mismatches.len() < MISMATCH_SAMPLE_LIMIT {
            mismatches.push(format!("empty output file {}", file.path));
        }
        observed += lines;
    }

    let result = ValidationResult {
        expected: expected_lines,
        observed,
        mismatches,
    };
    info!(
        table = format!("{database}.{table}"),
        location = schema.location,
        expected = result.expected,
        observed = result.observed,
        "Output files validated"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use localpipe_stores::docstore::Durability;
    use localpipe_stores::tablestore::{Column, TableSchema};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_docstore_validation_passes_on_exact_match() {
        let store = DocStore::new();
        for id in 1..=3 {
            store
                .save("units", json!({"id": id}), Durability::Acknowledged)
                .unwrap();
        }
        let expected: HashSet<i64> = (1..=3).collect();
        let result = validate_docstore(&store, "units", &expected);
        assert!(result.is_valid());
        assert_eq!(result.observed, 3);
    }

    #[test]
    fn test_docstore_validation_reports_missing_and_unexpected() {
        let store = DocStore::new();
        store
            .save("units", json!({"id": 1}), Durability::Acknowledged)
            .unwrap();
        store
            .save("units", json!({"id": 9}), Durability::Acknowledged)
            .unwrap();

        let expected: HashSet<i64> = (1..=2).collect();
        let result = validate_docstore(&store, "units", &expected);
        assert!(!result.is_valid());
        assert!(result.mismatches.iter().any(|m| m.contains("unexpected document id 9")));
        assert!(result.mismatches.iter().any(|m| m.contains("missing document id 2")));
    }

    #[test]
    fn test_mismatch_sample_is_bounded() {
        let store = DocStore::new();
        for id in 100..200 {
            store
                .save("units", json!({"id": id}), Durability::Acknowledged)
                .unwrap();
        }
        let expected: HashSet<i64> = (1..=2).collect();
        let result = validate_docstore(&store, "units", &expected);
        assert!(result.mismatches.len() <= MISMATCH_SAMPLE_LIMIT + 2);
    }

    #[test]
    fn test_file_validation_counts_lines_via_table_location() {
        let fs = LocalFs::new();
        fs.mkdir("/out/units", "777").unwrap();
        fs.append_line("/out/units/part-0.txt", "1|a").unwrap();
        fs.append_line("/out/units/part-0.txt", "2|b").unwrap();
        fs.append_line("/out/units/part-1.txt", "3|c").unwrap();

        let metastore = TableStore::new();
        metastore
            .create_table(TableSchema {
                database: "default".to_string(),
                name: "units".to_string(),
                columns: vec![Column::new("id", "int"), Column::new("msg", "string")],
                partition_keys: vec![],
                location: "/out/units".to_string(),
            })
            .unwrap();

        let result = validate_files(&fs, &metastore, "default", "units", 3).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_file_validation_requires_registered_table() {
        let fs = LocalFs::new();
        let metastore = TableStore::new();
        let result = validate_files(&fs, &metastore, "default", "units", 0);
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
