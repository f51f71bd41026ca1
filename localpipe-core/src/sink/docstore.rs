//! Document-store sink.

use localpipe_stores::docstore::{DocStore, Durability};
use tracing::info;

use super::Sink;
use crate::error::Error;
use crate::message::{Record, SKIP_HEADER, TargetLocation, WorkUnit};
use crate::Result;

/// Writes unit payloads into a document-store collection. Units carrying the
/// skip header are filtered out and acknowledged without a write.
pub struct DocStoreSink {
    store: DocStore,
    collection: String,
    durability: Durability,
    closed: bool,
}

impl DocStoreSink {
    pub fn new(store: DocStore, collection: &str, durability: Durability) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            durability,
            closed: false,
        }
    }
}

impl Sink for DocStoreSink {
    fn should_act_on(&self, unit: &WorkUnit) -> bool {
        !unit.headers.contains_key(SKIP_HEADER)
    }

    fn resolve_target(&self, unit: &WorkUnit) -> TargetLocation {
        TargetLocation {
            collection: self.collection.clone(),
            partition: unit.offset.partition_idx,
        }
    }

    fn build_record(&self, unit: &WorkUnit) -> Option<Record> {
        unit.json().map(Record)
    }

    async fn write(&mut self, record: Record, target: TargetLocation) -> Result<()> {
        self.store
            .save(&target.collection, record.0, self.durability)
            .map_err(|e| Error::Sink(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            info!(collection = %self.collection, "Document sink closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;
    use chrono::Utc;
    use localpipe_stores::buffer::Offset;
    use serde_json::json;

    use super::*;
    use crate::message::DeliveryOutcome;
    use crate::sink::process_unit;

    fn unit(seq: i64, payload: &str, headers: HashMap<String, String>) -> WorkUnit {
        WorkUnit {
            value: Bytes::copy_from_slice(payload.as_bytes()),
            headers,
            offset: Offset::new(seq, 0),
            event_time: Utc::now(),
            delivery_count: 1,
        }
    }

    #[tokio::test]
    async fn test_writes_document() {
        let store = DocStore::new();
        let mut sink = DocStoreSink::new(store.clone(), "units", Durability::Acknowledged);

        let outcome = process_unit(
            &mut sink,
            &unit(1, r#"{"id":1,"msg":"a"}"#, HashMap::new()),
        )
        .await;
        assert!(matches!(outcome, DeliveryOutcome::Ack(_)));
        assert_eq!(store.scan("units"), vec![json!({"id": 1, "msg": "a"})]);
    }

    #[tokio::test]
    async fn test_skip_header_filters() {
        let store = DocStore::new();
        let mut sink = DocStoreSink::new(store.clone(), "units", Durability::Acknowledged);

        let headers = HashMap::from([(SKIP_HEADER.to_string(), "true".to_string())]);
        let outcome = process_unit(&mut sink, &unit(1, r#"{"id":1}"#, headers)).await;
        assert!(matches!(outcome, DeliveryOutcome::Ack(_)));
        assert_eq!(store.count("units"), 0);
    }

    #[tokio::test]
    async fn test_save_failure_becomes_fail() {
        let store = DocStore::new();
        store.error_injector().fail_saves(1);
        let mut sink = DocStoreSink::new(store.clone(), "units", Durability::Acknowledged);

        let outcome = process_unit(&mut sink, &unit(1, r#"{"id":1}"#, HashMap::new())).await;
        assert!(matches!(outcome, DeliveryOutcome::Fail(_, _)));
        assert_eq!(store.count("units"), 0);
    }

    #[tokio::test]
    async fn test_target_is_deterministic() {
        let store = DocStore::new();
        let sink = DocStoreSink::new(store, "units", Durability::Acknowledged);
        let u = unit(4, r#"{"id":4}"#, HashMap::new());
        assert_eq!(sink.resolve_target(&u), sink.resolve_target(&u));
        assert_eq!(sink.resolve_target(&u).collection, "units");
    }
}
