//! Work-unit producer.
//!
//! Emits a fixed number of JSON units, fanning each unit out to every
//! downstream stage buffer (one buffer per sink stage). Production fails
//! fast: the first rejected write aborts the run and the error reports how
//! many units were fully emitted before it.

use std::collections::HashMap;

use bytes::Bytes;
use localpipe_stores::buffer::BufferWriter;
use serde_json::json;
use tracing::info;

use crate::error::{Error, Result};
use crate::message::SKIP_HEADER;

type SkipPredicate = Box<dyn Fn(usize) -> bool + Send + Sync>;

pub struct Producer {
    writers: Vec<BufferWriter>,
    topic: String,
    payload_template: String,
    skip: Option<SkipPredicate>,
}

impl Producer {
    pub fn new(writers: Vec<BufferWriter>, topic: &str, payload_template: &str) -> Self {
        Self {
            writers,
            topic: topic.to_string(),
            payload_template: payload_template.to_string(),
            skip: None,
        }
    }

    /// Mark units whose sequence number matches the predicate with the skip
    /// header, so filtering sinks pass over them.
    pub fn with_skip_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(usize) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(predicate));
        self
    }

    /// Emit exactly `count` units to every stage buffer. Returns the number
    /// emitted; a failure after partial emission reports the number of units
    /// fully written to all buffers.
    pub async fn produce(&self, count: usize) -> Result<usize> {
        for seq in 1..=count {
            let payload = json!({
                "id": seq,
                "msg": format!("{}-{seq}", self.payload_template),
            });
            let payload = Bytes::from(payload.to_string());

            let mut headers = HashMap::new();
            if self.skip.as_ref().is_some_and(|skip| skip(seq)) {
                headers.insert(SKIP_HEADER.to_string(), "true".to_string());
            }

            let id = format!("{}-{seq}", self.topic);
            for writer in &self.writers {
                writer
                    .write(&id, payload.clone(), headers.clone())
                    .await
                    .map_err(|e| Error::Produce {
                        sent: seq - 1,
                        cause: format!("write to {} failed: {e}", writer.name()),
                    })?;
            }
        }

        info!(count, fanout = self.writers.len(), "Production complete");
        Ok(count)
    }
}
