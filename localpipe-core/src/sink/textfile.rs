//! Delimited text-file sink.

use localpipe_stores::localfs::LocalFs;
use serde_json::Value;
use tracing::info;

use super::Sink;
use crate::error::Error;
use crate::message::{Record, TargetLocation, WorkUnit};
use crate::Result;

/// Appends one delimited line per unit to a per-partition file under the
/// configured output directory. Field order follows the record's key order,
/// so lines for the same document shape are stable.
pub struct TextFileSink {
    fs: LocalFs,
    output_dir: String,
    delimiter: String,
    closed: bool,
}

impl TextFileSink {
    pub fn new(fs: LocalFs, output_dir: &str, delimiter: &str) -> Self {
        Self {
            fs,
            output_dir: output_dir.trim_end_matches('/').to_string(),
            delimiter: delimiter.to_string(),
            closed: false,
        }
    }

    fn format_line(&self, value: &Value) -> String {
        match value {
            Value::Object(map) => map
                .values()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(&self.delimiter),
            other => other.to_string(),
        }
    }
}

impl Sink for TextFileSink {
    fn should_act_on(&self, _unit: &WorkUnit) -> bool {
        true
    }

    fn resolve_target(&self, unit: &WorkUnit) -> TargetLocation {
        TargetLocation {
            collection: self.output_dir.clone(),
            partition: unit.offset.partition_idx,
        }
    }

    fn build_record(&self, unit: &WorkUnit) -> Option<Record> {
        unit.json().map(Record)
    }

    async fn write(&mut self, record: Record, target: TargetLocation) -> Result<()> {
        let path = format!("{}/part-{}.txt", target.collection, target.partition);
        let line = self.format_line(&record.0);
        self.fs
            .append_line(&path, &line)
            .map_err(|e| Error::Sink(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            info!(output_dir = %self.output_dir, "Text file sink closed");
        }
        Ok(())
    }
}
