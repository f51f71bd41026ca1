//! Harness configuration.
//!
//! A flat key-value property set parsed once into [`Settings`]. Unknown keys
//! are ignored, missing keys fall back to defaults, malformed values are a
//! config error. No runtime reconfiguration.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_MESSAGE_COUNT: usize = 10;
const DEFAULT_TOPIC: &str = "test-units";
const DEFAULT_PAYLOAD_TEMPLATE: &str = "test-unit";
const DEFAULT_SINK_PARALLELISM: usize = 2;
const DEFAULT_BUFFER_CAPACITY: usize = 100;
const DEFAULT_BUFFER_USAGE_LIMIT: f64 = 0.8;
const DEFAULT_MAX_DELIVERIES: u32 = 3;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 200;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_KILL_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_DATABASE: &str = "default";
const DEFAULT_TABLE: &str = "units";
const DEFAULT_COLLECTION: &str = "units";
const DEFAULT_OUTPUT_DIR: &str = "/output/units";
const DEFAULT_BASE_PORT: u16 = 21000;

/// Resolved harness settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Number of work units the producer emits.
    pub message_count: usize,
    /// Logical topic name, used to name the stage buffers.
    pub topic: String,
    /// Prefix for generated unit payloads.
    pub payload_template: String,
    /// Worker count per sink stage.
    pub sink_parallelism: usize,
    pub buffer_capacity: usize,
    pub buffer_usage_limit: f64,
    /// Delivery budget before a nacked unit is finalized as failed.
    pub max_deliveries: u32,
    /// How long a stage worker waits on one fetch before re-checking for
    /// shutdown.
    pub fetch_timeout: Duration,
    pub drain_timeout: Duration,
    /// Grace period between a graceful stop request and a forced abort.
    pub kill_timeout: Duration,
    pub database: String,
    pub table: String,
    pub collection: String,
    /// Filesystem directory the text sink writes under; also the output
    /// table's location.
    pub output_dir: String,
    /// First port assigned to started services.
    pub base_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            message_count: DEFAULT_MESSAGE_COUNT,
            topic: DEFAULT_TOPIC.to_string(),
            payload_template: DEFAULT_PAYLOAD_TEMPLATE.to_string(),
            sink_parallelism: DEFAULT_SINK_PARALLELISM,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            buffer_usage_limit: DEFAULT_BUFFER_USAGE_LIMIT,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
            kill_timeout: Duration::from_millis(DEFAULT_KILL_TIMEOUT_MS),
            database: DEFAULT_DATABASE.to_string(),
            table: DEFAULT_TABLE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
            base_port: DEFAULT_BASE_PORT,
        }
    }
}

impl Settings {
    /// Build settings from a flat property map.
    pub fn load(props: &HashMap<String, String>) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(v) = props.get("message.count") {
            settings.message_count = parse(v, "message.count")?;
        }
        if let Some(v) = props.get("topic") {
            settings.topic = v.clone();
        }
        if let Some(v) = props.get("payload.template") {
            settings.payload_template = v.clone();
        }
        if let Some(v) = props.get("sink.parallelism") {
            settings.sink_parallelism = parse(v, "sink.parallelism")?;
        }
        if let Some(v) = props.get("buffer.capacity") {
            settings.buffer_capacity = parse(v, "buffer.capacity")?;
        }
        if let Some(v) = props.get("buffer.usage.limit") {
            settings.buffer_usage_limit = parse(v, "buffer.usage.limit")?;
        }
        if let Some(v) = props.get("max.deliveries") {
            settings.max_deliveries = parse(v, "max.deliveries")?;
        }
        if let Some(v) = props.get("fetch.timeout.ms") {
            settings.fetch_timeout = Duration::from_millis(parse(v, "fetch.timeout.ms")?);
        }
        if let Some(v) = props.get("drain.timeout.ms") {
            settings.drain_timeout = Duration::from_millis(parse(v, "drain.timeout.ms")?);
        }
        if let Some(v) = props.get("kill.timeout.ms") {
            settings.kill_timeout = Duration::from_millis(parse(v, "kill.timeout.ms")?);
        }
        if let Some(v) = props.get("database") {
            settings.database = v.clone();
        }
        if let Some(v) = props.get("table") {
            settings.table = v.clone();
        }
        if let Some(v) = props.get("collection") {
            settings.collection = v.clone();
        }
        if let Some(v) = props.get("output.dir") {
            settings.output_dir = v.clone();
        }
        if let Some(v) = props.get("base.port") {
            settings.base_port = parse(v, "base.port")?;
        }

        if settings.sink_parallelism == 0 {
            return Err(Error::Config(
                "sink.parallelism must be at least 1".to_string(),
            ));
        }
        if settings.max_deliveries == 0 {
            return Err(Error::Config("max.deliveries must be at least 1".to_string()));
        }
        Ok(settings)
    }
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid value {value:?} for key {key:?}")))
}
