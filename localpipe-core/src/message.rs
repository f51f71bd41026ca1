//! Message model shared by the producer, the transport, and the sinks.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;

use localpipe_stores::buffer::{Offset, ReadMessage};

/// Header the producer sets on units a sink should skip.
pub const SKIP_HEADER: &str = "skip";

/// One unit of work as fetched from a stage buffer. Immutable once fetched.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub value: Bytes,
    pub headers: HashMap<String, String>,
    pub offset: Offset,
    pub event_time: DateTime<Utc>,
    /// How many times the transport has handed this unit to a consumer.
    pub delivery_count: u32,
}

impl From<ReadMessage> for WorkUnit {
    fn from(msg: ReadMessage) -> Self {
        Self {
            value: msg.payload,
            headers: msg.headers,
            offset: msg.offset,
            event_time: Utc::now(),
            delivery_count: msg.delivery_count,
        }
    }
}

impl WorkUnit {
    /// Parse the payload as a JSON document.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.value).ok()
    }
}

/// Terminal outcome of processing one unit. Exactly one of these is reported
/// per fetched unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ack(Offset),
    Fail(Offset, String),
}

impl DeliveryOutcome {
    pub fn offset(&self) -> &Offset {
        match self {
            DeliveryOutcome::Ack(offset) => offset,
            DeliveryOutcome::Fail(offset, _) => offset,
        }
    }
}

/// Where a record should land inside a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLocation {
    pub collection: String,
    pub partition: u16,
}

/// A document ready to be written by a sink.
#[derive(Debug, Clone)]
pub struct Record(pub Value);
