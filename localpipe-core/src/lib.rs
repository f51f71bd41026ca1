//! Delivery harness for an in-process streaming pipeline.
//!
//! A producer fans work units out to one buffer per sink stage; each stage
//! runs a pool of workers that drive units through a sink's capability
//! trait under a shared execution policy (filtered units ack without a
//! write, failed writes become failed outcomes, nothing escapes the per-unit
//! boundary). The orchestrator owns the collaborating services' lifecycles:
//! deterministic start order with rollback, drain by terminal-outcome
//! counts, and teardown in strict reverse order that tolerates individual
//! failures.

/// Harness configuration.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Message model.
pub mod message;
/// Run orchestration and the run state machine.
pub mod orchestrator;
/// Work-unit producer.
pub mod producer;
/// Service lifecycle handles.
pub mod service;
/// Sink capability trait, execution policy, and the concrete sinks.
pub mod sink;
/// Sink worker stages.
pub mod stage;
/// Tracing setup.
pub mod telemetry;
/// Per-stage outcome tracking.
pub mod tracker;
/// Post-run validation.
pub mod validator;

pub use error::{Error, Result};
