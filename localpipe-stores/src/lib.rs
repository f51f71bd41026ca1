//! In-process stateful service backends for the localpipe harness.
//!
//! Each module is a self-contained, in-memory stand-in for one external
//! dependency of the pipeline: the message buffer (broker/transport), the
//! document store, the filesystem, the table metastore, and the coordination
//! registry. All of them support error injection so that negative paths
//! (write failures, unreachable stores, slow acks) can be exercised without
//! real infrastructure.

/// Partitioned message buffer with ack/nack/redelivery semantics.
pub mod buffer;
/// In-memory document store (save/scan with a durability level).
pub mod docstore;
/// In-memory hierarchical filesystem.
pub mod localfs;
/// Coordination registry for service address handoff.
pub mod registry;
/// Table metastore with schemas and storage locations.
pub mod tablestore;
