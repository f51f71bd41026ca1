//! Sink capability trait and the shared per-unit execution policy.
//!
//! A sink declares what it acts on, where a unit's record should land, how
//! the record is built, and how it is written. [`process_unit`] is the one
//! place those capabilities are combined into a delivery outcome; no error
//! escapes it as `Err` — a failed write becomes a `Fail` outcome and the
//! worker pool keeps going.

use tracing::warn;

use crate::Result;
use crate::message::{DeliveryOutcome, Record, TargetLocation, WorkUnit};

mod docstore;
mod textfile;

pub use docstore::DocStoreSink;
pub use textfile::TextFileSink;

/// Set of capabilities a sink implements.
///
/// `should_act_on` and `resolve_target` must be pure: same unit, same
/// answer, no side effects. `close` must be idempotent.
#[trait_variant::make(Sink: Send)]
pub trait LocalSink {
    /// Whether this sink processes the unit at all. Filtered units are
    /// acknowledged without a write.
    fn should_act_on(&self, unit: &WorkUnit) -> bool;

    /// Where the unit's record lands. Deterministic per unit.
    fn resolve_target(&self, unit: &WorkUnit) -> TargetLocation;

    /// Build the record to write. `None` means nothing to write; the unit
    /// is acknowledged.
    fn build_record(&self, unit: &WorkUnit) -> Option<Record>;

    /// Write one record to the backing store.
    async fn write(&mut self, record: Record, target: TargetLocation) -> Result<()>;

    /// Release the sink's store connection. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Run one unit through a sink and produce its delivery outcome.
///
/// Filtered units and units with no record ack without touching the store.
/// A write error is logged and reported as `Fail`; it never propagates.
pub async fn process_unit<S: Sink>(sink: &mut S, unit: &WorkUnit) -> DeliveryOutcome {
    if !sink.should_act_on(unit) {
        return DeliveryOutcome::Ack(unit.offset.clone());
    }

    let Some(record) = sink.build_record(unit) else {
        return DeliveryOutcome::Ack(unit.offset.clone());
    };

    let target = sink.resolve_target(unit);
    match sink.write(record, target).await {
        Ok(()) => DeliveryOutcome::Ack(unit.offset.clone()),
        Err(e) => {
            warn!(offset = %unit.offset, error = %e, "Write failed, reporting unit as failed");
            DeliveryOutcome::Fail(unit.offset.clone(), e.to_string())
        }
    }
}
