use std::future::Future;

use crate::error::CdcResult;
use crate::types::Event;

/// Trait for systems that can receive captured change events.
///
/// [`Destination`] implementations define how the event sequence produced by
/// a capture pass is handed to the loader. Events arrive in commit order, as
/// finite batches bounded by the session's batch configuration; delivery is
/// at-least-once across capture passes, so implementations must tolerate
/// duplicate events at the resumption boundary.
///
/// The trait also provides an optional [`Destination::shutdown`] method with
/// a default no-op implementation. Override this method if your destination
/// requires cleanup or bookkeeping when the session shuts down.
pub trait Destination {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Writes a batch of captured events to the destination.
    ///
    /// The capture session calls this whenever a batch fills or its flush
    /// deadline passes; an error aborts the pass.
    fn write_events(&self, events: Vec<Event>) -> impl Future<Output = CdcResult<()>> + Send;

    /// Propagates the shutdown signal to the destination.
    ///
    /// Override this method if the destination needs to perform cleanup or
    /// bookkeeping when the session shuts down. The default implementation is
    /// a no-op.
    fn shutdown(&self) -> impl Future<Output = CdcResult<()>> + Send {
        async { Ok(()) }
    }
}
