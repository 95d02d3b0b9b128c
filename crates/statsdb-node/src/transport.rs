//! The wire boundary between a node accumulator and the master.

use statsdb::{SyncEnvelope, Value};

/// Delivers sync envelopes to the master.
///
/// The wire format and delivery mechanics are owned by the implementor;
/// the accumulator only needs a yes/no outcome. Implementations must be
/// safe to invoke repeatedly with the same envelope - the accumulator's
/// retry loop relies on idempotent resends, and the master deduplicates
/// by origin and id.
pub trait Transport<V: Value>: Send + Sync {
    /// Attempts to deliver one envelope.
    ///
    /// # Errors
    ///
    /// Any error means "not acknowledged": the accumulator keeps the
    /// envelope pending and retries on its next sync tick.
    fn send(&self, sync: &SyncEnvelope<V>) -> eyre::Result<()>;
}
