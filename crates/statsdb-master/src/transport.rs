//! In-process delivery of sync envelopes into a master.

use std::sync::Arc;

use statsdb::{SyncEnvelope, Value};
use statsdb_node::Transport;
use tracing::trace;

use crate::master::StatsDbMaster;
use crate::storage::Storage;

/// A transport that hands envelopes straight to a co-located master.
///
/// Delivery never fails; duplicate and stale envelopes are absorbed by the
/// master's watermark check, so the resend contract holds trivially.
pub struct LoopbackTransport<V: Value, S: Storage<V>> {
    master: Arc<StatsDbMaster<V, S>>,
}

impl<V: Value, S: Storage<V>> LoopbackTransport<V, S> {
    #[must_use]
    pub fn new(master: Arc<StatsDbMaster<V, S>>) -> Self {
        Self { master }
    }
}

impl<V: Value, S: Storage<V>> Transport<V> for LoopbackTransport<V, S> {
    fn send(&self, sync: &SyncEnvelope<V>) -> eyre::Result<()> {
        trace!(origin = %sync.origin, id = %sync.id, "loopback delivery");
        let _processed = self.master.apply_sync(sync, &sync.origin);
        Ok(())
    }
}
