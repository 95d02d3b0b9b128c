//! The master: canonical tree, per-origin deduplication, and persistence
//! hooks.

#[cfg(test)]
#[path = "tests/master.rs"]
mod tests;

use std::ops::Deref;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use statsdb::{KeySchema, StatsDb, SyncEnvelope, Value};
use tracing::{error, info, warn};

use crate::storage::Storage;

/// The canonical statistics tree plus the sync bookkeeping around it.
///
/// Envelopes from one origin are applied strictly serially and exactly
/// once; envelopes from unrelated origins are merged concurrently, which is
/// safe because value merges are commutative and every node's value is
/// mutated under its own lock.
pub struct StatsDbMaster<V: Value, S: Storage<V>> {
    db: StatsDb<V>,
    storage: S,
    /// Per-origin watermark: the highest envelope id merged so far. The
    /// mutex doubles as the origin's serialization lock, held across the
    /// whole merge.
    watermarks: DashMap<String, Arc<Mutex<String>>>,
}

impl<V: Value, S: Storage<V>> StatsDbMaster<V, S> {
    /// A master over `schema`, seeded from whatever `storage` holds.
    ///
    /// Persisted values are raw, so aggregates are rebuilt for the whole
    /// loaded tree before the master becomes visible.
    ///
    /// # Errors
    ///
    /// Propagates the storage load failure; a master never starts over a
    /// backend it cannot read.
    pub fn new(schema: KeySchema<V>, storage: S) -> eyre::Result<Self> {
        let db = StatsDb::new(schema);
        let loaded = storage.load(db.schema())?;
        if !loaded.is_empty() {
            info!(roots = loaded.len(), "loaded persisted tree");
            db.load_from(loaded);
            db.update_aggregates_all();
        }
        Ok(Self {
            db,
            storage,
            watermarks: DashMap::new(),
        })
    }

    /// Applies one sync envelope from `origin`.
    ///
    /// Returns `true` when the envelope was processed, including the
    /// duplicate case: an id at or below the origin's watermark is
    /// acknowledged without touching the tree, so redelivered envelopes are
    /// harmless. Merge failures inside an accepted envelope are logged per
    /// path and never abort the remaining paths.
    pub fn apply_sync(&self, sync: &SyncEnvelope<V>, origin: &str) -> bool {
        let lock = self
            .watermarks
            .entry(origin.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(String::new())))
            .value()
            .clone();
        let mut watermark = lock.lock();

        if sync.id.as_str() <= watermark.as_str() {
            warn!(%origin, id = %sync.id, %watermark, "duplicate sync ignored");
            return true;
        }
        watermark.clone_from(&sync.id);

        info!(%origin, id = %sync.id, roots = sync.data.len(), "applying sync");
        for path in self.db.merge_data(&sync.data) {
            error!(%origin, id = %sync.id, path = %path.join("."), "merge failed");
        }
        true
    }

    /// Writes the current tree to storage. Safe to call repeatedly, e.g.
    /// from a fixed-delay scheduler.
    ///
    /// # Errors
    ///
    /// Propagates the backend's store failure.
    pub fn flush(&self) -> eyre::Result<()> {
        self.storage.store(self.db.schema(), &self.db.freeze())
    }

    /// Clears the tree, the watermarks, and the persisted state.
    ///
    /// # Errors
    ///
    /// Propagates the backend's removal failure; the in-memory state is
    /// cleared regardless.
    pub fn reset(&self) -> eyre::Result<()> {
        self.db.remove_all();
        self.watermarks.clear();
        self.storage.remove_all()
    }

    /// Final flush before shutdown; the failure is logged, not raised.
    pub fn close(&self) {
        info!("close");
        if let Err(err) = self.flush() {
            error!(%err, "failed to persist tree on close");
        }
    }
}

impl<V: Value, S: Storage<V>> Deref for StatsDbMaster<V, S> {
    type Target = StatsDb<V>;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}
