//! The node accumulator: a local delta tree plus the crash-safe sync loop.

#[cfg(test)]
#[path = "tests/node.rs"]
mod tests;

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use statsdb::time::epoch_millis;
use statsdb::{IdGenerator, KeySchema, StatsDb, SyncEnvelope, UniqueIdGenerator, Value};
use tracing::{debug, error, info};

use crate::transport::Transport;

/// File name of the write-ahead envelope inside the durable directory.
const SYNC_FILE: &str = "sync.db.json";

/// A node-side accumulator.
///
/// Application threads call [`update`](StatsDb::update) (via `Deref`)
/// concurrently; a scheduler periodically calls [`sync`](Self::sync).
/// Deltas are never aggregated locally - aggregation is a master-only
/// operation on merged totals.
pub struct StatsDbNode<V: Value> {
    db: StatsDb<V>,
    origin: String,
    transport: Arc<dyn Transport<V>>,
    ids: Arc<dyn IdGenerator>,
    directory: Option<Utf8PathBuf>,
    pending: Mutex<Option<SyncEnvelope<V>>>,
    last_sync_success: AtomicBool,
}

impl<V: Value> StatsDbNode<V> {
    /// An accumulator with the default time-based id generator.
    ///
    /// When `directory` is given, a leftover write-ahead envelope from a
    /// previous run is loaded as the pending envelope before any new
    /// activity, guaranteeing at-least-once redelivery across restarts.
    pub fn new(
        schema: KeySchema<V>,
        origin: impl Into<String>,
        transport: Arc<dyn Transport<V>>,
        directory: Option<Utf8PathBuf>,
    ) -> Self {
        Self::with_id_generator(
            schema,
            origin,
            transport,
            directory,
            Arc::new(UniqueIdGenerator::new()),
        )
    }

    /// An accumulator with an explicit id generator (tests use the
    /// incremental one).
    pub fn with_id_generator(
        schema: KeySchema<V>,
        origin: impl Into<String>,
        transport: Arc<dyn Transport<V>>,
        directory: Option<Utf8PathBuf>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let pending = directory.as_deref().and_then(Self::load_pending);
        Self {
            db: StatsDb::new(schema),
            origin: origin.into(),
            transport,
            ids,
            directory,
            pending: Mutex::new(pending),
            last_sync_success: AtomicBool::new(false),
        }
    }

    /// Whether the most recent [`sync`](Self::sync) completed without a
    /// transport failure. Starts out `false`.
    pub fn last_sync_success(&self) -> bool {
        self.last_sync_success.load(Ordering::Acquire)
    }

    /// Snapshots the delta tree (unless a prior envelope is still
    /// unacknowledged) and attempts delivery.
    ///
    /// Mutually exclusive with itself: a second invocation blocks until
    /// the first completes. Transport failures are logged and reflected in
    /// [`last_sync_success`](Self::last_sync_success), never raised.
    pub fn sync(&self) {
        let mut pending = self.pending.lock();

        if pending.is_none() {
            let snapshot = self.db.take_snapshot();
            if snapshot.is_empty() {
                self.last_sync_success.store(true, Ordering::Release);
                return;
            }
            let envelope = SyncEnvelope {
                origin: self.origin.clone(),
                id: self.ids.next_id(),
                timestamp: epoch_millis(),
                data: snapshot,
            };
            debug!(id = %envelope.id, roots = envelope.data.len(), "captured sync snapshot");
            // Write-ahead: the envelope must be durable before the first
            // transmission attempt.
            self.save_pending(Some(&envelope));
            *pending = Some(envelope);
        }

        // A retry resends the same envelope with its original (id,
        // timestamp); updates racing with an in-flight send accumulate in
        // the live tree for the next snapshot.
        let delivered = match pending.as_ref() {
            Some(envelope) => match self.transport.send(envelope) {
                Ok(()) => {
                    debug!(id = %envelope.id, "sync acknowledged");
                    true
                }
                Err(err) => {
                    error!(%err, id = %envelope.id, "sync transmission failed");
                    false
                }
            },
            None => true,
        };

        if delivered {
            *pending = None;
            self.save_pending(None);
        }
        self.last_sync_success.store(delivered, Ordering::Release);
    }

    /// Clears the delta tree, the pending envelope, and the write-ahead
    /// file.
    pub fn remove_all(&self) {
        let mut pending = self.pending.lock();
        self.db.remove_all();
        *pending = None;
        self.save_pending(None);
    }

    /// Final best-effort drain; call before shutdown.
    pub fn close(&self) {
        info!(origin = %self.origin, "close");
        self.sync();
    }

    fn load_pending(directory: &Utf8Path) -> Option<SyncEnvelope<V>> {
        let path = directory.join(SYNC_FILE);
        if !path.exists() {
            debug!(%path, "no pending sync envelope");
            return None;
        }
        let loaded: eyre::Result<SyncEnvelope<V>> = (|| {
            let file = File::open(&path)?;
            Ok(serde_json::from_reader(BufReader::new(file))?)
        })();
        match loaded {
            Ok(envelope) => {
                info!(%path, id = %envelope.id, "loaded pending sync envelope");
                Some(envelope)
            }
            Err(err) => {
                error!(%err, %path, "failed to read pending sync envelope");
                None
            }
        }
    }

    /// Persists or clears the write-ahead file. Failures are logged and
    /// swallowed: persistence trouble must not block accumulation.
    fn save_pending(&self, pending: Option<&SyncEnvelope<V>>) {
        let Some(directory) = &self.directory else {
            return;
        };
        let path = directory.join(SYNC_FILE);
        match pending {
            Some(envelope) => {
                debug!(%path, id = %envelope.id, "persisting pending sync envelope");
                if let Err(err) = write_envelope(&path, envelope) {
                    error!(%err, %path, "failed to persist pending sync envelope");
                }
            }
            None => {
                debug!(%path, "clearing pending sync envelope");
                if let Err(err) = fs::remove_file(&path) {
                    if err.kind() != io::ErrorKind::NotFound {
                        error!(%err, %path, "failed to remove pending sync envelope");
                    }
                }
            }
        }
    }
}

impl<V: Value> Deref for StatsDbNode<V> {
    type Target = StatsDb<V>;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

fn write_envelope<V: Value>(path: &Utf8Path, envelope: &SyncEnvelope<V>) -> eyre::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut writer = BufWriter::new(File::create(&tmp)?);
    serde_json::to_writer(&mut writer, envelope)?;
    writer.flush()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
