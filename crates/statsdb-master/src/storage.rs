//! Persistence backends for the master tree.
//!
//! The persisted form is a flat list of per-path records, one per node,
//! keyed by a level-name-to-key id map. Values are stored raw, without
//! derived aggregates; the master rebuilds those on load.

#[cfg(test)]
#[path = "tests/storage.rs"]
mod tests;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use statsdb::time::epoch_millis;
use statsdb::{KeySchema, NodeData, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// A persistence backend failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage io failure")]
    Io(#[from] io::Error),
    #[error("storage codec failure")]
    Json(#[from] serde_json::Error),
}

/// Where the master tree lives between process runs.
pub trait Storage<V: Value>: Send + Sync {
    /// The persisted tree, raw values only. An absent backing store is an
    /// empty tree, not an error.
    ///
    /// # Errors
    ///
    /// A present but unreadable backing store.
    fn load(&self, schema: &KeySchema<V>) -> eyre::Result<BTreeMap<String, NodeData<V>>>;

    /// Persists `tree`. Safe to call repeatedly; a backend may skip the
    /// write when nothing changed since its last successful store.
    ///
    /// # Errors
    ///
    /// A failed write. The previously persisted state must survive it.
    fn store(&self, schema: &KeySchema<V>, tree: &BTreeMap<String, NodeData<V>>)
        -> eyre::Result<()>;

    /// Drops all persisted state.
    ///
    /// # Errors
    ///
    /// A failed removal.
    fn remove_all(&self) -> eyre::Result<()>;
}

/// The ephemeral backend: loads nothing, stores nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStorage;

impl<V: Value> Storage<V> for NullStorage {
    fn load(&self, _schema: &KeySchema<V>) -> eyre::Result<BTreeMap<String, NodeData<V>>> {
        Ok(BTreeMap::new())
    }

    fn store(
        &self,
        _schema: &KeySchema<V>,
        _tree: &BTreeMap<String, NodeData<V>>,
    ) -> eyre::Result<()> {
        Ok(())
    }

    fn remove_all(&self) -> eyre::Result<()> {
        Ok(())
    }
}

/// One persisted node: its path as a level-name-to-key map, its raw value,
/// and its modification time.
#[derive(Debug, Deserialize, Serialize)]
#[serde(bound(serialize = "V: Serialize", deserialize = "V: serde::de::DeserializeOwned"))]
struct Record<V> {
    id: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<V>,
    modified_at: u64,
}

/// A single-file JSON backend holding the flat record list.
///
/// Stores are skipped entirely when no node was modified since the last
/// successful store, and otherwise written atomically via a temp-file
/// rename.
#[derive(Debug)]
pub struct JsonStorage {
    path: Utf8PathBuf,
    last_fsync: AtomicU64,
}

impl JsonStorage {
    #[must_use]
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            last_fsync: AtomicU64::new(0),
        }
    }

    fn read_records<V: Value>(&self) -> Result<Vec<Record<V>>, StorageError> {
        let file = File::open(&self.path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn write_records<V: Value>(&self, records: &[Record<V>]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, records)?;
        writer.flush()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl<V: Value> Storage<V> for JsonStorage {
    fn load(&self, schema: &KeySchema<V>) -> eyre::Result<BTreeMap<String, NodeData<V>>> {
        if !self.path.exists() {
            debug!(path = %self.path, "no persisted tree");
            return Ok(BTreeMap::new());
        }

        let records: Vec<Record<V>> = self.read_records()?;
        debug!(path = %self.path, records = records.len(), "loading persisted tree");

        let mut tree: BTreeMap<String, NodeData<V>> = BTreeMap::new();
        for record in records {
            let path = record_path(schema, &record.id);
            let Some((first, rest)) = path.split_first() else {
                warn!(path = %self.path, "skipping record with no resolvable path");
                continue;
            };
            let mut node = tree.entry(first.clone()).or_insert_with(empty_node);
            for key in rest {
                node = node.children.entry(key.clone()).or_insert_with(empty_node);
            }
            node.value = record.value;
            node.modified_at = record.modified_at;
        }
        Ok(tree)
    }

    fn store(
        &self,
        schema: &KeySchema<V>,
        tree: &BTreeMap<String, NodeData<V>>,
    ) -> eyre::Result<()> {
        let started = epoch_millis();
        let last_fsync = self.last_fsync.load(Ordering::Acquire);

        let records = flatten(schema, tree);
        if !records.iter().any(|r| r.modified_at >= last_fsync) {
            debug!(path = %self.path, "tree unchanged, skipping store");
            return Ok(());
        }

        debug!(path = %self.path, records = records.len(), "persisting tree");
        self.write_records(&records)?;
        self.last_fsync.store(started, Ordering::Release);
        Ok(())
    }

    fn remove_all(&self) -> eyre::Result<()> {
        self.last_fsync.store(0, Ordering::Release);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err).into()),
        }
    }
}

fn empty_node<V: Value>() -> NodeData<V> {
    NodeData {
        value: None,
        children: BTreeMap::new(),
        modified_at: 0,
    }
}

/// The record's path in schema order, stopping at the first absent level.
fn record_path<V: Value>(schema: &KeySchema<V>, id: &BTreeMap<String, String>) -> Vec<String> {
    let mut path = Vec::new();
    for level in 0..schema.len() {
        let Some(key) = schema.level(level).and_then(|l| id.get(l.name())) else {
            break;
        };
        path.push(key.clone());
    }
    path
}

fn flatten<V: Value>(schema: &KeySchema<V>, tree: &BTreeMap<String, NodeData<V>>) -> Vec<Record<V>> {
    let mut records = Vec::new();
    let mut id = BTreeMap::new();
    for (key, node) in tree {
        flatten_node(schema, 0, key, node, &mut id, &mut records);
    }
    records
}

fn flatten_node<V: Value>(
    schema: &KeySchema<V>,
    level: usize,
    key: &str,
    node: &NodeData<V>,
    id: &mut BTreeMap<String, String>,
    records: &mut Vec<Record<V>>,
) {
    let Some(name) = schema.level(level).map(|l| l.name().to_owned()) else {
        return;
    };
    drop(id.insert(name.clone(), key.to_owned()));

    records.push(Record {
        id: id.clone(),
        value: node.value.clone(),
        modified_at: node.modified_at,
    });
    for (child_key, child) in &node.children {
        flatten_node(schema, level + 1, child_key, child, id, records);
    }

    drop(id.remove(&name));
}
