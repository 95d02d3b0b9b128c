//! Tree vertices: the live, concurrently-mutable [`Node`] and its frozen,
//! serializable counterpart [`NodeData`].
//!
//! Live nodes are owned exclusively by the tree they belong to. Anything
//! that crosses a process or sync boundary - envelopes, storage records -
//! is a `NodeData` tree: values are copied across the boundary, never
//! shared.

#[cfg(test)]
#[path = "tests/node.rs"]
mod tests;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::time::epoch_millis;
use crate::value::{MergeError, Value};

/// A live tree vertex: an optional value under its own mutex, a concurrent
/// child map, and a last-modified timestamp for dirty tracking.
///
/// Leaf value mutation is atomic per node; child get-or-create is atomic
/// per key. No operation holds more than one node's value lock at a time.
pub struct Node<V> {
    value: Mutex<Option<V>>,
    children: DashMap<String, Arc<Node<V>>>,
    modified_at: AtomicU64,
}

impl<V: Value> Node<V> {
    /// A valueless routing node.
    pub(crate) fn new() -> Self {
        Self::with_value(None)
    }

    /// A node seeded with `value` (or valueless when `None`).
    pub(crate) fn with_value(value: Option<V>) -> Self {
        Self {
            value: Mutex::new(value),
            children: DashMap::new(),
            modified_at: AtomicU64::new(epoch_millis()),
        }
    }

    /// Clone of the current value, if any.
    pub(crate) fn value(&self) -> Option<V> {
        self.value.lock().clone()
    }

    /// Applies `update` to the value, creating it via `create` first when
    /// absent. Atomic with respect to other mutations of this node.
    pub(crate) fn update_value<U, C>(&self, update: U, create: C)
    where
        U: FnOnce(&mut V),
        C: FnOnce() -> V,
    {
        let mut guard = self.value.lock();
        update(guard.get_or_insert_with(create));
        drop(guard);
        self.touch();
    }

    /// Merges `remote` into this node's value; a valueless node adopts the
    /// remote value outright.
    pub(crate) fn merge_value(&self, remote: &V) -> Result<(), MergeError> {
        let mut guard = self.value.lock();
        let result = match guard.as_mut() {
            Some(value) => value.merge(remote),
            None => {
                *guard = Some(remote.clone());
                Ok(())
            }
        };
        drop(guard);
        if result.is_ok() {
            self.touch();
        }
        result
    }

    /// Replaces the value with the aggregate recomputed over `children`.
    /// No-op on valueless nodes.
    pub(crate) fn aggregate_value(&self, children: &[V]) {
        if let Some(value) = self.value.lock().as_mut() {
            value.aggregate(children);
        }
    }

    /// The existing child at `key`, if any.
    pub(crate) fn child(&self, key: &str) -> Option<Arc<Node<V>>> {
        self.children.get(key).map(|c| Arc::clone(c.value()))
    }

    /// Atomic get-or-create of the child at `key`; `default` seeds the
    /// value of a newly created node.
    pub(crate) fn child_or_create<D>(&self, key: &str, default: D) -> Arc<Node<V>>
    where
        D: FnOnce() -> Option<V>,
    {
        self.children
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Node::with_value(default())))
            .value()
            .clone()
    }

    /// The concurrent child map.
    pub(crate) fn children(&self) -> &DashMap<String, Arc<Node<V>>> {
        &self.children
    }

    /// Last-modified timestamp, epoch millis.
    pub(crate) fn modified_at(&self) -> u64 {
        self.modified_at.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.modified_at.store(epoch_millis(), Ordering::Release);
    }

    /// Deep copy into the frozen representation.
    pub(crate) fn freeze(&self) -> NodeData<V> {
        NodeData {
            value: self.value(),
            children: self
                .children
                .iter()
                .map(|e| (e.key().clone(), e.value().freeze()))
                .collect(),
            modified_at: self.modified_at(),
        }
    }

    /// Reconstructs a live subtree from its frozen representation.
    pub(crate) fn thaw(data: NodeData<V>) -> Self {
        Self {
            value: Mutex::new(data.value),
            children: data
                .children
                .into_iter()
                .map(|(k, c)| (k, Arc::new(Node::thaw(c))))
                .collect(),
            modified_at: AtomicU64::new(data.modified_at),
        }
    }
}

/// A frozen subtree: the serializable form carried by sync envelopes and
/// handed to storage.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(bound(serialize = "V: Serialize", deserialize = "V: serde::de::DeserializeOwned"))]
pub struct NodeData<V> {
    /// The node's raw value; aggregates are recomputed, not carried.
    pub value: Option<V>,
    /// Child key to child subtree.
    #[serde(default = "BTreeMap::new", skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, NodeData<V>>,
    /// Last-modified timestamp, epoch millis.
    pub modified_at: u64,
}

impl<V: Value> NodeData<V> {
    /// A frozen node with `value` and no children.
    #[must_use]
    pub fn with_value(value: Option<V>) -> Self {
        Self {
            value,
            children: BTreeMap::new(),
            modified_at: epoch_millis(),
        }
    }
}
