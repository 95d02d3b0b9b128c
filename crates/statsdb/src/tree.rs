//! The tree navigator: path-based operations shared by the node
//! accumulator and the master.

#[cfg(test)]
#[path = "tests/tree.rs"]
mod tests;

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::node::{Node, NodeData};
use crate::schema::{InvalidPathError, KeySchema};
use crate::value::Value;

/// A row produced by [`StatsDb::select2`]: the values found at levels 1
/// and 2 of one complete two-deep path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Select2<V> {
    pub v1: Option<V>,
    pub v2: Option<V>,
}

/// A row produced by [`StatsDb::select3`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Select3<V> {
    pub v1: Option<V>,
    pub v2: Option<V>,
    pub v3: Option<V>,
}

/// A row produced by [`StatsDb::select4`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Select4<V> {
    pub v1: Option<V>,
    pub v2: Option<V>,
    pub v3: Option<V>,
    pub v4: Option<V>,
}

/// A row produced by [`StatsDb::select5`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Select5<V> {
    pub v1: Option<V>,
    pub v2: Option<V>,
    pub v3: Option<V>,
    pub v4: Option<V>,
    pub v5: Option<V>,
}

/// The shared tree structure: a schema plus a concurrent map of top-level
/// nodes.
///
/// Concurrency model: `update`/`get`/`children`/selects take the outer
/// read lock, so they run fully in parallel; only the whole-map swap in
/// [`take_snapshot`](Self::take_snapshot) and destructive bulk operations
/// take the write lock. Within the tree, child get-or-create is atomic per
/// key and value mutation is atomic per node.
pub struct StatsDb<V: Value> {
    schema: KeySchema<V>,
    db: RwLock<DashMap<String, Arc<Node<V>>>>,
}

impl<V: Value> StatsDb<V> {
    /// An empty tree sized to `schema`.
    #[must_use]
    pub fn new(schema: KeySchema<V>) -> Self {
        Self {
            schema,
            db: RwLock::new(DashMap::new()),
        }
    }

    /// The tree's key schema.
    #[must_use]
    pub fn schema(&self) -> &KeySchema<V> {
        &self.schema
    }

    /// Walks/creates nodes along `path` (get-or-create at every level),
    /// then applies `update` to the terminal node's value, creating it via
    /// `create` first when absent.
    ///
    /// Mutation of one leaf is atomic with respect to concurrent mutations
    /// of the same leaf; independent leaves are mutated fully in parallel.
    ///
    /// # Errors
    ///
    /// [`InvalidPathError`] when the path is empty or deeper than the
    /// schema.
    pub fn update<U, C>(&self, path: &[&str], update: U, create: C) -> Result<(), InvalidPathError>
    where
        U: FnOnce(&mut V),
        C: FnOnce() -> V,
    {
        self.schema.validate(path)?;

        let db = self.db.read();
        let mut node = db
            .entry(path[0].to_owned())
            .or_insert_with(|| Arc::new(Node::new()))
            .value()
            .clone();
        for key in &path[1..] {
            node = node.child_or_create(key, || None);
        }
        node.update_value(update, create);
        Ok(())
    }

    /// The value stored at exactly `path`, or `None` when any segment is
    /// missing.
    #[must_use]
    pub fn get(&self, path: &[&str]) -> Option<V> {
        self.node_at(path).and_then(|node| node.value())
    }

    /// The values of the immediate children at `path`; empty when the path
    /// is unresolvable or has no children. Valueless routing children are
    /// skipped.
    #[must_use]
    pub fn children(&self, path: &[&str]) -> Vec<V> {
        let Some(node) = self.node_at(path) else {
            return Vec::new();
        };
        node.children()
            .iter()
            .filter_map(|e| e.value().value())
            .collect()
    }

    /// Joins the first two tree ranks: one row per complete path of
    /// length 2.
    #[must_use]
    pub fn select2(&self) -> Vec<Select2<V>> {
        let db = self.db.read();
        let mut rows = Vec::new();
        for e1 in db.iter() {
            let n1 = e1.value();
            for e2 in n1.children().iter() {
                rows.push(Select2 {
                    v1: n1.value(),
                    v2: e2.value().value(),
                });
            }
        }
        rows
    }

    /// Joins the first three tree ranks.
    #[must_use]
    pub fn select3(&self) -> Vec<Select3<V>> {
        let db = self.db.read();
        let mut rows = Vec::new();
        for e1 in db.iter() {
            let n1 = e1.value();
            for e2 in n1.children().iter() {
                let n2 = e2.value();
                for e3 in n2.children().iter() {
                    rows.push(Select3 {
                        v1: n1.value(),
                        v2: n2.value(),
                        v3: e3.value().value(),
                    });
                }
            }
        }
        rows
    }

    /// Joins the first four tree ranks.
    #[must_use]
    pub fn select4(&self) -> Vec<Select4<V>> {
        let db = self.db.read();
        let mut rows = Vec::new();
        for e1 in db.iter() {
            let n1 = e1.value();
            for e2 in n1.children().iter() {
                let n2 = e2.value();
                for e3 in n2.children().iter() {
                    let n3 = e3.value();
                    for e4 in n3.children().iter() {
                        rows.push(Select4 {
                            v1: n1.value(),
                            v2: n2.value(),
                            v3: n3.value(),
                            v4: e4.value().value(),
                        });
                    }
                }
            }
        }
        rows
    }

    /// Joins the first five tree ranks.
    #[must_use]
    pub fn select5(&self) -> Vec<Select5<V>> {
        let db = self.db.read();
        let mut rows = Vec::new();
        for e1 in db.iter() {
            let n1 = e1.value();
            for e2 in n1.children().iter() {
                let n2 = e2.value();
                for e3 in n2.children().iter() {
                    let n3 = e3.value();
                    for e4 in n3.children().iter() {
                        let n4 = e4.value();
                        for e5 in n4.children().iter() {
                            rows.push(Select5 {
                                v1: n1.value(),
                                v2: n2.value(),
                                v3: n3.value(),
                                v4: n4.value(),
                                v5: e5.value().value(),
                            });
                        }
                    }
                }
            }
        }
        rows
    }

    /// Clears the entire tree, non-recoverably.
    pub fn remove_all(&self) {
        self.db.write().clear();
    }

    /// Atomically takes the whole current tree, leaving an empty one in
    /// its place, and returns it in frozen form.
    ///
    /// Any `update` racing with the swap lands entirely in the snapshot or
    /// entirely in the fresh tree, never split.
    #[must_use]
    pub fn take_snapshot(&self) -> BTreeMap<String, NodeData<V>> {
        let taken = mem::take(&mut *self.db.write());
        taken
            .into_iter()
            .map(|(key, node)| (key, node.freeze()))
            .collect()
    }

    /// Deep-copies the live tree into its frozen form, for storage.
    #[must_use]
    pub fn freeze(&self) -> BTreeMap<String, NodeData<V>> {
        self.db
            .read()
            .iter()
            .map(|e| (e.key().clone(), e.value().freeze()))
            .collect()
    }

    /// Replaces the tree contents with a bulk-loaded frozen tree.
    ///
    /// Loaded values are raw; callers must rebuild aggregates afterwards
    /// (see [`update_aggregates_all`](Self::update_aggregates_all)).
    pub fn load_from(&self, data: BTreeMap<String, NodeData<V>>) {
        let db = self.db.write();
        db.clear();
        for (key, subtree) in data {
            drop(db.insert(key, Arc::new(Node::thaw(subtree))));
        }
    }

    /// Recursively merges a frozen remote tree into this one.
    ///
    /// For every remote key the corresponding local node is got-or-created
    /// (seeded from the schema's default-value factory for that level),
    /// grandchildren are merged before the node's own value, and aggregates
    /// are recomputed for each touched top-level key.
    ///
    /// Value-kind mismatches never abort the merge: each one is recorded
    /// as the full key path of the incompatible node, and all other paths
    /// are still merged. The caller decides how to report the returned
    /// failure paths.
    pub fn merge_data(&self, data: &BTreeMap<String, NodeData<V>>) -> Vec<Vec<String>> {
        let mut failed = Vec::new();
        let db = self.db.read();
        for (key, remote) in data {
            let node = db
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Node::with_value(self.schema.new_value(0))))
                .value()
                .clone();
            let mut path = vec![key.clone()];
            self.merge_node(&node, remote, 0, &mut path, &mut failed);
            Self::update_aggregates(&node);
        }
        failed
    }

    fn merge_node(
        &self,
        node: &Node<V>,
        remote: &NodeData<V>,
        level: usize,
        path: &mut Vec<String>,
        failed: &mut Vec<Vec<String>>,
    ) {
        trace!(
            level,
            name = self.schema.level(level).map_or("?", |l| l.name()),
            key = %path[path.len() - 1],
            "merge"
        );

        for (key, remote_child) in &remote.children {
            let child = node.child_or_create(key, || self.schema.new_value(level + 1));
            path.push(key.clone());
            self.merge_node(&child, remote_child, level + 1, path, failed);
            drop(path.pop());
        }

        if let Some(remote_value) = &remote.value {
            if node.merge_value(remote_value).is_err() {
                failed.push(path.clone());
            }
        }
    }

    /// Rebuilds every aggregate in the tree, depth-first.
    ///
    /// Run after a bulk load: persisted snapshots hold raw merged values,
    /// never derived aggregates.
    pub fn update_aggregates_all(&self) {
        for entry in self.db.read().iter() {
            Self::update_aggregates(entry.value());
        }
    }

    /// Depth-first aggregate recompute: every descendant first, then the
    /// node's own value over its immediate children.
    fn update_aggregates(node: &Node<V>) {
        for child in node.children().iter() {
            Self::update_aggregates(child.value());
        }
        let children: Vec<V> = node
            .children()
            .iter()
            .filter_map(|e| e.value().value())
            .collect();
        node.aggregate_value(&children);
    }

    fn node_at(&self, path: &[&str]) -> Option<Arc<Node<V>>> {
        let (first, rest) = path.split_first()?;
        let db = self.db.read();
        let mut node = db.get(*first).map(|e| Arc::clone(e.value()))?;
        drop(db);
        for key in rest {
            node = node.child(key)?;
        }
        Some(node)
    }
}
