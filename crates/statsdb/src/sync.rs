//! The versioned envelope carried from a node accumulator to the master.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::node::NodeData;

/// One atomically-captured snapshot of a node's delta tree, tagged with
/// the origin identity and a per-origin monotonic id.
///
/// For a given origin, valid ids strictly increase in lexicographic order;
/// the master stores, per origin, the highest id it has merged. Redelivery
/// of an envelope whose id is at or below that watermark is a safe no-op,
/// which is what lets the node retry an envelope whose acknowledgment was
/// lost.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(bound(serialize = "V: Serialize", deserialize = "V: serde::de::DeserializeOwned"))]
pub struct SyncEnvelope<V> {
    /// Identity of the accumulator that produced the snapshot.
    pub origin: String,
    /// Monotonic token, unique per origin.
    pub id: String,
    /// Capture time, epoch millis.
    pub timestamp: u64,
    /// The snapshot: root key to frozen subtree.
    pub data: BTreeMap<String, NodeData<V>>,
}
