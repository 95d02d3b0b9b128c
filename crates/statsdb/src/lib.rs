//! Core data model for the hierarchical statistics database.
//!
//! A stats tree is a fixed-depth hierarchy of string-keyed nodes, each
//! carrying an optional [`Value`](value::Value). Node processes accumulate
//! raw deltas in such a tree and periodically ship an atomic snapshot of it
//! to a master, wrapped in a [`SyncEnvelope`](sync::SyncEnvelope); the
//! master merges snapshots into its canonical tree and recomputes derived
//! aggregates bottom-up.
//!
//! This crate holds everything shared between the two sides:
//!
//! - [`schema`] - the ordered list of level descriptors a tree is sized to
//! - [`value`] - the merge/aggregate algebra values must implement
//! - [`tree`] - the path-based navigator over a live tree
//! - [`sync`] - the versioned envelope carried from node to master
//! - [`cuid`] - monotonic id generation for envelope deduplication
//! - [`scheduler`] - a fixed-delay background scheduler for periodic work

#![forbid(unsafe_code)]

pub mod cuid;
pub mod node;
pub mod schema;
pub mod scheduler;
pub mod sync;
pub mod time;
pub mod tree;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use crate::cuid::{IdGenerator, IncrementalIdGenerator, UniqueIdGenerator};
pub use crate::node::NodeData;
pub use crate::schema::{InvalidPathError, KeySchema, Level};
pub use crate::sync::SyncEnvelope;
pub use crate::tree::StatsDb;
pub use crate::value::{MergeError, Value};
