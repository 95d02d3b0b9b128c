//! Master side of the hierarchical statistics database.
//!
//! The master owns the canonical tree. Node processes ship
//! [`SyncEnvelope`](statsdb::SyncEnvelope)s at it (here via
//! [`LoopbackTransport`]); the master deduplicates each envelope against a
//! per-origin watermark, merges accepted snapshots into the tree, and
//! recomputes derived aggregates bottom-up. The tree can be persisted
//! through a pluggable [`Storage`] backend.

#![forbid(unsafe_code)]

pub mod master;
pub mod storage;
pub mod transport;

pub use crate::master::StatsDbMaster;
pub use crate::storage::{JsonStorage, NullStorage, Storage, StorageError};
pub use crate::transport::LoopbackTransport;
