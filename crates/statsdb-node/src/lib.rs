//! The node-side accumulator of the hierarchical statistics database.
//!
//! A [`StatsDbNode`] collects raw deltas in a local tree and periodically
//! ships an atomic snapshot of them to the master through a
//! [`Transport`]. Snapshots are persisted as a write-ahead envelope
//! before transmission and retried with their original identity until
//! acknowledged, so delivery is at-least-once across transport failures
//! and process restarts, and the master's per-origin watermark makes
//! application exactly-once.

#![forbid(unsafe_code)]

pub mod node;
pub mod transport;

pub use crate::node::StatsDbNode;
pub use crate::transport::Transport;
