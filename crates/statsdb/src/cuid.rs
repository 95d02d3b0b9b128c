//! Monotonic sync-id generation.
//!
//! Ids are fixed-width strings whose lexicographic order equals their
//! numeric order, so the master can deduplicate envelopes per origin with
//! a plain string comparison against its watermark.

#[cfg(test)]
#[path = "tests/cuid.rs"]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::time::epoch_millis;

/// Produces tokens that compare strictly increasing, in lexicographic
/// order, for any two tokens produced in temporal sequence by the same
/// instance.
///
/// Generators are explicit dependencies handed to the node accumulator at
/// construction; there is no process-wide instance.
pub trait IdGenerator: Send + Sync {
    /// The next token.
    fn next_id(&self) -> String;
}

/// The production generator: wall-clock millis, a per-instance sequence,
/// and a random per-instance discriminator, rendered as fixed-width hex.
///
/// Because the leading component is wall-clock time, tokens keep
/// increasing across process restarts without any shared state, so a
/// master watermark recorded before a restart never shadows legitimate
/// post-restart syncs.
pub struct UniqueIdGenerator {
    discriminator: u32,
    counter: AtomicU64,
}

impl UniqueIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            discriminator: rand::thread_rng().gen(),
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for UniqueIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for UniqueIdGenerator {
    fn next_id(&self) -> String {
        let millis = epoch_millis();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        // 12 hex digits of millis keep the format stable until year ~10889.
        format!(
            "{millis:012x}{:08x}{:08x}",
            seq & 0xffff_ffff,
            self.discriminator
        )
    }
}

/// A deterministic, resettable counter generator for tests.
///
/// Not safe across restarts: a fresh instance restarts at its seed, so a
/// master that recorded a higher watermark will treat its syncs as stale
/// duplicates. Production uses [`UniqueIdGenerator`].
pub struct IncrementalIdGenerator {
    counter: AtomicU64,
}

impl IncrementalIdGenerator {
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }

    /// Rewinds the counter, e.g. to simulate a process restart.
    pub fn reset(&self, value: u64) {
        self.counter.store(value, Ordering::Release);
    }
}

impl IdGenerator for IncrementalIdGenerator {
    fn next_id(&self) -> String {
        format!("{:020}", self.counter.fetch_add(1, Ordering::AcqRel) + 1)
    }
}
