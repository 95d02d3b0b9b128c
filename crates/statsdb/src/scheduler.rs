//! Fixed-delay background scheduling for periodic work (node syncs,
//! master flushes).

#[cfg(test)]
#[path = "tests/scheduler.rs"]
mod tests;

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

/// Runs a task on a background thread every fixed delay, stopping when
/// dropped.
///
/// The delay is measured from the end of one invocation to the start of
/// the next, so a tick never overlaps a still-running previous call.
pub struct FixedDelayScheduler {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl FixedDelayScheduler {
    /// Spawns the scheduler thread.
    #[must_use]
    pub fn new<F>(delay: Duration, mut task: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop, ticks) = mpsc::channel();
        let handle = thread::spawn(move || loop {
            match ticks.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => task(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for FixedDelayScheduler {
    fn drop(&mut self) {
        debug!("stopping scheduler");
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
