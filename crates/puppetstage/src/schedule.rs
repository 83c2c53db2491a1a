//! Cancellable fire-once command scheduling
//!
//! Every deferred command is its own tokio task that sleeps, then runs.
//! Tasks belong to the generation that was current when they were scheduled;
//! `cancel_all` bumps the generation and aborts the handles. A task that wakes
//! after its generation moved on drops its command instead of running it, so
//! a cancelled command can't fire even if the abort loses the race.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Default)]
pub struct Scheduler {
    generation: Arc<AtomicU64>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run `command` once after `delay`, unless cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_after<F>(&mut self, delay: Duration, command: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handles.retain(|handle| !handle.is_finished());

        let generation = Arc::clone(&self.generation);
        let mine = generation.load(Ordering::SeqCst);

        self.handles.push(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if generation.load(Ordering::SeqCst) == mine {
                command();
            } else {
                trace!("dropping command from generation {}", mine);
            }
        }));
    }

    /// Cancel everything not yet fired. Returns how many tasks were still
    /// pending.
    pub fn cancel_all(&mut self) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut cancelled = 0;
        for handle in self.handles.drain(..) {
            if !handle.is_finished() {
                cancelled += 1;
            }
            handle.abort();
        }
        cancelled
    }

    /// Tasks scheduled and not yet fired.
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
