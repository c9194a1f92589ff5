//! Cooperative cancellation and progress reporting.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// number of cheap flag checks between two wall-clock reads
const CLOCK_CHECK_PERIOD: u32 = 16;

/// Shared cancellation flag with an optional wall-clock cutoff.
///
/// Clones share the underlying flag and can be cancelled from another thread;
/// each clone latches the first observation locally. The wall-clock cutoff is
/// only consulted every few polls so that hot loops do not pay a clock read
/// per iteration.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    started: Instant,
    max_task_time: Option<Duration>,
    latched: Cell<bool>,
    polls_since_clock_check: Cell<u32>,
}

impl CancelToken {
    /// Creates a token that is only triggered by an explicit [`Self::cancel`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            max_task_time: None,
            latched: Cell::new(false),
            polls_since_clock_check: Cell::new(0),
        }
    }

    /// Creates a token that also triggers once `max_task_time` has elapsed.
    #[must_use]
    pub fn with_max_task_time(max_task_time: Duration) -> Self {
        Self {
            max_task_time: Some(max_task_time),
            ..Self::new()
        }
    }

    /// Requests cancellation. Visible to every clone of the token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Polls the token. Once it has returned `true` it keeps returning `true`.
    pub fn is_interruption_requested(&self) -> bool {
        if self.latched.get() {
            return true;
        }
        let mut stopped = self.flag.load(Ordering::Relaxed);

        // rate-limited wall-clock cutoff
        if !stopped {
            if let Some(max_task_time) = self.max_task_time {
                let polls = self.polls_since_clock_check.get();
                if polls == 0 {
                    stopped = self.started.elapsed() >= max_task_time;
                }
                self.polls_since_clock_check
                    .set((polls + 1) % CLOCK_CHECK_PERIOD);
            }
        }

        if stopped {
            self.latched.set(true);
        }
        stopped
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink for coarse-grained progress events emitted by the long-running
/// operations.
pub trait TrainProgress {
    /// Announces the current top-level task.
    fn main_label(&mut self, label: &str) {
        let _ = label;
    }

    /// Announces the current step inside the task.
    fn label(&mut self, label: &str) {
        let _ = label;
    }

    /// Reports completion of the current task, in percent.
    fn progress(&mut self, percent: u32) {
        let _ = percent;
    }
}

/// Progress sink that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl TrainProgress for NoProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_latches() {
        let token = CancelToken::new();
        assert!(!token.is_interruption_requested());

        token.cancel();
        assert!(token.is_interruption_requested());
        assert!(token.is_interruption_requested());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_interruption_requested());
    }

    #[test]
    fn elapsed_cutoff_triggers() {
        let token = CancelToken::with_max_task_time(Duration::from_millis(0));
        assert!(token.is_interruption_requested());
    }
}
