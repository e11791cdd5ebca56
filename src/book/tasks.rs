use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Counts background tasks that have been spawned but not yet finished
#[derive(Default)]
pub(crate) struct TaskTracker {
    pending: Mutex<usize>,
    idle: Condvar,
}

/// Marks one in-flight task. Dropping it (including during a panic unwind)
/// retires the task.
pub(crate) struct TaskGuard {
    tracker: Arc<TaskTracker>,
}

impl TaskTracker {
    pub(crate) fn begin(self: &Arc<Self>) -> TaskGuard {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        TaskGuard {
            tracker: Arc::clone(self),
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until every task begun so far, and every task those spawn, is done.
    pub(crate) fn wait_idle(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            pending = self
                .idle
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut pending = self
            .tracker
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.tracker.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_idle_returns_after_guards_drop() {
        let tracker = Arc::new(TaskTracker::default());
        let guards: Vec<_> = (0..3).map(|_| tracker.begin()).collect();
        assert_eq!(tracker.in_flight(), 3);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guards);
        });

        tracker.wait_idle();
        assert_eq!(tracker.in_flight(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn panicking_task_still_retires() {
        let tracker = Arc::new(TaskTracker::default());
        let guard = tracker.begin();

        let result = thread::spawn(move || {
            let _guard = guard;
            panic!("task failed");
        })
        .join();

        assert!(result.is_err());
        tracker.wait_idle();
        assert_eq!(tracker.in_flight(), 0);
    }
}
