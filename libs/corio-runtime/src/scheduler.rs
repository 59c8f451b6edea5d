//! A single worker's run-queue: a thread-local FIFO guarded by a mutex and
//! condvar, per spec.md §4.2 and §5. Grounded on the `Mutex<VecDeque<_>>` +
//! `Condvar` pair in
//! `examples/other_examples/779b2fd3_dennisss-dacha__pkg-executor-src-linux-executor.rs.rs`'s
//! `pending_queue`/`pending_queue_condvar`, one instance per worker instead
//! of one shared instance, since spec.md requires per-worker queues with a
//! stable task→queue binding rather than one global queue.

use crate::task::{PollOutcome, TaskRef};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Information about a scheduler tick, mirroring `async-exec::scheduler::Tick`.
#[derive(Debug, Default)]
pub struct Tick {
    /// `true` if the tick stopped because it hit its poll budget, not
    /// because the queue ran dry.
    pub has_remaining: bool,
    /// Number of tasks polled during this tick.
    pub polled: usize,
    /// Number of polled tasks that completed.
    pub completed: usize,
}

pub struct Queue {
    pub(crate) id: usize,
    deque: Mutex<VecDeque<TaskRef>>,
    condvar: Condvar,
}

impl Queue {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            deque: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, task: TaskRef) {
        self.deque.lock().unwrap().push_back(task);
        self.condvar.notify_one();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deque.lock().unwrap().is_empty()
    }

    /// Wake any thread parked in [`Queue::wait_while_empty`] without
    /// enqueuing work, used to unblock workers after a stop signal.
    pub(crate) fn notify(&self) {
        self.condvar.notify_all();
    }

    /// Park the calling thread until the queue is non-empty or `stop` fires.
    pub(crate) fn wait_while_empty(&self, stop: &std::sync::atomic::AtomicBool) {
        let mut guard = self.deque.lock().unwrap();
        while guard.is_empty() && !stop.load(std::sync::atomic::Ordering::Acquire) {
            guard = self.condvar.wait(guard).unwrap();
        }
    }

    /// Park for a short, bounded interval or until the queue becomes
    /// non-empty, whichever comes first. Used by
    /// [`crate::executor::Worker::block_on`], whose target future may be
    /// woken by something that never touches this queue (e.g. a timer) —
    /// an unbounded park there would be a missed-wakeup deadlock, so it
    /// re-polls on a short tick instead of waiting for a queue push.
    pub(crate) fn park_briefly(&self) {
        let guard = self.deque.lock().unwrap();
        if guard.is_empty() {
            let _ = self
                .condvar
                .wait_timeout(guard, std::time::Duration::from_millis(1))
                .unwrap();
        }
    }

    /// Poll up to `n` tasks from this queue. No lock is held while a task is
    /// actually being polled (spec.md §4.2's liveness rule: "no task holds
    /// the shared lock across suspension").
    pub fn tick_n(&self, n: usize) -> Tick {
        let mut tick = Tick::default();

        while tick.polled < n {
            let task = {
                let mut guard = self.deque.lock().unwrap();
                match guard.pop_front() {
                    Some(t) => t,
                    None => break,
                }
            };

            tick.polled += 1;
            let _span =
                tracing::trace_span!("poll", task.id = task.id().as_u64(), queue = self.id)
                    .entered();

            match task.poll() {
                PollOutcome::Ready => {
                    tick.completed += 1;
                }
                PollOutcome::PendingReschedule => {
                    // The task was woken again while being polled; it must
                    // be re-enqueued onto its own (bound) queue immediately.
                    self.push(task);
                }
                PollOutcome::Pending => {}
            }
        }

        if !self.is_empty() {
            tick.has_remaining = true;
        }

        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[test]
    fn tick_respects_budget() {
        let exec = Executor::new(1);
        for _ in 0..10 {
            exec.spawn(async {}).detach();
        }
        let queue = exec.queue(0);
        let tick = queue.tick_n(5);
        assert_eq!(tick.polled, 5);
        assert!(tick.has_remaining);
        let tick = queue.tick_n(5);
        assert_eq!(tick.polled, 5);
        assert!(!tick.has_remaining);
    }
}
