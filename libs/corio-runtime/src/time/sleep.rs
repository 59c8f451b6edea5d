// Grounded on async-exec's `time/sleep.rs`: the same `pin_project(PinnedDrop)`
// cancel-on-drop shape and `sleep`/`sleep_until` free functions, rewired to
// register with our `Timer` instead of the teacher's hand-rolled wheel.

use super::wheel::Timer;
use pin_project::{pin_project, pinned_drop};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Suspend the current task until `duration` has elapsed.
#[must_use = "futures do nothing unless awaited"]
pub fn sleep(timer: &Arc<Timer>, duration: Duration) -> Sleep {
    sleep_until(timer, Instant::now() + duration)
}

/// Suspend the current task until `deadline`.
#[must_use = "futures do nothing unless awaited"]
pub fn sleep_until(timer: &Arc<Timer>, deadline: Instant) -> Sleep {
    Sleep {
        timer: timer.clone(),
        deadline,
        key: None,
    }
}

/// A future that resolves once its deadline has passed.
///
/// Dropping a `Sleep` before it fires cancels its wheel registration
/// (spec.md §4.5's "cancellation must not leave a dangling wakeup"),
/// mirroring `async-exec`'s `PinnedDrop` impl for the same reason.
#[pin_project(PinnedDrop)]
pub struct Sleep {
    timer: Arc<Timer>,
    deadline: Instant,
    key: Option<(Instant, u64)>,
}

impl Sleep {
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();

        if Instant::now() >= *this.deadline {
            if let Some(key) = this.key.take() {
                this.timer.cancel(key);
            }
            return Poll::Ready(());
        }

        match *this.key {
            Some(key) => this.timer.reregister(key, cx.waker().clone()),
            None => *this.key = Some(this.timer.register(*this.deadline, cx.waker().clone())),
        }
        Poll::Pending
    }
}

#[pinned_drop]
impl PinnedDrop for Sleep {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if let Some(key) = this.key.take() {
            this.timer.cancel(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_resolves_after_deadline() {
        let timer = Timer::new();
        let _thread = timer.spawn();

        let worker_exec = crate::executor::Executor::new(1);
        let worker = worker_exec.worker(0);
        let start = Instant::now();
        worker.block_on(sleep(&timer, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        timer.shutdown();
    }
}
