//! The task model: a lazy, heap-allocated, resumable unit of work with a
//! typed return value, grounded on `async-exec`'s `task::{Task, TaskRef,
//! JoinHandle}` naming and on the locking discipline used by
//! `examples/other_examples/.../dacha__pkg-executor-src-linux-executor.rs.rs`'s
//! `TaskEntry`/`TaskState` (a `Mutex`-guarded future slot plus a `dirty` flag
//! for wake-while-running).

mod builder;

pub use builder::TaskBuilder;

use crate::executor::Executor;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

/// Globally unique task identifier, handed out in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u64);

impl Id {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Error returned when awaiting a [`JoinHandle`] whose task was abandoned
/// before producing a value (the sender side of its completion channel was
/// dropped without sending — this should not happen for well-formed tasks,
/// but is surfaced rather than panicking).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("task was dropped before completing")]
pub struct JoinError;

struct Inner {
    scheduled: bool,
    running: bool,
    /// Set if the task was woken again while it was already being polled;
    /// the scheduler must re-poll it immediately rather than waiting for a
    /// fresh enqueue.
    dirty: bool,
    future: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

/// The shared, reference-counted state behind every spawned task.
///
/// A clone of this `Arc` lives in at most two places at a time: the
/// executor's per-worker run queue (while the task is ready to be polled)
/// and the executor's task→queue binding map (for the task's entire
/// lifetime, until the reaper or the task's [`JoinHandle`] removes it).
/// Because Rust's `Arc` makes strong/weak sharing explicit and safe, the
/// "exactly one owner" invariant from the design is enforced at the level
/// of *who is allowed to destroy the frame* (the reaper, for detached
/// tasks; the `JoinHandle`, for attached ones) rather than at the pointer
/// level, as the teacher's intrusive lists do.
pub struct TaskShared {
    id: Id,
    executor: Arc<Executor>,
    queue: std::sync::atomic::AtomicUsize,
    completed: AtomicBool,
    detached: AtomicBool,
    inner: Mutex<Inner>,
}

const UNBOUND: usize = usize::MAX;

/// A type-erased, cheaply-cloneable reference to a spawned task.
///
/// This is the "continuation" of spec.md's data model: an opaque resume
/// handle that the scheduler, reactor, or timer can hold and resume.
#[derive(Clone)]
pub struct TaskRef(pub(crate) Arc<TaskShared>);

/// Outcome of polling a task once.
pub(crate) enum PollOutcome {
    /// The task's future returned `Ready`; it will never be polled again.
    Ready,
    /// The task returned `Pending` and was woken again before this call
    /// returned; the caller must reschedule it immediately.
    PendingReschedule,
    /// The task returned `Pending` and is waiting on an external wakeup.
    Pending,
}

impl TaskRef {
    #[must_use]
    pub fn id(&self) -> Id {
        self.0.id
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.0.completed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.0.detached.load(Ordering::Acquire)
    }

    pub(crate) fn mark_detached(&self) {
        self.0.detached.store(true, Ordering::Release);
    }

    pub(crate) fn bound_queue(&self) -> Option<usize> {
        match self.0.queue.load(Ordering::Acquire) {
            UNBOUND => None,
            q => Some(q),
        }
    }

    /// Bind this task to `queue` if it has not already been bound.
    ///
    /// Returns `true` if this call performed the binding (first dispatch).
    pub(crate) fn bind_to(&self, queue: usize) -> bool {
        self.0
            .queue
            .compare_exchange(
                UNBOUND,
                queue,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Poll the task once. Per spec.md §4.2's liveness rule, no lock is
    /// held across the call to `Future::poll` itself.
    pub(crate) fn poll(&self) -> PollOutcome {
        let mut fut = {
            let mut inner = self.0.inner.lock().unwrap();
            inner.scheduled = false;
            inner.running = true;
            inner
                .future
                .take()
                .expect("task polled while already running or after completion")
        };

        let waker = Waker::from(self.0.clone());
        let mut cx = Context::from_waker(&waker);
        let poll = fut.as_mut().poll(&mut cx);

        let mut inner = self.0.inner.lock().unwrap();
        inner.running = false;
        match poll {
            Poll::Ready(()) => PollOutcome::Ready,
            Poll::Pending if inner.dirty => {
                inner.dirty = false;
                inner.scheduled = true;
                inner.future = Some(fut);
                PollOutcome::PendingReschedule
            }
            Poll::Pending => {
                inner.future = Some(fut);
                PollOutcome::Pending
            }
        }
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("id", &self.0.id)
            .field("completed", &self.is_completed())
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl Wake for TaskShared {
    fn wake(self: Arc<Self>) {
        TaskShared::schedule(&self);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        TaskShared::schedule(self);
    }
}

impl TaskShared {
    fn schedule(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.running {
                // Being polled right now on some worker; that worker will
                // observe `dirty` and reschedule itself, no need to enqueue.
                inner.dirty = true;
                return;
            }
            if inner.scheduled {
                return;
            }
            inner.scheduled = true;
        }
        self.executor.clone().enqueue(TaskRef(self.clone()));
    }
}

/// A handle to a spawned task's eventual result.
///
/// Awaiting a `JoinHandle` is spec.md's "task-await": the calling task
/// registers its waker with the spawned task's completion channel and
/// suspends; when the spawned task completes, the waker fires and the
/// scheduler resumes the caller. Dropping a `JoinHandle` before the task
/// completes relinquishes it — the scheduler (via the reaper) becomes the
/// sole owner and destroys the frame once the task finishes.
pub struct JoinHandle<T> {
    task: Option<TaskRef>,
    rx: crate::sync::oneshot::Receiver<T>,
}

impl<T> JoinHandle<T> {
    /// Explicitly relinquish ownership of this task, letting it run to
    /// completion unobserved. Equivalent to dropping the handle, but reads
    /// better at call sites (e.g. "spawn and detach the connection
    /// handler").
    pub fn detach(mut self) {
        if let Some(task) = self.task.take() {
            task.mark_detached();
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let rx = Pin::new(&mut self.rx);
        match rx.poll(cx) {
            Poll::Ready(Ok(v)) => Poll::Ready(Ok(v)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(JoinError)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if task.is_completed() {
            // We are the holder that awaited it to completion (or dropped
            // it right after); destroy the binding-map entry now instead of
            // waiting for the reaper's next sweep.
            task.0.executor.remove_binding(task.id());
        } else {
            task.mark_detached();
        }
    }
}

/// Construct a task and its [`JoinHandle`] from a future, without
/// scheduling it yet. [`Executor::spawn`] is the public entry point that
/// also performs the initial dispatch.
pub(crate) fn new<F>(executor: Arc<Executor>, future: F) -> (TaskRef, JoinHandle<F::Output>)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let id = Id::next();
    let (tx, rx) = crate::sync::oneshot::channel();

    let shared = Arc::new(TaskShared {
        id,
        executor,
        queue: std::sync::atomic::AtomicUsize::new(UNBOUND),
        completed: AtomicBool::new(false),
        detached: AtomicBool::new(false),
        inner: Mutex::new(Inner {
            scheduled: true,
            running: false,
            dirty: false,
            future: None,
        }),
    });

    let completion_marker = shared.clone();
    let boxed: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
        let output = future.await;
        completion_marker.completed.store(true, Ordering::Release);
        let _ = tx.send(output);
    });
    shared.inner.lock().unwrap().future = Some(boxed);

    let task_ref = TaskRef(shared);
    let handle = JoinHandle {
        task: Some(task_ref.clone()),
        rx,
    };
    (task_ref, handle)
}

/// Yield the current task back to the scheduler, per spec.md §4.1's
/// scheduler-await: resumes on the next time a worker dequeues it.
#[must_use = "futures do nothing unless awaited"]
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[doc(hidden)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Await every handle in `handles`, returning their results in order.
///
/// Supplemented beyond the distilled spec, grounded on
/// `original_source/include/async/WhenAll.hpp`'s `when_all` combinator
/// (see SPEC_FULL.md §9).
pub async fn join_all<T>(handles: Vec<JoinHandle<T>>) -> Vec<Result<T, JoinError>> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[test]
    fn spawn_and_join_returns_value() {
        let exec = Executor::new(1);
        let worker = exec.worker(0);
        let handle = exec.spawn(async { 1 + 1 });
        let result = worker.block_on(handle);
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn detach_lets_task_run_unobserved() {
        let exec = Executor::new(1);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let handle = exec.spawn(async move {
            ran2.store(true, Ordering::SeqCst);
        });
        handle.detach();

        let tick = exec.queue(0).tick_n(10);
        assert_eq!(tick.completed, 1);
        assert!(ran.load(Ordering::SeqCst));
    }
}
