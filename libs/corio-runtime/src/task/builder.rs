// Grounded on async-exec's `task/builder.rs`: same builder surface
// (`name`, `kind`, `try_build`) minus the no_std custom-allocator variant,
// which has no counterpart once we're building on `std`.

use crate::executor::Executor;
use crate::task::{JoinHandle, TaskRef};
use std::future::Future;
use std::sync::Arc;

pub struct TaskBuilder<'a> {
    name: Option<&'a str>,
    kind: &'a str,
}

impl<'a> TaskBuilder<'a> {
    pub(crate) fn new() -> Self {
        Self {
            name: None,
            kind: "task",
        }
    }

    /// Override the name of tasks spawned by this builder. Unnamed by
    /// default; shows up only in `tracing` spans.
    #[must_use]
    pub fn name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    /// Override the kind string used in `tracing` spans, e.g. `"connection"`
    /// for per-connection HTTP handler tasks.
    #[must_use]
    pub fn kind(mut self, kind: &'a str) -> Self {
        self.kind = kind;
        self
    }

    pub fn spawn<F>(self, executor: &Arc<Executor>, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (task, handle) = crate::task::new(executor.clone(), future);
        let span = tracing::trace_span!(
            "task",
            task.id = task.id().as_u64(),
            task.name = self.name,
            task.kind = self.kind,
        );
        let _entered = span.enter();
        executor.clone().enqueue(task);
        handle
    }
}

fn _assert_task_ref_is_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<TaskRef>();
}
