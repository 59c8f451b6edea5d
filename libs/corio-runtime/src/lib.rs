//! The runtime core: a stackless-coroutine task model, a multi-threaded
//! work-queue scheduler, and a timer wheel.
//!
//! Rust's `async`/`await` already compiles functions into resumable state
//! machines (`impl Future`), so unlike the `async-exec` crate this is
//! generalized from (which hand-rolls a coroutine frame on top of C-style
//! handles), we build directly on [`core::future::Future`] and
//! [`core::task::Waker`]. The three awaiters spec'd in the design
//! (task-await, scheduler-await, I/O-await) all reduce to `Future::poll`:
//! `ready`/`suspend`/`resume` are `Poll::Ready`/`Poll::Pending`/calling the
//! stored `Waker`, so no separate awaiter trait is introduced here.
//!
//! Reactor backends (in `corio-reactor`) and the timer wheel below are the
//! leaf I/O-await implementations; [`task::JoinHandle`] is the task-await
//! implementation; [`yield_now`] is the scheduler-await implementation.

pub mod executor;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod time;

pub use executor::{Executor, Worker};
pub use task::{JoinHandle, JoinError, TaskRef, join_all, yield_now};
pub use time::{Sleep, Timer, sleep, sleep_until};
