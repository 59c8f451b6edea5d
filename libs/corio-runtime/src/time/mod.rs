//! The timer wheel, per spec.md §4.5: a single multiset of pending
//! deadlines shared by every worker, backed by one dedicated thread that
//! parks until the nearest deadline or a new registration arrives.
//!
//! Grounded on `async-exec::time::sleep`'s `sleep`/`sleep_until` naming and
//! cancel-on-drop `Sleep` future; the wheel itself (`BTreeMap` ordered by
//! deadline, one background thread, a `Condvar` with timeout) is a fresh
//! design since the teacher's wheel assumes its own hand-rolled coroutine
//! frames rather than `std::task::Waker`.

mod sleep;
mod wheel;

pub use sleep::{Sleep, sleep, sleep_until};
pub use wheel::Timer;
