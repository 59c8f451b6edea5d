//! Small synchronization primitives used internally by the task model.

pub mod oneshot;
