use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::Waker;
use std::thread;
use std::time::Instant;

/// A registration key, unique enough to disambiguate two timers that
/// happen to share a deadline (`Instant` has no total order guarantee
/// finer than the platform clock's resolution).
type Key = (Instant, u64);

struct State {
    entries: BTreeMap<Key, Waker>,
    shutdown: bool,
}

/// The shared timer wheel: one per [`crate::executor::Executor`], driven by
/// a dedicated background thread started via [`Timer::spawn`].
pub struct Timer {
    state: Mutex<State>,
    condvar: Condvar,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl Timer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                entries: BTreeMap::new(),
                shutdown: false,
            }),
            condvar: Condvar::new(),
            next_id: AtomicU64::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// Start the wheel's background thread, per spec.md §4.5 ("a single
    /// thread owns the wheel; everyone else only registers/cancels
    /// through it"). Calling this more than once is a programmer error.
    pub fn spawn(self: &Arc<Self>) -> thread::JoinHandle<()> {
        assert!(
            !self.running.swap(true, Ordering::AcqRel),
            "Timer::spawn called more than once"
        );
        let timer = self.clone();
        thread::Builder::new()
            .name("corio-timer".into())
            .spawn(move || timer.run())
            .expect("failed to spawn timer thread")
    }

    /// Register a wakeup for `deadline`. Returns the key to pass to
    /// [`Timer::cancel`] if the awaiting future is dropped first.
    pub(crate) fn register(&self, deadline: Instant, waker: Waker) -> Key {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (deadline, id);
        {
            let mut state = self.state.lock().unwrap();
            state.entries.insert(key, waker);
        }
        // The new deadline may be earlier than whatever the wheel thread is
        // currently parked on; nudge it to recompute.
        self.condvar.notify_one();
        key
    }

    /// Replace the waker registered under `key` (used when a `Sleep` is
    /// polled again with a different waker before it fires).
    pub(crate) fn reregister(&self, key: Key, waker: Waker) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.entries.get_mut(&key) {
            *slot = waker;
        }
    }

    pub(crate) fn cancel(&self, key: Key) {
        self.state.lock().unwrap().entries.remove(&key);
    }

    /// Stop the background thread after it finishes its current wait.
    pub fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.condvar.notify_one();
    }

    fn run(&self) {
        let _span = tracing::info_span!("timer-wheel").entered();
        loop {
            let mut state = self.state.lock().unwrap();
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let due: Vec<Key> = state
                .entries
                .range(..=(now, u64::MAX))
                .map(|(k, _)| *k)
                .collect();
            for key in &due {
                if let Some(waker) = state.entries.remove(key) {
                    waker.wake();
                }
            }

            match state.entries.keys().next() {
                Some((deadline, _)) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    let (guard, _timeout) = self.condvar.wait_timeout(state, wait).unwrap();
                    drop(guard);
                }
                None => {
                    // Nothing registered; park until `register` or
                    // `shutdown` notifies us. A long bounded wait instead
                    // of an unbounded one keeps this resilient to a missed
                    // notification racing the `shutdown` check above.
                    let (guard, _timeout) = self
                        .condvar
                        .wait_timeout(state, std::time::Duration::from_secs(1))
                        .unwrap();
                    drop(guard);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::task::Wake;
    use std::time::Duration;

    struct FlagWaker(Arc<AtomicBool>);
    impl Wake for FlagWaker {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
        fn wake_by_ref(self: &Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn fires_registered_deadline() {
        let timer = Timer::new();
        let _thread = timer.spawn();

        let fired = Arc::new(AtomicBool::new(false));
        let waker = Waker::from(Arc::new(FlagWaker(fired.clone())));
        timer.register(Instant::now() + Duration::from_millis(20), waker);

        thread::sleep(Duration::from_millis(200));
        assert!(fired.load(Ordering::SeqCst));
        timer.shutdown();
    }

    #[test]
    fn cancel_prevents_firing() {
        let timer = Timer::new();
        let _thread = timer.spawn();

        let fired = Arc::new(AtomicBool::new(false));
        let waker = Waker::from(Arc::new(FlagWaker(fired.clone())));
        let key = timer.register(Instant::now() + Duration::from_millis(50), waker);
        timer.cancel(key);

        thread::sleep(Duration::from_millis(150));
        assert!(!fired.load(Ordering::SeqCst));
        timer.shutdown();
    }
}
