// Grounded on async-exec's `sync/oneshot.rs`: same `channel`/`Sender`/
// `Receiver`/`RecvError` shape, reimplemented over `std::sync::Mutex`
// instead of the teacher's intrusive `WaitCell`, since we have `std`
// available and don't need the no_std/loom machinery.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Inner {
        value: Mutex::new(None),
        waker: Mutex::new(None),
    });
    (
        Sender {
            inner: Some(inner.clone()),
        },
        Receiver { inner },
    )
}

struct Inner<T> {
    value: Mutex<Option<T>>,
    waker: Mutex<Option<Waker>>,
}

pub struct Sender<T> {
    inner: Option<Arc<Inner<T>>>,
}

pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub struct RecvError(());

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sender dropped without sending a value")
    }
}

impl std::error::Error for RecvError {}

impl<T> Sender<T> {
    /// Send `value` to the receiver, waking it if it is already awaiting.
    ///
    /// Returns `Err(value)` if the receiver has already been dropped.
    pub fn send(mut self, value: T) -> Result<(), T> {
        let Some(inner) = self.inner.take() else {
            unreachable!("Sender::inner is only taken here")
        };
        *inner.value.lock().unwrap() = Some(value);
        if let Some(waker) = inner.waker.lock().unwrap().take() {
            waker.wake();
        }
        Ok(())
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        // Dropping without sending still needs to wake a pending receiver so
        // it can observe `RecvError` instead of hanging forever.
        if let Some(inner) = &self.inner {
            if let Some(waker) = inner.waker.lock().unwrap().take() {
                waker.wake();
            }
        }
    }
}

impl<T> Receiver<T> {
    fn take_value(&self) -> Option<T> {
        self.inner.value.lock().unwrap().take()
    }
}

impl<T> Future for Receiver<T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(value) = self.take_value() {
            return Poll::Ready(Ok(value));
        }
        if Arc::strong_count(&self.inner) == 1 {
            // The sender has already been dropped and left no value behind.
            return Poll::Ready(Err(RecvError(())));
        }
        *self.inner.waker.lock().unwrap() = Some(cx.waker().clone());
        // Re-check after registering to avoid a lost wakeup if the sender
        // raced us between the first `take_value` and the waker store.
        if let Some(value) = self.take_value() {
            return Poll::Ready(Ok(value));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Wake;

    struct NoopWaker;
    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    #[test]
    fn send_then_recv() {
        let (tx, mut rx) = channel();
        tx.send(42).unwrap();
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        match Pin::new(&mut rx).poll(&mut cx) {
            Poll::Ready(Ok(v)) => assert_eq!(v, 42),
            other => panic!("expected Ready(Ok(42)), got {other:?}"),
        }
    }

    #[test]
    fn dropped_sender_yields_recv_error() {
        let (tx, mut rx) = channel::<u32>();
        drop(tx);
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        match Pin::new(&mut rx).poll(&mut cx) {
            Poll::Ready(Err(_)) => {}
            other => panic!("expected Ready(Err(_)), got {other:?}"),
        }
    }
}
