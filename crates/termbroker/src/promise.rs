//! One-shot completion handles bridging worker threads to arbitrary callers.
//!
//! Each queued request carries a [`Resolver`]; the session worker resolves
//! or rejects it exactly once. The caller holds the matching [`Promise`],
//! which is a plain `Future` (awaitable from any async scheduler) and can
//! also be waited on from a dedicated thread. The wake-up travels through a
//! `tokio::sync::oneshot` channel, so no side ever polls in a loop.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::BrokerError;

/// Create a linked resolver/promise pair for one request.
pub(crate) fn channel<T>() -> (Resolver<T>, Promise<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Promise { rx })
}

/// Worker-side completion handle. Consuming `self` on every path is what
/// enforces the exactly-once resolution contract.
pub(crate) struct Resolver<T> {
    tx: oneshot::Sender<Result<T, BrokerError>>,
}

impl<T> Resolver<T> {
    pub(crate) fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    pub(crate) fn reject(self, err: BrokerError) {
        let _ = self.tx.send(Err(err));
    }

    /// Drop the handle without a value. The caller observes
    /// [`BrokerError::Abandoned`] instead of waiting forever.
    pub(crate) fn abandon(self) {
        drop(self.tx);
    }
}

/// Caller-side outcome handle for one queued request.
///
/// Await it from async code, or call [`Promise::blocking_wait`] from a
/// plain thread.
pub struct Promise<T> {
    rx: oneshot::Receiver<Result<T, BrokerError>>,
}

impl<T> Promise<T> {
    /// Block the current thread until the request settles.
    ///
    /// Must not be called from within an async runtime; await the promise
    /// there instead.
    pub fn blocking_wait(self) -> Result<T, BrokerError> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Abandoned),
        }
    }
}

impl<T> Future for Promise<T> {
    type Output = Result<T, BrokerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BrokerError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
