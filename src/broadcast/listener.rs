//! Listener handles
//!
//! A listener is the reading half of a bounded queue whose writing half is
//! owned by the engine. The queue ends (yields `None`) when the listener is
//! unregistered, evicted or the engine closes.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Unregistration request sent to the control loop
#[derive(Debug)]
pub(crate) struct Unregister {
    pub(crate) id: u64,
    pub(crate) ack: oneshot::Sender<()>,
}

/// Idempotent handle that unregisters a listener
///
/// Clones share the same "fired" flag, so only the first `cancel` call
/// reaches the engine no matter how many call sites race.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    id: u64,
    fired: AtomicBool,
    /// Aborts a delivery blocked on this listener's full queue
    token: CancellationToken,
    unregister: mpsc::Sender<Unregister>,
}

impl CancelHandle {
    pub(crate) fn new(
        id: u64,
        token: CancellationToken,
        unregister: mpsc::Sender<Unregister>,
    ) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                id,
                fired: AtomicBool::new(false),
                token,
                unregister,
            }),
        }
    }

    /// Unregister the listener and wait until the engine has closed it
    ///
    /// Returns immediately on every call after the first, and when the
    /// engine has already closed.
    pub async fn cancel(&self) {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return;
        }

        // Fire first: the control loop may be parked on our full queue.
        self.inner.token.cancel();

        let (ack, acked) = oneshot::channel();
        let request = Unregister {
            id: self.inner.id,
            ack,
        };
        if self.inner.unregister.send(request).await.is_ok() {
            let _ = acked.await;
        }
    }

    /// Check whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until the listener is cancelled or its reader dropped
    pub(crate) async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    fn release(&self) {
        self.inner.token.cancel();
    }
}

/// Reading end of a registered listener
#[derive(Debug)]
pub struct Listener<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    canceller: CancelHandle,
}

impl<T> Listener<T> {
    pub(crate) fn new(id: u64, rx: mpsc::Receiver<T>, canceller: CancelHandle) -> Self {
        Self { id, rx, canceller }
    }

    /// Listener ID, unique within its engine
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receive the next value, or `None` once the listener is closed
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive a value if one is already queued
    pub fn try_recv(&mut self) -> Result<T, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Get a handle that unregisters this listener
    pub fn canceller(&self) -> CancelHandle {
        self.canceller.clone()
    }

    /// Unregister this listener
    ///
    /// Values already queued remain readable; nothing new is delivered.
    pub async fn cancel(&self) {
        self.canceller.cancel().await;
    }

    /// Number of values waiting in the queue
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        // Nobody reads anymore; the engine drops the slot on its next delivery.
        self.canceller.release();
    }
}

impl<T> Stream for Listener<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_fires_once() {
        let (unregister, mut requests) = mpsc::channel(4);
        let token = CancellationToken::new();
        let handle = CancelHandle::new(7, token.clone(), unregister);
        let clone = handle.clone();

        let responder = tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            assert_eq!(request.id, 7);
            request.ack.send(()).unwrap();
            // A second request would arrive here if the flag failed.
            assert!(requests.recv().await.is_none());
        });

        handle.cancel().await;
        clone.cancel().await;
        assert!(handle.is_cancelled());
        assert!(token.is_cancelled());

        drop(handle);
        drop(clone);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_after_engine_gone() {
        let (unregister, requests) = mpsc::channel(1);
        drop(requests);

        let handle = CancelHandle::new(1, CancellationToken::new(), unregister);
        handle.cancel().await;
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_listener_stream() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel(2);
        let (unregister, _requests) = mpsc::channel(1);
        let mut listener = Listener::new(1, rx, CancelHandle::new(1, CancellationToken::new(), unregister));

        tx.send("a").await.unwrap();
        tx.send("b").await.unwrap();
        drop(tx);

        assert_eq!(listener.len(), 2);
        let values: Vec<_> = (&mut listener).collect().await;
        assert_eq!(values, vec!["a", "b"]);
        assert!(listener.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_token() {
        let (_tx, rx) = mpsc::channel::<i32>(1);
        let (unregister, _requests) = mpsc::channel(1);
        let token = CancellationToken::new();
        let listener = Listener::new(3, rx, CancelHandle::new(3, token.clone(), unregister));
        let handle = listener.canceller();

        drop(listener);
        assert!(token.is_cancelled());
        // Dropping is not an explicit cancel; the handle can still unregister.
        assert!(!handle.is_cancelled());
    }
}
