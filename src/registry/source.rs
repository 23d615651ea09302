//! Producer sources
//!
//! A source hands the registry a producer stream plus a release token. The
//! registry cancels the token once the engine built on the stream closes,
//! so the producer can stop feeding a stream nobody reads anymore.

use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::SourceError;

/// Adapt a tokio channel receiver into a producer stream
pub fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|value| (value, rx)) }).boxed()
}

/// An opened producer stream
pub struct SourceHandle<T> {
    stream: BoxStream<'static, T>,
    release: CancellationToken,
}

impl<T: Send + 'static> SourceHandle<T> {
    /// Wrap a producer stream
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            release: CancellationToken::new(),
        }
    }

    /// Wrap a tokio channel receiver
    pub fn from_receiver(rx: mpsc::Receiver<T>) -> Self {
        Self::new(receiver_stream(rx))
    }
}

impl<T> SourceHandle<T> {
    /// Use `token` as the release signal instead of a fresh one
    pub fn with_release(mut self, token: CancellationToken) -> Self {
        self.release = token;
        self
    }

    /// Token cancelled when the stream is no longer needed
    pub fn release_token(&self) -> CancellationToken {
        self.release.clone()
    }

    pub(crate) fn into_parts(self) -> (BoxStream<'static, T>, CancellationToken) {
        (self.stream, self.release)
    }
}

impl<T> std::fmt::Debug for SourceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("released", &self.release.is_cancelled())
            .finish()
    }
}

/// Opens a producer stream for a key
///
/// Implemented for any `Fn(&K) -> impl Future<Output = Result<SourceHandle<T>, SourceError>>`.
pub trait KeyedSource<K, T>: Send + Sync + 'static {
    /// Open the stream for `key`
    fn open(&self, key: &K) -> BoxFuture<'static, Result<SourceHandle<T>, SourceError>>;
}

impl<K, T, F, Fut> KeyedSource<K, T> for F
where
    F: Fn(&K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SourceHandle<T>, SourceError>> + Send + 'static,
{
    fn open(&self, key: &K) -> BoxFuture<'static, Result<SourceHandle<T>, SourceError>> {
        Box::pin(self(key))
    }
}

/// Opens a producer stream on demand
///
/// Implemented for any `Fn() -> impl Future<Output = Result<SourceHandle<T>, SourceError>>`.
pub trait Source<T>: Send + Sync + 'static {
    /// Open a fresh stream
    fn open(&self) -> BoxFuture<'static, Result<SourceHandle<T>, SourceError>>;
}

impl<T, F, Fut> Source<T> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SourceHandle<T>, SourceError>> + Send + 'static,
{
    fn open(&self) -> BoxFuture<'static, Result<SourceHandle<T>, SourceError>> {
        Box::pin(self())
    }
}

/// Presents an unkeyed source as a source keyed by `()`
pub(crate) struct Unkeyed<S>(pub(crate) S);

impl<T, S> KeyedSource<(), T> for Unkeyed<S>
where
    S: Source<T>,
{
    fn open(&self, _key: &()) -> BoxFuture<'static, Result<SourceHandle<T>, SourceError>> {
        self.0.open()
    }
}
