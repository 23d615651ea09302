//! On-demand broadcaster
//!
//! Single-slot counterpart of [`KeyedBroadcaster`]: the source is opened by
//! the first `listen`, released when the engine closes, and opened again by
//! the next `listen` after that.

use std::sync::Arc;

use crate::broadcast::{identity, BroadcastConfig, Conversion, Listener, ListenerOptions};
use crate::error::Result;

use super::entry::EntryStats;
use super::source::{Source, Unkeyed};
use super::store::KeyedBroadcaster;

/// Broadcaster whose source is opened lazily
pub struct OnDemandBroadcaster<In, Out = In> {
    slot: KeyedBroadcaster<(), In, Out>,
}

impl<In, Out> Clone for OnDemandBroadcaster<In, Out> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> OnDemandBroadcaster<T, T>
where
    T: Clone + Send + 'static,
{
    /// Create a broadcaster that republishes values unchanged
    pub fn new<S>(source: S, config: BroadcastConfig) -> Self
    where
        S: Source<T>,
    {
        Self {
            slot: KeyedBroadcaster::from_parts(Box::new(Unkeyed(source)), identity(), config),
        }
    }
}

impl<In, Out> OnDemandBroadcaster<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + 'static,
{
    /// Create a broadcaster that converts each value before delivery
    pub fn with_converter<S, F>(source: S, converter: F, config: BroadcastConfig) -> Self
    where
        S: Source<In>,
        F: Fn(In) -> Conversion<Out> + Send + Sync + 'static,
    {
        Self {
            slot: KeyedBroadcaster::from_parts(
                Box::new(Unkeyed(source)),
                Arc::new(converter),
                config,
            ),
        }
    }

    /// Register a listener, opening the source first if no engine is live
    ///
    /// A source-open failure is returned to this caller; the next call
    /// tries to open the source again.
    pub async fn listen(&self, options: ListenerOptions) -> Result<Listener<Out>> {
        self.slot.listen((), options).await
    }

    /// Check whether no live engine currently exists
    pub async fn is_closed(&self) -> bool {
        !self.slot.is_live(&()).await
    }

    /// Close the current engine, if any
    pub async fn close(&self) {
        self.slot.close(&()).await;
    }

    /// Get statistics for the current engine
    pub async fn stats(&self) -> Option<EntryStats> {
        self.slot.stats(&()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;

    use super::*;
    use crate::error::Error;
    use crate::registry::{SourceError, SourceHandle};

    #[tokio::test]
    async fn test_on_demand_listen() {
        let b: OnDemandBroadcaster<i32> = OnDemandBroadcaster::new(
            || async { Ok::<_, SourceError>(SourceHandle::new(stream::iter(vec![1]))) },
            BroadcastConfig::default().blocking(true),
        );
        assert!(b.is_closed().await);

        let mut listener = b.listen(ListenerOptions::new()).await.unwrap();
        assert_eq!(listener.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_on_demand_error_does_not_poison() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let b: OnDemandBroadcaster<i32> = OnDemandBroadcaster::new(
            move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(SourceError::new("expected error"))
                    } else {
                        Ok(SourceHandle::new(stream::iter(vec![attempt as i32])))
                    }
                }
            },
            BroadcastConfig::default().blocking(true),
        );

        match b.listen(ListenerOptions::new()).await {
            Err(Error::SourceOpen(err)) => assert_eq!(err.message(), "expected error"),
            other => panic!("expected source error, got {:?}", other.map(|l| l.id())),
        }

        let mut listener = b.listen(ListenerOptions::new()).await.unwrap();
        assert_eq!(listener.recv().await, Some(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_on_demand_reopens() {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let b: OnDemandBroadcaster<&'static str, String> = OnDemandBroadcaster::with_converter(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SourceError>(SourceHandle::new(stream::iter(vec!["a"]))) }
            },
            |s: &'static str| Conversion::Deliver(s.to_uppercase()),
            BroadcastConfig::default().blocking(true),
        );

        for _ in 0..2 {
            let mut listener = b.listen(ListenerOptions::new()).await.unwrap();
            assert_eq!(listener.recv().await.as_deref(), Some("A"));
            assert_eq!(listener.recv().await, None);
        }
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }
}
