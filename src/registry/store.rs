//! Keyed broadcaster implementation
//!
//! Maps each key to a lazily created engine. A key's source is opened on the
//! first `listen` for it, released when its engine closes, and reopened by
//! the next `listen` after that.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{
    identity, BroadcastConfig, Broadcaster, Conversion, Converter, Listener, ListenerOptions,
};
use crate::error::{Error, Result};

use super::entry::{EntryStats, RegistryEntry};
use super::source::KeyedSource;

/// Trait alias for registry keys
pub trait RegistryKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<K> RegistryKey for K where K: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

struct Inner<K, In, Out> {
    /// Map of key to live (or just closed) entry
    entries: Mutex<HashMap<K, RegistryEntry<Out>>>,

    source: Box<dyn KeyedSource<K, In>>,

    converter: Converter<In, Out>,

    config: BroadcastConfig,
}

/// Registry of per-key engines
///
/// The lock is held while a key is looked up, its source opened and its
/// engine created, and while a closed engine's entry is removed. Listener
/// registration happens outside of it.
pub struct KeyedBroadcaster<K, In, Out = In> {
    inner: Arc<Inner<K, In, Out>>,
}

impl<K, In, Out> Clone for KeyedBroadcaster<K, In, Out> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T> KeyedBroadcaster<K, T, T>
where
    K: RegistryKey,
    T: Clone + Send + 'static,
{
    /// Create a registry that republishes each key's values unchanged
    pub fn new<S>(source: S, config: BroadcastConfig) -> Self
    where
        S: KeyedSource<K, T>,
    {
        Self::from_parts(Box::new(source), identity(), config)
    }
}

impl<K, In, Out> KeyedBroadcaster<K, In, Out>
where
    K: RegistryKey,
    In: Send + 'static,
    Out: Clone + Send + 'static,
{
    /// Create a registry whose engines convert each value before delivery
    pub fn with_converter<S, F>(source: S, converter: F, config: BroadcastConfig) -> Self
    where
        S: KeyedSource<K, In>,
        F: Fn(In) -> Conversion<Out> + Send + Sync + 'static,
    {
        Self::from_parts(Box::new(source), Arc::new(converter), config)
    }

    pub(crate) fn from_parts(
        source: Box<dyn KeyedSource<K, In>>,
        converter: Converter<In, Out>,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                source,
                converter,
                config,
            }),
        }
    }

    /// Register a listener on the engine for `key`
    ///
    /// Opens the key's source and starts a new engine when no live engine
    /// exists. A source-open failure is returned to this caller only and
    /// leaves no state behind.
    pub async fn listen(&self, key: K, options: ListenerOptions) -> Result<Listener<Out>> {
        let (broadcaster, fresh) = self.acquire(&key).await?;
        match broadcaster.listen(options.clone()).await {
            // The existing engine closed after the lookup: start over once.
            Err(Error::Closed) if !fresh => {
                let (broadcaster, _) = self.acquire(&key).await?;
                broadcaster.listen(options).await
            }
            result => result,
        }
    }

    /// Look up the live engine for `key`, creating one if needed
    async fn acquire(&self, key: &K) -> Result<(Broadcaster<Out>, bool)> {
        let mut entries = self.inner.entries.lock().await;

        if let Some(entry) = entries.get(key) {
            if entry.is_live() {
                return Ok((entry.broadcaster.clone(), false));
            }
        }

        self.open_entry(&mut entries, key).await
    }

    /// Open the key's source and register a new engine, with the lock held
    async fn open_entry(
        &self,
        entries: &mut HashMap<K, RegistryEntry<Out>>,
        key: &K,
    ) -> Result<(Broadcaster<Out>, bool)> {
        let handle = match self.inner.source.open(key).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(key = ?key, error = %err, "Source open failed");
                return Err(Error::SourceOpen(err));
            }
        };

        let (stream, release) = handle.into_parts();
        let broadcaster = Broadcaster::spawn(
            stream,
            Arc::clone(&self.inner.converter),
            self.inner.config.clone(),
        );
        entries.insert(
            key.clone(),
            RegistryEntry::new(broadcaster.clone(), release.clone()),
        );
        self.watch(key.clone(), &broadcaster, release);

        tracing::info!(
            key = ?key,
            engine = broadcaster.id(),
            keys = entries.len(),
            "Source opened"
        );

        Ok((broadcaster, true))
    }

    /// Release the key's source and drop its entry once the engine closes
    fn watch(&self, key: K, broadcaster: &Broadcaster<Out>, release: CancellationToken) {
        let registry: Weak<Inner<K, In, Out>> = Arc::downgrade(&self.inner);
        let engine_id = broadcaster.id();
        let closed = broadcaster.closed_signal();

        tokio::spawn(async move {
            closed.cancelled().await;
            release.cancel();

            let Some(inner) = registry.upgrade() else {
                return;
            };
            let mut entries = inner.entries.lock().await;

            // A newer engine may already serve this key.
            let current = entries
                .get(&key)
                .is_some_and(|entry| entry.broadcaster.id() == engine_id);
            if current {
                entries.remove(&key);
                tracing::info!(key = ?key, engine = engine_id, "Registry entry removed");
            }
        });
    }

    /// Check whether `key` has an engine that accepts listeners
    pub async fn is_live(&self, key: &K) -> bool {
        let entries = self.inner.entries.lock().await;
        entries.get(key).is_some_and(|entry| entry.is_live())
    }

    /// Close the engine serving `key`, if any
    pub async fn close(&self, key: &K) {
        let entries = self.inner.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            entry.broadcaster.close();
        }
    }

    /// Close every engine
    pub async fn close_all(&self) {
        let entries = self.inner.entries.lock().await;
        for entry in entries.values() {
            entry.broadcaster.close();
        }
    }

    /// Get statistics for `key`
    pub async fn stats(&self, key: &K) -> Option<EntryStats> {
        let entries = self.inner.entries.lock().await;
        entries.get(key).map(|entry| entry.stats())
    }

    /// Number of keys with a registered engine
    pub async fn key_count(&self) -> usize {
        self.inner.entries.lock().await.len()
    }
}
