//! Broadcast engine implementation
//!
//! One control loop task per engine owns the listener set. Handles talk to
//! it through request channels and wait for an acknowledgement, so a
//! registration is always visible to the next value the loop delivers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::config::{BroadcastConfig, ListenerOptions, RejectionPolicy, TimeoutCallback};
use super::convert::{identity, Conversion, Converter};
use super::listener::{CancelHandle, Listener, Unregister};
use super::stats::{BroadcastStats, Counters};

/// Capacity of the registration and unregistration request queues
const REQUEST_QUEUE_CAPACITY: usize = 16;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Registration request sent to the control loop
struct Register<T> {
    id: u64,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
    on_timeout: Option<TimeoutCallback>,
    ack: oneshot::Sender<()>,
}

/// Why the control loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// The producer stream ended
    InputEnded,
    /// No activity within the idle timeout
    Idle,
    /// `close()` was called
    Requested,
    /// Blocking mode with no listeners and no handle left to register one
    Abandoned,
}

/// Result of one delivery attempt to one listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    /// The deadline passed while the queue stayed full
    Evicted,
    /// The reading half was dropped
    Disconnected,
    /// The listener was cancelled while the delivery was pending
    Cancelled,
    /// The engine is shutting down
    Interrupted,
}

/// Delivery deadline shared by every listener for one value
#[derive(Debug, Clone, Copy)]
enum Deadline {
    Never,
    Now,
    At(Instant),
}

impl Deadline {
    fn start(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Deadline::Never,
            Some(timeout) if timeout.is_zero() => Deadline::Now,
            Some(timeout) => Deadline::At(Instant::now() + timeout),
        }
    }
}

struct Shared<T> {
    id: u64,
    register: mpsc::Sender<Register<T>>,
    unregister: mpsc::Sender<Unregister>,
    shutdown: CancellationToken,
    closed: CancellationToken,
    counters: Arc<Counters>,
    listener_buffer: usize,
    next_listener: AtomicU64,
}

/// Handle to a broadcast engine
///
/// Cloning the handle does not create a new engine. An engine with listeners,
/// or one that is not in blocking mode, keeps draining its producer after
/// every handle is dropped, until the stream ends, the idle timeout fires or
/// `close` is called. In blocking mode an engine without listeners closes
/// once the last handle is gone, since nobody can register anymore.
///
/// # Example
/// ```no_run
/// use fanout::{receiver_stream, BroadcastConfig, Broadcaster, ListenerOptions};
///
/// # async fn example() -> fanout::Result<()> {
/// let (tx, rx) = tokio::sync::mpsc::channel(64);
/// let broadcaster = Broadcaster::new(receiver_stream(rx), BroadcastConfig::default());
///
/// let mut listener = broadcaster.listen(ListenerOptions::new().buffer(8)).await?;
/// tx.send("hello").await.unwrap();
/// assert_eq!(listener.recv().await, Some("hello"));
/// # Ok(())
/// # }
/// ```
pub struct Broadcaster<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Start an engine that republishes every value of `input`
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(input: S, config: BroadcastConfig) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self::spawn(input.boxed(), identity(), config)
    }

    /// Start an engine that converts each value before republishing it
    pub fn with_converter<In, S, F>(input: S, converter: F, config: BroadcastConfig) -> Self
    where
        In: Send + 'static,
        S: Stream<Item = In> + Send + 'static,
        F: Fn(In) -> Conversion<T> + Send + Sync + 'static,
    {
        Self::spawn(input.boxed(), Arc::new(converter), config)
    }

    pub(crate) fn spawn<In>(
        input: BoxStream<'static, In>,
        converter: Converter<In, T>,
        config: BroadcastConfig,
    ) -> Self
    where
        In: Send + 'static,
    {
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let (register_tx, register_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let control = ControlLoop {
            id,
            input,
            converter,
            listeners: HashMap::new(),
            register_rx,
            unregister_rx,
            shutdown: shutdown.clone(),
            closed: closed.clone(),
            counters: Arc::clone(&counters),
            config: config.clone(),
        };

        tracing::debug!(
            engine = id,
            blocking = config.blocking,
            timeout = ?config.timeout,
            idle_timeout = ?config.idle_timeout,
            "Broadcast engine started"
        );
        tokio::spawn(control.run());

        Self {
            inner: Arc::new(Shared {
                id,
                register: register_tx,
                unregister: unregister_tx,
                shutdown,
                closed,
                counters,
                listener_buffer: config.listener_buffer,
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Register a new listener
    ///
    /// Returns once the control loop has added the listener, so every value
    /// produced after this call returns is a candidate for delivery to it.
    pub async fn listen(&self, options: ListenerOptions) -> Result<Listener<T>> {
        let shared = &self.inner;
        if shared.closed.is_cancelled() {
            return Err(Error::Closed);
        }

        let id = shared.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(options.capacity(shared.listener_buffer));
        let (ack, acked) = oneshot::channel();
        let cancel = CancellationToken::new();
        let request = Register {
            id,
            tx,
            cancel: cancel.clone(),
            on_timeout: options.on_timeout.clone(),
            ack,
        };

        shared
            .register
            .send(request)
            .await
            .map_err(|_| Error::Closed)?;
        acked.await.map_err(|_| Error::Closed)?;

        let canceller = CancelHandle::new(id, cancel, shared.unregister.clone());
        if let Some(token) = options.cancel {
            let canceller = canceller.clone();
            let closed = shared.closed.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => canceller.cancel().await,
                    // Cancelled some other way, or the reader went away
                    _ = canceller.cancelled() => {}
                    _ = closed.cancelled() => {}
                }
            });
        }

        Ok(Listener::new(id, rx, canceller))
    }
}

impl<T> Broadcaster<T> {
    /// Engine ID, unique within the process
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Check whether the engine has reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Wait until the engine has closed
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Ask the engine to close
    ///
    /// Every listener is closed and pending registrations fail with
    /// [`Error::Closed`]. Use [`closed`](Self::closed) to wait for completion.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Get a snapshot of the engine's counters
    pub fn stats(&self) -> BroadcastStats {
        self.inner.counters.snapshot()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.stats().listeners
    }

    /// Token cancelled when the engine closes
    pub(crate) fn closed_signal(&self) -> CancellationToken {
        self.inner.closed.clone()
    }
}

/// Per-listener delivery state owned by the control loop
struct Slot<T> {
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
    on_timeout: Option<TimeoutCallback>,
}

struct ControlLoop<In, Out> {
    id: u64,
    input: BoxStream<'static, In>,
    converter: Converter<In, Out>,
    listeners: HashMap<u64, Slot<Out>>,
    register_rx: mpsc::Receiver<Register<Out>>,
    unregister_rx: mpsc::Receiver<Unregister>,
    shutdown: CancellationToken,
    closed: CancellationToken,
    counters: Arc<Counters>,
    config: BroadcastConfig,
}

impl<In, Out> ControlLoop<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + 'static,
{
    async fn run(mut self) {
        // Latch `closed` even if a converter panics and unwinds this task.
        let _closed = self.closed.clone().drop_guard();

        let reason = self.event_loop().await;
        self.close(reason);
    }

    async fn event_loop(&mut self) -> CloseReason {
        let idle_timeout = self.config.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout.unwrap_or_default());
        tokio::pin!(idle);

        let mut registrations_open = true;
        let mut unregistrations_open = true;

        loop {
            // A close requested during a long delivery wins over queued requests.
            if self.shutdown.is_cancelled() {
                return CloseReason::Requested;
            }

            if let Some(timeout) = idle_timeout {
                idle.as_mut().reset(Instant::now() + timeout);
            }

            // Blocking mode: leave the producer undrained until someone listens.
            if self.config.blocking && self.listeners.is_empty() {
                if !registrations_open {
                    return CloseReason::Abandoned;
                }

                tokio::select! {
                    _ = self.shutdown.cancelled() => return CloseReason::Requested,
                    request = self.register_rx.recv() => match request {
                        Some(request) => self.register(request),
                        None => registrations_open = false,
                    },
                    request = self.unregister_rx.recv(), if unregistrations_open => match request {
                        Some(request) => self.unregister(request),
                        None => unregistrations_open = false,
                    },
                    _ = &mut idle, if idle_timeout.is_some() => return CloseReason::Idle,
                }
                continue;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return CloseReason::Requested,
                value = self.input.next() => match value {
                    Some(value) => self.broadcast(value).await,
                    None => return CloseReason::InputEnded,
                },
                request = self.register_rx.recv(), if registrations_open => match request {
                    Some(request) => self.register(request),
                    None => registrations_open = false,
                },
                request = self.unregister_rx.recv(), if unregistrations_open => match request {
                    Some(request) => self.unregister(request),
                    None => unregistrations_open = false,
                },
                _ = &mut idle, if idle_timeout.is_some() => return CloseReason::Idle,
            }
        }
    }

    fn register(&mut self, request: Register<Out>) {
        self.listeners.insert(
            request.id,
            Slot {
                tx: request.tx,
                cancel: request.cancel,
                on_timeout: request.on_timeout,
            },
        );
        self.counters.set_listeners(self.listeners.len());

        tracing::debug!(
            engine = self.id,
            listener = request.id,
            listeners = self.listeners.len(),
            "Listener registered"
        );

        let _ = request.ack.send(());
    }

    fn unregister(&mut self, request: Unregister) {
        // Dropping the sender closes the listener's queue.
        if self.listeners.remove(&request.id).is_some() {
            self.counters.set_listeners(self.listeners.len());

            tracing::debug!(
                engine = self.id,
                listener = request.id,
                listeners = self.listeners.len(),
                "Listener unregistered"
            );
        }

        let _ = request.ack.send(());
    }

    async fn broadcast(&mut self, value: In) {
        if self.listeners.is_empty() {
            Counters::incr(&self.counters.dropped);
            return;
        }

        let value = match (self.converter)(value) {
            Conversion::Deliver(value) => value,
            Conversion::Drop => {
                Counters::incr(&self.counters.rejected);
                if self.config.rejection == RejectionPolicy::Diagnose {
                    tracing::warn!(engine = self.id, "Value dropped by converter");
                }
                return;
            }
            Conversion::Fail(reason) => {
                Counters::incr(&self.counters.rejected);
                match self.config.rejection {
                    RejectionPolicy::Diagnose => {
                        tracing::warn!(engine = self.id, reason = %reason, "Value conversion failed")
                    }
                    RejectionPolicy::Silent => {
                        tracing::debug!(engine = self.id, reason = %reason, "Value conversion failed")
                    }
                }
                return;
            }
        };

        Counters::incr(&self.counters.broadcasts);

        let deadline = Deadline::start(self.config.timeout);
        let shutdown = &self.shutdown;
        let attempts = self.listeners.iter().map(|(&id, slot)| {
            let value = value.clone();
            async move { (id, deliver(slot, value, deadline, shutdown).await) }
        });
        let outcomes = join_all(attempts).await;

        // Apply removals only after the whole cohort has finished.
        for (id, outcome) in outcomes {
            match outcome {
                Delivery::Sent | Delivery::Interrupted => {}
                Delivery::Disconnected => {
                    self.listeners.remove(&id);
                    tracing::debug!(engine = self.id, listener = id, "Listener dropped by reader");
                }
                Delivery::Cancelled => {
                    self.listeners.remove(&id);
                    tracing::debug!(engine = self.id, listener = id, "Listener cancelled during delivery");
                }
                Delivery::Evicted => {
                    if let Some(slot) = self.listeners.remove(&id) {
                        Counters::incr(&self.counters.evicted);
                        tracing::warn!(
                            engine = self.id,
                            listener = id,
                            "Listener evicted: delivery deadline exceeded"
                        );
                        if let Some(on_timeout) = slot.on_timeout {
                            tokio::spawn(async move { on_timeout() });
                        }
                    }
                }
            }
        }
        self.counters.set_listeners(self.listeners.len());
    }

    fn close(mut self, reason: CloseReason) {
        let listeners = self.listeners.len();
        self.listeners.clear();
        self.counters.set_listeners(0);

        self.register_rx.close();
        self.unregister_rx.close();
        // Dropping queued registrations fails their acknowledgements.
        while self.register_rx.try_recv().is_ok() {}
        while let Ok(request) = self.unregister_rx.try_recv() {
            let _ = request.ack.send(());
        }

        self.closed.cancel();

        tracing::info!(
            engine = self.id,
            reason = ?reason,
            listeners = listeners,
            "Broadcast engine closed"
        );
    }
}

/// Deliver one value to one listener
///
/// A non-blocking send is always tried first, so a listener with free
/// capacity is never evicted by a deadline that has already passed.
async fn deliver<T>(
    slot: &Slot<T>,
    value: T,
    deadline: Deadline,
    shutdown: &CancellationToken,
) -> Delivery {
    let Slot { tx, cancel, .. } = slot;
    if cancel.is_cancelled() {
        return Delivery::Cancelled;
    }

    let value = match tx.try_send(value) {
        Ok(()) => return Delivery::Sent,
        Err(TrySendError::Closed(_)) => return Delivery::Disconnected,
        Err(TrySendError::Full(value)) => value,
    };

    match deadline {
        Deadline::Now => Delivery::Evicted,
        Deadline::Never => tokio::select! {
            result = tx.send(value) => match result {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Disconnected,
            },
            _ = cancel.cancelled() => Delivery::Cancelled,
            _ = shutdown.cancelled() => Delivery::Interrupted,
        },
        Deadline::At(at) => tokio::select! {
            biased;
            result = tx.send(value) => match result {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Disconnected,
            },
            _ = cancel.cancelled() => Delivery::Cancelled,
            _ = shutdown.cancelled() => Delivery::Interrupted,
            _ = tokio::time::sleep_until(at) => Delivery::Evicted,
        },
    }
}
