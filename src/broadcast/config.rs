//! Broadcast engine configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Callback invoked when a listener is evicted for missing its delivery deadline
pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

/// How the engine reports values that the converter did not deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectionPolicy {
    /// Drop rejected values quietly; conversion failures are logged at debug level
    #[default]
    Silent,
    /// Log every rejected or failed conversion at warn level
    Diagnose,
}

/// Engine configuration options
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Per-value delivery deadline
    ///
    /// `None` waits for every listener indefinitely, `Some(Duration::ZERO)`
    /// evicts any listener whose queue is full, any other value evicts
    /// listeners that stay full past the deadline.
    pub timeout: Option<Duration>,

    /// Default listener queue capacity (0 = unbuffered)
    pub listener_buffer: usize,

    /// Hold back the producer until at least one listener is registered
    pub blocking: bool,

    /// Close the engine after this long without values or registrations
    pub idle_timeout: Option<Duration>,

    /// Reporting of values dropped by the converter
    pub rejection: RejectionPolicy,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            listener_buffer: 0,
            blocking: false,
            idle_timeout: None,
            rejection: RejectionPolicy::Silent,
        }
    }
}

impl BroadcastConfig {
    /// Set the per-value delivery deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Only attempt non-blocking delivery, evicting listeners that are full
    pub fn non_blocking(mut self) -> Self {
        self.timeout = Some(Duration::ZERO);
        self
    }

    /// Set the default listener queue capacity
    pub fn listener_buffer(mut self, size: usize) -> Self {
        self.listener_buffer = size;
        self
    }

    /// Enable or disable blocking mode
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Set the idle timeout (a zero duration disables it)
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    /// Set how converter rejections are reported
    pub fn rejection(mut self, policy: RejectionPolicy) -> Self {
        self.rejection = policy;
        self
    }
}

/// Per-listener registration options
#[derive(Clone, Default)]
pub struct ListenerOptions {
    /// Queue capacity, overriding the engine default
    pub buffer: Option<usize>,

    /// Unregister the listener once this token is cancelled
    pub cancel: Option<CancellationToken>,

    /// Invoked after the listener is evicted for missing a delivery deadline
    pub on_timeout: Option<TimeoutCallback>,
}

impl ListenerOptions {
    /// Create options that inherit every engine default
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity for this listener
    pub fn buffer(mut self, size: usize) -> Self {
        self.buffer = Some(size);
        self
    }

    /// Tie the listener's lifetime to a cancellation token
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Register an eviction callback
    ///
    /// The callback runs on its own task, so a slow or panicking callback
    /// cannot stall the engine.
    pub fn on_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(callback));
        self
    }

    /// Queue capacity to allocate, given the engine default
    ///
    /// tokio channels cannot be unbuffered, so 0 maps to a single slot.
    pub(crate) fn capacity(&self, default: usize) -> usize {
        self.buffer.unwrap_or(default).max(1)
    }
}

impl fmt::Debug for ListenerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerOptions")
            .field("buffer", &self.buffer)
            .field("cancel", &self.cancel.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}
