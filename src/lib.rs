//! Fan-out broadcasting for async streams
//!
//! A [`Broadcaster`] drains one producer stream and republishes each value to
//! every registered [`Listener`]. Slow listeners are evicted after a
//! configurable deadline so that one stalled reader cannot hold back the rest.
//!
//! On top of the engine:
//!
//! - [`KeyedBroadcaster`] opens one engine per key on first use and forgets
//!   it once the engine closes
//! - [`OnDemandBroadcaster`] does the same for a single unkeyed source
//! - [`sse`] encodes events as `text/event-stream` frames and decodes them
//!   on the client side
//!
//! # Example
//!
//! ```no_run
//! use fanout::{receiver_stream, BroadcastConfig, Broadcaster, ListenerOptions};
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> fanout::Result<()> {
//! let (tx, rx) = mpsc::channel(16);
//! let broadcaster = Broadcaster::new(
//!     receiver_stream(rx),
//!     BroadcastConfig::default().timeout(Duration::from_millis(250)),
//! );
//!
//! let mut listener = broadcaster.listen(ListenerOptions::new().buffer(8)).await?;
//! tx.send(42u32).await.ok();
//! while let Some(value) = listener.recv().await {
//!     println!("got {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod error;
pub mod registry;
pub mod sse;

pub use broadcast::{
    BroadcastConfig, BroadcastStats, Broadcaster, CancelHandle, Conversion, Listener,
    ListenerOptions, RejectionPolicy,
};
pub use error::{Error, Result};
pub use registry::{
    receiver_stream, EntryStats, KeyedBroadcaster, KeyedSource, OnDemandBroadcaster, Source,
    SourceError, SourceHandle,
};
