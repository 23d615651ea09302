//! Single-source broadcast engine
//!
//! An engine drains one producer stream and republishes every value to a
//! dynamic set of listeners, each with its own bounded queue.
//!
//! # Architecture
//!
//! ```text
//!    [Producer stream]
//!            │
//!            ▼
//!  ┌───────────────────────┐   register / unregister   ┌──────────────┐
//!  │ ControlLoop (1 task)  │◄──────────────────────────│ Broadcaster  │
//!  │   listeners: HashMap  │──────────── ack ─────────►│  (handles)   │
//!  └───────────┬───────────┘                           └──────────────┘
//!              │ join_all(deliver per listener)
//!      ┌───────┼───────────────┐
//!      ▼       ▼               ▼
//!   [mpsc]  [mpsc]   ...    [mpsc]
//!  Listener Listener        Listener
//! ```
//!
//! The control loop is the only code that touches the listener set.
//! Delivery of one value to every listener runs concurrently and the loop
//! waits for the whole cohort before it handles the next event.

pub mod config;
pub mod convert;
pub mod engine;
pub mod listener;
pub mod stats;

pub use config::{BroadcastConfig, ListenerOptions, RejectionPolicy, TimeoutCallback};
pub use convert::{identity, Conversion, Converter};
pub use engine::Broadcaster;
pub use listener::{CancelHandle, Listener};
pub use stats::BroadcastStats;
