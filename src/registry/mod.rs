//! Lazily opened sources
//!
//! The registry creates broadcast engines on demand: one per key for
//! [`KeyedBroadcaster`], a single slot for [`OnDemandBroadcaster`].
//!
//! # Architecture
//!
//! ```text
//!                       KeyedBroadcaster
//!                 ┌──────────────────────────┐
//!   listen(key) ─►│ entries: Mutex<HashMap<  │
//!                 │   K, RegistryEntry {     │
//!                 │     broadcaster,         │
//!                 │     release,             │
//!                 │   }                      │
//!                 │ >>                       │
//!                 └────────────┬─────────────┘
//!                              │ miss or closed
//!                              ▼
//!                    source.open(&key) ──► Broadcaster::spawn
//!                                                 │
//!                                           closed()
//!                                                 ▼
//!                              release.cancel() + remove entry
//!                              (only if still the same engine)
//! ```

pub mod entry;
pub mod error;
pub mod on_demand;
pub mod source;
pub mod store;

pub use entry::EntryStats;
pub use error::SourceError;
pub use on_demand::OnDemandBroadcaster;
pub use source::{receiver_stream, KeyedSource, Source, SourceHandle};
pub use store::{KeyedBroadcaster, RegistryKey};
