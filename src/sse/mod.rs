//! Server-sent events
//!
//! Wire codec and adapters for `text/event-stream`:
//!
//! - [`EventSource`] tags typed streams with event names and merges them
//! - [`broadcaster`], [`keyed`] and [`on_demand`] fan encoded frames out
//!   to every connected client
//! - [`listen`] consumes a remote event stream
//!
//! The HTTP server itself is left to the caller: write [`RESPONSE_HEADERS`],
//! then every frame a listener receives.

pub mod client;
pub mod decode;
pub mod encode;
pub mod event;
pub mod server;
pub mod source;

pub use client::{decode_stream, is_event_stream, listen, EventStream, SseClientConfig};
pub use decode::{decode_str, EventDecoder};
pub use encode::{encode, encode_frame};
pub use event::{
    marshal_event, Event, JsonMarshaler, MarshalError, Marshaler, TextMarshaler, ERROR_EVENT,
};
pub use server::{broadcaster, keyed, on_demand, CONTENT_TYPE, RESPONSE_HEADERS};
pub use source::EventSource;
