//! Event source adapter
//!
//! Tags the values of one or more typed streams with a fixed event name and
//! merges them into a single event stream. The merged stream ends once every
//! upstream has ended.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;

use crate::registry::SourceHandle;

use super::event::{marshal_event, Event, JsonMarshaler, Marshaler, TextMarshaler};

/// Builder merging typed streams into one event stream
#[derive(Default)]
pub struct EventSource {
    streams: Vec<BoxStream<'static, Event>>,
}

impl EventSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream whose values are serialized as JSON
    pub fn json<T, S>(self, name: impl Into<String>, input: S) -> Self
    where
        T: Serialize + Send + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        self.with_marshaler(name, input, JsonMarshaler)
    }

    /// Add a stream of text payloads
    pub fn text<T, S>(self, name: impl Into<String>, input: S) -> Self
    where
        T: AsRef<str> + Send + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        self.with_marshaler(name, input, TextMarshaler)
    }

    /// Add a stream serialized by a custom marshaler
    pub fn with_marshaler<T, S, M>(mut self, name: impl Into<String>, input: S, marshaler: M) -> Self
    where
        T: Send + 'static,
        S: Stream<Item = T> + Send + 'static,
        M: Marshaler<T>,
    {
        let name = name.into();
        let events = input.map(move |value| marshal_event(&name, &value, &marshaler));
        self.streams.push(events.boxed());
        self
    }

    /// Add a stream of ready-made events
    pub fn events<S>(mut self, input: S) -> Self
    where
        S: Stream<Item = Event> + Send + 'static,
    {
        self.streams.push(input.boxed());
        self
    }

    /// Merge several sources into one
    pub fn bundle(sources: impl IntoIterator<Item = EventSource>) -> Self {
        Self {
            streams: sources.into_iter().flat_map(|source| source.streams).collect(),
        }
    }

    /// Number of upstream streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Check whether the source has no upstream
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Merge every upstream into one event stream
    pub fn into_stream(self) -> BoxStream<'static, Event> {
        stream::select_all(self.streams).boxed()
    }

    /// Wrap the merged stream for a keyed or on-demand source
    pub fn into_handle(self) -> SourceHandle<Event> {
        SourceHandle::new(self.into_stream())
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("streams", &self.streams.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::receiver_stream;
    use crate::sse::event::MarshalError;

    #[derive(Serialize)]
    struct Score {
        player: &'static str,
        points: u32,
    }

    #[tokio::test]
    async fn test_tags_values_with_source_name() {
        let source = EventSource::new()
            .json("score", stream::iter(vec![Score { player: "p1", points: 3 }]));

        let events: Vec<Event> = source.into_stream().collect().await;
        assert_eq!(events, vec![Event::new("score", r#"{"player":"p1","points":3}"#)]);
    }

    #[tokio::test]
    async fn test_closes_after_every_upstream() {
        let (chat_tx, chat_rx) = mpsc::channel::<String>(4);
        let (tick_tx, tick_rx) = mpsc::channel::<u64>(4);

        let mut events = EventSource::new()
            .text("chat", receiver_stream(chat_rx))
            .json("tick", receiver_stream(tick_rx))
            .into_stream();

        chat_tx.send("hello".into()).await.unwrap();
        drop(chat_tx);
        assert_eq!(events.next().await, Some(Event::new("chat", "hello")));

        // One upstream is still open.
        tick_tx.send(1).await.unwrap();
        assert_eq!(events.next().await, Some(Event::new("tick", "1")));

        drop(tick_tx);
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn test_bundle_and_marshal_failure() {
        let failing = |_: &i32| -> Result<String, MarshalError> { Err(MarshalError::new("nope")) };
        let a = EventSource::new().with_marshaler("a", stream::iter(vec![1]), failing);
        let b = EventSource::new().events(stream::iter(vec![Event::unnamed("raw")]));

        let bundled = EventSource::bundle([a, b]);
        assert_eq!(bundled.len(), 2);

        let mut events: Vec<Event> = bundled.into_stream().collect().await;
        events.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(
            events,
            vec![
                Event::unnamed("raw"),
                Event::error("failed to serialize event: nope"),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_source_ends_immediately() {
        let source = EventSource::new();
        assert!(source.is_empty());
        assert_eq!(source.into_stream().next().await, None);
    }
}
