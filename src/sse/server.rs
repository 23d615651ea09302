//! SSE broadcasters
//!
//! Engines whose listeners receive ready-to-write frames. Each event is
//! encoded once on the control loop and the resulting `Bytes` is shared by
//! every listener.

use bytes::Bytes;
use futures::stream::Stream;

use crate::broadcast::{BroadcastConfig, Broadcaster};
use crate::registry::{KeyedBroadcaster, KeyedSource, OnDemandBroadcaster, RegistryKey, Source};

use super::encode::frame_converter;
use super::event::Event;

/// Media type of an event stream
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Headers an HTTP adapter sends before the first frame
pub const RESPONSE_HEADERS: [(&str, &str); 3] = [
    ("Cache-Control", "no-store"),
    ("Content-Type", CONTENT_TYPE),
    ("Connection", "keep-alive"),
];

/// Fan out a single event stream as encoded frames
pub fn broadcaster<S>(events: S, config: BroadcastConfig) -> Broadcaster<Bytes>
where
    S: Stream<Item = Event> + Send + 'static,
{
    Broadcaster::with_converter(events, frame_converter, config)
}

/// Fan out per-key event streams as encoded frames
pub fn keyed<K, S>(source: S, config: BroadcastConfig) -> KeyedBroadcaster<K, Event, Bytes>
where
    K: RegistryKey,
    S: KeyedSource<K, Event>,
{
    KeyedBroadcaster::with_converter(source, frame_converter, config)
}

/// Fan out a lazily opened event stream as encoded frames
pub fn on_demand<S>(source: S, config: BroadcastConfig) -> OnDemandBroadcaster<Event, Bytes>
where
    S: Source<Event>,
{
    OnDemandBroadcaster::with_converter(source, frame_converter, config)
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::broadcast::ListenerOptions;
    use crate::registry::{receiver_stream, SourceError, SourceHandle};
    use crate::sse::source::EventSource;

    async fn collect(mut listener: crate::broadcast::Listener<Bytes>) -> String {
        let mut body = Vec::new();
        while let Some(frame) = listener.recv().await {
            body.extend_from_slice(&frame);
        }
        String::from_utf8(body).unwrap()
    }

    #[tokio::test]
    async fn test_sse_broadcast() {
        let (tx, rx) = mpsc::channel::<i32>(1);
        let b = broadcaster(
            EventSource::new().json("", receiver_stream(rx)).into_stream(),
            BroadcastConfig::default().listener_buffer(4),
        );

        let r1 = tokio::spawn(collect(b.listen(ListenerOptions::new()).await.unwrap()));
        let r2 = tokio::spawn(collect(b.listen(ListenerOptions::new()).await.unwrap()));

        for i in 1..=3 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let expected = "data: 1\n\ndata: 2\n\ndata: 3\n\n";
        assert_eq!(r1.await.unwrap(), expected);
        assert_eq!(r2.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_sse_broadcast_with_event_name() {
        let (tx, rx) = mpsc::channel::<i32>(1);
        let b = broadcaster(
            EventSource::new().json("a", receiver_stream(rx)).into_stream(),
            BroadcastConfig::default(),
        );

        let r1 = tokio::spawn(collect(b.listen(ListenerOptions::new()).await.unwrap()));

        for i in 1..=3 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        assert_eq!(
            r1.await.unwrap(),
            "event: a\ndata: 1\n\nevent: a\ndata: 2\n\nevent: a\ndata: 3\n\n"
        );
    }

    #[tokio::test]
    async fn test_keyed_sse() {
        let b = keyed(
            |key: &String| {
                let key = key.clone();
                async move {
                    if key.is_empty() {
                        return Err(SourceError::new("missing key"));
                    }
                    let (tx, rx) = mpsc::channel(1);
                    tx.send(key).await.expect("receiver alive");
                    Ok(EventSource::new().text("room", receiver_stream(rx)).into_handle())
                }
            },
            BroadcastConfig::default().blocking(true),
        );

        let listener = b.listen("lobby".to_string(), ListenerOptions::new()).await.unwrap();
        assert_eq!(collect(listener).await, "event: room\ndata: lobby\n\n");

        let err = b
            .listen(String::new(), ListenerOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing key");
    }

    #[tokio::test]
    async fn test_on_demand_sse() {
        let b = on_demand(
            || async {
                Ok::<_, SourceError>(SourceHandle::new(futures::stream::iter(vec![
                    Event::unnamed("1"),
                ])))
            },
            BroadcastConfig::default().blocking(true),
        );

        let listener = b.listen(ListenerOptions::new()).await.unwrap();
        assert_eq!(collect(listener).await, "data: 1\n\n");
    }
}
