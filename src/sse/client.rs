//! Event stream client
//!
//! Issues an HTTP request, checks that the answer is an event stream and
//! decodes the body on a background task. Decoded events arrive on a bounded
//! channel; the stream ends when the body ends.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE as CONTENT_TYPE_HEADER;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::decode::{EventDecoder, DEFAULT_MAX_LINE};
use super::event::Event;
use super::server::CONTENT_TYPE;

/// Client request options
#[derive(Debug, Clone)]
pub struct SseClientConfig {
    /// HTTP client used for the request
    pub client: reqwest::Client,

    /// Request method
    pub method: Method,

    /// Request body and its content type
    pub body: Option<(Bytes, String)>,

    /// Extra request headers
    pub headers: Vec<(String, String)>,

    /// Capacity of the decoded event queue
    pub buffer: usize,

    /// Longest accepted line; a longer one ends the stream with an `error` event
    pub max_line: usize,

    /// Stops decoding when cancelled
    pub cancel: Option<CancellationToken>,
}

impl Default for SseClientConfig {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            method: Method::GET,
            body: None,
            headers: Vec::new(),
            buffer: 0,
            max_line: DEFAULT_MAX_LINE,
            cancel: None,
        }
    }
}

impl SseClientConfig {
    /// Create a config issuing a plain GET
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Set the request method
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Send a request body with the given content type
    pub fn body(mut self, body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = Some((body.into(), content_type.into()));
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the decoded event queue capacity
    pub fn buffer(mut self, size: usize) -> Self {
        self.buffer = size;
        self
    }

    /// Set the longest accepted line
    pub fn max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Stop decoding once `token` is cancelled
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Decoded events read from a response body
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Receive the next event, or `None` once the body has ended
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

/// Check a `Content-Type` value for the event stream media type
pub fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case(CONTENT_TYPE))
        .unwrap_or(false)
}

/// Connect to `url` and decode its event stream
///
/// Fails with [`Error::Cancelled`] if the config's token fires before the
/// response headers arrive.
pub async fn listen(url: &str, config: SseClientConfig) -> Result<EventStream> {
    let cancel = config.cancel.clone().unwrap_or_default();
    let mut request = config.client.request(config.method.clone(), url);
    for (name, value) in &config.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some((body, content_type)) = config.body {
        request = request
            .header(CONTENT_TYPE_HEADER, content_type)
            .body(body);
    }

    tracing::debug!(url = %url, method = %config.method, "Opening event stream");
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        response = request.send() => response?,
    };

    let content_type = response
        .headers()
        .get(CONTENT_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    if !is_event_stream(&content_type) {
        tracing::warn!(url = %url, content_type = %content_type, "Not an event stream");
        return Err(Error::BadContentType(content_type));
    }

    let body = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
    let decoder = EventDecoder::new().with_max_line(config.max_line);
    Ok(spawn_pump(body, decoder, config.buffer, cancel))
}

/// Decode an arbitrary byte stream on a background task
///
/// A read error is reported as one final `error` event.
pub fn decode_stream<S>(body: S, buffer: usize) -> EventStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    spawn_pump(body, EventDecoder::new(), buffer, CancellationToken::new())
}

fn spawn_pump<S>(
    body: S,
    mut decoder: EventDecoder,
    buffer: usize,
    cancel: CancellationToken,
) -> EventStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::spawn(async move {
        let mut body = Box::pin(body);

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for event in decoder.feed(&bytes) {
                        let sent = tokio::select! {
                            _ = cancel.cancelled() => return,
                            sent = tx.send(event) => sent,
                        };
                        if sent.is_err() {
                            // Reader went away
                            return;
                        }
                    }
                    if decoder.is_overflowed() {
                        tracing::debug!("Event stream line too long, stopping");
                        return;
                    }
                }
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "Event stream read failed");
                    let _ = tx.send(Event::error(err.to_string())).await;
                    return;
                }
                None => break,
            }
        }

        if let Some(event) = decoder.finish() {
            let _ = tx.send(event).await;
        }
    });

    EventStream { rx }
}
