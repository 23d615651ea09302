//! Chat Server - Fans chat messages out to browsers over server-sent events
//!
//! Run with: cargo run --example chat_server -- [bind_addr]
//!
//! Then open http://localhost:8080/ in a few browser tabs.
//!
//! This example demonstrates:
//! - Feeding a producer channel into `sse::broadcaster`
//! - Writing `RESPONSE_HEADERS` followed by every frame a listener receives
//! - Dropping a listener when its client disconnects
//!
//! The HTTP handling is deliberately minimal: one request per connection,
//! no keep-alive and no chunked request bodies.
//!
//! # Architecture
//!
//! ```text
//!   POST /chat ──► mpsc<Message> ──► EventSource::json ──► sse::broadcaster
//!                                                                │
//!                                        ┌───────────────────────┼──────────┐
//!                                        ▼                       ▼          ▼
//!                                  GET /events             GET /events     ...
//!                                  (browser tab)           (browser tab)
//! ```

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use fanout::sse::{self, EventSource};
use fanout::{receiver_stream, BroadcastConfig, Broadcaster, ListenerOptions};

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<body>
  <ul id="messages"></ul>
  <form id="form">
    <input id="name" placeholder="name">
    <input id="message" placeholder="message" autofocus>
    <button>Send</button>
  </form>
  <script>
    const list = document.getElementById("messages");
    new EventSource("/events").onmessage = (e) => {
      const m = JSON.parse(e.data);
      const li = document.createElement("li");
      li.textContent = m.name + ": " + m.text;
      list.appendChild(li);
    };
    document.getElementById("form").onsubmit = (e) => {
      e.preventDefault();
      const body = new URLSearchParams({
        name: document.getElementById("name").value,
        message: document.getElementById("message").value,
      });
      fetch("/chat", { method: "POST", body });
      document.getElementById("message").value = "";
    };
  </script>
</body>
</html>
"#;

/// Upper bound on request head plus body
const MAX_REQUEST: usize = 64 * 1024;

#[derive(Debug, Serialize)]
struct Message {
    name: String,
    text: String,
}

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:8080".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fanout=debug".parse()?)
                .add_directive("chat_server=debug".parse()?),
        )
        .init();

    let (messages, rx) = mpsc::channel::<Message>(64);
    let frames = sse::broadcaster(
        EventSource::new().json("", receiver_stream(rx)).into_stream(),
        BroadcastConfig::default()
            .timeout(Duration::from_secs(5))
            .listener_buffer(16),
    );

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Chat server listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let messages = messages.clone();
        let frames = frames.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, messages, frames).await {
                tracing::debug!(peer = %peer, error = %e, "Connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    messages: mpsc::Sender<Message>,
    frames: Broadcaster<Bytes>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let Some(request) = read_request(&mut socket).await? else {
        return Ok(());
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                INDEX_HTML.len()
            );
            socket.write_all(head.as_bytes()).await?;
            socket.write_all(INDEX_HTML.as_bytes()).await?;
        }
        ("POST", "/chat") => {
            let form = parse_form(&request.body);
            let text = form_value(&form, "message");
            if !text.is_empty() {
                let name = form_value(&form, "name");
                let _ = messages.send(Message { name, text }).await;
            }
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                .await?;
        }
        ("GET", "/events") => stream_events(socket, frames).await?,
        _ => {
            socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await?;
        }
    }
    Ok(())
}

async fn stream_events(
    mut socket: TcpStream,
    frames: Broadcaster<Bytes>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut listener = match frames.listen(ListenerOptions::new()).await {
        Ok(listener) => listener,
        Err(e) => {
            let body = e.to_string();
            let head = format!(
                "HTTP/1.1 500 Internal Server Error\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await?;
            socket.write_all(body.as_bytes()).await?;
            return Ok(());
        }
    };

    let mut head = String::from("HTTP/1.1 200 OK\r\n");
    for (name, value) in sse::RESPONSE_HEADERS {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    socket.write_all(head.as_bytes()).await?;

    tracing::debug!(listener = listener.id(), "Client subscribed");
    let result = async {
        while let Some(frame) = listener.recv().await {
            socket.write_all(&frame).await?;
            socket.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    }
    .await;

    listener.cancel().await;
    tracing::debug!(listener = listener.id(), "Client unsubscribed");
    Ok(result?)
}

async fn read_request(
    socket: &mut TcpStream,
) -> Result<Option<Request>, Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > MAX_REQUEST {
            return Err("request head too large".into());
        }
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default().to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0)
        .min(MAX_REQUEST);

    let mut body = buf.split_off(head_end);
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request { method, path, body }))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse an `application/x-www-form-urlencoded` body
fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(body)
        .split('&')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (!name.is_empty()).then(|| (url_decode(name), url_decode(value)))
        })
        .collect()
}

fn form_value(form: &[(String, String)], name: &str) -> String {
    form.iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 2;
                    }
                    Err(_) => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
