//! Incremental event stream decoder
//!
//! Lines are accumulated into a pending frame until a blank line flushes it.
//! Malformed input never stops decoding; it produces an `error` event and
//! the decoder carries on with the next line. The one exception is a line
//! longer than the configured maximum, which ends decoding for good.

use bytes::{Buf, BytesMut};

use super::event::Event;

/// Separator between a field name and its value
const FIELD_SEPARATOR: &str = ": ";

/// Longest accepted line, terminator excluded
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Stateful line-oriented decoder
#[derive(Debug)]
pub struct EventDecoder {
    /// Pending event name
    name: String,
    /// Pending payload
    data: String,
    /// `data:` lines seen in the pending frame
    data_lines: usize,
    /// Bytes received after the last complete line
    partial: BytesMut,
    /// Prefix of `partial` already searched for a line break
    scanned: usize,
    max_line: usize,
    /// Set once a line exceeded `max_line`; no further input is decoded
    overflowed: bool,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self {
            name: String::new(),
            data: String::new(),
            data_lines: 0,
            partial: BytesMut::new(),
            scanned: 0,
            max_line: DEFAULT_MAX_LINE,
            overflowed: false,
        }
    }
}

impl EventDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the longest accepted line
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Check whether decoding stopped on an overlong line
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Feed a chunk of raw bytes, returning the events it completes
    ///
    /// A line longer than the configured maximum produces one final `error`
    /// event; everything fed afterwards is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Event> {
        let mut events = Vec::new();
        if self.overflowed {
            return events;
        }
        self.partial.extend_from_slice(chunk);

        loop {
            let Some(offset) = self.partial[self.scanned..].iter().position(|&b| b == b'\n')
            else {
                self.scanned = self.partial.len();
                if self.partial.len() > self.max_line {
                    events.push(self.overflow());
                }
                break;
            };

            let end = self.scanned + offset;
            self.scanned = 0;
            if end > self.max_line {
                events.push(self.overflow());
                break;
            }

            let line = self.partial.split_to(end);
            self.partial.advance(1);

            let line = String::from_utf8_lossy(&line);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.decode_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn overflow(&mut self) -> Event {
        self.reset();
        self.overflowed = true;
        Event::error(format!("line exceeds {} bytes", self.max_line))
    }

    /// Process whatever follows the last newline at end of input
    ///
    /// An unterminated final line is decoded like any other; a frame still
    /// pending afterwards is discarded.
    pub fn finish(&mut self) -> Option<Event> {
        if self.overflowed {
            return None;
        }
        let rest = self.partial.split();
        let event = if rest.is_empty() {
            None
        } else {
            let line = String::from_utf8_lossy(&rest);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.decode_line(line)
        };
        self.reset();
        event
    }

    /// Decode a single line without its terminator
    pub fn decode_line(&mut self, line: &str) -> Option<Event> {
        if line.is_empty() {
            self.data_lines = 0;
            if self.name.is_empty() && self.data.is_empty() {
                // Keep-alive
                return None;
            }
            let name = std::mem::take(&mut self.name);
            let data = std::mem::take(&mut self.data);
            return Some(Event::new(name, data));
        }

        let Some((field, value)) = line.split_once(FIELD_SEPARATOR) else {
            return Some(Event::error(format!("malformed line: {}", line)));
        };

        match field {
            "event" => {
                if self.data_lines > 0 {
                    return Some(Event::error(format!(
                        "event name sent after data: {}",
                        value
                    )));
                }
                self.name = value.to_owned();
            }
            "data" => {
                if self.data_lines > 0 {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.data_lines += 1;
            }
            "" | "id" | "retry" => {}
            _ => return Some(Event::error(format!("malformed line: {}", line))),
        }
        None
    }

    /// Discard the pending frame and any partial line
    pub fn reset(&mut self) {
        self.name.clear();
        self.data.clear();
        self.data_lines = 0;
        self.partial.clear();
        self.scanned = 0;
    }
}

/// Decode a complete text, discarding a trailing unterminated frame
pub fn decode_str(text: &str) -> Vec<Event> {
    let mut decoder = EventDecoder::new();
    let mut events = decoder.feed(text.as_bytes());
    events.extend(decoder.finish());
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::encode::encode;

    #[test]
    fn test_decode_round_trip() {
        let events = decode_str("event: a\ndata: x\ndata: y\n\n");
        assert_eq!(events, vec![Event::new("a", "x\ny")]);

        let original = Event::new("multi", "first\n\nthird");
        assert_eq!(decode_str(&encode(&original)), vec![original]);
    }

    #[test]
    fn test_decode_two_frames_in_order() {
        let events = decode_str("event: e\ndata: 1\n\nevent: e\ndata: 2\n\n");
        assert_eq!(events, vec![Event::new("e", "1"), Event::new("e", "2")]);
    }

    #[test]
    fn test_keep_alive_lines_ignored() {
        let events = decode_str("\n\ndata: x\n\n\n");
        assert_eq!(events, vec![Event::unnamed("x")]);
    }

    #[test]
    fn test_ignored_fields() {
        let events = decode_str("id: 7\nretry: 1000\n: comment\ndata: x\n\n");
        assert_eq!(events, vec![Event::unnamed("x")]);
    }

    #[test]
    fn test_malformed_lines_do_not_abort() {
        let events = decode_str("garbage\nfoo: bar\ndata: ok\n\n");
        assert_eq!(
            events,
            vec![
                Event::error("malformed line: garbage"),
                Event::error("malformed line: foo: bar"),
                Event::unnamed("ok"),
            ]
        );
    }

    #[test]
    fn test_name_after_data() {
        let events = decode_str("data: 1\nevent: late\n\n");
        assert_eq!(
            events,
            vec![
                Event::error("event name sent after data: late"),
                Event::unnamed("1"),
            ]
        );
    }

    #[test]
    fn test_split_chunks_and_crlf() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.feed(b"event: sp").is_empty());
        assert!(decoder.feed(b"lit\r\ndata: a").is_empty());
        let events = decoder.feed(b"bc\r\n\r\n");
        assert_eq!(events, vec![Event::new("split", "abc")]);
    }

    #[test]
    fn test_finish_discards_pending_frame() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.feed(b"data: never flushed\n").is_empty());
        assert_eq!(decoder.finish(), None);

        assert!(decoder.feed(b"bogus").is_empty());
        assert_eq!(decoder.finish(), Some(Event::error("malformed line: bogus")));
    }

    #[test]
    fn test_overlong_line_stops_decoding() {
        let mut decoder = EventDecoder::new().with_max_line(8);
        assert_eq!(decoder.feed(b"data: ok\n\n"), vec![Event::unnamed("ok")]);

        assert!(decoder.feed(b"data: ").is_empty());
        let events = decoder.feed(b"abc");
        assert_eq!(events, vec![Event::error("line exceeds 8 bytes")]);
        assert!(decoder.is_overflowed());

        assert!(decoder.feed(b"\n\ndata: x\n\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_overlong_terminated_line() {
        let mut decoder = EventDecoder::new().with_max_line(8);
        let events = decoder.feed(b"data: 123456789\n\n");
        assert_eq!(events, vec![Event::error("line exceeds 8 bytes")]);
    }

    #[test]
    fn test_line_split_across_many_chunks() {
        let mut decoder = EventDecoder::new();
        for byte in b"data: slow" {
            assert!(decoder.feed(&[*byte]).is_empty());
        }
        assert_eq!(decoder.feed(b"\n\n"), vec![Event::unnamed("slow")]);
    }
}
