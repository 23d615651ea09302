//! Event frame encoding
//!
//! Wire format:
//!
//! ```text
//! event: <name>\n        (omitted when the name is empty)
//! data: <line 1>\n
//! data: <line 2>\n
//! \n
//! ```

use bytes::Bytes;

use crate::broadcast::Conversion;

use super::event::Event;

/// Encode one event as a text frame
pub fn encode(event: &Event) -> String {
    let data = event.data.replace('\n', "\ndata: ");
    if event.name.is_empty() {
        format!("data: {}\n\n", data)
    } else {
        format!("event: {}\ndata: {}\n\n", event.name, data)
    }
}

/// Encode one event into a shareable frame buffer
pub fn encode_frame(event: &Event) -> Bytes {
    Bytes::from(encode(event))
}

/// Engine converter turning events into frames
pub(crate) fn frame_converter(event: Event) -> Conversion<Bytes> {
    Conversion::Deliver(encode_frame(&event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_named_multiline() {
        let event = Event::new("a", "x\ny");
        assert_eq!(encode(&event), "event: a\ndata: x\ndata: y\n\n");
    }

    #[test]
    fn test_encode_unnamed() {
        assert_eq!(encode(&Event::unnamed("1")), "data: 1\n\n");
    }

    #[test]
    fn test_encode_empty_payload() {
        assert_eq!(encode(&Event::new("ping", "")), "event: ping\ndata: \n\n");
    }

    #[test]
    fn test_encode_frame_bytes() {
        let frame = encode_frame(&Event::error("boom"));
        assert_eq!(&frame[..], b"event: error\ndata: boom\n\n");
    }
}
