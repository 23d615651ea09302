//! Events and marshalers
//!
//! An [`Event`] is a named text payload ready for framing. Typed values are
//! turned into events by a [`Marshaler`]; a marshaling failure becomes an
//! `error` event instead of aborting the stream.

use std::fmt;

use serde::Serialize;

/// Name of the synthetic events reporting marshal and decode failures
pub const ERROR_EVENT: &str = "error";

/// A named event with a text payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    /// Event name (empty for unnamed events)
    pub name: String,
    /// Payload, possibly spanning several lines
    pub data: String,
}

impl Event {
    /// Create a named event
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Create an event without a name
    pub fn unnamed(data: impl Into<String>) -> Self {
        Self::new(String::new(), data)
    }

    /// Create a synthetic error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ERROR_EVENT, message)
    }

    /// Check whether this is an `error` event
    pub fn is_error(&self) -> bool {
        self.name == ERROR_EVENT
    }
}

/// A value could not be serialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalError(String);

impl MarshalError {
    /// Create a new marshal error
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MarshalError {}

impl From<serde_json::Error> for MarshalError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Serializes values into event payloads
pub trait Marshaler<T>: Send + Sync + 'static {
    /// Serialize `value` into a text payload
    fn marshal(&self, value: &T) -> Result<String, MarshalError>;
}

impl<T, F> Marshaler<T> for F
where
    F: Fn(&T) -> Result<String, MarshalError> + Send + Sync + 'static,
{
    fn marshal(&self, value: &T) -> Result<String, MarshalError> {
        self(value)
    }
}

/// Serializes values as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl<T: Serialize> Marshaler<T> for JsonMarshaler {
    fn marshal(&self, value: &T) -> Result<String, MarshalError> {
        Ok(serde_json::to_string(value)?)
    }
}

/// Passes text values through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct TextMarshaler;

impl<T: AsRef<str>> Marshaler<T> for TextMarshaler {
    fn marshal(&self, value: &T) -> Result<String, MarshalError> {
        Ok(value.as_ref().to_owned())
    }
}

/// Build the event for `value`, degrading to an `error` event on failure
pub fn marshal_event<T, M>(name: &str, value: &T, marshaler: &M) -> Event
where
    M: Marshaler<T> + ?Sized,
{
    match marshaler.marshal(value) {
        Ok(data) => Event::new(name, data),
        Err(err) => Event::error(format!("failed to serialize event: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Serialize)]
    struct Message {
        name: String,
        text: String,
    }

    #[test]
    fn test_json_marshaler() {
        let message = Message {
            name: "ann".into(),
            text: "hi".into(),
        };

        let event = marshal_event("chat", &message, &JsonMarshaler);
        assert_eq!(event, Event::new("chat", r#"{"name":"ann","text":"hi"}"#));
    }

    #[test]
    fn test_json_marshal_failure_becomes_error_event() {
        // JSON object keys must be strings.
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);

        let event = marshal_event("data", &map, &JsonMarshaler);
        assert!(event.is_error());
        assert!(event.data.starts_with("failed to serialize event: "));
    }

    #[test]
    fn test_text_and_closure_marshalers() {
        assert_eq!(
            marshal_event("", &"plain", &TextMarshaler),
            Event::unnamed("plain")
        );

        let shout = |value: &String| -> Result<String, MarshalError> {
            if value.is_empty() {
                Err(MarshalError::new("empty message"))
            } else {
                Ok(value.to_uppercase())
            }
        };
        assert_eq!(
            marshal_event("msg", &"hey".to_string(), &shout),
            Event::new("msg", "HEY")
        );
        assert_eq!(
            marshal_event("msg", &String::new(), &shout),
            Event::error("failed to serialize event: empty message")
        );
    }
}
