//! Error types
//!
//! Failures surfaced to callers of the broadcast engine, the source managers
//! and the SSE client. Per-listener and per-frame faults never show up here:
//! they close a single listener or become an inline `error` event.

use std::fmt;

use crate::registry::SourceError;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fan-out operations
#[derive(Debug)]
pub enum Error {
    /// The engine (or the manager's current engine) reached its terminal state
    Closed,
    /// A keyed or on-demand source could not be opened
    SourceOpen(SourceError),
    /// The remote endpoint did not answer with a text event stream
    BadContentType(String),
    /// HTTP transport failure while opening a remote event stream
    Http(reqwest::Error),
    /// The caller's cancellation token fired before the stream opened
    Cancelled,
}

impl Error {
    /// Check whether this error reports a closed engine
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Closed => write!(f, "broadcaster is closed"),
            Error::SourceOpen(err) => write!(f, "{}", err),
            Error::BadContentType(content_type) => {
                write!(f, "bad content type: {}", content_type)
            }
            Error::Http(err) => write!(f, "http error: {}", err),
            Error::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SourceOpen(err) => Some(err),
            Error::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        Error::SourceOpen(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Error::Closed.to_string(), "broadcaster is closed");
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
        assert_eq!(
            Error::BadContentType("text/html".into()).to_string(),
            "bad content type: text/html"
        );
        assert_eq!(
            Error::from(SourceError::new("no such key")).to_string(),
            "no such key"
        );
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = Error::from(SourceError::new("boom"));
        assert!(err.source().is_some());
        assert!(Error::Closed.source().is_none());
        assert!(Error::Closed.is_closed());
    }
}
