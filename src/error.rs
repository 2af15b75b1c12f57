//! Crate-wide error taxonomy.
//!
//! Five outcome classes, matching how the pipeline reacts:
//! - [`Rejection`]: a handler declines a payload; the dispatcher moves on.
//! - [`AdapterError`]: transient I/O or a rate-limit signal; the adapter
//!   backs off locally and never propagates upstream.
//! - [`ParseError`]: malformed payload; logged and dropped.
//! - [`StorageError`]: sled-backed store failures.
//! - [`FatalError`]: conditions that require the host to restart the process.

use thiserror::Error;

/// A handler declined to process an input.
///
/// Rejections are expected control flow: the parser and adapter dispatchers
/// try handlers in priority order and continue past rejections. Only visible
/// at trace level.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Rejection(pub String);

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors local to a source adapter. None of these stop the pipeline.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("rate limited (code {code})")]
    RateLimited { code: u16 },

    #[error("resource not accepted: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Fetch(err.to_string())
    }
}

/// A payload reached a parser that accepted it but could not be converted.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed payload ({format}): {message}")]
    Malformed { format: &'static str, message: String },

    #[error("report out of time bounds: {0}")]
    TimeBounds(String),

    #[error("no usable coordinates: {0}")]
    NoCoordinates(String),
}

/// Persistent-store failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Conditions the process cannot recover from in place.
///
/// Returned to the caller of the monitor loop rather than exiting from a leaf
/// function; the host wrapper maps these to a software-error exit code.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("monitor overloaded: slowdown factor {factor:.1} exceeds limit")]
    Overloaded { factor: f64 },

    #[error("seen store failed: {0}")]
    SeenStore(#[source] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_displays_reason() {
        let r = Rejection::new("wrong shape");
        assert_eq!(r.to_string(), "wrong shape");
    }

    #[test]
    fn fatal_overload_carries_factor() {
        let e = FatalError::Overloaded { factor: 65.2 };
        assert!(e.to_string().contains("65.2"));
    }
}
