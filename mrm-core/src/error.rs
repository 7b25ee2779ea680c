//! Error types for mrm-core.
//!
//! Every variant except [`Error::Encoding`] is turned into a failure envelope at
//! the entry point that produced it, so `Display` yields the bare message that
//! ends up in the `error` field.

use thiserror::Error;

/// Result type alias using mrm-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a host call.
#[derive(Error, Debug)]
pub enum Error {
    /// Wrong arity, nullness or host type of the call argument
    #[error("{0}")]
    Argument(String),

    /// Request payload is not the expected JSON schema
    #[error("{0}")]
    Decode(String),

    /// The expression engine rejected or failed to process the request
    #[error("{0}")]
    Engine(String),

    /// Malformed expression source
    #[error("{0}")]
    Parse(String),

    /// Response serialization failed; there is no fallback channel left
    #[error("Encoding error: {0}")]
    Encoding(#[source] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create an engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Short category name used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Argument(_) => "argument",
            Self::Decode(_) => "decode",
            Self::Engine(_) => "engine",
            Self::Parse(_) => "parse",
            Self::Encoding(_) => "encoding",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the error must abort the call instead of becoming a failure envelope.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_bare_message() {
        let err = Error::argument("input must be a string JSON object");
        assert_eq!(err.to_string(), "input must be a string JSON object");
        assert_eq!(Error::engine("no domain").to_string(), "no domain");
    }

    #[test]
    fn test_only_encoding_is_fatal() {
        let json_err = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(Error::Encoding(json_err).is_fatal());
        assert!(!Error::decode("bad").is_fatal());
        assert!(!Error::Internal("lock".into()).is_fatal());
        assert_eq!(Error::parse("oops").kind(), "parse");
    }
}
