//! Host runtime model.
//!
//! The host is a cooperative, single-threaded scripting runtime. It hands us
//! untyped values and receives results either as return values or through
//! its own event primitives: a message channel (`postMessage`) and stream
//! controllers (`enqueue` / `close` / `error`). Both primitives are called
//! from background workers and must queue the signal onto the host's event
//! loop rather than run host code synchronously.

use std::fmt;

use crate::error::{Error, Result};

/// Literal posted on the message channel after the last push notification.
pub const TERMINAL_MARKER: &str = "done";

/// Type tag of a host value, as reported by the host's `typeof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
        };
        f.write_str(s)
    }
}

/// An opaque value received from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(serde_json::Value),
}

impl HostValue {
    /// The host type tag of this value.
    pub fn host_type(&self) -> HostType {
        match self {
            Self::Undefined => HostType::Undefined,
            Self::Null => HostType::Null,
            Self::Bool(_) => HostType::Boolean,
            Self::Number(_) => HostType::Number,
            Self::String(_) => HostType::String,
            Self::Object(_) => HostType::Object,
        }
    }

    /// Whether the value is `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Option<String>> for HostValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::String)
    }
}

/// Messages reported when the single host argument fails validation.
#[derive(Debug, Clone, Copy)]
pub struct ArgumentMessages {
    pub arity: &'static str,
    pub nullish: &'static str,
    pub not_string: &'static str,
}

impl ArgumentMessages {
    /// Messages for the generate entry points.
    pub const GENERATE: Self = Self {
        arity: "generate takes 1 argument",
        nullish: "argument is null or undefined",
        not_string: "input must be a string JSON object",
    };

    /// Messages for the parse entry point.
    pub const PARSE: Self = Self {
        arity: "error: input(source) takes a single argument",
        nullish: "latex input is null or undefined",
        not_string: "latex input must be a string",
    };
}

/// Validate that exactly one host string was passed and return it.
pub fn single_string_argument<'a>(
    args: &'a [HostValue],
    messages: &ArgumentMessages,
) -> Result<&'a str> {
    let [value] = args else {
        return Err(Error::argument(messages.arity));
    };
    match value {
        HostValue::String(s) => Ok(s.as_str()),
        v if v.is_nullish() => Err(Error::argument(messages.nullish)),
        _ => Err(Error::argument(messages.not_string)),
    }
}

/// The host's notification channel (`postMessage`).
pub trait MessageChannel: Send + Sync {
    /// Queue one message for delivery to the host.
    fn post_message(&self, message: String);
}

/// Controller of a host-visible pull stream.
///
/// Signals may call back into the stream: `pull` queues another read and
/// `cancel` takes effect before the signal returns.
pub trait StreamController: Send + Sync {
    /// Deliver one chunk.
    fn enqueue(&self, chunk: String);

    /// Signal end of data.
    fn close(&self);

    /// Signal a failure; the stream is finished afterwards.
    fn error(&self, message: String);
}
