//! Response envelopes.
//!
//! Versioned shapes:
//!
//! ```text
//! {"success":true,"questions":["1+1", ...]}
//! {"success":true,"latex":"x^{2}","symbols":["x"]}
//! {"success":false,"error":"..."}
//! {"success":true}                       push acknowledgement
//! ```
//!
//! The legacy schema is identical without the `success` field.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::SchemaVersion;
use crate::error::{Error, Result};

#[derive(Serialize)]
struct Envelope<B> {
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    #[serde(flatten)]
    body: B,
}

#[derive(Serialize)]
struct Questions<'a> {
    questions: &'a [String],
}

#[derive(Serialize)]
struct Parsed<'a> {
    latex: &'a str,
    symbols: &'a BTreeSet<String>,
}

#[derive(Serialize)]
struct Failure<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct Acknowledgement {}

/// Serializes envelopes in one schema version.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseEncoder {
    schema: SchemaVersion,
}

impl ResponseEncoder {
    pub fn new(schema: SchemaVersion) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> SchemaVersion {
        self.schema
    }

    /// Generated questions, already formatted.
    pub fn questions(&self, questions: &[String]) -> Result<String> {
        self.encode(true, Questions { questions })
    }

    /// Result of the parse entry point.
    pub fn parsed(&self, latex: &str, symbols: &BTreeSet<String>) -> Result<String> {
        self.encode(true, Parsed { latex, symbols })
    }

    pub fn failure(&self, message: &str) -> Result<String> {
        self.encode(false, Failure { error: message })
    }

    /// Returned by the push entry point once delivery is scheduled.
    pub fn acknowledgement(&self) -> Result<String> {
        self.encode(true, Acknowledgement {})
    }

    /// Turn a non-fatal error into a failure envelope.
    ///
    /// Fatal errors ([`Error::Encoding`]) propagate unchanged.
    pub fn or_failure(&self, outcome: Result<String>) -> Result<String> {
        match outcome {
            Err(e) if !e.is_fatal() => self.failure(&e.to_string()),
            other => other,
        }
    }

    fn encode<B: Serialize>(&self, success: bool, body: B) -> Result<String> {
        let envelope = Envelope {
            success: (self.schema == SchemaVersion::Versioned).then_some(success),
            body,
        };
        serde_json::to_string(&envelope).map_err(Error::Encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn versioned() -> ResponseEncoder {
        ResponseEncoder::new(SchemaVersion::Versioned)
    }

    fn legacy() -> ResponseEncoder {
        ResponseEncoder::new(SchemaVersion::Legacy)
    }

    #[test]
    fn test_questions() {
        let questions = vec!["1+1".to_string(), "1+2".to_string()];
        assert_eq!(
            versioned().questions(&questions).unwrap(),
            r#"{"success":true,"questions":["1+1","1+2"]}"#
        );
        assert_eq!(
            legacy().questions(&questions).unwrap(),
            r#"{"questions":["1+1","1+2"]}"#
        );
    }

    #[test]
    fn test_parsed() {
        let symbols: BTreeSet<String> = ["y".to_string(), "x".to_string()].into();
        assert_eq!(
            versioned().parsed("x^{2}", &symbols).unwrap(),
            r#"{"success":true,"latex":"x^{2}","symbols":["x","y"]}"#
        );
        assert_eq!(
            legacy().parsed("x", &BTreeSet::new()).unwrap(),
            r#"{"latex":"x","symbols":[]}"#
        );
    }

    #[test]
    fn test_failure_and_acknowledgement() {
        assert_eq!(
            versioned().failure("bad \"input\"").unwrap(),
            r#"{"success":false,"error":"bad \"input\""}"#
        );
        assert_eq!(legacy().failure("bad").unwrap(), r#"{"error":"bad"}"#);
        assert_eq!(versioned().acknowledgement().unwrap(), r#"{"success":true}"#);
        assert_eq!(legacy().acknowledgement().unwrap(), "{}");
    }

    #[test]
    fn test_or_failure() {
        let encoder = versioned();
        assert_eq!(encoder.or_failure(Ok("{}".into())).unwrap(), "{}");
        assert_eq!(
            encoder
                .or_failure(Err(Error::engine("no assignment")))
                .unwrap(),
            r#"{"success":false,"error":"no assignment"}"#
        );

        let fatal = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = encoder.or_failure(Err(Error::Encoding(fatal))).unwrap_err();
        assert!(err.is_fatal());
    }
}
