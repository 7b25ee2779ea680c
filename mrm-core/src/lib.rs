//! # mrm-core
//!
//! Host bridge for a math question generator. A scripting host calls one of
//! four entry points with a single string argument; the bridge decodes it,
//! drives the expression engine and hands the results back in one of three
//! ways:
//!
//! - **Synchronous**: `mrm_generate` returns every question in one envelope
//! - **Push**: `mrm_generate_streamed` posts one envelope per batch on the
//!   host message channel, then `"done"`
//! - **Pull**: `mrm_stream` returns a backpressured stream that reads one
//!   batch per pull
//!
//! `mrm_parse` reads, simplifies and reformats a single expression.
//!
//! ## Core Components
//!
//! - **Request**: argument validation and problem decoding
//! - **Engine**: the engine seam and the built-in [`CalcEngine`]
//! - **Format**: LaTeX rendering controlled by [`FormattingConfig`]
//! - **Delivery**: the sync, push, pull and parse strategies
//! - **Bridge / Registry**: entry points and their registration
//! - **FFI**: the same entry points behind a C ABI
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mrm_core::{Bridge, BridgeConfig, FunctionTable, HostValue};
//!
//! let bridge = Arc::new(Bridge::new(BridgeConfig::default())?);
//! let mut table = FunctionTable::new();
//! bridge.register(&mut table)?;
//!
//! let parsed = table.call("mrm_parse", &[HostValue::from("x^2+0x")])?;
//! assert_eq!(
//!     parsed.as_json(),
//!     Some(r#"{"success":true,"latex":"x^{2}","symbols":["x"]}"#)
//! );
//! ```

pub mod algebra;
pub mod bridge;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
#[cfg(feature = "tokio-runtime")]
pub mod ffi;
pub mod format;
pub mod host;
pub mod registry;
pub mod request;
pub mod response;

mod properties;
#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use algebra::{parse_expression, parse_relation, Expr, RelOp, Relation, SyntaxError};
pub use bridge::Bridge;
pub use config::{
    BridgeConfig, GenerationLimits, PullPolicy, SchemaVersion, DEFAULT_BATCH_SIZE,
    DEFAULT_MAX_COMBINATIONS, DEFAULT_WORKER_THREADS,
};
pub use delivery::{BatchEncoder, ParseDelivery, PullStream, PushDelivery, SyncDelivery};
pub use engine::{CalcEngine, Engine, EngineAdapter, ParseResult, Producer, ResultBatch};
pub use error::{Error, Result};
pub use format::{Formatter, FormattingConfig};
pub use host::{
    ArgumentMessages, HostType, HostValue, MessageChannel, StreamController, TERMINAL_MARKER,
};
pub use registry::{register, EntryPoint, FunctionTable, HostFunction, HostNamespace, HostReturn};
pub use request::{
    decode_problem, decode_problem_json, decode_source, DomainValue, DomainValues, Problem,
    VariableDomain,
};
pub use response::ResponseEncoder;
