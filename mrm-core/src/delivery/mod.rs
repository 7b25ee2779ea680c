//! Delivery strategies.
//!
//! The same [`Producer`](crate::engine::Producer) can be handed to the host in
//! three ways:
//!
//! - [`sync`]: drain everything and return one envelope
//! - [`push`]: post one envelope per batch on the host message channel,
//!   followed by the terminal marker
//! - [`pull`]: a host-visible stream that reads one batch per pull
//!
//! [`parse`] serves the parse entry point, which has no producer.

pub mod parse;
pub mod pull;
pub mod push;
pub mod sync;

pub use parse::ParseDelivery;
pub use pull::PullStream;
pub use push::PushDelivery;
pub use sync::SyncDelivery;

use crate::engine::ResultBatch;
use crate::error::Result;
use crate::format::Formatter;
use crate::response::ResponseEncoder;

/// Formats and encodes batches for one request.
#[derive(Debug, Clone)]
pub struct BatchEncoder {
    formatter: Formatter,
    encoder: ResponseEncoder,
}

impl BatchEncoder {
    pub fn new(formatter: Formatter, encoder: ResponseEncoder) -> Self {
        Self { formatter, encoder }
    }

    /// Format every expression of the batch and wrap them in a `questions` envelope.
    pub fn encode(&self, batch: &ResultBatch) -> Result<String> {
        self.encoder.questions(&self.formatter.format_all(batch))
    }

    pub fn encoder(&self) -> &ResponseEncoder {
        &self.encoder
    }
}
