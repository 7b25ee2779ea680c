//! Parse delivery: read, simplify, reformat.

use crate::engine::EngineAdapter;
use crate::error::Result;
use crate::format::Formatter;
use crate::response::ResponseEncoder;

/// Serves the parse entry point with a fixed formatting configuration.
#[derive(Debug, Clone)]
pub struct ParseDelivery {
    formatter: Formatter,
    encoder: ResponseEncoder,
}

impl ParseDelivery {
    pub fn new(formatter: Formatter, encoder: ResponseEncoder) -> Self {
        Self { formatter, encoder }
    }

    /// Read the source through the engine and encode `{latex, symbols}`.
    pub fn deliver(&self, adapter: &EngineAdapter, source: &str) -> Result<String> {
        let parsed = adapter.read(source)?;
        let latex = self.formatter.format(&parsed.expression);
        self.encoder.parsed(&latex, &parsed.symbols)
    }
}
