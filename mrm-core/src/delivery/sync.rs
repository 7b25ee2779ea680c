//! Synchronous delivery.

use tracing::debug;

use super::BatchEncoder;
use crate::engine::Producer;
use crate::error::Result;

/// Drains a producer on the calling thread and returns one envelope.
///
/// Every generated expression is held in memory until the response is
/// encoded; large domain spaces should use [`super::PullStream`] instead.
#[derive(Debug, Clone)]
pub struct SyncDelivery {
    batches: BatchEncoder,
}

impl SyncDelivery {
    pub fn new(batches: BatchEncoder) -> Self {
        Self { batches }
    }

    /// Consume the producer and encode every question.
    pub fn deliver(&self, mut producer: Box<dyn Producer>) -> Result<String> {
        let all = producer.drain()?;
        debug!(questions = all.len(), "Drained producer");
        self.batches.encode(&all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Expr;
    use crate::error::Error;
    use crate::testing::{batch_encoder, ScriptedProducer};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_drains_all_batches_in_order() {
        let producer = ScriptedProducer::new(vec![
            Ok(Some(vec![Expr::num(1), Expr::num(2)])),
            Ok(Some(vec![Expr::sym("x")])),
            Ok(Some(vec![])),
            Ok(Some(vec![Expr::num(9)])),
        ]);

        assert_eq!(
            SyncDelivery::new(batch_encoder())
                .deliver(Box::new(producer))
                .unwrap(),
            r#"{"success":true,"questions":["1","2","x"]}"#
        );
    }

    #[test]
    fn test_engine_failure_propagates() {
        let producer = ScriptedProducer::new(vec![
            Ok(Some(vec![Expr::num(1)])),
            Err(Error::engine("exhausted memory")),
        ]);

        let err = SyncDelivery::new(batch_encoder())
            .deliver(Box::new(producer))
            .unwrap_err();
        assert_eq!(err.to_string(), "exhausted memory");
    }
}
