//! Push-notification delivery.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::BatchEncoder;
use crate::engine::Producer;
use crate::error::Result;
use crate::host::{MessageChannel, TERMINAL_MARKER};

/// Posts one envelope per batch on the host message channel.
///
/// Each batch is posted before the next one is requested. Once the producer
/// is exhausted, or fails, exactly one terminal marker follows; a failure is
/// reported as a failure envelope just before it. There is no cancellation.
pub struct PushDelivery {
    batches: BatchEncoder,
    channel: Arc<dyn MessageChannel>,
}

impl PushDelivery {
    pub fn new(batches: BatchEncoder, channel: Arc<dyn MessageChannel>) -> Self {
        Self { batches, channel }
    }

    /// Run the delivery on a blocking worker of the given runtime.
    pub fn spawn(self, handle: &Handle, producer: Box<dyn Producer>) -> JoinHandle<Result<usize>> {
        handle.spawn_blocking(move || self.run(producer))
    }

    /// Deliver every batch on the current thread and return how many were posted.
    pub fn run(&self, mut producer: Box<dyn Producer>) -> Result<usize> {
        let mut posted = 0;
        let outcome = self.pump(producer.as_mut(), &mut posted);

        if let Err(e) = &outcome {
            warn!(error = %e, posted, "Push delivery failed");
            if let Ok(failure) = self.batches.encoder().failure(&e.to_string()) {
                self.channel.post_message(failure);
            }
        }
        self.channel.post_message(TERMINAL_MARKER.to_string());
        debug!(posted, "Push delivery finished");

        outcome.map(|()| posted)
    }

    fn pump(&self, producer: &mut dyn Producer, posted: &mut usize) -> Result<()> {
        while let Some(batch) = producer.step()? {
            let message = self.batches.encode(&batch)?;
            self.channel.post_message(message);
            *posted += 1;
        }
        Ok(())
    }
}
