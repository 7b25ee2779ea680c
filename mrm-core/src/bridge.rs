//! The bridge between the host runtime and the expression engine.
//!
//! Every entry point follows the same path: decode the single host argument,
//! start the engine, hand the producer to one delivery strategy. Argument and
//! decode failures come back as a failure envelope; only [`Error::Encoding`]
//! escapes as `Err`.
//!
//! The push and pull entry points return before the engine starts. Its
//! start-up runs on the background worker, so an engine failure arrives as a
//! posted failure envelope or a stream `error`.

use std::sync::Arc;
#[cfg(feature = "tokio-runtime")]
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{info, instrument};

use crate::config::BridgeConfig;
use crate::delivery::{BatchEncoder, ParseDelivery, PullStream, PushDelivery, SyncDelivery};
use crate::engine::{Engine, EngineAdapter};
use crate::error::{Error, Result};
use crate::format::Formatter;
use crate::host::{HostValue, MessageChannel};
use crate::registry::{self, EntryPoint, HostNamespace, HostReturn};
use crate::request::{decode_problem, decode_source, Problem};
use crate::response::ResponseEncoder;

/// How long dropping a bridge waits for background deliveries on its own runtime.
#[cfg(feature = "tokio-runtime")]
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the engine, the configuration, the background runtime and the host
/// message channel.
///
/// A bridge that owns its runtime must be dropped outside of any async
/// context.
pub struct Bridge {
    config: BridgeConfig,
    adapter: EngineAdapter,
    encoder: ResponseEncoder,
    parse: ParseDelivery,
    channel: Option<Arc<dyn MessageChannel>>,
    handle: Handle,
    #[cfg(feature = "tokio-runtime")]
    runtime: Option<tokio::runtime::Runtime>,
}

impl Bridge {
    /// Create a bridge around the built-in engine with its own runtime.
    #[cfg(feature = "tokio-runtime")]
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let engine = crate::engine::CalcEngine::new(config.limits);
        Self::with_engine(config, Arc::new(engine))
    }

    /// Create a bridge around any engine with its own runtime.
    #[cfg(feature = "tokio-runtime")]
    pub fn with_engine(config: BridgeConfig, engine: Arc<dyn Engine>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("mrm-worker")
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build runtime: {}", e)))?;

        let mut bridge = Self::with_handle(config, engine, runtime.handle().clone());
        bridge.runtime = Some(runtime);
        Ok(bridge)
    }

    /// Create a bridge that schedules background work on an existing runtime.
    pub fn with_handle(config: BridgeConfig, engine: Arc<dyn Engine>, handle: Handle) -> Self {
        let encoder = ResponseEncoder::new(config.schema);
        let parse = ParseDelivery::new(Formatter::new(config.parse_context.clone()), encoder);
        Self {
            adapter: EngineAdapter::new(engine),
            encoder,
            parse,
            channel: None,
            handle,
            config,
            #[cfg(feature = "tokio-runtime")]
            runtime: None,
        }
    }

    /// Attach the host message channel used by the push entry point.
    pub fn with_message_channel(mut self, channel: Arc<dyn MessageChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Runtime on which background deliveries run.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Install every entry point into the host namespace.
    pub fn register(self: &Arc<Self>, namespace: &mut dyn HostNamespace) -> Result<()> {
        registry::register(Arc::clone(self), namespace)
    }

    /// Dispatch a host call to an entry point.
    pub fn invoke(&self, entry: EntryPoint, args: &[HostValue]) -> Result<HostReturn> {
        match entry {
            EntryPoint::Parse => self.parse(args).map(HostReturn::Json),
            EntryPoint::Generate => self.generate(args).map(HostReturn::Json),
            EntryPoint::GenerateStreamed => self.generate_streamed(args).map(HostReturn::Json),
            EntryPoint::GenerateStream => self.generate_stream(args),
        }
    }

    /// Parse, simplify and reformat expression source.
    #[instrument(skip_all, fields(args = args.len()))]
    pub fn parse(&self, args: &[HostValue]) -> Result<String> {
        let outcome =
            decode_source(args).and_then(|source| self.parse.deliver(&self.adapter, source));
        self.encoder.or_failure(outcome)
    }

    /// Generate every question and return them in one envelope.
    #[instrument(skip_all, fields(args = args.len()))]
    pub fn generate(&self, args: &[HostValue]) -> Result<String> {
        let outcome = self.decode(args).and_then(|(problem, batches)| {
            let producer = self.adapter.start(&problem)?;
            SyncDelivery::new(batches).deliver(producer)
        });
        self.encoder.or_failure(outcome)
    }

    /// Generate in the background, posting one message per batch and then
    /// the terminal marker. Returns the acknowledgement right away.
    #[instrument(skip_all, fields(args = args.len()))]
    pub fn generate_streamed(&self, args: &[HostValue]) -> Result<String> {
        let outcome = self.decode(args).and_then(|(problem, batches)| {
            let channel = self
                .channel
                .clone()
                .ok_or_else(|| Error::Internal("no message channel attached".to_string()))?;
            self.schedule_push(problem, batches, channel)
        });
        self.encoder.or_failure(outcome)
    }

    /// Like [`Bridge::generate_streamed`], posting to the given channel.
    #[instrument(skip_all, fields(args = args.len()))]
    pub fn generate_streamed_to(
        &self,
        args: &[HostValue],
        channel: Arc<dyn MessageChannel>,
    ) -> Result<String> {
        let outcome = self
            .decode(args)
            .and_then(|(problem, batches)| self.schedule_push(problem, batches, channel));
        self.encoder.or_failure(outcome)
    }

    /// Create a pull stream over the generated questions.
    ///
    /// Request failures are returned as a failure envelope instead of a
    /// stream. Engine failures error the stream on its first pull.
    #[instrument(skip_all, fields(args = args.len()))]
    pub fn generate_stream(&self, args: &[HostValue]) -> Result<HostReturn> {
        match self.decode(args) {
            Ok((problem, batches)) => {
                let producer = self.adapter.start_deferred(problem);
                let stream =
                    PullStream::spawn(&self.handle, producer, batches, self.config.pull_policy);
                info!(stream = %stream.id(), "Pull stream opened");
                Ok(HostReturn::Stream(stream))
            }
            Err(e) => self.encoder.or_failure(Err(e)).map(HostReturn::Json),
        }
    }

    fn schedule_push(
        &self,
        problem: Problem,
        batches: BatchEncoder,
        channel: Arc<dyn MessageChannel>,
    ) -> Result<String> {
        let producer = self.adapter.start_deferred(problem);
        let _ = PushDelivery::new(batches, channel).spawn(&self.handle, producer);
        info!("Push delivery scheduled");
        self.encoder.acknowledgement()
    }

    fn decode(&self, args: &[HostValue]) -> Result<(Problem, BatchEncoder)> {
        let problem = decode_problem(args)?;
        let formatter = Formatter::new(problem.context.clone());
        Ok((problem, BatchEncoder::new(formatter, self.encoder)))
    }
}

#[cfg(feature = "tokio-runtime")]
impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        }
    }
}
