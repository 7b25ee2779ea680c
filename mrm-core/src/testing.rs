//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::algebra::Expr;
use crate::config::SchemaVersion;
use crate::delivery::BatchEncoder;
use crate::engine::{Producer, ResultBatch};
use crate::error::Result;
use crate::format::{Formatter, FormattingConfig};
use crate::host::{MessageChannel, StreamController};
use crate::response::ResponseEncoder;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Producer replaying a fixed list of step outcomes.
pub struct ScriptedProducer(VecDeque<Result<Option<ResultBatch>>>);

impl ScriptedProducer {
    pub fn new(steps: Vec<Result<Option<ResultBatch>>>) -> Self {
        Self(steps.into())
    }

    pub fn batches(batches: Vec<Vec<i64>>) -> Self {
        Self::new(
            batches
                .into_iter()
                .map(|batch| Ok(Some(batch.into_iter().map(Expr::num).collect())))
                .collect(),
        )
    }
}

impl Producer for ScriptedProducer {
    fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        self.0.pop_front().unwrap_or(Ok(None))
    }
}

pub fn batch_encoder() -> BatchEncoder {
    BatchEncoder::new(
        Formatter::new(FormattingConfig::default()),
        ResponseEncoder::new(SchemaVersion::Versioned),
    )
}

/// Message channel forwarding every post to a std channel.
pub struct RecordingChannel(Mutex<Sender<String>>);

impl RecordingChannel {
    pub fn new() -> (Arc<Self>, Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self(Mutex::new(tx))), rx)
    }
}

impl MessageChannel for RecordingChannel {
    fn post_message(&self, message: String) {
        let _ = self.0.lock().unwrap().send(message);
    }
}

/// A signal observed on a stream controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Enqueue(String),
    Close,
    Error(String),
}

/// Stream controller forwarding every signal to a std channel.
pub struct RecordingController(Mutex<Sender<Signal>>);

impl RecordingController {
    pub fn new() -> (Arc<Self>, Receiver<Signal>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self(Mutex::new(tx))), rx)
    }

    fn send(&self, signal: Signal) {
        let _ = self.0.lock().unwrap().send(signal);
    }
}

impl StreamController for RecordingController {
    fn enqueue(&self, chunk: String) {
        self.send(Signal::Enqueue(chunk));
    }

    fn close(&self) {
        self.send(Signal::Close);
    }

    fn error(&self, message: String) {
        self.send(Signal::Error(message));
    }
}

/// Collect messages until the terminal marker (inclusive).
pub fn collect_until_done(rx: &Receiver<String>) -> Vec<String> {
    let mut messages = Vec::new();
    loop {
        let message = rx.recv_timeout(TIMEOUT).expect("message before timeout");
        let done = message == crate::host::TERMINAL_MARKER;
        messages.push(message);
        if done {
            return messages;
        }
    }
}

/// Pull repeatedly until the stream closes or fails, collecting every signal.
pub fn pull_to_end(
    stream: &crate::delivery::PullStream,
    controller: &Arc<RecordingController>,
    rx: &Receiver<Signal>,
) -> Vec<Signal> {
    let mut signals = Vec::new();
    loop {
        stream.pull(controller.clone());
        let signal = rx.recv_timeout(TIMEOUT).expect("signal before timeout");
        let last = !matches!(signal, Signal::Enqueue(_));
        signals.push(signal);
        if last {
            return signals;
        }
    }
}
