//! Pull-stream delivery.
//!
//! A [`PullStream`] is the object the host sees behind a readable stream. Each
//! `pull` schedules one fetch-and-push step on the stream's background worker:
//! read the next batch, format and encode it, then signal the controller with
//! `enqueue`, `close` (exhausted) or `error` (failed).
//!
//! Invariants:
//!
//! - at most one step is in flight; pulls arriving meanwhile are queued or
//!   dropped according to [`PullPolicy`]
//! - after [`PullStream::cancel`] returns, the controller observes no further
//!   signal, including from a step that was already running
//! - after `close` or `error`, nothing else is signalled

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::BatchEncoder;
use crate::config::PullPolicy;
use crate::engine::Producer;
use crate::host::StreamController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closed,
    Failed,
    Cancelled,
}

struct PullState {
    phase: Phase,
    in_flight: bool,
    queued: VecDeque<Arc<dyn StreamController>>,
}

enum StreamCommand {
    Step(Arc<dyn StreamController>),
}

/// Outcome of one step, emitted to the controller.
enum Signal {
    Enqueue(String),
    Close,
    Error(String),
}

struct Shared {
    id: Uuid,
    policy: PullPolicy,
    state: Mutex<PullState>,
    /// Held while a signal is emitted; `cancel` takes it to wait out an emission.
    gate: Mutex<()>,
    /// Thread currently inside a signal, so `cancel` can detect re-entry.
    emitter: Mutex<Option<ThreadId>>,
    commands: Mutex<Option<mpsc::UnboundedSender<StreamCommand>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, PullState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emitter(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.emitter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: StreamCommand) -> bool {
        let commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        match commands.as_ref() {
            Some(sender) => sender.send(command).is_ok(),
            None => false,
        }
    }
}

/// A backpressured stream of question batches.
///
/// Dropping the stream cancels it. Both `pull` and `cancel` may be called
/// from inside a signal handler.
pub struct PullStream {
    shared: Arc<Shared>,
}

impl PullStream {
    /// Create the stream and start its worker on the given runtime.
    pub fn spawn(
        handle: &Handle,
        producer: Box<dyn Producer>,
        batches: BatchEncoder,
        policy: PullPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            policy,
            state: Mutex::new(PullState {
                phase: Phase::Open,
                in_flight: false,
                queued: VecDeque::new(),
            }),
            gate: Mutex::new(()),
            emitter: Mutex::new(None),
            commands: Mutex::new(Some(tx)),
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            producer,
            batches,
        };
        handle.spawn(worker.run(rx));
        debug!(stream = %shared.id, ?policy, "Pull stream created");

        Self { shared }
    }

    /// Identifier used in log records.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Host `start` hook. Nothing is read until the first pull.
    pub fn start(&self, _controller: Arc<dyn StreamController>) {}

    /// Host `pull` hook. Returns immediately.
    pub fn pull(&self, controller: Arc<dyn StreamController>) {
        let mut state = self.shared.state();
        if state.phase != Phase::Open {
            return;
        }
        if state.in_flight {
            match self.shared.policy {
                PullPolicy::Queue => state.queued.push_back(controller),
                PullPolicy::Coalesce => {
                    debug!(stream = %self.shared.id, "Dropping pull while a step is in flight")
                }
            }
            return;
        }

        state.in_flight = true;
        drop(state);
        if !self.shared.send(StreamCommand::Step(controller)) {
            // Worker is gone; only possible once the stream is finished.
            self.shared.state().in_flight = false;
        }
    }

    /// Host `cancel` hook. After this returns no signal reaches any controller.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state();
            if state.phase == Phase::Open {
                state.phase = Phase::Cancelled;
                debug!(stream = %self.shared.id, "Pull stream cancelled");
            }
            state.queued.clear();
        }
        self.shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let reentrant = *self.shared.emitter() == Some(thread::current().id());
        if !reentrant {
            drop(self.shared.gate());
        }
    }

    /// Whether the stream has closed, failed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.shared.state().phase != Phase::Open
    }
}

impl std::fmt::Debug for PullStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullStream")
            .field("id", &self.shared.id)
            .field("policy", &self.shared.policy)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Drop for PullStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Worker {
    shared: Arc<Shared>,
    producer: Box<dyn Producer>,
    batches: BatchEncoder,
}

/// What the worker does once a step has been signalled.
enum Next {
    /// Wait for the next pull
    Wait,
    /// Serve a pull that was queued during the step
    Serve(Arc<dyn StreamController>),
    Stop,
}

impl Worker {
    /// Serve pulls until the stream finishes or every sender is gone.
    ///
    /// Only the steps occupy a blocking thread; an idle stream holds none.
    async fn run(self, mut rx: mpsc::UnboundedReceiver<StreamCommand>) {
        let shared = Arc::clone(&self.shared);
        let mut worker = self;

        while let Some(StreamCommand::Step(controller)) = rx.recv().await {
            let mut controller = controller;
            loop {
                let step = tokio::task::spawn_blocking(move || {
                    let next = worker.step(controller.as_ref());
                    (worker, next)
                });
                let next = match step.await {
                    Ok((returned, next)) => {
                        worker = returned;
                        next
                    }
                    Err(e) => {
                        warn!(stream = %shared.id, error = %e, "Pull stream step aborted");
                        let mut state = shared.state();
                        if state.phase == Phase::Open {
                            state.phase = Phase::Failed;
                        }
                        state.queued.clear();
                        return;
                    }
                };
                match next {
                    Next::Serve(queued) => controller = queued,
                    Next::Wait => break,
                    Next::Stop => {
                        debug!(stream = %shared.id, "Pull stream worker finished");
                        return;
                    }
                }
            }
        }
        debug!(stream = %shared.id, "Pull stream worker released");
    }

    /// Run one fetch-and-push step.
    fn step(&mut self, controller: &dyn StreamController) -> Next {
        if self.shared.state().phase != Phase::Open {
            return Next::Stop;
        }

        let signal = match self.producer.step() {
            Ok(Some(batch)) => match self.batches.encode(&batch) {
                Ok(chunk) => Signal::Enqueue(chunk),
                Err(e) => Signal::Error(e.to_string()),
            },
            Ok(None) => Signal::Close,
            Err(e) => {
                warn!(stream = %self.shared.id, error = %e, "Pull stream step failed");
                Signal::Error(e.to_string())
            }
        };

        let _gate = self.shared.gate();
        let next = {
            let mut state = self.shared.state();
            if state.phase != Phase::Open {
                return Next::Stop;
            }
            match signal {
                // A pull issued from inside the signal starts the next step.
                Signal::Enqueue(_) => match state.queued.pop_front() {
                    Some(queued) => Next::Serve(queued),
                    None => {
                        state.in_flight = false;
                        Next::Wait
                    }
                },
                Signal::Close => {
                    state.phase = Phase::Closed;
                    state.queued.clear();
                    Next::Stop
                }
                Signal::Error(_) => {
                    state.phase = Phase::Failed;
                    state.queued.clear();
                    Next::Stop
                }
            }
        };

        *self.shared.emitter() = Some(thread::current().id());
        match signal {
            Signal::Enqueue(chunk) => controller.enqueue(chunk),
            Signal::Close => controller.close(),
            Signal::Error(message) => controller.error(message),
        }
        *self.shared.emitter() = None;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Expr;
    use crate::engine::ResultBatch;
    use crate::error::{Error, Result};
    use crate::testing::{
        batch_encoder, pull_to_end, RecordingController, ScriptedProducer, Signal as Seen,
        TIMEOUT,
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    /// Producer counting concurrent reads, each taking a little while.
    struct SlowProducer {
        remaining: usize,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
    }

    impl Producer for SlowProducer {
        fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.reads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(vec![Expr::num(self.remaining as i64)]))
        }
    }

    /// Producer whose first read blocks until released.
    struct BlockedProducer {
        release: std_mpsc::Receiver<()>,
        entered: std_mpsc::Sender<()>,
        dropped: Arc<AtomicUsize>,
    }

    impl Producer for BlockedProducer {
        fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
            let _ = self.entered.send(());
            let _ = self.release.recv_timeout(TIMEOUT);
            Ok(Some(vec![Expr::num(1)]))
        }
    }

    impl Drop for BlockedProducer {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_one_batch_per_pull_then_close() {
        let rt = runtime();
        let stream = PullStream::spawn(
            rt.handle(),
            Box::new(ScriptedProducer::batches(vec![vec![1, 2, 3], vec![4, 5]])),
            batch_encoder(),
            PullPolicy::Queue,
        );
        let (controller, rx) = RecordingController::new();
        stream.start(controller.clone());

        assert_eq!(
            pull_to_end(&stream, &controller, &rx),
            vec![
                Seen::Enqueue(r#"{"success":true,"questions":["1","2","3"]}"#.into()),
                Seen::Enqueue(r#"{"success":true,"questions":["4","5"]}"#.into()),
                Seen::Close,
            ]
        );
        assert!(stream.is_finished());

        stream.pull(controller.clone());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_engine_failure_errors_stream() {
        let rt = runtime();
        let stream = PullStream::spawn(
            rt.handle(),
            Box::new(ScriptedProducer::new(vec![Err(Error::engine("engine crashed"))])),
            batch_encoder(),
            PullPolicy::Queue,
        );
        let (controller, rx) = RecordingController::new();

        assert_eq!(
            pull_to_end(&stream, &controller, &rx),
            vec![Seen::Error("engine crashed".into())]
        );
    }

    #[test]
    fn test_concurrent_pulls_never_overlap_reads() {
        let rt = runtime();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));
        let stream = PullStream::spawn(
            rt.handle(),
            Box::new(SlowProducer {
                remaining: 3,
                active: active.clone(),
                max_active: max_active.clone(),
                reads: reads.clone(),
            }),
            batch_encoder(),
            PullPolicy::Queue,
        );
        let (controller, rx) = RecordingController::new();

        for _ in 0..4 {
            stream.pull(controller.clone());
        }

        let signals: Vec<_> = (0..4).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
        assert_eq!(signals.last(), Some(&Seen::Close));
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(reads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_coalesce_drops_pulls_in_flight() {
        let rt = runtime();
        let reads = Arc::new(AtomicUsize::new(0));
        let stream = PullStream::spawn(
            rt.handle(),
            Box::new(SlowProducer {
                remaining: 10,
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::new(AtomicUsize::new(0)),
                reads: reads.clone(),
            }),
            batch_encoder(),
            PullPolicy::Coalesce,
        );
        let (controller, rx) = RecordingController::new();

        for _ in 0..3 {
            stream.pull(controller.clone());
        }
        assert!(matches!(rx.recv_timeout(TIMEOUT).unwrap(), Seen::Enqueue(_)));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_silences_in_flight_step() {
        let rt = runtime();
        let (release_tx, release_rx) = std_mpsc::channel();
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let dropped = Arc::new(AtomicUsize::new(0));
        let stream = PullStream::spawn(
            rt.handle(),
            Box::new(BlockedProducer {
                release: release_rx,
                entered: entered_tx,
                dropped: dropped.clone(),
            }),
            batch_encoder(),
            PullPolicy::Queue,
        );
        let (controller, rx) = RecordingController::new();

        stream.pull(controller.clone());
        entered_rx.recv_timeout(TIMEOUT).unwrap();
        stream.cancel();
        release_tx.send(()).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(stream.is_finished());

        stream.pull(controller);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(stream);
        drop(rt);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_idle_worker() {
        let rt = runtime();
        let (_release_tx, release_rx) = std_mpsc::channel();
        let (entered_tx, _entered_rx) = std_mpsc::channel();
        let dropped = Arc::new(AtomicUsize::new(0));
        let stream = PullStream::spawn(
            rt.handle(),
            Box::new(BlockedProducer {
                release: release_rx,
                entered: entered_tx,
                dropped: dropped.clone(),
            }),
            batch_encoder(),
            PullPolicy::Queue,
        );

        drop(stream);
        drop(rt);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    /// Controller that pulls again from inside `enqueue` and cancels on the second chunk.
    struct Repulling {
        stream: Mutex<Option<Arc<PullStream>>>,
        me: Mutex<Option<std::sync::Weak<Repulling>>>,
        cancel_after: usize,
        seen: AtomicUsize,
        tx: Mutex<std_mpsc::Sender<Seen>>,
    }

    impl StreamController for Repulling {
        fn enqueue(&self, chunk: String) {
            let _ = self.tx.lock().unwrap().send(Seen::Enqueue(chunk));
            let stream = self.stream.lock().unwrap().clone();
            let me = self.me.lock().unwrap().as_ref().and_then(|w| w.upgrade());
            if let (Some(stream), Some(me)) = (stream, me) {
                if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_after {
                    stream.cancel();
                } else {
                    stream.pull(me);
                }
            }
        }

        fn close(&self) {
            let _ = self.tx.lock().unwrap().send(Seen::Close);
        }

        fn error(&self, message: String) {
            let _ = self.tx.lock().unwrap().send(Seen::Error(message));
        }
    }

    fn repulling(
        stream: &Arc<PullStream>,
        cancel_after: usize,
    ) -> (Arc<Repulling>, std_mpsc::Receiver<Seen>) {
        let (tx, rx) = std_mpsc::channel();
        let controller = Arc::new(Repulling {
            stream: Mutex::new(Some(stream.clone())),
            me: Mutex::new(None),
            cancel_after,
            seen: AtomicUsize::new(0),
            tx: Mutex::new(tx),
        });
        *controller.me.lock().unwrap() = Some(Arc::downgrade(&controller));
        (controller, rx)
    }

    #[test]
    fn test_reentrant_pull_from_signal() {
        for policy in [PullPolicy::Queue, PullPolicy::Coalesce] {
            let rt = runtime();
            let stream = Arc::new(PullStream::spawn(
                rt.handle(),
                Box::new(ScriptedProducer::batches(vec![vec![1], vec![2]])),
                batch_encoder(),
                policy,
            ));
            let (controller, rx) = repulling(&stream, usize::MAX);

            stream.pull(controller.clone());

            let signals: Vec<_> = (0..3).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
            assert_eq!(
                signals,
                vec![
                    Seen::Enqueue(r#"{"success":true,"questions":["1"]}"#.into()),
                    Seen::Enqueue(r#"{"success":true,"questions":["2"]}"#.into()),
                    Seen::Close,
                ],
                "{:?}",
                policy
            );
            controller.stream.lock().unwrap().take();
        }
    }

    #[test]
    fn test_idle_stream_holds_no_blocking_thread() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let idle = PullStream::spawn(
            rt.handle(),
            Box::new(ScriptedProducer::batches(vec![vec![1]])),
            batch_encoder(),
            PullPolicy::Queue,
        );
        let busy = PullStream::spawn(
            rt.handle(),
            Box::new(ScriptedProducer::batches(vec![vec![2]])),
            batch_encoder(),
            PullPolicy::Queue,
        );
        let (controller, rx) = RecordingController::new();

        assert_eq!(
            pull_to_end(&busy, &controller, &rx),
            vec![
                Seen::Enqueue(r#"{"success":true,"questions":["2"]}"#.into()),
                Seen::Close,
            ]
        );
        assert!(!idle.is_finished());

        let started = std::time::Instant::now();
        drop(rt);
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(idle);
    }

    #[test]
    fn test_cancel_from_inside_signal() {
        let rt = runtime();
        let stream = Arc::new(PullStream::spawn(
            rt.handle(),
            Box::new(ScriptedProducer::batches(vec![vec![1], vec![2], vec![3]])),
            batch_encoder(),
            PullPolicy::Queue,
        ));
        let (controller, rx) = repulling(&stream, 2);

        stream.pull(controller.clone());

        assert!(matches!(rx.recv_timeout(TIMEOUT).unwrap(), Seen::Enqueue(_)));
        assert!(matches!(rx.recv_timeout(TIMEOUT).unwrap(), Seen::Enqueue(_)));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(stream.is_finished());
        controller.stream.lock().unwrap().take();
    }
}
