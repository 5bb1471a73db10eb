//! Emission queue decoupling event processing from output I/O.
//!
//! With a zero capacity every task runs inline on the caller. Otherwise a
//! single background consumer drains tasks in submission order, one at a
//! time, and a full queue either blocks the producer or drops the new task.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::follow_error::FollowError;

pub type EmitTask = Pin<Box<dyn Future<Output = Result<(), FollowError>> + Send + 'static>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Producer waits for a free slot.
    #[default]
    Block,
    /// New task is discarded and counted; submission still succeeds.
    DropNewest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterConfig {
    /// Zero selects direct mode.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Default)]
struct EmitterShared {
    first_error: Mutex<Option<FollowError>>,
    dropped: AtomicU64,
    completed: AtomicU64,
    halted: AtomicBool,
}

impl EmitterShared {
    fn lock_error(&self) -> MutexGuard<'_, Option<FollowError>> {
        self.first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keeps the first error, except that a later fatal error replaces an
    /// earlier non-fatal one.
    fn record_outcome(&self, outcome: &Result<(), FollowError>) {
        let error = match outcome {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(error) => error,
        };
        if error.is_fatal() {
            self.halted.store(true, Ordering::SeqCst);
        }
        let mut slot = self.lock_error();
        let replace = match slot.as_ref() {
            None => true,
            Some(existing) => error.is_fatal() && !existing.is_fatal(),
        };
        if replace {
            *slot = Some(error.clone());
        }
    }
}

pub struct Emitter {
    config: EmitterConfig,
    shared: Arc<EmitterShared>,
    sender: Option<mpsc::Sender<EmitTask>>,
    consumer: Option<JoinHandle<()>>,
}

impl Emitter {
    /// Queued mode spawns its consumer, so it must be called inside a tokio runtime.
    pub fn new(config: EmitterConfig) -> Self {
        let shared = Arc::new(EmitterShared::default());
        if config.queue_capacity == 0 {
            return Self {
                config,
                shared,
                sender: None,
                consumer: None,
            };
        }

        let (sender, receiver) = mpsc::channel::<EmitTask>(config.queue_capacity);
        let consumer = tokio::spawn(run_consumer(receiver, Arc::clone(&shared)));
        Self {
            config,
            shared,
            sender: Some(sender),
            consumer: Some(consumer),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.config.queue_capacity == 0
    }

    /// Submits a task. Direct mode runs it before returning and yields its
    /// result; queued mode only reports submission failures.
    pub async fn emit<F>(&self, task: F) -> Result<(), FollowError>
    where
        F: Future<Output = Result<(), FollowError>> + Send + 'static,
    {
        if self.is_halted() {
            return Err(FollowError::Halted);
        }
        if self.is_direct() {
            let outcome = task.await;
            self.shared.record_outcome(&outcome);
            return outcome;
        }

        let Some(sender) = self.sender.as_ref() else {
            return Err(FollowError::Emit("emitter is closed".to_string()));
        };
        let task: EmitTask = Box::pin(task);
        match self.config.overflow {
            OverflowPolicy::Block => sender
                .send(task)
                .await
                .map_err(|_| FollowError::Emit("emitter consumer stopped".to_string())),
            OverflowPolicy::DropNewest => match sender.try_send(task) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        capacity = self.config.queue_capacity,
                        "emitter queue full; dropped newest record"
                    );
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => {
                    Err(FollowError::Emit("emitter consumer stopped".to_string()))
                }
            },
        }
    }

    /// Stops accepting submissions, waits for the backlog, and returns the
    /// first captured error.
    pub async fn close_and_drain(&mut self) -> Result<(), FollowError> {
        self.sender.take();
        if let Some(consumer) = self.consumer.take() {
            if let Err(error) = consumer.await {
                return Err(FollowError::Emit(format!(
                    "emitter consumer terminated abnormally: {error}"
                )));
            }
        }
        match self.shared.lock_error().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Writes a one-line drop diagnostic to stderr when anything was dropped.
    pub fn maybe_report_drops(&self) -> Option<u64> {
        let mut stderr = std::io::stderr();
        self.report_drops_to(&mut stderr)
    }

    pub fn report_drops_to(&self, out: &mut dyn Write) -> Option<u64> {
        let dropped = self.dropped_count();
        if dropped == 0 {
            return None;
        }
        tracing::warn!(dropped, "emitter dropped records because the output queue was full");
        let _ = writeln!(
            out,
            "follow emitter dropped {dropped} record(s): output queue was full"
        );
        Some(dropped)
    }
}

async fn run_consumer(mut receiver: mpsc::Receiver<EmitTask>, shared: Arc<EmitterShared>) {
    while let Some(task) = receiver.recv().await {
        if shared.halted.load(Ordering::SeqCst) {
            continue;
        }
        let outcome = task.await;
        shared.record_outcome(&outcome);
    }
}
