//! Shared encoder/decoder state machine
//!
//! All four WebCodecs codec interfaces share the same control flow: a
//! `unconfigured -> configured -> closed` state, a FIFO of work processed on
//! a dedicated worker thread, outputs delivered in order, and flush promises
//! resolved once every earlier unit has been handled.
//!
//! Each control message carries the epoch it was issued in. `reset()` and
//! `close()` bump the epoch, which turns everything still queued into a no-op
//! and rejects queued flushes with `AbortError`.
//! See: https://w3c.github.io/webcodecs/#codec-processing-model-section

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{self, Receiver, Sender};
use tokio::sync::{broadcast, oneshot};

use crate::webcodecs::error::{abort_error, encoding_error, invalid_state_error, Error, Result};

/// Codec state (WebCodecs `CodecState`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecState {
  /// Not configured, or reset
  #[default]
  Unconfigured,
  /// Configured and accepting work
  Configured,
  /// Closed, terminal
  Closed,
}

impl CodecState {
  pub fn as_str(&self) -> &'static str {
    match self {
      CodecState::Unconfigured => "unconfigured",
      CodecState::Configured => "configured",
      CodecState::Closed => "closed",
    }
  }
}

impl std::fmt::Display for CodecState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

pub(crate) type OutputCallback<T> = Box<dyn FnMut(T) + Send>;
pub type ErrorCallback = Box<dyn FnMut(Error) + Send>;
pub type DequeueCallback = Arc<dyn Fn() + Send + Sync>;

/// Work performed on the worker thread for one configuration
pub(crate) trait Processor: Send + 'static {
  type Input: Send + 'static;
  type Output: Send + 'static;

  /// Handle one queued unit
  fn process(&mut self, input: Self::Input) -> Result<Vec<Self::Output>>;

  /// Emit everything still buffered
  fn flush(&mut self) -> Result<Vec<Self::Output>>;

  /// Release the engine
  fn close(&mut self);
}

enum Command<P: Processor> {
  Configure { epoch: u64, processor: P },
  Process { epoch: u64, input: P::Input },
  Flush { epoch: u64, reply: oneshot::Sender<Result<()>> },
  Release,
}

struct CoreState<P: Processor> {
  state: CodecState,
  epoch: u64,
  queue_size: u32,
  /// Set while the error callback runs so it fires at most once
  failing: bool,
  last_error: Option<Error>,
  ondequeue: Option<DequeueCallback>,
  sender: Option<Sender<Command<P>>>,
}

struct Shared<P: Processor> {
  label: &'static str,
  state: Mutex<CoreState<P>>,
  error_callback: Mutex<ErrorCallback>,
  dequeue: broadcast::Sender<u32>,
}

impl<P: Processor> Shared<P> {
  fn lock(&self) -> Result<MutexGuard<'_, CoreState<P>>> {
    Ok(self.state.lock()?)
  }

  /// Lock for paths that cannot report an error (drop, worker)
  fn lock_infallible(&self) -> MutexGuard<'_, CoreState<P>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn is_live(&self, epoch: u64) -> bool {
    let guard = self.lock_infallible();
    guard.epoch == epoch && guard.state != CodecState::Closed && !guard.failing
  }

  fn close_locked(&self, guard: &mut CoreState<P>, error: Option<Error>) {
    guard.state = CodecState::Closed;
    guard.epoch += 1;
    guard.queue_size = 0;
    guard.sender = None;
    if error.is_some() {
      guard.last_error = error;
    }
    let _ = self.dequeue.send(0);
  }

  /// Error to reject a flush with once its epoch is gone
  fn stale_flush_error(&self) -> Error {
    self
      .lock_infallible()
      .last_error
      .clone()
      .unwrap_or_else(|| abort_error(&format!("{} flush aborted", self.label)))
  }

  /// Report `error` through the error callback, then close
  ///
  /// `epoch` is the epoch the failing work belonged to; `None` means the
  /// failure is current by definition (configure).
  fn fail(&self, epoch: Option<u64>, error: Error) {
    {
      let mut guard = self.lock_infallible();
      let stale = epoch.is_some_and(|e| e != guard.epoch);
      if stale || guard.state == CodecState::Closed || guard.failing {
        return;
      }
      guard.failing = true;
    }

    tracing::warn!(target: "webcodecs", codec = self.label, error = %error, "codec error");
    {
      let mut callback = self
        .error_callback
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      (callback)(error.clone());
    }

    let mut guard = self.lock_infallible();
    guard.failing = false;
    if guard.state != CodecState::Closed {
      self.close_locked(&mut guard, Some(error));
    }
  }

  fn deliver(&self, epoch: u64, outputs: Vec<P::Output>, output: &mut OutputCallback<P::Output>) {
    let total = outputs.len();
    for (index, item) in outputs.into_iter().enumerate() {
      if !self.is_live(epoch) {
        tracing::warn!(
          target: "webcodecs",
          codec = self.label,
          discarded = total - index,
          "discarding outputs after close or reset"
        );
        return;
      }
      (output)(item);
    }
  }

  fn dequeued(&self, epoch: u64) {
    let callback = {
      let mut guard = self.lock_infallible();
      if guard.epoch != epoch || guard.state == CodecState::Closed {
        return;
      }
      guard.queue_size = guard.queue_size.saturating_sub(1);
      tracing::trace!(target: "webcodecs", codec = self.label, queue_size = guard.queue_size, "dequeue");
      let _ = self.dequeue.send(guard.queue_size);
      guard.ondequeue.clone()
    };
    if let Some(callback) = callback {
      callback();
    }
  }
}

/// Run engine work, turning a panic into an `EncodingError`
///
/// The outer `Err` means the engine panicked and must not be used again.
fn guarded<T>(label: &'static str, work: impl FnOnce() -> Result<T>) -> Result<Result<T>> {
  panic::catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
    let reason = payload
      .downcast_ref::<&str>()
      .map(|s| s.to_string())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "unknown panic".to_string());
    tracing::warn!(target: "webcodecs", codec = label, reason = %reason, "codec engine panicked");
    encoding_error(&format!("{} engine panicked: {}", label, reason))
  })
}

fn run_worker<P: Processor>(
  shared: Arc<Shared<P>>,
  receiver: Receiver<Command<P>>,
  mut output: OutputCallback<P::Output>,
) {
  let mut processor: Option<P> = None;

  while let Ok(command) = receiver.recv() {
    match command {
      Command::Configure { epoch, processor: next } => {
        if let Some(mut previous) = processor.take() {
          previous.close();
        }
        if shared.is_live(epoch) {
          processor = Some(next);
        }
      }
      Command::Process { epoch, input } => {
        if !shared.is_live(epoch) {
          continue;
        }
        let result = match processor.as_mut().map(|p| guarded(shared.label, || p.process(input))) {
          Some(Ok(result)) => result,
          Some(Err(panicked)) => {
            processor = None;
            Err(panicked)
          }
          None => Err(invalid_state_error(&format!("{} is not configured", shared.label))),
        };
        match result {
          Ok(outputs) => {
            shared.deliver(epoch, outputs, &mut output);
            shared.dequeued(epoch);
          }
          Err(e) => shared.fail(Some(epoch), e),
        }
      }
      Command::Flush { epoch, reply } => {
        if !shared.is_live(epoch) {
          let _ = reply.send(Err(shared.stale_flush_error()));
          continue;
        }
        let result = match processor.as_mut().map(|p| guarded(shared.label, || p.flush())) {
          Some(Ok(result)) => result,
          Some(Err(panicked)) => {
            processor = None;
            Err(panicked)
          }
          None => Err(invalid_state_error(&format!("{} is not configured", shared.label))),
        };
        match result {
          Ok(outputs) => {
            shared.deliver(epoch, outputs, &mut output);
            tracing::debug!(target: "webcodecs", codec = shared.label, "flush complete");
            let _ = reply.send(Ok(()));
          }
          Err(e) => {
            shared.fail(Some(epoch), e.clone());
            let _ = reply.send(Err(e));
          }
        }
      }
      Command::Release => {
        if let Some(mut p) = processor.take() {
          p.close();
        }
      }
    }
  }

  if let Some(mut p) = processor.take() {
    p.close();
  }
  tracing::debug!(target: "webcodecs", codec = shared.label, "worker exited");
}

/// State machine and worker shared by the four codec interfaces
pub(crate) struct CodecCore<P: Processor> {
  shared: Arc<Shared<P>>,
}

impl<P: Processor> CodecCore<P> {
  pub(crate) fn new(
    label: &'static str,
    output: OutputCallback<P::Output>,
    error: ErrorCallback,
  ) -> Result<Self> {
    let (sender, receiver) = channel::unbounded();
    let (dequeue, _) = broadcast::channel(64);
    let shared = Arc::new(Shared {
      label,
      state: Mutex::new(CoreState {
        state: CodecState::Unconfigured,
        epoch: 0,
        queue_size: 0,
        failing: false,
        last_error: None,
        ondequeue: None,
        sender: Some(sender),
      }),
      error_callback: Mutex::new(error),
      dequeue,
    });

    let worker_shared = shared.clone();
    std::thread::Builder::new()
      .name(format!("webcodecs-{}", label))
      .spawn(move || run_worker(worker_shared, receiver, output))
      .map_err(|e| encoding_error(&format!("Failed to spawn {} worker: {}", label, e)))?;

    Ok(Self { shared })
  }

  pub(crate) fn label(&self) -> &'static str {
    self.shared.label
  }

  pub(crate) fn state(&self) -> CodecState {
    self.shared.lock_infallible().state
  }

  pub(crate) fn queue_size(&self) -> u32 {
    self.shared.lock_infallible().queue_size
  }

  /// InvalidStateError once closed
  pub(crate) fn check_open(&self) -> Result<()> {
    if self.shared.lock()?.state == CodecState::Closed {
      return Err(invalid_state_error(&format!("{} is closed", self.label())));
    }
    Ok(())
  }

  /// InvalidStateError unless configured
  pub(crate) fn check_configured(&self) -> Result<()> {
    match self.shared.lock()?.state {
      CodecState::Configured => Ok(()),
      state => Err(invalid_state_error(&format!(
        "{} is {}",
        self.label(),
        state
      ))),
    }
  }

  /// Install a new processor after everything already queued
  pub(crate) fn configure(&self, processor: P) -> Result<()> {
    let mut guard = self.shared.lock()?;
    if guard.state == CodecState::Closed {
      return Err(invalid_state_error(&format!("{} is closed", self.label())));
    }
    let epoch = guard.epoch;
    let sender = guard
      .sender
      .as_ref()
      .ok_or_else(|| invalid_state_error(&format!("{} is closed", self.label())))?;
    sender
      .send(Command::Configure { epoch, processor })
      .map_err(|_| invalid_state_error(&format!("{} worker has stopped", self.label())))?;
    guard.state = CodecState::Configured;
    tracing::debug!(target: "webcodecs", codec = self.label(), epoch, "configured");
    Ok(())
  }

  /// A configuration no engine accepts: report it and close
  pub(crate) fn fail_configure(&self, error: Error) -> Error {
    self.shared.fail(None, error.clone());
    error
  }

  pub(crate) fn enqueue(&self, input: P::Input) -> Result<()> {
    let mut guard = self.shared.lock()?;
    if guard.state != CodecState::Configured {
      return Err(invalid_state_error(&format!("{} is {}", self.label(), guard.state)));
    }
    let epoch = guard.epoch;
    let sent = guard
      .sender
      .as_ref()
      .map(|sender| sender.send(Command::Process { epoch, input }).is_ok())
      .unwrap_or(false);
    if !sent {
      return Err(invalid_state_error(&format!("{} worker has stopped", self.label())));
    }
    guard.queue_size += 1;
    tracing::trace!(target: "webcodecs", codec = self.label(), queue_size = guard.queue_size, "enqueue");
    Ok(())
  }

  fn submit_flush(&self) -> Result<oneshot::Receiver<Result<()>>> {
    let guard = self.shared.lock()?;
    match guard.state {
      CodecState::Configured => {}
      CodecState::Closed => {
        return Err(guard.last_error.clone().unwrap_or_else(|| {
          invalid_state_error(&format!("{} is closed", self.label()))
        }))
      }
      CodecState::Unconfigured => {
        return Err(invalid_state_error(&format!("{} is not configured", self.label())))
      }
    }
    let (reply, receiver) = oneshot::channel();
    let epoch = guard.epoch;
    if let Some(sender) = guard.sender.as_ref() {
      let _ = sender.send(Command::Flush { epoch, reply });
    }
    tracing::debug!(target: "webcodecs", codec = self.label(), queue_size = guard.queue_size, "flush");
    Ok(receiver)
  }

  /// Resolve once every unit queued before this call has been processed
  pub(crate) fn flush(&self) -> impl Future<Output = Result<()>> + Send + 'static {
    let submitted = self.submit_flush();
    let label = self.label();
    async move {
      let receiver = submitted?;
      receiver
        .await
        .unwrap_or_else(|_| Err(abort_error(&format!("{} flush aborted", label))))
    }
  }

  pub(crate) fn reset(&self) -> Result<()> {
    let mut guard = self.shared.lock()?;
    if guard.state == CodecState::Closed {
      return Err(invalid_state_error(&format!("{} is closed", self.label())));
    }
    guard.epoch += 1;
    guard.state = CodecState::Unconfigured;
    guard.queue_size = 0;
    if let Some(sender) = guard.sender.as_ref() {
      let _ = sender.send(Command::Release);
    }
    let _ = self.shared.dequeue.send(0);
    tracing::debug!(target: "webcodecs", codec = self.label(), epoch = guard.epoch, "reset");
    Ok(())
  }

  pub(crate) fn close(&self) {
    let mut guard = self.shared.lock_infallible();
    if guard.state == CodecState::Closed {
      return;
    }
    self.shared.close_locked(&mut guard, None);
    tracing::debug!(target: "webcodecs", codec = self.label(), "closed");
  }

  pub(crate) fn set_ondequeue(&self, callback: Option<DequeueCallback>) {
    self.shared.lock_infallible().ondequeue = callback;
  }

  pub(crate) fn dequeue_events(&self) -> DequeueEvents {
    DequeueEvents {
      receiver: self.shared.dequeue.subscribe(),
    }
  }

  /// Wait until the queue size drops below `limit`
  pub(crate) fn wait_for_queue_below(&self, limit: u32) -> impl Future<Output = ()> + Send + 'static {
    // Subscribe before sampling so a decrement in between is not lost
    let mut events = self.dequeue_events();
    let shared = self.shared.clone();
    async move {
      loop {
        if shared.lock_infallible().queue_size < limit {
          return;
        }
        if events.next().await.is_none() {
          return;
        }
      }
    }
  }
}

impl<P: Processor> Drop for CodecCore<P> {
  fn drop(&mut self) {
    self.close();
  }
}

/// Subscription to dequeue events
///
/// Each event carries the queue size right after the decrement.
pub struct DequeueEvents {
  receiver: broadcast::Receiver<u32>,
}

impl DequeueEvents {
  /// Next queue size, or `None` once the codec is gone
  pub async fn next(&mut self) -> Option<u32> {
    loop {
      match self.receiver.recv().await {
        Ok(size) => return Some(size),
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}
