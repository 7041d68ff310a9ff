//! Async output serialization
//!
//! `AsyncMutex` is a single-holder lock with a FIFO wait queue. Ordering is
//! decided when `lock()` is called, not when the lock is awaited, which is
//! what lets `serialize_async` turn an async output handler into a plain
//! callback whose continuations still run in invocation order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::oneshot;

#[derive(Default)]
struct WaitQueue {
  next_id: u64,
  holder: Option<u64>,
  waiters: VecDeque<(u64, oneshot::Sender<()>)>,
}

impl WaitQueue {
  /// Hand the mutex to the next waiter that is still around
  fn grant_next(&mut self) {
    self.holder = None;
    while let Some((id, grant)) = self.waiters.pop_front() {
      if grant.send(()).is_ok() {
        self.holder = Some(id);
        return;
      }
    }
  }
}

/// FIFO async mutex
#[derive(Clone, Default)]
pub struct AsyncMutex {
  queue: Arc<Mutex<WaitQueue>>,
}

impl AsyncMutex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take a place in line
  ///
  /// The first caller is granted immediately; later callers stay pending
  /// until every earlier lock has been released.
  pub fn lock(&self) -> AsyncMutexLock {
    let mut queue = lock_queue(&self.queue);
    let id = queue.next_id;
    queue.next_id += 1;

    let grant = if queue.holder.is_none() && queue.waiters.is_empty() {
      queue.holder = Some(id);
      None
    } else {
      let (sender, receiver) = oneshot::channel();
      queue.waiters.push_back((id, sender));
      Some(receiver)
    };

    AsyncMutexLock {
      id,
      queue: self.queue.clone(),
      grant,
      released: false,
    }
  }

  /// Lock and wait for the grant
  pub async fn acquire(&self) -> AsyncMutexLock {
    let mut lock = self.lock();
    lock.ready().await;
    lock
  }

  pub fn is_locked(&self) -> bool {
    lock_queue(&self.queue).holder.is_some()
  }
}

impl std::fmt::Debug for AsyncMutex {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let queue = lock_queue(&self.queue);
    f.debug_struct("AsyncMutex")
      .field("holder", &queue.holder)
      .field("waiters", &queue.waiters.len())
      .finish()
  }
}

fn lock_queue(queue: &Mutex<WaitQueue>) -> MutexGuard<'_, WaitQueue> {
  queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A place in an `AsyncMutex` line; dropping it releases
pub struct AsyncMutexLock {
  id: u64,
  queue: Arc<Mutex<WaitQueue>>,
  grant: Option<oneshot::Receiver<()>>,
  released: bool,
}

impl AsyncMutexLock {
  /// Still waiting for earlier holders
  pub fn pending(&self) -> bool {
    let queue = lock_queue(&self.queue);
    !self.released && queue.holder != Some(self.id)
  }

  /// Wait until this lock holds the mutex
  ///
  /// Cancel safe: dropping the future keeps the place in line.
  pub async fn ready(&mut self) {
    if self.released {
      return;
    }
    // Keep the receiver until the grant lands so a cancelled wait can retry
    if let Some(grant) = self.grant.as_mut() {
      // The sender is only dropped once this lock is no longer queued
      let _ = grant.await;
      self.grant = None;
    }
  }

  /// Give up the mutex, or the place in line if not yet granted
  pub fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    let mut queue = lock_queue(&self.queue);
    if queue.holder == Some(self.id) {
      queue.grant_next();
    } else {
      queue.waiters.retain(|(id, _)| *id != self.id);
    }
  }
}

impl Drop for AsyncMutexLock {
  fn drop(&mut self) {
    self.release();
  }
}

impl std::fmt::Debug for AsyncMutexLock {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AsyncMutexLock")
      .field("id", &self.id)
      .field("pending", &self.pending())
      .field("released", &self.released)
      .finish()
  }
}

/// Wrap an async handler as a synchronous output callback
///
/// Each call reserves a place in line right away and spawns the handler's
/// future onto `handle`; the futures run one at a time in call order.
pub fn serialize_async<T, F, Fut>(handle: Handle, mut handler: F) -> impl FnMut(T) + Send + 'static
where
  T: Send + 'static,
  F: FnMut(T) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  let mutex = AsyncMutex::new();
  move |value: T| {
    let mut lock = mutex.lock();
    let task = handler(value);
    handle.spawn(async move {
      lock.ready().await;
      task.await;
      lock.release();
    });
  }
}
