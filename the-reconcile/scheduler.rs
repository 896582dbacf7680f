//! Delta queue and the background reconciliation worker.
//!
//! One dedicated thread per session owns the [`Strategy`]. Edits are queued
//! by the buffer's listener on the editing thread; the worker waits until no
//! edit arrived for the debounce delay, then reconciles everything queued up
//! to the buffer revision it reads.
//!
//! Dropping the [`Scheduler`] cancels and joins the worker.

use std::{
  collections::VecDeque,
  sync::Arc,
  thread::{
    self,
    JoinHandle,
  },
  time::{
    Duration,
    Instant,
  },
};

use parking_lot::{
  Condvar,
  Mutex,
  RwLock,
};
use the_span::Delta;
use tracing::{
  debug,
  warn,
};

use crate::{
  buffer::TextSource,
  error::ReconcileError,
  strategy::{
    Batch,
    CancelFlag,
    PassControl,
    PassOutcome,
    PassReport,
    Strategy,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Idle,
  /// Deltas are queued and the debounce timer is running.
  Collecting,
  Reconciling,
  Cancelled,
}

struct Queue {
  deltas:      VecDeque<Delta>,
  last_edit:   Option<Instant>,
  forced:      bool,
  running:     bool,
  state:       WorkerState,
  passes:      u64,
  last_report: Option<PassReport>,
}

impl Queue {
  fn is_idle(&self) -> bool {
    self.deltas.is_empty() && !self.forced && !self.running
  }
}

struct Shared {
  queue:    Mutex<Queue>,
  /// Wakes the worker: new deltas, a forced pass or cancellation.
  wake:     Condvar,
  /// Wakes waiters once the queue is drained and no pass is running.
  drained:  Condvar,
  cancel:   CancelFlag,
  source:   RwLock<Arc<dyn TextSource>>,
  debounce: Duration,
}

impl Shared {
  fn enqueue(&self, deltas: &[Delta]) {
    if deltas.is_empty() || self.cancel.is_cancelled() {
      return;
    }
    let mut queue = self.queue.lock();
    queue.deltas.extend(deltas.iter().cloned());
    queue.last_edit = Some(Instant::now());
    drop(queue);
    self.wake.notify_one();
  }
}

/// Cloneable enqueue side of the scheduler, handed to buffer listeners.
#[derive(Clone)]
pub struct QueueHandle {
  shared: Arc<Shared>,
}

impl QueueHandle {
  /// Queue one logical edit and restart the debounce timer.
  pub fn enqueue(&self, deltas: &[Delta]) {
    self.shared.enqueue(deltas);
  }
}

struct WorkerControl<'a> {
  cancel: &'a CancelFlag,
  source: &'a dyn TextSource,
}

impl PassControl for WorkerControl<'_> {
  fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  fn is_available(&self) -> bool {
    self.source.is_available()
  }
}

pub struct Scheduler {
  shared: Arc<Shared>,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
  pub fn spawn(
    name: impl Into<String>,
    strategy: Strategy,
    source: Arc<dyn TextSource>,
    debounce: Duration,
  ) -> Result<Self, ReconcileError> {
    let shared = Arc::new(Shared {
      queue: Mutex::new(Queue {
        deltas:      VecDeque::new(),
        last_edit:   None,
        forced:      false,
        running:     false,
        state:       WorkerState::Idle,
        passes:      0,
        last_report: None,
      }),
      wake: Condvar::new(),
      drained: Condvar::new(),
      cancel: CancelFlag::new(),
      source: RwLock::new(source),
      debounce,
    });

    let worker_shared = Arc::clone(&shared);
    let worker = thread::Builder::new()
      .name(name.into())
      .spawn(move || run(worker_shared, strategy))
      .map_err(|err| ReconcileError::Spawn(err.to_string()))?;

    Ok(Self {
      shared,
      worker: Mutex::new(Some(worker)),
    })
  }

  pub fn handle(&self) -> QueueHandle {
    QueueHandle {
      shared: Arc::clone(&self.shared),
    }
  }

  pub fn enqueue(&self, deltas: &[Delta]) {
    self.shared.enqueue(deltas);
  }

  /// Reconcile the whole buffer now, skipping the debounce delay.
  ///
  /// Blocks until the queue is drained. Returns `false` when the worker was
  /// cancelled or the buffer is closed.
  pub fn force_full_pass(&self) -> bool {
    let source = Arc::clone(&*self.shared.source.read());
    let text = match source.snapshot() {
      Ok(text) => text,
      Err(err) => {
        warn!(error = %err, "forced pass skipped");
        return false;
      },
    };

    let mut queue = self.shared.queue.lock();
    if self.shared.cancel.is_cancelled() {
      return false;
    }
    queue.deltas.extend(Batch::full(&text).deltas);
    queue.forced = true;
    self.shared.wake.notify_one();
    while !queue.is_idle() {
      if self.shared.cancel.is_cancelled() {
        return false;
      }
      self.shared.drained.wait(&mut queue);
    }
    true
  }

  /// Drop every queued delta. Returns how many were dropped.
  pub fn purge(&self) -> usize {
    let mut queue = self.shared.queue.lock();
    let purged = queue.deltas.len();
    queue.deltas.clear();
    queue.forced = false;
    queue.last_edit = None;
    if queue.is_idle() {
      self.shared.drained.notify_all();
    }
    drop(queue);
    self.shared.wake.notify_one();
    purged
  }

  /// Point the worker at another buffer. Queued deltas are not touched.
  pub fn set_source(&self, source: Arc<dyn TextSource>) {
    *self.shared.source.write() = source;
  }

  /// Wait until nothing is queued and no pass is running.
  ///
  /// Returns `false` on timeout or cancellation.
  pub fn wait_idle(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut queue = self.shared.queue.lock();
    while !queue.is_idle() {
      if self.shared.cancel.is_cancelled() {
        return false;
      }
      if self
        .shared
        .drained
        .wait_until(&mut queue, deadline)
        .timed_out()
      {
        return queue.is_idle();
      }
    }
    true
  }

  pub fn cancel(&self) {
    if self.shared.cancel.is_cancelled() {
      return;
    }
    self.shared.cancel.cancel();
    // take the lock so no waiter misses the wake-up between its check and wait
    let _queue = self.shared.queue.lock();
    self.shared.wake.notify_all();
    self.shared.drained.notify_all();
  }

  pub fn is_cancelled(&self) -> bool {
    self.shared.cancel.is_cancelled()
  }

  /// Cancel and join the worker. Idempotent.
  pub fn shutdown(&self) {
    self.cancel();
    let worker = self.worker.lock().take();
    if let Some(worker) = worker
      && worker.join().is_err()
    {
      warn!("reconciler worker panicked");
    }
  }

  pub fn state(&self) -> WorkerState {
    self.shared.queue.lock().state
  }

  pub fn pending(&self) -> usize {
    self.shared.queue.lock().deltas.len()
  }

  /// Number of passes the worker has finished.
  pub fn passes(&self) -> u64 {
    self.shared.queue.lock().passes
  }

  pub fn last_report(&self) -> Option<PassReport> {
    self.shared.queue.lock().last_report.clone()
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn run(shared: Arc<Shared>, mut strategy: Strategy) {
  debug!(debounce_ms = shared.debounce.as_millis() as u64, "reconciler worker started");
  while wait_for_work(&shared) {
    let source = Arc::clone(&*shared.source.read());
    let report = match source.snapshot() {
      Ok(text) => {
        let batch = {
          let mut queue = shared.queue.lock();
          let mut deltas = Vec::new();
          // synthetic deltas carry revision zero and always qualify
          while queue
            .deltas
            .front()
            .is_some_and(|delta| delta.revision <= text.revision())
          {
            deltas.extend(queue.deltas.pop_front());
          }
          Batch {
            deltas,
            full: std::mem::take(&mut queue.forced),
          }
        };
        let control = WorkerControl {
          cancel: &shared.cancel,
          source: source.as_ref(),
        };
        strategy.run_pass(&batch, &text, &control)
      },
      Err(err) => {
        warn!(error = %err, "buffer unavailable, dropping queued deltas");
        let mut queue = shared.queue.lock();
        queue.deltas.clear();
        queue.forced = false;
        PassReport {
          outcome: PassOutcome::Aborted(ReconcileError::BufferUnavailable),
          ..PassReport::default()
        }
      },
    };

    let mut queue = shared.queue.lock();
    queue.running = false;
    queue.passes += 1;
    queue.last_report = Some(report);
    if queue.is_idle() {
      queue.state = WorkerState::Idle;
      shared.drained.notify_all();
    }
  }
  debug!("reconciler worker stopped");
}

/// Block until a pass should start. Returns `false` once cancelled.
fn wait_for_work(shared: &Shared) -> bool {
  let mut queue = shared.queue.lock();
  loop {
    if shared.cancel.is_cancelled() {
      queue.state = WorkerState::Cancelled;
      shared.drained.notify_all();
      return false;
    }
    if queue.deltas.is_empty() && !queue.forced {
      queue.state = WorkerState::Idle;
      shared.drained.notify_all();
      shared.wake.wait(&mut queue);
      continue;
    }
    if queue.forced {
      break;
    }
    let deadline = queue
      .last_edit
      .map_or_else(Instant::now, |at| at + shared.debounce);
    if Instant::now() >= deadline {
      break;
    }
    queue.state = WorkerState::Collecting;
    shared.wake.wait_until(&mut queue, deadline);
  }
  queue.state = WorkerState::Reconciling;
  queue.running = true;
  true
}
