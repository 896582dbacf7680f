//! Per-buffer reconciliation session.
//!
//! A [`Session`] owns the published model state and the worker of one open
//! buffer. It is created by [`Session::open`] and torn down by
//! [`Session::close`] or on drop.

use std::{
  ops::Range,
  sync::Arc,
  time::Duration,
};

use parking_lot::{
  Mutex,
  RwLock,
};
use the_span::{
  ElementId,
  SpanOrder,
  SpanSet,
  TrackedSpan,
};
use tokio::sync::broadcast;
use tracing::{
  debug,
  info,
  warn,
};

use crate::{
  buffer::{
    Buffer,
    SubscriptionId,
    TextSource,
  },
  config::ReconcilerConfig,
  diagnostics::Diagnostics,
  error::{
    ReconcileError,
    Result,
  },
  events::{
    DiagnosticsPublished,
    ModelUpdated,
  },
  factory::ModelFactory,
  lookup,
  model::ModelTree,
  scheduler::{
    Scheduler,
    WorkerState,
  },
  state::{
    ModelHandoff,
    ModelState,
  },
  strategy::{
    PassReport,
    Strategy,
  },
};

struct Attachment {
  buffer:       Arc<Buffer>,
  subscription: Option<SubscriptionId>,
}

pub struct Session {
  attachment: RwLock<Attachment>,
  state:      Arc<ModelState>,
  scheduler:  Scheduler,
  factory:    Arc<dyn ModelFactory>,
  config:     ReconcilerConfig,
  closed:     Mutex<bool>,
}

impl Session {
  /// Start reconciling `buffer`. Returns once the initial full pass ran.
  pub fn open(buffer: Arc<Buffer>, factory: Arc<dyn ModelFactory>, config: ReconcilerConfig) -> Result<Self> {
    let state = Arc::new(ModelState::new(config.event_capacity));
    let strategy = Strategy::new(Arc::clone(&factory), Arc::clone(&state), config.incremental);
    let scheduler = Scheduler::spawn(
      config.worker_name.clone(),
      strategy,
      Arc::clone(&buffer) as Arc<dyn TextSource>,
      config.debounce(),
    )?;

    let subscription = subscribe(&buffer, &scheduler);
    let session = Self {
      attachment: RwLock::new(Attachment {
        buffer,
        subscription: Some(subscription),
      }),
      state,
      scheduler,
      factory,
      config,
      closed: Mutex::new(false),
    };
    info!(
      worker = %session.config.worker_name,
      debounce_ms = session.config.debounce_ms,
      incremental = session.config.incremental,
      "reconciliation session opened"
    );
    if !session.scheduler.force_full_pass() {
      warn!(worker = %session.config.worker_name, "initial pass did not run");
      return Err(ReconcileError::BufferUnavailable);
    }
    Ok(session)
  }

  /// Reconcile another buffer from now on. Pending deltas of the previous
  /// buffer are dropped and the new one is parsed from scratch.
  pub fn swap_buffer(&self, buffer: Arc<Buffer>) -> bool {
    {
      let mut attachment = self.attachment.write();
      if let Some(subscription) = attachment.subscription.take() {
        attachment.buffer.unsubscribe(subscription);
      }
      let purged = self.scheduler.purge();
      debug!(purged, "swapping buffer");
      self
        .scheduler
        .set_source(Arc::clone(&buffer) as Arc<dyn TextSource>);
      attachment.subscription = Some(subscribe(&buffer, &self.scheduler));
      attachment.buffer = buffer;
    }
    self.scheduler.force_full_pass()
  }

  /// Re-parse the whole buffer now. Blocks until the pass finished.
  pub fn force_full_pass(&self) -> bool {
    self.scheduler.force_full_pass()
  }

  pub fn wait_idle(&self, timeout: Duration) -> bool {
    self.scheduler.wait_idle(timeout)
  }

  /// Stop reconciling: unsubscribe, cancel and join the worker, drop all
  /// spans. Idempotent.
  pub fn close(&self) {
    let mut closed = self.closed.lock();
    if *closed {
      return;
    }
    *closed = true;
    {
      let mut attachment = self.attachment.write();
      if let Some(subscription) = attachment.subscription.take() {
        attachment.buffer.unsubscribe(subscription);
      }
    }
    self.scheduler.shutdown();
    self.state.reset();
    info!(worker = %self.config.worker_name, "reconciliation session closed");
  }

  pub fn is_closed(&self) -> bool {
    *self.closed.lock()
  }

  pub fn buffer(&self) -> Arc<Buffer> {
    Arc::clone(&self.attachment.read().buffer)
  }

  pub fn config(&self) -> &ReconcilerConfig {
    &self.config
  }

  pub fn state(&self) -> &Arc<ModelState> {
    &self.state
  }

  pub fn worker_state(&self) -> WorkerState {
    self.scheduler.state()
  }

  pub fn last_report(&self) -> Option<PassReport> {
    self.scheduler.last_report()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ModelUpdated> {
    self.state.subscribe()
  }

  /// Markers published by passes that committed no model.
  pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticsPublished> {
    self.state.subscribe_diagnostics()
  }

  pub fn handoff(&self) -> ModelHandoff {
    self.state.handoff()
  }

  pub fn tree(&self) -> Arc<ModelTree> {
    self.state.tree()
  }

  pub fn spans(&self) -> Arc<SpanSet> {
    self.state.spans().load()
  }

  pub fn diagnostics(&self) -> Arc<Diagnostics> {
    self.state.diagnostics()
  }

  pub fn smallest_span_at(&self, offset: usize) -> Option<TrackedSpan> {
    lookup::smallest_span_at(&self.spans(), offset)
  }

  pub fn cross_reference_at(&self, offset: usize) -> Option<TrackedSpan> {
    lookup::cross_reference_at(&self.spans(), offset)
  }

  pub fn spans_at(&self, offset: usize, order: SpanOrder) -> Vec<TrackedSpan> {
    lookup::spans_at(&self.spans(), offset, order)
  }

  pub fn spans_of(&self, element: ElementId) -> Vec<TrackedSpan> {
    lookup::spans_of(&self.spans(), element)
  }

  pub fn foldable_spans(&self) -> Vec<TrackedSpan> {
    match self.buffer().snapshot() {
      Ok(text) => lookup::foldable_spans(&self.spans(), &text),
      Err(_) => Vec::new(),
    }
  }

  pub fn word_region(&self, offset: usize) -> Option<Range<usize>> {
    let text = self.buffer().snapshot().ok()?;
    lookup::word_region(&text, offset, |c| self.factory.is_identifier_char(c))
  }

  /// Text of the identifier at `offset`.
  pub fn word_at(&self, offset: usize) -> Option<String> {
    let region = self.word_region(offset)?;
    self
      .buffer()
      .read(region.start, region.end - region.start)
      .ok()
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    self.close();
  }
}

fn subscribe(buffer: &Buffer, scheduler: &Scheduler) -> SubscriptionId {
  let queue = scheduler.handle();
  buffer.subscribe(move |deltas| queue.enqueue(deltas))
}
