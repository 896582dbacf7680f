//! Published per-buffer model state.
//!
//! Readers load the current generation lock-free. The worker publishes a
//! pass result under the commit lock, so tree, spans and diagnostics always
//! advance together.

use std::sync::{
  Arc,
  atomic::{
    AtomicU64,
    Ordering,
  },
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use the_span::{
  SpanRegistry,
  SpanSet,
  TrackedSpan,
};
use tokio::sync::broadcast;

use crate::{
  diagnostics::Diagnostics,
  events::{
    DiagnosticsPublished,
    ModelEvents,
    ModelUpdated,
  },
  model::ModelTree,
};

/// A self-consistent view handed to the build pipeline.
#[derive(Debug, Clone)]
pub struct ModelHandoff {
  pub tree:        Arc<ModelTree>,
  pub spans:       Vec<TrackedSpan>,
  pub diagnostics: Arc<Diagnostics>,
  /// Buffer revision the model was built from.
  pub revision:    u64,
}

#[derive(Debug)]
pub struct ModelState {
  spans:       SpanRegistry,
  tree:        ArcSwap<ModelTree>,
  diagnostics: ArcSwap<Diagnostics>,
  events:      ModelEvents,
  commit_lock: Mutex<()>,
  seq:         AtomicU64,
  revision:    AtomicU64,
}

impl ModelState {
  pub fn new(event_capacity: usize) -> Self {
    Self {
      spans:       SpanRegistry::new(),
      tree:        ArcSwap::from_pointee(ModelTree::new()),
      diagnostics: ArcSwap::from_pointee(Diagnostics::new()),
      events:      ModelEvents::new(event_capacity),
      commit_lock: Mutex::new(()),
      seq:         AtomicU64::new(0),
      revision:    AtomicU64::new(0),
    }
  }

  pub fn spans(&self) -> &SpanRegistry {
    &self.spans
  }

  pub fn tree(&self) -> Arc<ModelTree> {
    self.tree.load_full()
  }

  pub fn diagnostics(&self) -> Arc<Diagnostics> {
    self.diagnostics.load_full()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ModelUpdated> {
    self.events.subscribe()
  }

  pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticsPublished> {
    self.events.subscribe_diagnostics()
  }

  /// Number of committed passes so far.
  pub fn seq(&self) -> u64 {
    self.seq.load(Ordering::Acquire)
  }

  pub fn revision(&self) -> u64 {
    self.revision.load(Ordering::Acquire)
  }

  /// Publish one pass result and notify listeners. Returns the new commit
  /// sequence number.
  pub fn commit(&self, tree: ModelTree, spans: SpanSet, diagnostics: Diagnostics, revision: u64) -> u64 {
    let _guard = self.commit_lock.lock();
    self.tree.store(Arc::new(tree));
    self.spans.commit(spans);
    self.diagnostics.store(Arc::new(diagnostics));
    self.revision.store(revision, Ordering::Release);
    let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
    let receivers = self.events.emit(ModelUpdated { seq, revision });
    tracing::debug!(seq, revision, receivers, "model updated");
    seq
  }

  /// Replace diagnostics without touching the model and announce them.
  pub fn publish_diagnostics(&self, diagnostics: Diagnostics, revision: u64) {
    let _guard = self.commit_lock.lock();
    let markers = diagnostics.len();
    self.diagnostics.store(Arc::new(diagnostics));
    let receivers = self
      .events
      .emit_diagnostics(DiagnosticsPublished { revision, markers });
    tracing::debug!(revision, markers, receivers, "diagnostics published");
  }

  /// Drop every span and the model; the buffer has no positions until the
  /// next successful pass.
  pub fn reset(&self) {
    let _guard = self.commit_lock.lock();
    self.tree.store(Arc::new(ModelTree::new()));
    self.spans.clear_all();
    self.diagnostics.store(Arc::new(Diagnostics::new()));
  }

  /// Snapshot tree, spans and diagnostics of the same generation.
  ///
  /// Spans whose element is not reachable in the handed-out tree are
  /// filtered.
  pub fn handoff(&self) -> ModelHandoff {
    let _guard = self.commit_lock.lock();
    let tree = self.tree.load_full();
    let spans = self.spans.query(|span| tree.is_reachable(span.element));
    ModelHandoff {
      spans,
      diagnostics: self.diagnostics.load_full(),
      revision: self.revision.load(Ordering::Acquire),
      tree,
    }
  }
}
