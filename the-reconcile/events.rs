//! "Model updated" and "diagnostics published" notifications.
//!
//! One [`ModelUpdated`] per committed pass. A pass that commits nothing but
//! still has markers to show sends [`DiagnosticsPublished`] instead.
//! Consumers re-query on receipt; events carry no diff.

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelUpdated {
  /// Commit sequence number, strictly increasing per session.
  pub seq:      u64,
  /// Buffer revision the committed model reflects.
  pub revision: u64,
}

/// Diagnostics replaced outside a commit: the model and spans are unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsPublished {
  /// Buffer revision the markers were computed against.
  pub revision: u64,
  pub markers:  usize,
}

#[derive(Debug)]
pub struct ModelEvents {
  tx:          broadcast::Sender<ModelUpdated>,
  diagnostics: broadcast::Sender<DiagnosticsPublished>,
}

impl ModelEvents {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    let (diagnostics, _) = broadcast::channel(capacity.max(1));
    Self { tx, diagnostics }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ModelUpdated> {
    self.tx.subscribe()
  }

  pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticsPublished> {
    self.diagnostics.subscribe()
  }

  /// Returns the number of receivers notified. Having none is not an error.
  pub fn emit(&self, event: ModelUpdated) -> usize {
    self.tx.send(event).unwrap_or(0)
  }

  pub fn emit_diagnostics(&self, event: DiagnosticsPublished) -> usize {
    self.diagnostics.send(event).unwrap_or(0)
  }

  pub fn receiver_count(&self) -> usize {
    self.tx.receiver_count()
  }
}
