use the_span::ElementId;
use thiserror::Error;

use crate::factory::ParseError;

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReconcileError {
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error("inconsistent model at element {element}: {reason}")]
  InconsistentModel {
    element: ElementId,
    reason:  String,
  },
  #[error("buffer was closed during reconciliation")]
  BufferUnavailable,
  #[error("failed to spawn reconciler worker: {0}")]
  Spawn(String),
}

impl ReconcileError {
  pub fn inconsistent(element: ElementId, reason: impl Into<String>) -> Self {
    Self::InconsistentModel {
      element,
      reason: reason.into(),
    }
  }

  /// Recoverable errors escalate to the next recovery level; the rest abort
  /// the pass.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, Self::Parse(_) | Self::InconsistentModel { .. })
  }
}
