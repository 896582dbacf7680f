//! Span tracking primitives for incremental reconciliation.
//!
//! Pure data and algorithms: no threads, no IO. [`registry`] holds the live,
//! double-buffered span set of one buffer; [`snapshot`] and [`coverage`]
//! implement the per-pass transform and minimal-cover search.

pub mod coverage;
pub mod delta;
pub mod registry;
pub mod snapshot;
pub mod span;

pub use coverage::Coverage;
pub use delta::{
  Delta,
  DeltaKind,
  Edit,
};
pub use registry::{
  SpanError,
  SpanRegistry,
  SpanSet,
};
pub use snapshot::SpanSnapshot;
pub use span::{
  ElementId,
  SpanKey,
  SpanOrder,
  TagKind,
  TrackedSpan,
};
