//! Incremental reconciliation of a structured model against an edited
//! text buffer.
//!
//! A [`Session`] subscribes to a [`Buffer`], batches its edits on a
//! background worker and keeps a [`ModelTree`] plus the tracked spans of its
//! elements in step with the text. Language support is plugged in through
//! [`ModelFactory`].

pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod factory;
pub mod lookup;
pub mod model;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod strategy;

#[cfg(test)]
mod fixture;

pub use buffer::{
  Buffer,
  BufferError,
  SubscriptionId,
  TextSnapshot,
  TextSource,
};
pub use config::{
  ConfigError,
  ReconcilerConfig,
};
pub use diagnostics::{
  Diagnostics,
  Marker,
  MarkerKind,
};
pub use error::{
  ReconcileError,
  Result,
};
pub use events::{
  DiagnosticsPublished,
  ModelUpdated,
};
pub use factory::{
  ModelFactory,
  ParseError,
};
pub use model::{
  Element,
  ModelTree,
  ParsedElement,
};
pub use scheduler::{
  Scheduler,
  WorkerState,
};
pub use session::Session;
pub use state::{
  ModelHandoff,
  ModelState,
};
pub use strategy::{
  Level,
  PassOutcome,
  PassReport,
};
pub use the_span::{
  ElementId,
  SpanOrder,
  TagKind,
  TrackedSpan,
};
