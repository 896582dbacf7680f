//! Disposable span snapshots and the offset transform that keeps them in
//! step with buffer edits.
//!
//! A snapshot is taken at the start of a pass, mutated while the pass folds
//! its deltas in, and either committed as the next [`SpanSet`] generation or
//! dropped. Deltas must be applied in arrival order: each one is expressed in
//! coordinates of the buffer after the previous one.

use std::collections::BTreeMap;

use crate::{
  delta::{
    Delta,
    DeltaKind,
  },
  registry::SpanSet,
  span::{
    SpanKey,
    TrackedSpan,
  },
};

/// Map the range `[offset, offset + length)` through one delta.
///
/// Returns the new `(offset, length)`.
pub fn transform_range(offset: usize, length: usize, delta: &Delta) -> (usize, usize) {
  if delta.is_empty() {
    return (offset, length);
  }

  let (start, end) = (offset, offset + length);
  match delta.kind {
    DeltaKind::Insert => {
      if delta.offset <= start {
        (offset + delta.length, length)
      } else if delta.offset >= end {
        (offset, length)
      } else {
        (offset, length + delta.length)
      }
    },
    DeltaKind::Remove => {
      let (from, to) = (delta.offset, delta.end());
      if from >= start && to <= end {
        // inside
        (offset, length - delta.length)
      } else if to <= start {
        // before
        (offset - delta.length, length)
      } else if from <= start && to >= end {
        // covering
        (from, 0)
      } else if from < start {
        // overlaps the head
        (from, end - to)
      } else if from < end {
        // overlaps the tail
        (offset, from - start)
      } else {
        (offset, length)
      }
    },
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanSnapshot {
  entries: BTreeMap<SpanKey, TrackedSpan>,
}

impl SpanSnapshot {
  pub fn new(set: &SpanSet) -> Self {
    Self {
      entries: set.iter().map(|span| (span.key(), *span)).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, key: SpanKey) -> Option<&TrackedSpan> {
    self.entries.get(&key)
  }

  pub fn iter(&self) -> impl Iterator<Item = &TrackedSpan> {
    self.entries.values()
  }

  /// Fold one delta into every entry. Degenerate entries are kept.
  pub fn apply(&mut self, delta: &Delta) {
    for span in self.entries.values_mut() {
      let (offset, length) = transform_range(span.offset, span.length, delta);
      span.offset = offset;
      span.length = length;
    }
  }

  /// Turn the transformed snapshot into an uncommitted working set.
  pub fn into_set(self) -> SpanSet {
    SpanSet::from_spans(self.entries.into_values())
  }
}

impl From<&SpanSet> for SpanSnapshot {
  fn from(set: &SpanSet) -> Self {
    Self::new(set)
  }
}
