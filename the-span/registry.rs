//! The live span registry of one buffer.
//!
//! Readers load the current [`SpanSet`] generation without locking. Writers
//! build a new generation off to the side and publish it with a single
//! store, so a reader never observes a half-updated set.

use std::{
  collections::BTreeMap,
  sync::Arc,
};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::span::{
  ElementId,
  SpanKey,
  TagKind,
  TrackedSpan,
};

pub type Result<T> = std::result::Result<T, SpanError>;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpanError {
  #[error("span {offset}..{end} is out of bounds for buffer length {len}")]
  OutOfBounds {
    offset: usize,
    end:    usize,
    len:    usize,
  },
}

/// One generation of tracked spans, keyed by `(element, tag)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanSet {
  spans:      BTreeMap<SpanKey, TrackedSpan>,
  positioned: bool,
}

impl SpanSet {
  /// The "document has no positions yet" state.
  pub fn unpositioned() -> Self {
    Self::default()
  }

  /// An empty set that is about to be populated by a full re-parse.
  pub fn positioned() -> Self {
    Self {
      spans:      BTreeMap::new(),
      positioned: true,
    }
  }

  pub fn from_spans(spans: impl IntoIterator<Item = TrackedSpan>) -> Self {
    let mut set = Self::positioned();
    for span in spans {
      set.spans.insert(span.key(), span);
    }
    set
  }

  pub fn is_positioned(&self) -> bool {
    self.positioned
  }

  pub fn len(&self) -> usize {
    self.spans.len()
  }

  pub fn is_empty(&self) -> bool {
    self.spans.is_empty()
  }

  pub fn get(&self, element: ElementId, tag: TagKind) -> Option<&TrackedSpan> {
    self.spans.get(&SpanKey::new(element, tag))
  }

  pub fn iter(&self) -> impl Iterator<Item = &TrackedSpan> {
    self.spans.values()
  }

  /// Install `span`, replacing any span the element already holds for the
  /// same tag. Returns the evicted span.
  pub fn install(&mut self, span: TrackedSpan) -> Option<TrackedSpan> {
    self.positioned = true;
    self.spans.insert(span.key(), span)
  }

  pub fn remove(&mut self, element: ElementId, tag: TagKind) -> Option<TrackedSpan> {
    self.spans.remove(&SpanKey::new(element, tag))
  }

  /// Drop every span owned by `element`.
  pub fn remove_element(&mut self, element: ElementId) -> usize {
    let before = self.spans.len();
    self.spans.retain(|key, _| key.element != element);
    before - self.spans.len()
  }

  pub fn retain(&mut self, mut keep: impl FnMut(&TrackedSpan) -> bool) {
    self.spans.retain(|_, span| keep(span));
  }

  pub fn spans_of(&self, element: ElementId) -> impl Iterator<Item = &TrackedSpan> {
    let start = SpanKey::new(element, TagKind::All);
    let end = SpanKey::new(element, TagKind::Keyword);
    self.spans.range(start..=end).map(|(_, span)| span)
  }

  /// Matching spans in document order.
  pub fn query(&self, mut predicate: impl FnMut(&TrackedSpan) -> bool) -> Vec<TrackedSpan> {
    let mut spans: Vec<TrackedSpan> = self.spans.values().filter(|span| predicate(span)).copied().collect();
    spans.sort_by(TrackedSpan::by_offset);
    spans
  }
}

fn check_bounds(span: &TrackedSpan, buffer_len: usize) -> Result<()> {
  if span.end() > buffer_len {
    return Err(SpanError::OutOfBounds {
      offset: span.offset,
      end:    span.end(),
      len:    buffer_len,
    });
  }
  Ok(())
}

#[derive(Debug, Default)]
pub struct SpanRegistry {
  current: ArcSwap<SpanSet>,
}

impl SpanRegistry {
  pub fn new() -> Self {
    Self {
      current: ArcSwap::from_pointee(SpanSet::unpositioned()),
    }
  }

  /// The committed generation.
  pub fn load(&self) -> Arc<SpanSet> {
    self.current.load_full()
  }

  pub fn is_positioned(&self) -> bool {
    self.current.load().is_positioned()
  }

  pub fn len(&self) -> usize {
    self.current.load().len()
  }

  pub fn is_empty(&self) -> bool {
    self.current.load().is_empty()
  }

  /// Install one span, evicting the element's previous span of that tag.
  pub fn install(&self, span: TrackedSpan, buffer_len: usize) -> Result<()> {
    check_bounds(&span, buffer_len)?;
    self.current.rcu(|current| {
      let mut next = SpanSet::clone(current);
      next.install(span);
      next
    });
    Ok(())
  }

  pub fn remove(&self, element: ElementId, tag: TagKind) {
    self.current.rcu(|current| {
      let mut next = SpanSet::clone(current);
      next.remove(element, tag);
      next
    });
  }

  pub fn query(&self, predicate: impl FnMut(&TrackedSpan) -> bool) -> Vec<TrackedSpan> {
    self.current.load().query(predicate)
  }

  /// Reset to the "no positions yet" state in one store.
  pub fn clear_all(&self) {
    self.current.store(Arc::new(SpanSet::unpositioned()));
  }

  /// Publish a whole generation at once.
  pub fn commit(&self, set: SpanSet) {
    tracing::trace!(spans = set.len(), "committing span generation");
    self.current.store(Arc::new(set));
  }
}

#[cfg(test)]
mod tests {
  use slotmap::SlotMap;

  use super::*;

  fn ids(n: usize) -> Vec<ElementId> {
    let mut arena: SlotMap<ElementId, ()> = SlotMap::with_key();
    (0..n).map(|_| arena.insert(())).collect()
  }

  #[test]
  fn install_evicts_previous_span_of_same_tag() {
    let id = ids(1)[0];
    let registry = SpanRegistry::new();
    registry.install(TrackedSpan::new(0, 4, id, TagKind::Name), 10).unwrap();
    registry.install(TrackedSpan::new(6, 2, id, TagKind::Name), 10).unwrap();
    registry.install(TrackedSpan::new(0, 10, id, TagKind::All), 10).unwrap();

    let set = registry.load();
    assert_eq!(set.len(), 2);
    assert_eq!(set.get(id, TagKind::Name), Some(&TrackedSpan::new(6, 2, id, TagKind::Name)));
  }

  #[test]
  fn install_rejects_out_of_bounds() {
    let id = ids(1)[0];
    let registry = SpanRegistry::new();
    let err = registry.install(TrackedSpan::new(8, 4, id, TagKind::All), 10).unwrap_err();
    assert_eq!(err, SpanError::OutOfBounds {
      offset: 8,
      end:    12,
      len:    10,
    });
    assert!(registry.is_empty());
    assert!(!registry.is_positioned());
  }

  #[test]
  fn clear_all_returns_to_unpositioned() {
    let id = ids(1)[0];
    let registry = SpanRegistry::new();
    registry.install(TrackedSpan::new(0, 4, id, TagKind::All), 10).unwrap();
    assert!(registry.is_positioned());
    registry.clear_all();
    assert!(registry.is_empty());
    assert!(!registry.is_positioned());
  }

  #[test]
  fn readers_keep_their_generation_across_commit() {
    let ids = ids(2);
    let registry = SpanRegistry::new();
    registry.install(TrackedSpan::new(0, 4, ids[0], TagKind::All), 10).unwrap();
    let before = registry.load();

    registry.commit(SpanSet::from_spans([TrackedSpan::new(
      2,
      2,
      ids[1],
      TagKind::All,
    )]));

    assert_eq!(before.len(), 1);
    assert!(before.get(ids[0], TagKind::All).is_some());
    assert!(registry.load().get(ids[0], TagKind::All).is_none());
  }

  #[test]
  fn query_returns_document_order() {
    let ids = ids(3);
    let set = SpanSet::from_spans([
      TrackedSpan::new(5, 1, ids[0], TagKind::Name),
      TrackedSpan::new(0, 9, ids[1], TagKind::All),
      TrackedSpan::new(5, 1, ids[2], TagKind::CrossReference),
    ]);
    let offsets: Vec<_> = set.query(|_| true).iter().map(|span| (span.offset, span.tag)).collect();
    assert_eq!(offsets, vec![
      (0, TagKind::All),
      (5, TagKind::Name),
      (5, TagKind::CrossReference),
    ]);
  }

  #[test]
  fn spans_of_collects_every_tag_of_an_element() {
    let ids = ids(2);
    let set = SpanSet::from_spans([
      TrackedSpan::new(0, 9, ids[0], TagKind::All),
      TrackedSpan::new(0, 5, ids[0], TagKind::Keyword),
      TrackedSpan::new(6, 1, ids[0], TagKind::Name),
      TrackedSpan::new(6, 1, ids[1], TagKind::Name),
    ]);
    assert_eq!(set.spans_of(ids[0]).count(), 3);
    assert_eq!(set.spans_of(ids[1]).count(), 1);
  }
}
