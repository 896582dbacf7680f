//! Tracked spans: buffer regions anchored to model elements.
//!
//! A [`TrackedSpan`] never owns its element. It stores an [`ElementId`], an
//! arena key that becomes stale once the element is disconnected, so every
//! consumer must re-check reachability after a model mutation.

use std::{
  cmp::Ordering,
  fmt,
  ops::Range,
};

slotmap::new_key_type! {
    pub struct ElementId;
}

impl fmt::Display for ElementId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}", self.0)
  }
}

/// What part of an element a span marks.
///
/// Declaration order is the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKind {
  /// The whole element.
  All,
  Name,
  CrossReference,
  Modifier,
  Keyword,
}

impl TagKind {
  pub const ALL: [TagKind; 5] = [
    TagKind::All,
    TagKind::Name,
    TagKind::CrossReference,
    TagKind::Modifier,
    TagKind::Keyword,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::All => "all",
      Self::Name => "name",
      Self::CrossReference => "cross-reference",
      Self::Modifier => "modifier",
      Self::Keyword => "keyword",
    }
  }
}

/// Identity of a span: an element holds at most one span per tag kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanKey {
  pub element: ElementId,
  pub tag:     TagKind,
}

impl SpanKey {
  pub const fn new(element: ElementId, tag: TagKind) -> Self {
    Self { element, tag }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackedSpan {
  pub offset:  usize,
  pub length:  usize,
  pub element: ElementId,
  pub tag:     TagKind,
}

impl TrackedSpan {
  pub const fn new(offset: usize, length: usize, element: ElementId, tag: TagKind) -> Self {
    Self {
      offset,
      length,
      element,
      tag,
    }
  }

  pub fn from_range(range: Range<usize>, element: ElementId, tag: TagKind) -> Self {
    let length = range.end.saturating_sub(range.start);
    Self::new(range.start, length, element, tag)
  }

  pub const fn key(&self) -> SpanKey {
    SpanKey::new(self.element, self.tag)
  }

  /// Exclusive end offset.
  pub const fn end(&self) -> usize {
    self.offset + self.length
  }

  pub const fn range(&self) -> Range<usize> {
    self.offset..self.end()
  }

  pub const fn is_degenerate(&self) -> bool {
    self.length == 0
  }

  /// Whether `offset` falls inside `[offset, end)`.
  pub const fn includes(&self, offset: usize) -> bool {
    offset >= self.offset && offset < self.end()
  }

  /// Whether the region `[offset, offset + length)` lies inside this span.
  ///
  /// A region may start exactly at the span start, but never extend past
  /// its end. Degenerate spans contain nothing.
  pub const fn contains(&self, offset: usize, length: usize) -> bool {
    !self.is_degenerate() && offset >= self.offset && offset + length <= self.end()
  }

  /// Whether `other` lies inside this span and is not this span.
  pub fn nests(&self, other: &TrackedSpan) -> bool {
    self.key() != other.key() && other.offset >= self.offset && other.end() <= self.end()
  }

  /// Smallest first: length, then offset, then identity.
  pub fn by_length(&self, other: &TrackedSpan) -> Ordering {
    self
      .length
      .cmp(&other.length)
      .then(self.offset.cmp(&other.offset))
      .then(self.element.cmp(&other.element))
      .then(self.tag.cmp(&other.tag))
  }

  /// Document order: offset, then length, then tag, then identity.
  pub fn by_offset(&self, other: &TrackedSpan) -> Ordering {
    self
      .offset
      .cmp(&other.offset)
      .then(self.length.cmp(&other.length))
      .then(self.tag.cmp(&other.tag))
      .then(self.element.cmp(&other.element))
  }
}

/// Requested ordering for multi-span lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanOrder {
  #[default]
  Offset,
  Length,
}

impl SpanOrder {
  pub fn compare(self, a: &TrackedSpan, b: &TrackedSpan) -> Ordering {
    match self {
      Self::Offset => a.by_offset(b),
      Self::Length => a.by_length(b),
    }
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
  fn containment_allows_region_at_span_start() {
    let id = ids(1)[0];
    let span = TrackedSpan::new(4, 6, id, TagKind::All);
    assert!(span.contains(4, 6));
    assert!(span.contains(4, 0));
    assert!(span.contains(9, 1));
    assert!(!span.contains(9, 2));
    assert!(!span.contains(3, 2));
  }

  #[test]
  fn degenerate_span_contains_nothing() {
    let id = ids(1)[0];
    let span = TrackedSpan::new(4, 0, id, TagKind::Name);
    assert!(!span.contains(4, 0));
    assert!(!span.includes(4));
  }

  #[test]
  fn orderings_never_tie_for_distinct_spans() {
    let ids = ids(2);
    let a = TrackedSpan::new(0, 5, ids[0], TagKind::All);
    let b = TrackedSpan::new(0, 5, ids[1], TagKind::All);
    let c = TrackedSpan::new(0, 5, ids[0], TagKind::Name);
    assert_ne!(a.by_length(&b), Ordering::Equal);
    assert_ne!(a.by_length(&c), Ordering::Equal);
    assert_ne!(a.by_offset(&c), Ordering::Equal);
    assert_eq!(a.by_length(&a), Ordering::Equal);
  }

  #[test]
  fn nests_excludes_self() {
    let ids = ids(2);
    let outer = TrackedSpan::new(0, 10, ids[0], TagKind::All);
    let inner = TrackedSpan::new(2, 3, ids[1], TagKind::All);
    assert!(outer.nests(&inner));
    assert!(!inner.nests(&outer));
    assert!(!outer.nests(&outer));
  }
}
