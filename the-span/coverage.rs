//! Locating the smallest tracked span that covers a dirty region.

use std::collections::BTreeSet;

use crate::{
  delta::Delta,
  snapshot::SpanSnapshot,
  span::{
    SpanKey,
    TrackedSpan,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
  /// The minimal span containing the region.
  Span(TrackedSpan),
  /// Nothing tracked contains the region.
  WholeBuffer,
}

/// Find the smallest snapshot entry containing `[offset, offset + length)`.
///
/// Ties on length break on offset, then on `(element, tag)`.
pub fn resolve(snapshot: &SpanSnapshot, offset: usize, length: usize) -> Coverage {
  snapshot
    .iter()
    .filter(|span| span.contains(offset, length))
    .min_by(|a, b| a.by_length(b))
    .map_or(Coverage::WholeBuffer, |span| Coverage::Span(*span))
}

pub fn resolve_delta(snapshot: &SpanSnapshot, delta: &Delta) -> Coverage {
  resolve(snapshot, delta.offset, delta.length)
}

/// Drop dirty spans nested inside another dirty span.
///
/// Keys that no longer resolve in the snapshot are skipped. The result is
/// in document order. Spans with identical ranges keep only the smaller key.
pub fn coalesce(snapshot: &SpanSnapshot, dirty: &BTreeSet<SpanKey>) -> Vec<TrackedSpan> {
  let mut spans: Vec<TrackedSpan> = dirty.iter().filter_map(|key| snapshot.get(*key).copied()).collect();
  // outermost first
  spans.sort_by(|a, b| {
    a.offset
      .cmp(&b.offset)
      .then(b.length.cmp(&a.length))
      .then(a.key().cmp(&b.key()))
  });

  let mut kept: Vec<TrackedSpan> = Vec::with_capacity(spans.len());
  for span in spans {
    if kept.iter().any(|outer| outer.nests(&span)) {
      continue;
    }
    kept.push(span);
  }
  kept
}

#[cfg(test)]
mod tests {
  use quickcheck::{
    Arbitrary,
    Gen,
  };
  use slotmap::SlotMap;

  use super::*;
  use crate::{
    registry::SpanSet,
    span::{
      ElementId,
      TagKind,
    },
  };

  fn ids(n: usize) -> Vec<ElementId> {
    let mut arena: SlotMap<ElementId, ()> = SlotMap::with_key();
    (0..n).map(|_| arena.insert(())).collect()
  }

  fn snapshot(spans: impl IntoIterator<Item = TrackedSpan>) -> SpanSnapshot {
    SpanSnapshot::new(&SpanSet::from_spans(spans))
  }

  #[test]
  fn nested_region_resolves_to_innermost_span() {
    let ids = ids(2);
    let outer = TrackedSpan::new(0, 40, ids[0], TagKind::All);
    let inner = TrackedSpan::new(10, 10, ids[1], TagKind::All);
    let snapshot = snapshot([outer, inner]);

    assert_eq!(resolve(&snapshot, 12, 3), Coverage::Span(inner));
    assert_eq!(resolve(&snapshot, 10, 10), Coverage::Span(inner));
    assert_eq!(resolve(&snapshot, 18, 4), Coverage::Span(outer));
  }

  #[test]
  fn region_bridging_siblings_dirties_whole_buffer() {
    let ids = ids(2);
    let snapshot = snapshot([
      TrackedSpan::new(0, 5, ids[0], TagKind::All),
      TrackedSpan::new(10, 5, ids[1], TagKind::All),
    ]);
    assert_eq!(
      resolve_delta(&snapshot, &Delta::remove(4, 7)),
      Coverage::WholeBuffer
    );
  }

  #[test]
  fn degenerate_entries_never_cover() {
    let ids = ids(1);
    let snapshot = snapshot([TrackedSpan::new(3, 0, ids[0], TagKind::All)]);
    assert_eq!(resolve(&snapshot, 3, 0), Coverage::WholeBuffer);
  }

  #[test]
  fn equal_ranges_break_ties_on_identity() {
    let ids = ids(2);
    let a = TrackedSpan::new(0, 8, ids[0], TagKind::All);
    let b = TrackedSpan::new(0, 8, ids[1], TagKind::All);
    let c = TrackedSpan::new(0, 8, ids[0], TagKind::Name);
    let snapshot = snapshot([c, b, a]);
    assert_eq!(resolve(&snapshot, 2, 2), Coverage::Span(a));
  }

  #[test]
  fn coalesce_drops_nested_dirty_spans() {
    let ids = ids(4);
    let outer = TrackedSpan::new(0, 40, ids[0], TagKind::All);
    let nested = TrackedSpan::new(10, 10, ids[1], TagKind::All);
    let sibling = TrackedSpan::new(50, 5, ids[2], TagKind::All);
    let same_range = TrackedSpan::new(50, 5, ids[3], TagKind::All);
    let snapshot = snapshot([outer, nested, sibling, same_range]);
    let dirty: BTreeSet<SpanKey> = [outer, nested, sibling, same_range]
      .iter()
      .map(TrackedSpan::key)
      .collect();

    assert_eq!(coalesce(&snapshot, &dirty), vec![outer, sibling]);
  }

  #[derive(Debug, Clone)]
  struct Chain {
    widths: Vec<usize>,
    probe:  usize,
  }

  impl Arbitrary for Chain {
    fn arbitrary(g: &mut Gen) -> Self {
      let depth = usize::arbitrary(g) % 6 + 1;
      Self {
        widths: (0..depth).map(|_| usize::arbitrary(g) % 4 + 1).collect(),
        probe:  usize::arbitrary(g) % 4,
      }
    }
  }

  quickcheck::quickcheck! {
    // Strictly nested chain: the innermost containing span always wins.
    fn innermost_containing_span_wins(chain: Chain) -> bool {
      let ids = ids(chain.widths.len());
      let mut spans = Vec::new();
      let (mut start, mut end) = (0usize, 200usize);
      for (id, width) in ids.iter().zip(&chain.widths) {
        spans.push(TrackedSpan::new(start, end - start, *id, TagKind::All));
        start += width;
        end -= width;
      }
      let innermost = *spans.last().unwrap();
      let probe = innermost.offset + chain.probe.min(innermost.length - 1);
      resolve(&snapshot(spans), probe, 1) == Coverage::Span(innermost)
    }
  }
}
