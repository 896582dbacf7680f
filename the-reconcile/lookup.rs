//! Span-to-model queries for presentation, outlining, folding and
//! hyperlinks.

use std::ops::Range;

use the_span::{
  ElementId,
  SpanOrder,
  SpanSet,
  TagKind,
  TrackedSpan,
};

use crate::buffer::TextSnapshot;

/// Smallest span including `offset`, of any tag.
pub fn smallest_span_at(spans: &SpanSet, offset: usize) -> Option<TrackedSpan> {
  spans
    .iter()
    .filter(|span| span.includes(offset))
    .min_by(|a, b| a.by_length(b))
    .copied()
}

/// Smallest cross-reference span including `offset`.
pub fn cross_reference_at(spans: &SpanSet, offset: usize) -> Option<TrackedSpan> {
  spans
    .iter()
    .filter(|span| span.tag == TagKind::CrossReference && span.includes(offset))
    .min_by(|a, b| a.by_length(b))
    .copied()
}

pub fn spans_at(spans: &SpanSet, offset: usize, order: SpanOrder) -> Vec<TrackedSpan> {
  let mut out: Vec<TrackedSpan> = spans
    .iter()
    .filter(|span| span.includes(offset))
    .copied()
    .collect();
  out.sort_by(|a, b| order.compare(a, b));
  out
}

pub fn spans_of(spans: &SpanSet, element: ElementId) -> Vec<TrackedSpan> {
  spans.spans_of(element).copied().collect()
}

/// Whole-element spans that cover more than one line, in document order.
pub fn foldable_spans(spans: &SpanSet, text: &TextSnapshot) -> Vec<TrackedSpan> {
  spans.query(|span| {
    span.tag == TagKind::All
      && !span.is_degenerate()
      && span.end() <= text.len_chars()
      && text.line_of(span.offset) < text.line_of(span.end() - 1)
  })
}

/// Identifier run around `offset`.
///
/// Empty at `offset` when the character there is not an identifier
/// character; `None` past the end of the buffer.
pub fn word_region(
  text: &TextSnapshot,
  offset: usize,
  is_identifier_char: impl Fn(char) -> bool,
) -> Option<Range<usize>> {
  let c = text.char_at(offset)?;
  if !is_identifier_char(c) {
    return Some(offset..offset);
  }

  let mut start = offset;
  while start > 0 && text.char_at(start - 1).is_some_and(&is_identifier_char) {
    start -= 1;
  }
  let mut end = offset + 1;
  while text.char_at(end).is_some_and(&is_identifier_char) {
    end += 1;
  }
  Some(start..end)
}
