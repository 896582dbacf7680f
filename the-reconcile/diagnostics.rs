//! Markers surfaced to the user after a pass.
//!
//! Parse errors describe why the last pass could not model the buffer.
//! Eviction markers flag regions that are currently un-modeled because an
//! element was dropped by the last-resort recovery.

use std::ops::Range;

use serde::{
  Deserialize,
  Serialize,
};
use the_span::{
  Delta,
  snapshot::transform_range,
};

use crate::{
  buffer::TextSnapshot,
  factory::ParseError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
  ParseError,
  Evicted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
  pub kind:    MarkerKind,
  pub message: String,
  pub offset:  usize,
  pub length:  usize,
  /// One-based line of `offset`.
  pub line:    usize,
}

impl Marker {
  pub fn parse_error(error: &ParseError, text: &TextSnapshot) -> Self {
    let offset = error.offset.unwrap_or(0).min(text.len_chars());
    Self {
      kind: MarkerKind::ParseError,
      message: error.message.clone(),
      offset,
      length: 0,
      line: text.line_of(offset) + 1,
    }
  }

  pub fn evicted(offset: usize, length: usize, message: impl Into<String>, text: &TextSnapshot) -> Self {
    Self {
      kind: MarkerKind::Evicted,
      message: message.into(),
      offset,
      length,
      line: text.line_of(offset) + 1,
    }
  }

  fn same_as(&self, other: &Marker) -> bool {
    self.kind == other.kind
      && self.message == other.message
      && self.offset == other.offset
      && self.length == other.length
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
  markers: Vec<Marker>,
}

impl Diagnostics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.markers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.markers.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Marker> {
    self.markers.iter()
  }

  pub fn of_kind(&self, kind: MarkerKind) -> impl Iterator<Item = &Marker> {
    self.markers.iter().filter(move |marker| marker.kind == kind)
  }

  /// Add a marker unless an identical one is already present.
  pub fn push(&mut self, marker: Marker) -> bool {
    if self.markers.iter().any(|existing| existing.same_as(&marker)) {
      return false;
    }
    self.markers.push(marker);
    true
  }

  /// Markers that carry over into the next pass: evictions only.
  pub fn carried_over(&self) -> Self {
    Self {
      markers: self.of_kind(MarkerKind::Evicted).cloned().collect(),
    }
  }

  /// Drop eviction markers inside a region that was modeled again.
  pub fn clear_evictions_within(&mut self, range: Range<usize>) {
    self.markers.retain(|marker| {
      marker.kind != MarkerKind::Evicted
        || marker.offset < range.start
        || marker.offset + marker.length > range.end
    });
  }

  /// Move marker ranges through one edit.
  pub fn apply(&mut self, delta: &Delta) {
    for marker in &mut self.markers {
      let (offset, length) = transform_range(marker.offset, marker.length, delta);
      marker.offset = offset;
      marker.length = length;
    }
  }

  /// Recompute line numbers against `text` and clamp ranges into it.
  pub fn relocate(&mut self, text: &TextSnapshot) {
    let len = text.len_chars();
    for marker in &mut self.markers {
      marker.offset = marker.offset.min(len);
      marker.length = marker.length.min(len - marker.offset);
      marker.line = text.line_of(marker.offset) + 1;
    }
  }
}

#[cfg(test)]
mod tests {
  use ropey::Rope;

  use super::*;

  fn text(source: &str) -> TextSnapshot {
    TextSnapshot::new(Rope::from_str(source), 0)
  }

  #[test]
  fn parse_errors_are_deduplicated() {
    let text = text("class A {\n  int\n}");
    let error = ParseError::at(16, "expected identifier");
    let mut diagnostics = Diagnostics::new();

    assert!(diagnostics.push(Marker::parse_error(&error, &text)));
    assert!(!diagnostics.push(Marker::parse_error(&error, &text)));
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics.iter().next().unwrap().line, 3);
  }

  #[test]
  fn only_evictions_carry_over() {
    let text = text("abc");
    let mut diagnostics = Diagnostics::new();
    diagnostics.push(Marker::parse_error(&ParseError::new("boom"), &text));
    diagnostics.push(Marker::evicted(1, 2, "evicted", &text));

    let carried = diagnostics.carried_over();
    assert_eq!(carried.len(), 1);
    assert_eq!(carried.of_kind(MarkerKind::Evicted).count(), 1);
  }

  #[test]
  fn eviction_ranges_follow_edits() {
    let before = text("ab\ncdef");
    let mut diagnostics = Diagnostics::new();
    diagnostics.push(Marker::evicted(3, 4, "evicted", &before));

    diagnostics.apply(&Delta::insert(0, "\n\n"));
    diagnostics.relocate(&text("\n\nab\ncdef"));

    let marker = diagnostics.iter().next().unwrap();
    assert_eq!((marker.offset, marker.length, marker.line), (5, 4, 4));
  }
}
