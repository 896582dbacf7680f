//! Text-edit deltas as emitted by the buffer.
//!
//! Offsets are char offsets. A removal is expressed in coordinates of the
//! buffer *before* it was applied, an insertion in coordinates *after*.

use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
  Insert,
  Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
  pub offset:    usize,
  pub length:    usize,
  pub kind:      DeltaKind,
  pub text:      Option<String>,
  /// Buffer revision produced by this edit. Zero for synthetic deltas.
  pub revision:  u64,
  /// Not an edit: a stand-in for the whole buffer that requests a rebuild.
  pub synthetic: bool,
}

/// One logical edit: a replace yields a removal followed by an insertion.
pub type Edit = SmallVec<[Delta; 2]>;

impl Delta {
  pub fn insert(offset: usize, text: impl Into<String>) -> Self {
    let text = text.into();
    Self {
      offset,
      length: text.chars().count(),
      kind: DeltaKind::Insert,
      text: Some(text),
      revision: 0,
      synthetic: false,
    }
  }

  pub fn remove(offset: usize, length: usize) -> Self {
    Self {
      offset,
      length,
      kind: DeltaKind::Remove,
      text: None,
      revision: 0,
      synthetic: false,
    }
  }

  /// Insertion of the entire buffer content at offset zero, marked so that
  /// passes never shift positions by it.
  pub fn reload(text: impl Into<String>) -> Self {
    Self {
      synthetic: true,
      ..Self::insert(0, text)
    }
  }

  /// Split a replacement into its remove/insert pair, in that order.
  ///
  /// Empty halves are dropped, so a pure insertion yields one delta.
  pub fn replace(offset: usize, length: usize, text: impl Into<String>) -> Edit {
    let text = text.into();
    let mut edit = Edit::new();
    if length > 0 {
      edit.push(Self::remove(offset, length));
    }
    if !text.is_empty() {
      edit.push(Self::insert(offset, text));
    }
    edit
  }

  pub fn with_revision(mut self, revision: u64) -> Self {
    self.revision = revision;
    self
  }

  pub fn is_synthetic(&self) -> bool {
    self.synthetic
  }

  pub fn is_insert(&self) -> bool {
    self.kind == DeltaKind::Insert
  }

  /// Zero-length deltas dirty nothing.
  pub fn is_empty(&self) -> bool {
    self.length == 0
  }

  pub fn end(&self) -> usize {
    self.offset + self.length
  }

  /// Signed change in buffer length.
  pub fn len_change(&self) -> isize {
    match self.kind {
      DeltaKind::Insert => self.length as isize,
      DeltaKind::Remove => -(self.length as isize),
    }
  }
}
