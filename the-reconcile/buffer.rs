//! Text buffers the reconciler reads from.
//!
//! [`Buffer`] is a rope-backed buffer that reports every logical edit to its
//! subscribers as a batch of [`Delta`]s. Listeners run while the buffer's
//! write lock is held, so a delta is always queued before any reader can
//! observe the revision it produced.

use std::{
  ops::Range,
  sync::atomic::{
    AtomicU64,
    Ordering,
  },
};

use parking_lot::{
  Mutex,
  RwLock,
};
use ropey::Rope;
use the_span::{
  Delta,
  DeltaKind,
  Edit,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BufferError>;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum BufferError {
  #[error("buffer is closed")]
  Closed,
  #[error("range {offset}..{end} is out of bounds for buffer of length {len}")]
  OutOfBounds {
    offset: usize,
    end:    usize,
    len:    usize,
  },
}

/// Immutable view of a buffer at one revision.
#[derive(Debug, Clone)]
pub struct TextSnapshot {
  text:     Rope,
  revision: u64,
}

impl TextSnapshot {
  pub fn new(text: Rope, revision: u64) -> Self {
    Self { text, revision }
  }

  pub fn revision(&self) -> u64 {
    self.revision
  }

  pub fn len_chars(&self) -> usize {
    self.text.len_chars()
  }

  pub fn rope(&self) -> &Rope {
    &self.text
  }

  pub fn read(&self, offset: usize, length: usize) -> Result<String> {
    let len = self.text.len_chars();
    let end = offset.saturating_add(length);
    if end > len {
      return Err(BufferError::OutOfBounds { offset, end, len });
    }
    Ok(self.text.slice(offset..end).to_string())
  }

  pub fn slice(&self, range: Range<usize>) -> Result<String> {
    self.read(range.start, range.end.saturating_sub(range.start))
  }

  /// Zero-based line containing `offset`, clamped to the last line.
  pub fn line_of(&self, offset: usize) -> usize {
    self.text.char_to_line(offset.min(self.text.len_chars()))
  }

  pub fn char_at(&self, offset: usize) -> Option<char> {
    (offset < self.text.len_chars()).then(|| self.text.char(offset))
  }
}

impl std::fmt::Display for TextSnapshot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    for chunk in self.text.chunks() {
      f.write_str(chunk)?;
    }
    Ok(())
  }
}

/// Read side of a buffer as seen by the reconciliation worker.
pub trait TextSource: Send + Sync {
  fn snapshot(&self) -> Result<TextSnapshot>;

  fn is_available(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&[Delta]) + Send + Sync>;

struct BufferState {
  text:     Rope,
  revision: u64,
  closed:   bool,
}

pub struct Buffer {
  state:     RwLock<BufferState>,
  listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
  next_id:   AtomicU64,
}

impl std::fmt::Debug for Buffer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.state.read();
    f.debug_struct("Buffer")
      .field("len", &state.text.len_chars())
      .field("revision", &state.revision)
      .field("closed", &state.closed)
      .finish_non_exhaustive()
  }
}

impl Default for Buffer {
  fn default() -> Self {
    Self::new("")
  }
}

impl Buffer {
  pub fn new(text: &str) -> Self {
    Self {
      state:     RwLock::new(BufferState {
        text:     Rope::from_str(text),
        revision: 0,
        closed:   false,
      }),
      listeners: Mutex::new(Vec::new()),
      next_id:   AtomicU64::new(0),
    }
  }

  pub fn len(&self) -> usize {
    self.state.read().text.len_chars()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn revision(&self) -> u64 {
    self.state.read().revision
  }

  pub fn text(&self) -> String {
    self.state.read().text.to_string()
  }

  pub fn read(&self, offset: usize, length: usize) -> Result<String> {
    self.snapshot()?.read(offset, length)
  }

  pub fn subscribe(&self, listener: impl Fn(&[Delta]) + Send + Sync + 'static) -> SubscriptionId {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.listeners.lock().push((id, Box::new(listener)));
    id
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut listeners = self.listeners.lock();
    let before = listeners.len();
    listeners.retain(|(existing, _)| *existing != id);
    listeners.len() != before
  }

  pub fn insert(&self, offset: usize, text: &str) -> Result<()> {
    self.replace(offset, 0, text)
  }

  pub fn remove(&self, offset: usize, length: usize) -> Result<()> {
    self.replace(offset, length, "")
  }

  /// Apply one logical edit. A replacement is reported as a removal followed
  /// by an insertion, each carrying the revision it produced.
  pub fn replace(&self, offset: usize, length: usize, text: &str) -> Result<()> {
    let mut state = self.state.write();
    if state.closed {
      return Err(BufferError::Closed);
    }
    let len = state.text.len_chars();
    let end = offset.saturating_add(length);
    if end > len {
      return Err(BufferError::OutOfBounds { offset, end, len });
    }

    let mut edit = Edit::new();
    for delta in Delta::replace(offset, length, text) {
      match delta.kind {
        DeltaKind::Remove => state.text.remove(delta.offset..delta.end()),
        DeltaKind::Insert => state.text.insert(delta.offset, text),
      }
      state.revision += 1;
      edit.push(delta.with_revision(state.revision));
    }
    if edit.is_empty() {
      return Ok(());
    }

    for (_, listener) in self.listeners.lock().iter() {
      listener(&edit);
    }
    Ok(())
  }

  /// Replace the whole content.
  pub fn set_text(&self, text: &str) -> Result<()> {
    let len = self.len();
    self.replace(0, len, text)
  }

  /// Close the buffer. Later edits and snapshots fail with
  /// [`BufferError::Closed`].
  pub fn close(&self) {
    self.state.write().closed = true;
  }
}

impl TextSource for Buffer {
  fn snapshot(&self) -> Result<TextSnapshot> {
    let state = self.state.read();
    if state.closed {
      return Err(BufferError::Closed);
    }
    Ok(TextSnapshot::new(state.text.clone(), state.revision))
  }

  fn is_available(&self) -> bool {
    !self.state.read().closed
  }
}
