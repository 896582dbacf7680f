//! One reconciliation pass.
//!
//! A pass folds a batch of deltas into a snapshot of the committed spans,
//! resolves the smallest span covering each edit and re-derives the model
//! from there:
//!
//! 1. Element re-parse of every coalesced dirty element.
//! 2. On failure, a re-parse of the whole buffer.
//! 3. If that fails as well, eviction of the offending element.
//!
//! All work happens on a private copy of the tree and spans. Nothing becomes
//! visible to readers before [`ModelState::commit`]; a cancelled or aborted
//! pass leaves the published state untouched.

use std::{
  collections::BTreeSet,
  fmt,
  ops::Range,
  sync::{
    Arc,
    atomic::{
      AtomicBool,
      Ordering,
    },
  },
};

use the_span::{
  Coverage,
  Delta,
  ElementId,
  SpanKey,
  SpanSet,
  SpanSnapshot,
  TagKind,
  TrackedSpan,
  coverage,
};
use tracing::{
  debug,
  error,
  trace,
  warn,
};

use crate::{
  buffer::TextSnapshot,
  diagnostics::{
    Diagnostics,
    Marker,
  },
  error::ReconcileError,
  factory::{
    ModelFactory,
    ParseError,
  },
  model::{
    ModelTree,
    ParsedElement,
  },
  state::ModelState,
};

/// Shared cancellation flag. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

/// Polled by a pass at each yield point.
pub trait PassControl {
  fn is_cancelled(&self) -> bool;

  /// Whether the buffer being reconciled is still open.
  fn is_available(&self) -> bool {
    true
  }
}

impl PassControl for CancelFlag {
  fn is_cancelled(&self) -> bool {
    CancelFlag::is_cancelled(self)
  }
}

/// Deltas reconciled together by one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
  pub deltas: Vec<Delta>,
  /// Take the whole-buffer path regardless of coverage.
  pub full:   bool,
}

impl Batch {
  pub fn new(deltas: Vec<Delta>) -> Self {
    Self {
      deltas,
      full: false,
    }
  }

  /// A synthetic insertion of the entire buffer content.
  pub fn full(text: &TextSnapshot) -> Self {
    Self {
      deltas: vec![Delta::reload(text.to_string())],
      full:   true,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.deltas.is_empty() && !self.full
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
  /// Re-parse of one element's source range.
  Element,
  /// Re-parse of the whole buffer.
  Buffer,
  /// Removal of one element without re-parse.
  Eviction,
}

impl Level {
  pub fn number(self) -> u8 {
    match self {
      Self::Element => 1,
      Self::Buffer => 2,
      Self::Eviction => 3,
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "level {}", self.number())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
  pub level:   Level,
  pub element: Option<ElementId>,
  pub ok:      bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
  /// Nothing to reconcile.
  Noop,
  Committed { seq: u64 },
  /// A whole-buffer pass failed. The previous model is kept.
  Failed(ReconcileError),
  Cancelled,
  Aborted(ReconcileError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
  pub outcome:      PassOutcome,
  pub attempts:     Vec<Attempt>,
  /// Dirty spans after coalescing, empty on the whole-buffer path.
  pub dirty:        Vec<TrackedSpan>,
  pub whole_buffer: bool,
}

impl Default for PassReport {
  fn default() -> Self {
    Self {
      outcome:      PassOutcome::Noop,
      attempts:     Vec::new(),
      dirty:        Vec::new(),
      whole_buffer: false,
    }
  }
}

impl PassReport {
  pub fn is_committed(&self) -> bool {
    matches!(self.outcome, PassOutcome::Committed { .. })
  }

  pub fn levels(&self) -> Vec<(Level, bool)> {
    self
      .attempts
      .iter()
      .map(|attempt| (attempt.level, attempt.ok))
      .collect()
  }

  fn attempt(&mut self, level: Level, element: Option<ElementId>, ok: bool) {
    self.attempts.push(Attempt { level, element, ok });
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
  Cancelled,
  Closed,
}

impl From<Interrupt> for PassOutcome {
  fn from(interrupt: Interrupt) -> Self {
    match interrupt {
      Interrupt::Cancelled => PassOutcome::Cancelled,
      Interrupt::Closed => PassOutcome::Aborted(ReconcileError::BufferUnavailable),
    }
  }
}

fn checkpoint(control: &dyn PassControl) -> Result<(), Interrupt> {
  if control.is_cancelled() {
    return Err(Interrupt::Cancelled);
  }
  if !control.is_available() {
    return Err(Interrupt::Closed);
  }
  Ok(())
}

pub struct Strategy {
  factory:     Arc<dyn ModelFactory>,
  state:       Arc<ModelState>,
  incremental: bool,
  /// Set after a failed whole-buffer pass: the committed spans no longer
  /// describe the buffer, so the next pass starts from scratch.
  stale:       bool,
}

impl Strategy {
  pub fn new(factory: Arc<dyn ModelFactory>, state: Arc<ModelState>, incremental: bool) -> Self {
    Self {
      factory,
      state,
      incremental,
      stale: false,
    }
  }

  pub fn state(&self) -> &Arc<ModelState> {
    &self.state
  }

  pub fn factory(&self) -> &Arc<dyn ModelFactory> {
    &self.factory
  }

  pub fn is_stale(&self) -> bool {
    self.stale
  }

  /// Reconcile `batch` against `text`, the buffer state that reflects every
  /// delta of the batch.
  pub fn run_pass(&mut self, batch: &Batch, text: &TextSnapshot, control: &dyn PassControl) -> PassReport {
    let mut report = PassReport::default();
    if batch.is_empty() {
      return report;
    }
    if let Err(interrupt) = checkpoint(control) {
      report.outcome = interrupt.into();
      return report;
    }

    let committed = self.state.spans().load();
    let mut snapshot = SpanSnapshot::new(&committed);
    let mut diagnostics = self.state.diagnostics().carried_over();
    let mut whole_buffer = batch.full || self.stale || !self.incremental;
    let mut dirty = BTreeSet::new();

    for delta in &batch.deltas {
      // positions already reflect the buffer a reload stands for
      if delta.is_synthetic() {
        whole_buffer = true;
        continue;
      }
      if whole_buffer || delta.is_empty() {
        snapshot.apply(delta);
        diagnostics.apply(delta);
        continue;
      }
      // insert coordinates are post-edit, remove coordinates pre-edit
      let covering = if delta.is_insert() {
        snapshot.apply(delta);
        coverage::resolve_delta(&snapshot, delta)
      } else {
        let covering = coverage::resolve_delta(&snapshot, delta);
        snapshot.apply(delta);
        covering
      };
      diagnostics.apply(delta);

      match covering {
        Coverage::Span(span) => {
          trace!(
            offset = delta.offset,
            length = delta.length,
            element = %span.element,
            tag = span.tag.as_str(),
            "delta covered"
          );
          dirty.insert(element_key(&snapshot, &span));
        },
        Coverage::WholeBuffer => {
          trace!(offset = delta.offset, length = delta.length, "delta not covered");
          whole_buffer = true;
        },
      }
    }

    if !whole_buffer {
      match widen_collapsed(&snapshot, &self.state.tree(), &dirty) {
        Some(widened) => dirty = widened,
        None => {
          trace!("removed element has no enclosing span");
          whole_buffer = true;
        },
      }
    }

    debug!(
      deltas = batch.deltas.len(),
      dirty = dirty.len(),
      whole_buffer,
      revision = text.revision(),
      "reconciliation pass"
    );

    if whole_buffer {
      report.whole_buffer = true;
      return self.whole_buffer_pass(text, diagnostics, control, report);
    }

    report.dirty = coverage::coalesce(&snapshot, &dirty);
    if report.dirty.is_empty() {
      return report;
    }

    let mut tree = ModelTree::clone(&self.state.tree());
    let mut spans = snapshot.into_set();
    let mut buffer_failed = false;

    for target in report.dirty.clone() {
      if let Err(interrupt) = checkpoint(control) {
        report.outcome = interrupt.into();
        return report;
      }
      let element = target.element;
      let err = match self.reparse_element(&mut tree, &mut spans, element, text) {
        Ok(range) => {
          report.attempt(Level::Element, Some(element), true);
          diagnostics.clear_evictions_within(range);
          continue;
        },
        Err(err) => err,
      };

      report.attempt(Level::Element, Some(element), false);
      warn!(
        element = %element,
        offset = target.offset,
        length = target.length,
        error = %err,
        "element re-parse failed, escalating"
      );
      if !err.is_recoverable() {
        report.outcome = PassOutcome::Aborted(err);
        return report;
      }

      if !buffer_failed {
        if let Err(interrupt) = checkpoint(control) {
          report.outcome = interrupt.into();
          return report;
        }
        let mut rebuilt = tree.clone();
        match self.rebuild(&mut rebuilt, text, control) {
          Err(interrupt) => {
            report.outcome = interrupt.into();
            return report;
          },
          Ok(Ok(spans)) => {
            report.attempt(Level::Buffer, None, true);
            let seq = self.commit(rebuilt, spans, Diagnostics::new(), text);
            report.outcome = PassOutcome::Committed { seq };
            return report;
          },
          Ok(Err(err)) => {
            report.attempt(Level::Buffer, None, false);
            warn!(
              element = %element,
              error = %err,
              "buffer re-parse failed, evicting"
            );
            diagnostics.push(Marker::parse_error(&err, text));
            buffer_failed = true;
          },
        }
      }

      self.evict(&mut tree, &mut spans, &target, text, &mut diagnostics);
      report.attempt(Level::Eviction, Some(element), true);
    }

    if let Err(interrupt) = checkpoint(control) {
      report.outcome = interrupt.into();
      return report;
    }
    let seq = self.commit(tree, spans, diagnostics, text);
    report.outcome = PassOutcome::Committed { seq };
    report
  }

  fn whole_buffer_pass(
    &mut self,
    text: &TextSnapshot,
    mut diagnostics: Diagnostics,
    control: &dyn PassControl,
    mut report: PassReport,
  ) -> PassReport {
    if let Err(interrupt) = checkpoint(control) {
      report.outcome = interrupt.into();
      return report;
    }
    let mut tree = ModelTree::clone(&self.state.tree());
    match self.rebuild(&mut tree, text, control) {
      Err(interrupt) => report.outcome = interrupt.into(),
      Ok(Ok(spans)) => {
        report.attempt(Level::Buffer, None, true);
        self.stale = false;
        let seq = self.commit(tree, spans, Diagnostics::new(), text);
        report.outcome = PassOutcome::Committed { seq };
      },
      Ok(Err(err)) => {
        report.attempt(Level::Buffer, None, false);
        error!(
          offset = ?err.offset,
          error = %err,
          revision = text.revision(),
          "buffer re-parse failed, keeping previous model"
        );
        self.stale = true;
        diagnostics.push(Marker::parse_error(&err, text));
        diagnostics.relocate(text);
        self.state.publish_diagnostics(diagnostics, text.revision());
        report.outcome = PassOutcome::Failed(err.into());
      },
    }
    report
  }

  /// Replace the compilation unit of `tree` with a parse of the whole buffer.
  fn rebuild(
    &self,
    tree: &mut ModelTree,
    text: &TextSnapshot,
    control: &dyn PassControl,
  ) -> Result<Result<SpanSet, ParseError>, Interrupt> {
    let parsed = self.factory.parse_full(&text.to_string());
    checkpoint(control)?;
    Ok(parsed.map(|unit| {
      let mut spans = SpanSet::positioned();
      tree.replace_unit(&unit, &mut spans);
      spans
    }))
  }

  /// Re-parse the source range of one element in place.
  ///
  /// Returns the re-parsed range. Leaves `tree` untouched on failure.
  fn reparse_element(
    &self,
    tree: &mut ModelTree,
    spans: &mut SpanSet,
    element: ElementId,
    text: &TextSnapshot,
  ) -> Result<Range<usize>, ReconcileError> {
    if !tree.is_reachable(element) {
      return Err(ReconcileError::inconsistent(
        element,
        "element is not reachable from the model root",
      ));
    }
    let Some(range) = spans
      .get(element, TagKind::All)
      .filter(|span| !span.is_degenerate())
      .map(TrackedSpan::range)
    else {
      return Err(ReconcileError::inconsistent(element, "element has no source range"));
    };
    let source = text
      .slice(range.clone())
      .map_err(|err| ReconcileError::inconsistent(element, err.to_string()))?;

    // resolve names globally while the element is re-parsed
    let parent = tree.parent(element);
    let root = tree.root();
    tree.set_parent(element, Some(root));
    let parsed = self.factory.reparse_element(tree, element, &source);
    tree.set_parent(element, parent);
    if !tree.is_linked(element) {
      return Err(ReconcileError::inconsistent(element, "parent linkage was not restored"));
    }

    let parsed = parsed.map_err(|err| err.shifted(range.start))?;
    let expected = tree.get(element).map(|element| element.kind().to_string());
    if expected.as_deref() != Some(parsed.kind.as_str()) {
      return Err(ReconcileError::inconsistent(
        element,
        format!("re-parse produced a `{}`", parsed.kind),
      ));
    }
    let len = source.chars().count();
    if let Some(tag) = first_tag_outside(&parsed, len) {
      return Err(ReconcileError::inconsistent(
        element,
        format!("re-parse tagged {tag:?} outside the element"),
      ));
    }

    for id in tree.subtree(element) {
      spans.remove_element(id);
    }
    let ancestors = tree.ancestors(element);
    spans.retain(|span| {
      let nested = span.offset >= range.start && span.end() <= range.end;
      !nested || ancestors.contains(&span.element)
    });
    tree.replace(element, &parsed, range.start, spans)?;
    Ok(range)
  }

  fn evict(
    &self,
    tree: &mut ModelTree,
    spans: &mut SpanSet,
    target: &TrackedSpan,
    text: &TextSnapshot,
    diagnostics: &mut Diagnostics,
  ) {
    let element = target.element;
    let region = spans
      .get(element, TagKind::All)
      .map_or(target.range(), TrackedSpan::range);
    let message = match tree.get(element).and_then(|element| element.name()) {
      Some(name) => format!("`{name}` could not be reconciled and is not modeled"),
      None => "region could not be reconciled and is not modeled".to_string(),
    };
    let removed = tree.disconnect(element);
    for id in &removed {
      spans.remove_element(*id);
    }
    warn!(
      element = %element,
      offset = region.start,
      length = region.len(),
      removed = removed.len(),
      "evicted element"
    );
    diagnostics.push(Marker::evicted(region.start, region.len(), message, text));
  }

  fn commit(&self, tree: ModelTree, mut spans: SpanSet, mut diagnostics: Diagnostics, text: &TextSnapshot) -> u64 {
    let len = text.len_chars();
    let before = spans.len();
    spans.retain(|span| tree.is_reachable(span.element) && span.end() <= len);
    if spans.len() != before {
      debug!(dropped = before - spans.len(), "purged orphaned spans");
    }
    diagnostics.relocate(text);
    self.state.commit(tree, spans, diagnostics, text.revision())
  }
}

/// Dirty regions are tracked per element: prefer the element's `All` span.
fn element_key(snapshot: &SpanSnapshot, span: &TrackedSpan) -> SpanKey {
  let all = SpanKey::new(span.element, TagKind::All);
  if snapshot.get(all).is_some() {
    all
  } else {
    span.key()
  }
}

/// Elements whose text was removed entirely are re-parsed through their
/// closest ancestor that still has text. `None` when no such ancestor is
/// tracked, which leaves the compilation unit itself dirty.
fn widen_collapsed(snapshot: &SpanSnapshot, tree: &ModelTree, dirty: &BTreeSet<SpanKey>) -> Option<BTreeSet<SpanKey>> {
  let live = |key: &SpanKey| snapshot.get(*key).is_some_and(|span| !span.is_degenerate());
  dirty
    .iter()
    .map(|key| {
      if live(key) {
        return Some(*key);
      }
      tree
        .ancestors(key.element)
        .into_iter()
        .map(|id| SpanKey::new(id, TagKind::All))
        .find(|key| live(key))
    })
    .collect()
}

fn first_tag_outside(parsed: &ParsedElement, len: usize) -> Option<TagKind> {
  parsed
    .tags
    .iter()
    .find_map(|(tag, range)| (range.start > range.end || range.end > len).then_some(*tag))
    .or_else(|| {
      parsed
        .children
        .iter()
        .find_map(|child| first_tag_outside(child, len))
    })
}
