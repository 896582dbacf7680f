//! Arena-backed model tree.
//!
//! Elements are addressed by [`ElementId`]. Positions are not stored on
//! elements; applying a [`ParsedElement`] hands the spans it carries to a
//! [`SpanSet`] instead.
//!
//! The tree has a permanent root used for global lookups. The compilation
//! unit of the buffer hangs off the root and owns no span of its own.

use std::ops::Range;

use slotmap::SlotMap;
use smallvec::SmallVec;
use the_span::{
  ElementId,
  SpanSet,
  TagKind,
  TrackedSpan,
};

use crate::error::{
  ReconcileError,
  Result,
};

pub const ROOT_KIND: &str = "root";

/// Parser output: one element with tag ranges relative to the parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedElement {
  pub kind:     String,
  pub name:     Option<String>,
  pub tags:     SmallVec<[(TagKind, Range<usize>); 4]>,
  pub children: Vec<ParsedElement>,
}

impl ParsedElement {
  pub fn new(kind: impl Into<String>) -> Self {
    Self {
      kind:     kind.into(),
      name:     None,
      tags:     SmallVec::new(),
      children: Vec::new(),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_tag(mut self, tag: TagKind, range: Range<usize>) -> Self {
    self.tags.retain(|(existing, _)| *existing != tag);
    self.tags.push((tag, range));
    self
  }

  pub fn with_child(mut self, child: ParsedElement) -> Self {
    self.children.push(child);
    self
  }

  pub fn tag(&self, tag: TagKind) -> Option<&Range<usize>> {
    self
      .tags
      .iter()
      .find_map(|(kind, range)| (*kind == tag).then_some(range))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
  kind:     String,
  name:     Option<String>,
  parent:   Option<ElementId>,
  children: Vec<ElementId>,
}

impl Element {
  fn new(kind: impl Into<String>, name: Option<String>, parent: Option<ElementId>) -> Self {
    Self {
      kind: kind.into(),
      name,
      parent,
      children: Vec::new(),
    }
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn parent(&self) -> Option<ElementId> {
    self.parent
  }

  pub fn children(&self) -> &[ElementId] {
    &self.children
  }
}

#[derive(Debug, Clone)]
pub struct ModelTree {
  elements: SlotMap<ElementId, Element>,
  root:     ElementId,
  unit:     Option<ElementId>,
}

impl Default for ModelTree {
  fn default() -> Self {
    Self::new()
  }
}

impl ModelTree {
  pub fn new() -> Self {
    let mut elements = SlotMap::with_key();
    let root = elements.insert(Element::new(ROOT_KIND, None, None));
    Self {
      elements,
      root,
      unit: None,
    }
  }

  pub fn root(&self) -> ElementId {
    self.root
  }

  /// The buffer's compilation unit, once a full parse has succeeded.
  pub fn unit(&self) -> Option<ElementId> {
    self.unit
  }

  pub fn len(&self) -> usize {
    self.elements.len()
  }

  pub fn is_empty(&self) -> bool {
    self.elements.len() <= 1
  }

  pub fn contains(&self, id: ElementId) -> bool {
    self.elements.contains_key(id)
  }

  pub fn get(&self, id: ElementId) -> Option<&Element> {
    self.elements.get(id)
  }

  pub fn iter(&self) -> impl Iterator<Item = (ElementId, &Element)> {
    self.elements.iter()
  }

  pub fn parent(&self, id: ElementId) -> Option<ElementId> {
    self.elements.get(id).and_then(Element::parent)
  }

  pub fn children(&self, id: ElementId) -> &[ElementId] {
    self.elements.get(id).map_or(&[], Element::children)
  }

  /// Rewire the parent link of `id` without touching any child list.
  pub fn set_parent(&mut self, id: ElementId, parent: Option<ElementId>) -> bool {
    match self.elements.get_mut(id) {
      Some(element) => {
        element.parent = parent;
        true
      },
      None => false,
    }
  }

  /// Whether `id` is linked to its parent from both sides.
  pub fn is_linked(&self, id: ElementId) -> bool {
    if id == self.root {
      return true;
    }
    self
      .parent(id)
      .is_some_and(|parent| self.children(parent).contains(&id))
  }

  /// Whether walking parent links from `id` reaches the root.
  pub fn is_reachable(&self, id: ElementId) -> bool {
    let mut current = id;
    // a well-formed chain is never longer than the arena
    for _ in 0..=self.elements.len() {
      if current == self.root {
        return true;
      }
      if !self.is_linked(current) {
        return false;
      }
      match self.parent(current) {
        Some(parent) => current = parent,
        None => return false,
      }
    }
    false
  }

  /// Parent chain of `id`, nearest first. Stops at the root or a broken link.
  pub fn ancestors(&self, id: ElementId) -> Vec<ElementId> {
    let mut out = Vec::new();
    let mut current = id;
    while let Some(parent) = self.parent(current) {
      if out.contains(&parent) {
        break;
      }
      out.push(parent);
      current = parent;
    }
    out
  }

  /// `id` and every element below it, parents before children.
  pub fn subtree(&self, id: ElementId) -> Vec<ElementId> {
    let mut out = Vec::new();
    if !self.contains(id) {
      return out;
    }
    let mut stack = vec![id];
    while let Some(next) = stack.pop() {
      out.push(next);
      stack.extend(self.children(next).iter().rev().copied());
    }
    out
  }

  pub fn find(&self, mut predicate: impl FnMut(&Element) -> bool) -> Option<ElementId> {
    let root = self.root;
    self
      .subtree(root)
      .into_iter()
      .find(|id| self.elements.get(*id).is_some_and(&mut predicate))
  }

  pub fn find_named(&self, kind: &str, name: &str) -> Option<ElementId> {
    self.find(|element| element.kind == kind && element.name() == Some(name))
  }

  /// Remove `id` and its descendants from the model.
  ///
  /// Returns the removed ids. The root cannot be disconnected.
  pub fn disconnect(&mut self, id: ElementId) -> Vec<ElementId> {
    if id == self.root || !self.contains(id) {
      return Vec::new();
    }
    if let Some(parent) = self.parent(id)
      && let Some(element) = self.elements.get_mut(parent)
    {
      element.children.retain(|child| *child != id);
    }
    let removed = self.subtree(id);
    for element in &removed {
      self.elements.remove(*element);
    }
    if self.unit.is_some_and(|unit| !self.contains(unit)) {
      self.unit = None;
    }
    removed
  }

  /// Replace the compilation unit with a freshly parsed one.
  ///
  /// Spans of the new unit's descendants are installed into `spans`.
  pub fn replace_unit(&mut self, parsed: &ParsedElement, spans: &mut SpanSet) -> ElementId {
    if let Some(unit) = self.unit {
      self.disconnect(unit);
    }
    let root = self.root;
    let unit = self.insert_element(root, parsed);
    for child in &parsed.children {
      self.attach(unit, child, 0, spans);
    }
    self.unit = Some(unit);
    unit
  }

  /// Attach a parsed subtree under `parent`, shifting its tags by `base`.
  pub fn attach(
    &mut self,
    parent: ElementId,
    parsed: &ParsedElement,
    base: usize,
    spans: &mut SpanSet,
  ) -> ElementId {
    let id = self.insert_element(parent, parsed);
    install_tags(id, parsed, base, spans);
    for child in &parsed.children {
      self.attach(id, child, base, spans);
    }
    id
  }

  /// Rebuild the content of `id` from a re-parse of its source, keeping the
  /// element's identity. Old descendants are disconnected.
  pub fn replace(
    &mut self,
    id: ElementId,
    parsed: &ParsedElement,
    base: usize,
    spans: &mut SpanSet,
  ) -> Result<()> {
    let Some(element) = self.elements.get(id) else {
      return Err(ReconcileError::inconsistent(id, "element is no longer in the model"));
    };
    if element.kind != parsed.kind {
      return Err(ReconcileError::inconsistent(
        id,
        format!("re-parse produced `{}` for a `{}`", parsed.kind, element.kind),
      ));
    }

    for child in element.children.clone() {
      self.disconnect(child);
    }
    if let Some(element) = self.elements.get_mut(id) {
      element.name = parsed.name.clone();
    }
    install_tags(id, parsed, base, spans);
    for child in &parsed.children {
      self.attach(id, child, base, spans);
    }
    Ok(())
  }

  fn insert_element(&mut self, parent: ElementId, parsed: &ParsedElement) -> ElementId {
    let id = self.elements.insert(Element::new(
      parsed.kind.clone(),
      parsed.name.clone(),
      Some(parent),
    ));
    if let Some(parent) = self.elements.get_mut(parent) {
      parent.children.push(id);
    }
    id
  }
}

fn install_tags(id: ElementId, parsed: &ParsedElement, base: usize, spans: &mut SpanSet) {
  for (tag, range) in &parsed.tags {
    spans.install(TrackedSpan::from_range(
      range.start + base..range.end + base,
      id,
      *tag,
    ));
  }
}
