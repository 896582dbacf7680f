//! The parser contract the reconciler drives.
//!
//! A factory turns source text into [`ParsedElement`] trees. It never touches
//! the live model: the reconciler decides whether and where a parse result is
//! applied.

use the_span::ElementId;
use thiserror::Error;

use crate::model::{
  ModelTree,
  ParsedElement,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
  pub message: String,
  /// Char offset of the failure, relative to the parsed source.
  pub offset:  Option<usize>,
}

impl ParseError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      offset:  None,
    }
  }

  pub fn at(offset: usize, message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      offset:  Some(offset),
    }
  }

  /// Rebase the offset from slice coordinates onto buffer coordinates.
  pub fn shifted(mut self, base: usize) -> Self {
    self.offset = self.offset.map(|offset| offset + base);
    self
  }
}

pub trait ModelFactory: Send + Sync {
  /// Parse a whole buffer into its compilation unit.
  fn parse_full(&self, source: &str) -> Result<ParsedElement, ParseError>;

  /// Re-parse the source of one element.
  ///
  /// The element is temporarily parented to the model root while this runs,
  /// so lookups through `tree` resolve globally. Tag ranges of the result are
  /// relative to `source`.
  fn reparse_element(
    &self,
    tree: &ModelTree,
    element: ElementId,
    source: &str,
  ) -> Result<ParsedElement, ParseError>;

  fn is_identifier_char(&self, c: char) -> bool {
    c.is_alphanumeric() || c == '_'
  }
}
