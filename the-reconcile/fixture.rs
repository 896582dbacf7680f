//! A tiny brace language used to drive the reconciler in tests.
//!
//! ```text
//! unit   := class*
//! class  := "class" IDENT "{" member* "}"
//! member := class | IDENT IDENT ";"
//! ```

use std::{
  ops::Range,
  sync::Arc,
};

use the_span::{
  ElementId,
  TagKind,
};

use crate::{
  factory::{
    ModelFactory,
    ParseError,
  },
  model::{
    ModelTree,
    ParsedElement,
  },
  strategy::CancelFlag,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Ident(String),
  Open,
  Close,
  Semi,
}

fn lex(source: &str) -> Result<Vec<(Token, Range<usize>)>, ParseError> {
  let chars: Vec<char> = source.chars().collect();
  let mut tokens = Vec::new();
  let mut pos = 0;
  while pos < chars.len() {
    let c = chars[pos];
    let start = pos;
    match c {
      c if c.is_whitespace() => {
        pos += 1;
        continue;
      },
      '{' => tokens.push((Token::Open, start..start + 1)),
      '}' => tokens.push((Token::Close, start..start + 1)),
      ';' => tokens.push((Token::Semi, start..start + 1)),
      c if c.is_alphanumeric() || c == '_' => {
        while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
          pos += 1;
        }
        let ident: String = chars[start..pos].iter().collect();
        tokens.push((Token::Ident(ident), start..pos));
        continue;
      },
      other => return Err(ParseError::at(start, format!("unexpected character `{other}`"))),
    }
    pos += 1;
  }
  Ok(tokens)
}

struct Parser {
  tokens: Vec<(Token, Range<usize>)>,
  pos:    usize,
  end:    usize,
}

impl Parser {
  fn new(source: &str) -> Result<Self, ParseError> {
    Ok(Self {
      tokens: lex(source)?,
      pos:    0,
      end:    source.chars().count(),
    })
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos).map(|(token, _)| token)
  }

  fn here(&self) -> usize {
    self
      .tokens
      .get(self.pos)
      .map_or(self.end, |(_, range)| range.start)
  }

  fn ident(&mut self, what: &str) -> Result<(String, Range<usize>), ParseError> {
    match self.tokens.get(self.pos).cloned() {
      Some((Token::Ident(ident), range)) => {
        self.pos += 1;
        Ok((ident, range))
      },
      _ => Err(ParseError::at(self.here(), format!("expected {what}"))),
    }
  }

  fn expect(&mut self, token: Token, what: &str) -> Result<Range<usize>, ParseError> {
    match self.tokens.get(self.pos).cloned() {
      Some((found, range)) if found == token => {
        self.pos += 1;
        Ok(range)
      },
      _ => Err(ParseError::at(self.here(), format!("expected {what}"))),
    }
  }

  fn class(&mut self) -> Result<ParsedElement, ParseError> {
    let (keyword, keyword_range) = self.ident("`class`")?;
    if keyword != "class" {
      return Err(ParseError::at(keyword_range.start, "expected `class`"));
    }
    let (name, name_range) = self.ident("class name")?;
    if name == "class" {
      return Err(ParseError::at(name_range.start, "expected class name"));
    }
    self.expect(Token::Open, "`{`")?;

    let mut element = ParsedElement::new("class")
      .with_name(name)
      .with_tag(TagKind::Keyword, keyword_range.clone())
      .with_tag(TagKind::Name, name_range);
    loop {
      match self.peek().cloned() {
        Some(Token::Close) => break,
        Some(Token::Ident(ident)) if ident == "class" => element = element.with_child(self.class()?),
        Some(Token::Ident(_)) => element = element.with_child(self.field()?),
        _ => return Err(ParseError::at(self.here(), "expected member or `}`")),
      }
    }
    let close = self.expect(Token::Close, "`}`")?;
    Ok(element.with_tag(TagKind::All, keyword_range.start..close.end))
  }

  fn field(&mut self) -> Result<ParsedElement, ParseError> {
    let (_, ty_range) = self.ident("field type")?;
    let (name, name_range) = self.ident("field name")?;
    let semi = self.expect(Token::Semi, "`;`")?;
    Ok(
      ParsedElement::new("field")
        .with_name(name)
        .with_tag(TagKind::All, ty_range.start..semi.end)
        .with_tag(TagKind::CrossReference, ty_range)
        .with_tag(TagKind::Name, name_range),
    )
  }

  fn finish(&self) -> Result<(), ParseError> {
    match self.peek() {
      None => Ok(()),
      Some(_) => Err(ParseError::at(self.here(), "unexpected trailing input")),
    }
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BraceFactory;

impl ModelFactory for BraceFactory {
  fn parse_full(&self, source: &str) -> Result<ParsedElement, ParseError> {
    let mut parser = Parser::new(source)?;
    let mut unit = ParsedElement::new("unit");
    while parser.peek().is_some() {
      unit = unit.with_child(parser.class()?);
    }
    Ok(unit)
  }

  fn reparse_element(
    &self,
    tree: &ModelTree,
    element: ElementId,
    source: &str,
  ) -> Result<ParsedElement, ParseError> {
    let Some(kind) = tree.get(element).map(|element| element.kind().to_string()) else {
      return Err(ParseError::new("element is not in the model"));
    };
    let mut parser = Parser::new(source)?;
    let parsed = match kind.as_str() {
      "class" => parser.class()?,
      "field" => parser.field()?,
      other => return Err(ParseError::new(format!("cannot re-parse a `{other}`"))),
    };
    parser.finish()?;
    Ok(parsed)
  }
}

/// Fails every element re-parse, forcing escalation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingReparse;

impl ModelFactory for FailingReparse {
  fn parse_full(&self, source: &str) -> Result<ParsedElement, ParseError> {
    BraceFactory.parse_full(source)
  }

  fn reparse_element(
    &self,
    _tree: &ModelTree,
    _element: ElementId,
    _source: &str,
  ) -> Result<ParsedElement, ParseError> {
    Err(ParseError::new("element re-parse unsupported"))
  }
}

/// Answers every element re-parse with an element of the wrong kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct MismatchedReparse;

impl ModelFactory for MismatchedReparse {
  fn parse_full(&self, source: &str) -> Result<ParsedElement, ParseError> {
    BraceFactory.parse_full(source)
  }

  fn reparse_element(
    &self,
    _tree: &ModelTree,
    _element: ElementId,
    _source: &str,
  ) -> Result<ParsedElement, ParseError> {
    Ok(ParsedElement::new("mismatch"))
  }
}

/// Requests cancellation while a full parse is in flight.
pub struct CancelOnFullParse {
  pub inner: Arc<dyn ModelFactory>,
  pub flag:  CancelFlag,
}

impl ModelFactory for CancelOnFullParse {
  fn parse_full(&self, source: &str) -> Result<ParsedElement, ParseError> {
    self.flag.cancel();
    self.inner.parse_full(source)
  }

  fn reparse_element(
    &self,
    tree: &ModelTree,
    element: ElementId,
    source: &str,
  ) -> Result<ParsedElement, ParseError> {
    self.inner.reparse_element(tree, element, source)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_nested_classes_and_fields() {
    let unit = BraceFactory
      .parse_full("class A { int x; class B { } }")
      .unwrap();
    assert_eq!(unit.children.len(), 1);
    let a = &unit.children[0];
    assert_eq!(a.name.as_deref(), Some("A"));
    assert_eq!(a.tag(TagKind::All), Some(&(0..30)));
    assert_eq!(a.tag(TagKind::Keyword), Some(&(0..5)));
    assert_eq!(a.children.len(), 2);
    let x = &a.children[0];
    assert_eq!(x.tag(TagKind::All), Some(&(10..16)));
    assert_eq!(x.tag(TagKind::CrossReference), Some(&(10..13)));
    assert_eq!(x.tag(TagKind::Name), Some(&(14..15)));
  }

  #[test]
  fn reports_error_offsets() {
    let err = BraceFactory.parse_full("class A { int ; }").unwrap_err();
    assert_eq!(err.offset, Some(14));
    let err = BraceFactory.parse_full("class A {").unwrap_err();
    assert_eq!(err.offset, Some(9));
  }
}
