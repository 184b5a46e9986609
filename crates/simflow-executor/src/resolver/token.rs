//! Tokenizer for parameter strings.
//!
//! A parameter string is split into literal text and reference nodes before
//! anything is substituted:
//!
//! - `<scope.path>`: block output, `start`, `variable`, `loop` or `parallel`
//! - `{{NAME}}`: environment variable
//!
//! A `<` that does not open a well-formed reference stays literal text, so
//! comparisons like `a < b && c > d` survive untouched.

use std::fmt;

/// One piece of a tokenized parameter string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
  Text(String),
  Reference { raw: String, reference: Reference },
}

/// A parsed reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
  /// `<blockIdOrName.path>`
  Block { target: String, path: Vec<PathSegment> },
  /// `<start.path>`: alias for the starter block.
  Start { path: Vec<PathSegment> },
  /// `<variable.name.path>`
  Variable { name: String, path: Vec<PathSegment> },
  /// `<loop.field.path>`
  Loop { field: GroupField, path: Vec<PathSegment> },
  /// `<parallel.field.path>`
  Parallel { field: GroupField, path: Vec<PathSegment> },
  /// `{{NAME}}`
  Env { name: String },
}

/// Field of the loop or parallel pseudo-scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupField {
  CurrentItem,
  Index,
  Items,
  Results,
  Unknown(String),
}

impl GroupField {
  fn parse(name: &str) -> Self {
    match name {
      "currentItem" => GroupField::CurrentItem,
      "index" => GroupField::Index,
      "items" => GroupField::Items,
      "results" => GroupField::Results,
      other => GroupField::Unknown(other.to_string()),
    }
  }
}

impl fmt::Display for GroupField {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GroupField::CurrentItem => f.write_str("currentItem"),
      GroupField::Index => f.write_str("index"),
      GroupField::Items => f.write_str("items"),
      GroupField::Results => f.write_str("results"),
      GroupField::Unknown(name) => f.write_str(name),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
  Key(String),
  Index(usize),
}

impl fmt::Display for PathSegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PathSegment::Key(key) => f.write_str(key),
      PathSegment::Index(index) => write!(f, "[{}]", index),
    }
  }
}

/// Render a path back to its dotted form, for error messages.
pub fn display_path(path: &[PathSegment]) -> String {
  let mut out = String::new();
  for segment in path {
    match segment {
      PathSegment::Key(key) => {
        if !out.is_empty() {
          out.push('.');
        }
        out.push_str(key);
      }
      PathSegment::Index(index) => out.push_str(&format!("[{}]", index)),
    }
  }
  out
}

/// Split `input` into text and reference segments.
pub fn tokenize(input: &str) -> Vec<Segment> {
  let mut segments = Vec::new();
  let mut text = String::new();
  let mut rest = input;

  while let Some(ch) = rest.chars().next() {
    let parsed = match ch {
      '<' => parse_angle(rest),
      '{' if rest.starts_with("{{") => parse_env(rest),
      _ => None,
    };

    match parsed {
      Some((raw_len, reference)) => {
        if !text.is_empty() {
          segments.push(Segment::Text(std::mem::take(&mut text)));
        }
        segments.push(Segment::Reference {
          raw: rest[..raw_len].to_string(),
          reference,
        });
        rest = &rest[raw_len..];
      }
      None => {
        text.push(ch);
        rest = &rest[ch.len_utf8()..];
      }
    }
  }

  if !text.is_empty() {
    segments.push(Segment::Text(text));
  }
  segments
}

/// The single reference a whole field consists of, if it is exactly one.
pub fn as_direct_reference(segments: &[Segment]) -> Option<(&str, &Reference)> {
  match segments {
    [Segment::Reference { raw, reference }] => Some((raw.as_str(), reference)),
    _ => None,
  }
}

fn parse_angle(input: &str) -> Option<(usize, Reference)> {
  let close = input[1..].find('>')? + 1;
  let inner = &input[1..close];

  let first = inner.chars().next()?;
  if !(first.is_alphanumeric() || first == '_') || inner.ends_with(' ') {
    return None;
  }
  if !inner
    .chars()
    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ' | '[' | ']'))
  {
    return None;
  }

  let mut parts = inner.split('.');
  let scope = parts.next()?;
  if scope.contains(|c: char| c == '[' || c == ']') || scope.ends_with(' ') {
    return None;
  }

  let mut path = Vec::new();
  for part in parts {
    parse_path_part(part, &mut path)?;
  }

  let reference = match scope {
    "start" => Reference::Start { path },
    "variable" if !path.is_empty() => {
      let PathSegment::Key(name) = path.remove(0) else {
        return None;
      };
      Reference::Variable { name, path }
    }
    "loop" | "parallel" if !path.is_empty() => {
      let PathSegment::Key(field) = path.remove(0) else {
        return None;
      };
      let field = GroupField::parse(&field);
      if scope == "loop" {
        Reference::Loop { field, path }
      } else {
        Reference::Parallel { field, path }
      }
    }
    _ => Reference::Block {
      target: scope.to_string(),
      path,
    },
  };

  Some((close + 1, reference))
}

/// Parse `key`, `key[0]` or `key[0][1]` into path segments.
fn parse_path_part(part: &str, path: &mut Vec<PathSegment>) -> Option<()> {
  let (key, mut indexes) = match part.find('[') {
    Some(pos) => (&part[..pos], &part[pos..]),
    None => (part, ""),
  };
  if key.is_empty() && indexes.is_empty() {
    return None;
  }
  if key.contains(']') || key.starts_with(' ') || key.ends_with(' ') {
    return None;
  }
  if !key.is_empty() {
    path.push(PathSegment::Key(key.to_string()));
  }

  while !indexes.is_empty() {
    let body = indexes.strip_prefix('[')?;
    let end = body.find(']')?;
    let index = body[..end].parse::<usize>().ok()?;
    path.push(PathSegment::Index(index));
    indexes = &body[end + 1..];
  }
  Some(())
}

fn parse_env(input: &str) -> Option<(usize, Reference)> {
  let close = input[2..].find("}}")? + 2;
  let name = input[2..close].trim();

  let first = name.chars().next()?;
  if !(first.is_ascii_alphabetic() || first == '_') {
    return None;
  }
  if !name
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
  {
    return None;
  }

  Some((
    close + 2,
    Reference::Env {
      name: name.to_string(),
    },
  ))
}
