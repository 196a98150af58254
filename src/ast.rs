//! Syntax tree shared by the parser and the code generator.
//!
//! Vectors written with `[...]` and lists written with `(...)` both become
//! `Node::List`; the difference is purely syntactic.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
  Number(f64),
  Symbol(String),
  Str(String),
  List(Vec<Node>),
}

impl Node {
  pub fn symbol(name: impl Into<String>) -> Self {
    Self::Symbol(name.into())
  }

  pub fn as_symbol(&self) -> Option<&str> {
    match self {
      Self::Symbol(name) => Some(name),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Node]> {
    match self {
      Self::List(items) => Some(items),
      _ => None,
    }
  }

  /// Name in call position, if this is a non-empty list headed by a symbol.
  pub fn head_symbol(&self) -> Option<&str> {
    self.as_list()?.first()?.as_symbol()
  }

  /// True for a list whose head is the symbol `name`.
  pub fn is_form(&self, name: &str) -> bool {
    self.head_symbol() == Some(name)
  }

  /// `defn` or `def` form.
  pub fn is_declaration(&self) -> bool {
    self.is_form("defn") || self.is_form("def")
  }

  /// Short rendering for diagnostics; long lists are elided.
  pub fn summary(&self) -> String {
    let full = self.to_string();
    match full.char_indices().nth(40) {
      Some((cut, _)) => format!("{}...", &full[..cut]),
      None => full,
    }
  }

  /// Multi-line indented dump, one node per line.
  pub fn pretty(&self) -> String {
    let mut out = String::new();
    self.pretty_into(&mut out, 0);
    out
  }

  fn pretty_into(&self, out: &mut String, indent: usize) {
    let pad = "  ".repeat(indent);
    match self {
      Self::List(items) => {
        out.push_str(&format!("{pad}List ({} elements)\n", items.len()));
        for item in items {
          item.pretty_into(out, indent + 1);
        }
      }
      Self::Number(value) => out.push_str(&format!("{pad}Number: {value}\n")),
      Self::Symbol(name) => out.push_str(&format!("{pad}Symbol: {name}\n")),
      Self::Str(value) => out.push_str(&format!("{pad}String: {value:?}\n")),
    }
  }
}

impl fmt::Display for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Number(value) => write!(f, "{value}"),
      Self::Symbol(name) => f.write_str(name),
      Self::Str(value) => write!(f, "{value:?}"),
      Self::List(items) => {
        f.write_str("(")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            f.write_str(" ")?;
          }
          write!(f, "{item}")?;
        }
        f.write_str(")")
      }
    }
  }
}
