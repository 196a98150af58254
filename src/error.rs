//! Shared error type for every stage of the pipeline.
//!
//! Front-end failures carry a location and render chibicc-style, quoting the
//! offending source line with a caret under the bad byte. Code generation
//! failures have no location (the AST does not carry spans) and name the form
//! that was rejected instead. Every variant is fatal for the compilation.

use std::path::PathBuf;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{line}:{column}: {message}\n{excerpt}\n{marker}"))]
  Parse {
    line: usize,
    column: usize,
    excerpt: String,
    marker: String,
    message: String,
  },

  #[snafu(display("malformed declaration: {message}"))]
  MalformedDeclaration { message: String },

  #[snafu(display("malformed let bindings: {message}"))]
  MalformedBinding { message: String },

  #[snafu(display("{form} expects {expected} argument(s), got {got}"))]
  Arity {
    form: String,
    expected: String,
    got: usize,
  },

  #[snafu(display("undefined symbol: {name}"))]
  UndefinedSymbol { name: String },

  #[snafu(display("undefined function: {name}"))]
  UndefinedFunction { name: String },

  #[snafu(display("unknown operator: {op}"))]
  UnknownOperator { op: String },

  #[snafu(display("empty list where a call form was expected"))]
  EmptyForm,

  #[snafu(display("cannot call {callee}: the head of a call form must be a symbol"))]
  InvalidCallee { callee: String },

  #[snafu(display("{kind} `{name}` is defined more than once"))]
  DuplicateDefinition { kind: &'static str, name: String },

  #[snafu(display("{kind} `{name}` and `{other}` would both be labelled `{label}`"))]
  LabelCollision {
    kind: &'static str,
    name: String,
    other: String,
    label: String,
  },

  #[snafu(display("cannot read source {}: {source}", path.display()))]
  InputSource {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(display("cannot write assembly to {}: {source}", path.display()))]
  OutputTarget {
    path: PathBuf,
    source: std::io::Error,
  },
}

impl CompileError {
  /// Construct an error anchored at a specific byte offset in the source.
  pub fn at(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let safe_loc = floor_char_boundary(source, loc.min(source.len()));
    let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[safe_loc..]
      .find('\n')
      .map_or(source.len(), |i| safe_loc + i);
    let line = source[..line_start].matches('\n').count() + 1;
    let column = source[line_start..safe_loc].chars().count() + 1;
    let excerpt = source[line_start..line_end].trim_end_matches('\r');
    let marker = format!("{}^", " ".repeat(column - 1));
    Self::Parse {
      line,
      column,
      excerpt: excerpt.to_string(),
      marker,
      message: message.into(),
    }
  }

  /// Shorthand for the arity failures raised throughout code generation.
  pub(crate) fn arity(form: &str, expected: impl ToString, got: usize) -> Self {
    Self::Arity {
      form: form.to_string(),
      expected: expected.to_string(),
      got,
    }
  }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
  while idx > 0 && !s.is_char_boundary(idx) {
    idx -= 1;
  }
  idx
}
