//! Lexical scope chain for parameters and `let` bindings.
//!
//! Frames live on the Rust stack of the lowering call that opened them and
//! link to their parent by shared reference, so a frame can never outlive the
//! subtree it belongs to. Every name maps to an evaluation-stack slot counted
//! from the frame pointer: slot `k` is stored at `[x29, #-(k + 1) * 16]`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
  Params,
  Let,
}

#[derive(Debug)]
pub struct Scope<'a> {
  kind: FrameKind,
  names: Vec<&'a str>,
  /// Slot of the first name in this frame.
  base: usize,
  parent: Option<&'a Scope<'a>>,
}

/// Where a resolved name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
  pub kind: FrameKind,
  pub slot: usize,
}

impl Binding {
  /// Offset from the frame pointer (`x29`).
  pub fn frame_offset(&self) -> i64 {
    -((self.slot as i64 + 1) * 16)
  }
}

impl<'a> Scope<'a> {
  /// Top-level frame of a function body: parameter `i` is slot `i`.
  pub fn params(names: Vec<&'a str>) -> Self {
    Self {
      kind: FrameKind::Params,
      names,
      base: 0,
      parent: None,
    }
  }

  /// Frame for a `let` whose first binding was pushed at slot `base`.
  pub fn let_frame(names: Vec<&'a str>, base: usize, parent: Option<&'a Scope<'a>>) -> Self {
    Self {
      kind: FrameKind::Let,
      names,
      base,
      parent,
    }
  }

  /// Total slots held by this frame and everything enclosing it.
  pub fn depth(&self) -> usize {
    self.base + self.names.len()
  }

  /// Innermost-wins lookup; inside one frame the later name shadows.
  pub fn resolve(&self, name: &str) -> Option<Binding> {
    let mut frame = Some(self);
    while let Some(scope) = frame {
      if let Some(i) = scope.names.iter().rposition(|n| *n == name) {
        return Some(Binding {
          kind: scope.kind,
          slot: scope.base + i,
        });
      }
      frame = scope.parent;
    }
    None
  }
}
