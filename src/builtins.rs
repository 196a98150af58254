//! Names the compiler treats specially: special forms, operators, and the
//! runtime library calls.
//!
//! Runtime calls follow AAPCS64: pointer arguments take `x0, x1, ...` in order
//! and numeric arguments take `d0, d1, ...` in order, each class counted on
//! its own. The result comes back in `x0` (pointer) or `d0` (number).

use crate::error::{CompileResult, UnknownOperatorSnafu};

pub const SPECIAL_FORMS: [&str; 4] = ["def", "defn", "if", "let"];

/// Routine every top-level value is printed with.
pub const PRINT_ROUTINE: &str = "print_double";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
  Add,
  Sub,
  Mul,
  Div,
}

impl ArithOp {
  pub fn from_symbol(symbol: &str) -> Option<Self> {
    match symbol {
      "+" => Some(Self::Add),
      "-" => Some(Self::Sub),
      "*" => Some(Self::Mul),
      "/" => Some(Self::Div),
      _ => None,
    }
  }
}

const COMPARISONS: [&str; 5] = ["<", ">", "=", "<=", ">="];

pub fn is_comparison(symbol: &str) -> bool {
  COMPARISONS.contains(&symbol)
}

/// AArch64 condition code that holds after `fcmp lhs, rhs` when `lhs <op> rhs`.
/// Every comparison involving NaN is false, so `<` and `<=` use the ordered
/// `mi`/`ls` rather than `lt`/`le`.
pub fn condition_code(op: &str) -> CompileResult<&'static str> {
  match op {
    "<" => Ok("mi"),
    ">" => Ok("gt"),
    "=" => Ok("eq"),
    "<=" => Ok("ls"),
    ">=" => Ok("ge"),
    _ => UnknownOperatorSnafu { op }.fail(),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
  Pointer,
  Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
  Pointer,
  Number,
  /// Routine returns nothing; the form evaluates to `0.0`.
  Nothing,
}

#[derive(Debug)]
pub struct Builtin {
  pub name: &'static str,
  pub routine: &'static str,
  pub args: &'static [ArgKind],
  pub returns: Returns,
}

impl Builtin {
  pub fn arity(&self) -> usize {
    self.args.len()
  }

  /// Register number for each argument, in argument order.
  pub fn registers(&self) -> Vec<usize> {
    let (mut next_x, mut next_d) = (0, 0);
    self
      .args
      .iter()
      .map(|kind| {
        let counter = match kind {
          ArgKind::Pointer => &mut next_x,
          ArgKind::Number => &mut next_d,
        };
        let reg = *counter;
        *counter += 1;
        reg
      })
      .collect()
  }
}

use ArgKind::{Number as N, Pointer as P};

pub const BUILTINS: &[Builtin] = &[
  Builtin {
    name: "str-length",
    routine: "str_length",
    args: &[P],
    returns: Returns::Number,
  },
  Builtin {
    name: "str-char-at",
    routine: "str_char_at",
    args: &[P, N],
    returns: Returns::Number,
  },
  Builtin {
    name: "str-concat",
    routine: "str_concat",
    args: &[P, P],
    returns: Returns::Pointer,
  },
  Builtin {
    name: "substring",
    routine: "substring",
    args: &[P, N, N],
    returns: Returns::Pointer,
  },
  Builtin {
    name: "empty-list",
    routine: "create_list",
    args: &[],
    returns: Returns::Pointer,
  },
  Builtin {
    name: "cons",
    routine: "cons",
    args: &[N, P],
    returns: Returns::Pointer,
  },
  Builtin {
    name: "first",
    routine: "first",
    args: &[P],
    returns: Returns::Number,
  },
  Builtin {
    name: "rest",
    routine: "rest",
    args: &[P],
    returns: Returns::Pointer,
  },
  Builtin {
    name: "append",
    routine: "append_elem",
    args: &[P, N],
    returns: Returns::Pointer,
  },
  Builtin {
    name: "list-count",
    routine: "list_count",
    args: &[P],
    returns: Returns::Number,
  },
  Builtin {
    name: "print-list",
    routine: "print_list",
    args: &[P],
    returns: Returns::Nothing,
  },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
  BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// Names a `defn` may not take: calls to them never reach user code.
pub fn is_reserved(name: &str) -> bool {
  SPECIAL_FORMS.contains(&name)
    || ArithOp::from_symbol(name).is_some()
    || is_comparison(name)
    || lookup(name).is_some()
}
