//! Registry of top-level declarations.
//!
//! `defn` forms become [`FunctionSignature`]s and `def` forms become
//! [`GlobalConstant`]s. Both keep program order, which fixes the order their
//! code and data are emitted in, and both are looked up by name.

use std::collections::HashMap;

use snafu::ensure;
use tracing::debug;

use crate::ast::Node;
use crate::error::{CompileResult, DuplicateDefinitionSnafu, LabelCollisionSnafu};

/// Derive an assembler-safe identifier: `prefix` followed by `name` with `-`
/// turned into `_` and any other character outside `[A-Za-z0-9_]` written as
/// `_XX` (hex).
pub fn mangle(prefix: &str, name: &str) -> String {
  let mut label = String::with_capacity(prefix.len() + name.len());
  label.push_str(prefix);
  for c in name.chars() {
    match c {
      '-' => label.push('_'),
      c if c.is_ascii_alphanumeric() || c == '_' => label.push(c),
      c => label.push_str(&format!("_{:02x}", c as u32)),
    }
  }
  label
}

/// A user function registered from `(defn name [params...] body)`.
#[derive(Debug, Clone)]
pub struct FunctionSignature<'a> {
  pub name: String,
  pub arity: usize,
  pub params: Vec<String>,
  pub body: &'a Node,
  /// Platform-neutral label; the emitter adds the C symbol prefix.
  pub label: String,
}

/// A global bound by `(def name <number>)`, stored in the data section.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalConstant {
  pub name: String,
  pub value: f64,
  pub label: String,
}

#[derive(Debug, Default)]
pub struct SymbolTable<'a> {
  functions: Vec<FunctionSignature<'a>>,
  function_index: HashMap<String, usize>,
  constants: Vec<GlobalConstant>,
  constant_index: HashMap<String, usize>,
  /// Issued label -> source name, one map per namespace.
  function_labels: HashMap<String, String>,
  constant_labels: HashMap<String, String>,
}

/// Claim `label` for `name`, failing if another name already mangled to it.
fn claim_label(
  issued: &mut HashMap<String, String>,
  kind: &'static str,
  name: &str,
  label: &str,
) -> CompileResult<()> {
  if let Some(other) = issued.get(label) {
    return LabelCollisionSnafu {
      kind,
      name,
      other: other.as_str(),
      label,
    }
    .fail();
  }
  issued.insert(label.to_string(), name.to_string());
  Ok(())
}

impl<'a> SymbolTable<'a> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_function(
    &mut self,
    name: &str,
    params: Vec<String>,
    body: &'a Node,
  ) -> CompileResult<&FunctionSignature<'a>> {
    ensure!(
      !self.function_index.contains_key(name),
      DuplicateDefinitionSnafu {
        kind: "function",
        name,
      }
    );

    let label = mangle("fn_", name);
    claim_label(&mut self.function_labels, "function", name, &label)?;

    let signature = FunctionSignature {
      name: name.to_string(),
      arity: params.len(),
      params,
      body,
      label,
    };
    debug!(name, arity = signature.arity, label = %signature.label, "registered function");

    let index = self.functions.len();
    self.function_index.insert(name.to_string(), index);
    self.functions.push(signature);
    Ok(&self.functions[index])
  }

  pub fn lookup_function(&self, name: &str) -> Option<&FunctionSignature<'a>> {
    self
      .function_index
      .get(name)
      .map(|&index| &self.functions[index])
  }

  /// Registered functions in program order.
  pub fn functions(&self) -> &[FunctionSignature<'a>] {
    &self.functions
  }

  pub fn define_constant(&mut self, name: &str, value: f64) -> CompileResult<&GlobalConstant> {
    ensure!(
      !self.constant_index.contains_key(name),
      DuplicateDefinitionSnafu {
        kind: "global",
        name,
      }
    );

    let label = mangle(".L_var_", name);
    claim_label(&mut self.constant_labels, "global", name, &label)?;

    let constant = GlobalConstant {
      name: name.to_string(),
      value,
      label,
    };
    debug!(name, value, label = %constant.label, "defined global");

    let index = self.constants.len();
    self.constant_index.insert(name.to_string(), index);
    self.constants.push(constant);
    Ok(&self.constants[index])
  }

  pub fn lookup_constant(&self, name: &str) -> Option<&GlobalConstant> {
    self
      .constant_index
      .get(name)
      .map(|&index| &self.constants[index])
  }

  /// Globals in definition order.
  pub fn constants(&self) -> &[GlobalConstant] {
    &self.constants
  }
}
