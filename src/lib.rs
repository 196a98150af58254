//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` splits source text into tokens.
//! - `parser` builds the s-expression tree defined in `ast`.
//! - `codegen` registers declarations in `symbols`, lowers expressions with
//!   the help of `scope`, `pool` and `builtins`, and writes text through the
//!   `arm64` emitter.
//! - `error` holds the diagnostics shared by every stage.

pub mod arm64;
pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod error;
pub mod logging;
pub mod parser;
pub mod pool;
pub mod scope;
pub mod symbols;
pub mod tokenizer;

use std::fs;
use std::path::Path;

use snafu::ResultExt;
use tracing::{debug, instrument};

pub use arm64::Target;
pub use error::{CompileError, CompileResult};

/// Compilation settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
  pub target: Target,
}

/// Compile a source string into AArch64 assembly.
#[instrument(level = "info", skip_all, fields(bytes = source.len()))]
pub fn generate_assembly(source: &str, options: &Options) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  debug!(tokens = tokens.len(), "lexed");

  let forms = parser::parse_program(tokens, source)?;
  debug!(forms = forms.len(), "parsed");

  codegen::generate_program(&forms, options.target)
}

/// Read a program from disk.
pub fn read_source(path: &Path) -> CompileResult<String> {
  fs::read_to_string(path).context(error::InputSourceSnafu { path })
}

/// Compile `source` and write the assembly to `path`.
///
/// Nothing is written unless compilation succeeds.
pub fn compile_to_file(source: &str, path: &Path, options: &Options) -> CompileResult<()> {
  let asm = generate_assembly(source, options)?;
  fs::write(path, asm).context(error::OutputTargetSnafu { path })
}
