//! Command-line driver: read a program, compile it, write the assembly.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use tracing::info;

use clj2arm::{CompileResult, Options, Target, logging, parser, tokenizer};

#[derive(Parser, Debug)]
#[command(
  name = "clj2arm",
  about = "Compile a small Clojure-flavoured Lisp to AArch64 assembly",
  version
)]
struct Cli {
  /// Source file to compile
  #[arg(required_unless_present = "expr", conflicts_with = "expr")]
  file: Option<PathBuf>,
  /// Compile this source text instead of a file
  #[arg(short, long)]
  expr: Option<String>,
  /// Write assembly here instead of stdout
  #[arg(short, long)]
  output: Option<PathBuf>,
  /// Assembler dialect (defaults to the host's)
  #[arg(long, value_enum)]
  target: Option<TargetArg>,
  /// Print the token stream to stderr
  #[arg(long, default_value_t = false)]
  dump_tokens: bool,
  /// Print the syntax tree to stderr
  #[arg(long, default_value_t = false)]
  dump_ast: bool,
  /// Log level (trace|debug|info|warn|error); falls back to RUST_LOG
  #[arg(long, value_parser = ["trace", "debug", "info", "warn", "error"])]
  log_level: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TargetArg {
  /// Mach-O (macOS)
  Darwin,
  /// ELF (Linux)
  Linux,
}

impl From<TargetArg> for Target {
  fn from(arg: TargetArg) -> Self {
    match arg {
      TargetArg::Darwin => Target::Darwin,
      TargetArg::Linux => Target::Linux,
    }
  }
}

fn main() {
  let cli = Cli::parse();
  logging::init_with_level(cli.log_level.as_deref());

  if let Err(err) = run(&cli) {
    eprintln!("error: {err}");
    process::exit(1);
  }
}

fn run(cli: &Cli) -> CompileResult<()> {
  let source = match (&cli.expr, &cli.file) {
    (Some(expr), _) => expr.clone(),
    (None, Some(path)) => clj2arm::read_source(path)?,
    (None, None) => unreachable!("clap requires a file or --expr"),
  };

  if cli.dump_tokens || cli.dump_ast {
    dump(cli, &source)?;
  }

  let options = Options {
    target: cli.target.map(Target::from).unwrap_or_default(),
  };
  info!(target_dialect = ?options.target, "compiling");

  match &cli.output {
    Some(path) => {
      clj2arm::compile_to_file(&source, path, &options)?;
      info!(path = %path.display(), "assembly written");
    }
    None => {
      let asm = clj2arm::generate_assembly(&source, &options)?;
      let mut stdout = io::stdout().lock();
      // A closed pipe is not worth a diagnostic.
      let _ = stdout.write_all(asm.as_bytes());
    }
  }
  Ok(())
}

fn dump(cli: &Cli, source: &str) -> CompileResult<()> {
  let tokens = tokenizer::tokenize(source)?;
  if cli.dump_tokens {
    eprintln!("Tokens ({}):", tokens.len());
    for token in &tokens {
      eprintln!("  {token}");
    }
  }
  if cli.dump_ast {
    let root = parser::parse(tokens, source)?;
    eprintln!("AST:");
    eprint!("{}", root.pretty());
  }
  Ok(())
}
