//! Code generation: lower the parsed program into AArch64 assembly.
//!
//! The emitter is a stack machine. Every expression leaves exactly one value
//! in a 16-byte slot on the machine stack and every consumer pops what it
//! needs, so `depth` (slots currently pushed below the frame pointer) is a
//! pure function of the position in the tree. Parameters and `let` bindings
//! are nothing more than slots that stay resident while their scope is open.
//!
//! Generation runs in two passes over the top-level forms: `collect` registers
//! every `defn`/`def`, then `emit_*` writes one routine per function, the
//! entry routine, and finally the data section with the pooled literals.

use snafu::ensure;
use tracing::{debug, instrument};

use crate::arm64::{ARG_REGS, Emitter, Target};
use crate::ast::Node;
use crate::builtins::{self, ArgKind, ArithOp, Builtin, PRINT_ROUTINE, Returns};
use crate::error::{
  CompileError, CompileResult, EmptyFormSnafu, InvalidCalleeSnafu, MalformedBindingSnafu,
  MalformedDeclarationSnafu, UndefinedFunctionSnafu, UndefinedSymbolSnafu,
};
use crate::pool::{LabelCounter, NumberPool, StringPool};
use crate::scope::Scope;
use crate::symbols::{FunctionSignature, SymbolTable};

/// Symbol of the program entry routine.
const ENTRY: &str = "main";

/// Generate assembly for the top-level forms of a program, as returned by
/// [`crate::parser::parse_program`].
#[instrument(level = "debug", skip_all, fields(forms = forms.len(), dialect = ?target))]
pub fn generate_program(forms: &[Node], target: Target) -> CompileResult<String> {
  let mut cg = CodeGen::new(target);
  cg.collect(forms)?;

  cg.emit.header();
  cg.emit_functions()?;
  cg.emit_entry(forms)?;
  cg.emit_data();

  debug!(
    numbers = cg.numbers.len(),
    strings = cg.strings.len(),
    globals = cg.symbols.constants().len(),
    "data section written"
  );
  Ok(cg.emit.finish())
}

/// Whole-program state; a fresh one is built for every compilation.
struct CodeGen<'a> {
  symbols: SymbolTable<'a>,
  labels: LabelCounter,
  numbers: NumberPool,
  strings: StringPool,
  emit: Emitter,
  /// Evaluation-stack slots currently pushed below the frame pointer.
  depth: usize,
}

impl<'a> CodeGen<'a> {
  fn new(target: Target) -> Self {
    Self {
      symbols: SymbolTable::new(),
      labels: LabelCounter::default(),
      numbers: NumberPool::default(),
      strings: StringPool::default(),
      emit: Emitter::new(target),
      depth: 0,
    }
  }

  // ---------------------------------------------------------------------
  // Collection pass
  // ---------------------------------------------------------------------

  fn collect(&mut self, forms: &'a [Node]) -> CompileResult<()> {
    for form in forms {
      let Some(items) = form.as_list() else {
        continue;
      };
      match form.head_symbol() {
        Some("defn") => self.collect_defn(items)?,
        Some("def") => self.collect_def(items)?,
        _ => {}
      }
    }
    debug!(
      functions = self.symbols.functions().len(),
      globals = self.symbols.constants().len(),
      "collected declarations"
    );
    Ok(())
  }

  fn collect_defn(&mut self, items: &'a [Node]) -> CompileResult<()> {
    ensure!(
      items.len() == 4,
      MalformedDeclarationSnafu {
        message: "expected (defn name [params...] body)",
      }
    );
    let Some(name) = items[1].as_symbol() else {
      return MalformedDeclarationSnafu {
        message: format!("function name must be a symbol, got {}", items[1].summary()),
      }
      .fail();
    };
    ensure!(
      !builtins::is_reserved(name),
      MalformedDeclarationSnafu {
        message: format!("`{name}` is a built-in and cannot be redefined"),
      }
    );
    let Some(param_nodes) = items[2].as_list() else {
      return MalformedDeclarationSnafu {
        message: format!("parameters of `{name}` must be a vector"),
      }
      .fail();
    };
    let params = param_nodes
      .iter()
      .map(|param| {
        param.as_symbol().map(str::to_string).ok_or_else(|| {
          CompileError::MalformedDeclaration {
            message: format!("parameter of `{name}` must be a symbol, got {}", param.summary()),
          }
        })
      })
      .collect::<CompileResult<Vec<_>>>()?;
    if params.len() > ARG_REGS {
      return Err(CompileError::arity(
        name,
        format!("at most {ARG_REGS}"),
        params.len(),
      ));
    }

    self.symbols.register_function(name, params, &items[3])?;
    Ok(())
  }

  fn collect_def(&mut self, items: &'a [Node]) -> CompileResult<()> {
    ensure!(
      items.len() == 3,
      MalformedDeclarationSnafu {
        message: "expected (def name value)",
      }
    );
    let Some(name) = items[1].as_symbol() else {
      return MalformedDeclarationSnafu {
        message: format!("global name must be a symbol, got {}", items[1].summary()),
      }
      .fail();
    };
    let Node::Number(value) = items[2] else {
      return MalformedDeclarationSnafu {
        message: format!("value of `{name}` must be a numeric literal"),
      }
      .fail();
    };

    self.symbols.define_constant(name, value)?;
    Ok(())
  }

  // ---------------------------------------------------------------------
  // Routines
  // ---------------------------------------------------------------------

  fn emit_functions(&mut self) -> CompileResult<()> {
    let functions: Vec<FunctionSignature<'a>> = self.symbols.functions().to_vec();
    for function in &functions {
      self.emit_function(function)?;
    }
    Ok(())
  }

  fn emit_function(&mut self, function: &FunctionSignature<'a>) -> CompileResult<()> {
    debug!(name = %function.name, "emitting function");
    self.depth = 0;
    self.emit.blank();
    self.emit.function_start(&function.label);
    self.emit.prologue();

    self.emit.comment("save parameters");
    for reg in 0..function.arity {
      self.push_d(reg);
    }

    let scope = Scope::params(function.params.iter().map(String::as_str).collect());
    self.emit.comment(&format!("body of {}", function.name));
    self.lower(function.body, Some(&scope))?;
    debug_assert_eq!(self.depth, function.arity + 1);

    self.pop_d(0);
    self.emit.epilogue();
    Ok(())
  }

  fn emit_entry(&mut self, forms: &[Node]) -> CompileResult<()> {
    self.depth = 0;
    self.emit.text_section();
    self.emit.function_start(ENTRY);
    self.emit.prologue();

    for form in forms.iter().filter(|form| !form.is_declaration()) {
      self.emit.comment(&format!("evaluate {}", form.summary()));
      self.lower(form, None)?;
      self.pop_d(0);
      self.emit.call(PRINT_ROUTINE);
      debug_assert_eq!(self.depth, 0);
    }

    self.emit.return_zero();
    self.emit.epilogue();
    Ok(())
  }

  fn emit_data(&mut self) {
    if self.numbers.is_empty() && self.strings.is_empty() && self.symbols.constants().is_empty() {
      return;
    }

    self.emit.data_section();
    for (label, value) in self.numbers.entries() {
      self.emit.double_constant(label, value);
    }
    for (label, value) in self.strings.entries() {
      self.emit.string_constant(label, value);
    }
    // Strings leave the cursor at any byte; globals are loaded as doubles.
    if !self.strings.is_empty() && !self.symbols.constants().is_empty() {
      self.emit.align_doubles();
    }
    for constant in self.symbols.constants() {
      self.emit.double_constant(&constant.label, constant.value);
    }
  }

  // ---------------------------------------------------------------------
  // Evaluation stack
  // ---------------------------------------------------------------------

  fn push_d(&mut self, reg: usize) {
    self.emit.push_d(reg);
    self.depth += 1;
  }

  fn pop_d(&mut self, reg: usize) {
    self.emit.pop_d(reg);
    self.depth -= 1;
  }

  fn push_x(&mut self, reg: usize) {
    self.emit.push_x(reg);
    self.depth += 1;
  }

  fn pop_x(&mut self, reg: usize) {
    self.emit.pop_x(reg);
    self.depth -= 1;
  }

  fn drop_slots(&mut self, slots: usize) {
    self.emit.drop_slots(slots);
    self.depth -= slots;
  }

  // ---------------------------------------------------------------------
  // Expressions
  // ---------------------------------------------------------------------

  /// Emit code leaving the value of `node` on top of the stack.
  fn lower(&mut self, node: &Node, scope: Option<&Scope<'_>>) -> CompileResult<()> {
    let before = self.depth;
    match node {
      Node::Number(value) => {
        let label = self.numbers.intern(*value, &mut self.labels).to_string();
        self.emit.load_double(&label);
        self.push_d(0);
      }
      Node::Str(value) => {
        let label = self.strings.intern(value, &mut self.labels).to_string();
        self.emit.address_of(0, &label);
        self.push_x(0);
      }
      Node::Symbol(name) => self.lower_symbol(name, scope)?,
      Node::List(items) => self.lower_form(items, scope)?,
    }
    debug_assert_eq!(self.depth, before + 1, "unbalanced lowering of {node}");
    Ok(())
  }

  fn lower_symbol(&mut self, name: &str, scope: Option<&Scope<'_>>) -> CompileResult<()> {
    if let Some(constant) = self.symbols.lookup_constant(name) {
      let label = constant.label.clone();
      self.emit.load_double(&label);
      self.push_d(0);
      return Ok(());
    }

    let Some(binding) = scope.and_then(|scope| scope.resolve(name)) else {
      return UndefinedSymbolSnafu { name }.fail();
    };
    self.emit.load_frame_slot(binding.frame_offset());
    self.push_d(0);
    Ok(())
  }

  fn lower_form(&mut self, items: &[Node], scope: Option<&Scope<'_>>) -> CompileResult<()> {
    let Some((head, args)) = items.split_first() else {
      return EmptyFormSnafu.fail();
    };
    let Some(symbol) = head.as_symbol() else {
      return InvalidCalleeSnafu {
        callee: head.summary(),
      }
      .fail();
    };

    if let Some(op) = ArithOp::from_symbol(symbol) {
      return self.lower_arith(symbol, op, args, scope);
    }
    if builtins::is_comparison(symbol) {
      return self.lower_comparison(symbol, args, scope);
    }
    if let Some(builtin) = builtins::lookup(symbol) {
      return self.lower_builtin(builtin, args, scope);
    }
    match symbol {
      "if" => self.lower_if(args, scope),
      "let" => self.lower_let(args, scope),
      "defn" | "def" => MalformedDeclarationSnafu {
        message: format!("`{symbol}` is only allowed at the top level"),
      }
      .fail(),
      _ => self.lower_call(symbol, args, scope),
    }
  }

  /// Fold `args` with `op`. The last argument is the initial accumulator and
  /// each earlier one is combined as `arg (op) acc`, so `(- 10 3 2)` is
  /// `10 - (3 - 2)`.
  fn lower_arith(
    &mut self,
    symbol: &str,
    op: ArithOp,
    args: &[Node],
    scope: Option<&Scope<'_>>,
  ) -> CompileResult<()> {
    if args.is_empty() {
      return Err(CompileError::arity(symbol, "at least 1", 0));
    }

    for arg in args {
      self.lower(arg, scope)?;
    }

    self.pop_d(0);
    for _ in 1..args.len() {
      self.pop_d(1);
      match op {
        ArithOp::Add => self.emit.fadd(),
        ArithOp::Sub => self.emit.fsub(),
        ArithOp::Mul => self.emit.fmul(),
        ArithOp::Div => self.emit.fdiv(),
      }
    }
    self.push_d(0);
    Ok(())
  }

  fn lower_comparison(
    &mut self,
    symbol: &str,
    args: &[Node],
    scope: Option<&Scope<'_>>,
  ) -> CompileResult<()> {
    if args.len() != 2 {
      return Err(CompileError::arity(symbol, 2, args.len()));
    }
    let cond = builtins::condition_code(symbol)?;

    self.lower(&args[0], scope)?;
    self.lower(&args[1], scope)?;
    self.pop_d(1);
    self.pop_d(0);
    self.emit.compare(cond);
    self.push_d(0);
    Ok(())
  }

  fn lower_builtin(
    &mut self,
    builtin: &Builtin,
    args: &[Node],
    scope: Option<&Scope<'_>>,
  ) -> CompileResult<()> {
    if args.len() != builtin.arity() {
      return Err(CompileError::arity(builtin.name, builtin.arity(), args.len()));
    }

    self.emit.comment(builtin.name);
    for arg in args {
      self.lower(arg, scope)?;
    }

    let registers = builtin.registers();
    for (kind, reg) in builtin.args.iter().zip(registers).rev() {
      match kind {
        ArgKind::Pointer => self.pop_x(reg),
        ArgKind::Number => self.pop_d(reg),
      }
    }

    self.emit.call(builtin.routine);
    match builtin.returns {
      Returns::Pointer => self.push_x(0),
      Returns::Number => self.push_d(0),
      Returns::Nothing => {
        self.emit.zero_d0();
        self.push_d(0);
      }
    }
    Ok(())
  }

  fn lower_if(&mut self, args: &[Node], scope: Option<&Scope<'_>>) -> CompileResult<()> {
    let [cond, then, otherwise] = args else {
      return Err(CompileError::arity("if", 3, args.len()));
    };

    let n = self.labels.next();
    let else_label = format!(".L_else_{n}");
    let end_label = format!(".L_end_{n}");

    self.emit.comment("if");
    self.lower(cond, scope)?;
    self.pop_d(0);
    self.emit.branch_if_zero(&else_label);

    let branch_depth = self.depth;
    self.lower(then, scope)?;
    self.emit.branch(&end_label);

    // Only one branch runs; the else arm starts from the same depth.
    self.depth = branch_depth;
    self.emit.label(&else_label);
    self.lower(otherwise, scope)?;
    self.emit.label(&end_label);
    Ok(())
  }

  fn lower_let(&mut self, args: &[Node], scope: Option<&Scope<'_>>) -> CompileResult<()> {
    let [bindings, body] = args else {
      return Err(CompileError::arity("let", 2, args.len()));
    };
    let Some(pairs) = bindings.as_list() else {
      return MalformedBindingSnafu {
        message: format!("expected a binding vector, got {}", bindings.summary()),
      }
      .fail();
    };
    ensure!(
      pairs.len() % 2 == 0,
      MalformedBindingSnafu {
        message: format!("odd number of binding forms ({})", pairs.len()),
      }
    );
    let names = pairs
      .chunks_exact(2)
      .map(|pair| {
        pair[0].as_symbol().ok_or_else(|| CompileError::MalformedBinding {
          message: format!("binding name must be a symbol, got {}", pair[0].summary()),
        })
      })
      .collect::<CompileResult<Vec<_>>>()?;

    self.emit.comment("let bindings");
    let base = self.depth;
    debug_assert!(scope.map_or(0, Scope::depth) <= base);
    for pair in pairs.chunks_exact(2) {
      self.lower(&pair[1], scope)?;
    }

    let count = names.len();
    let frame = Scope::let_frame(names, base, scope);
    self.emit.comment("let body");
    self.lower(body, Some(&frame))?;

    self.pop_d(0);
    self.drop_slots(count);
    self.push_d(0);
    debug_assert_eq!(self.depth, base + 1);
    Ok(())
  }

  fn lower_call(
    &mut self,
    name: &str,
    args: &[Node],
    scope: Option<&Scope<'_>>,
  ) -> CompileResult<()> {
    let Some(function) = self.symbols.lookup_function(name) else {
      return UndefinedFunctionSnafu { name }.fail();
    };
    if function.arity != args.len() {
      return Err(CompileError::arity(name, function.arity, args.len()));
    }
    let label = function.label.clone();

    self.emit.comment(&format!("call {name}"));
    for arg in args {
      self.lower(arg, scope)?;
    }
    for reg in (0..args.len()).rev() {
      self.pop_d(reg);
    }
    self.emit.call(&label);
    self.push_d(0);
    Ok(())
  }
}
