//! AArch64 assembly text emitter.
//!
//! One method per instruction shape the code generator needs. Values on the
//! evaluation stack always occupy a full 16-byte slot so `sp` stays aligned as
//! the AAPCS64 requires at every call. The two supported targets share the
//! architecture and calling convention and differ only in assembler dialect.

use std::fmt::Write as _;

/// Assembler dialect / object format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
  /// Mach-O, as used on Apple silicon.
  Darwin,
  /// ELF, as used on AArch64 Linux.
  Linux,
}

impl Default for Target {
  /// The host's dialect, falling back to ELF off macOS.
  fn default() -> Self {
    if cfg!(target_os = "macos") {
      Self::Darwin
    } else {
      Self::Linux
    }
  }
}

impl Target {
  /// Global symbol for a C-level name.
  pub fn symbol(self, name: &str) -> String {
    match self {
      Self::Darwin => format!("_{name}"),
      Self::Linux => name.to_string(),
    }
  }
}

/// Stack slot size in bytes for one evaluation-stack value.
pub const SLOT: usize = 16;

/// Number of floating-point argument registers (`d0`..`d7`).
pub const ARG_REGS: usize = 8;

/// Largest slot-aligned value encodable as an `add`/`sub` immediate.
const MAX_ADD_IMM: usize = 4080;

#[derive(Debug)]
pub struct Emitter {
  target: Target,
  out: String,
}

impl Emitter {
  pub fn new(target: Target) -> Self {
    Self {
      target,
      out: String::new(),
    }
  }

  pub fn finish(self) -> String {
    self.out
  }

  fn ins(&mut self, text: impl AsRef<str>) {
    self.out.push_str("    ");
    self.out.push_str(text.as_ref());
    self.out.push('\n');
  }

  pub fn blank(&mut self) {
    self.out.push('\n');
  }

  pub fn comment(&mut self, text: &str) {
    self.ins(format!("// {text}"));
  }

  pub fn label(&mut self, label: &str) {
    let _ = writeln!(self.out, "{label}:");
  }

  pub fn header(&mut self) {
    match self.target {
      Target::Darwin => {
        self.ins(".section __TEXT,__text,regular,pure_instructions");
        self.ins(".build_version macos, 14, 0");
      }
      Target::Linux => self.ins(".text"),
    }
    self.ins(".p2align 2");
  }

  pub fn text_section(&mut self) {
    self.blank();
    match self.target {
      Target::Darwin => self.ins(".section __TEXT,__text"),
      Target::Linux => self.ins(".text"),
    }
    self.ins(".p2align 2");
  }

  pub fn data_section(&mut self) {
    self.blank();
    match self.target {
      Target::Darwin => self.ins(".section __DATA,__data"),
      Target::Linux => self.ins(".data"),
    }
    self.align_doubles();
  }

  /// Realign the data cursor for 8-byte loads.
  pub fn align_doubles(&mut self) {
    self.ins(".p2align 3");
  }

  /// Exported routine entry; `name` is the platform-neutral symbol.
  pub fn function_start(&mut self, name: &str) {
    let symbol = self.target.symbol(name);
    self.ins(format!(".globl {symbol}"));
    if self.target == Target::Linux {
      self.ins(format!(".type {symbol}, %function"));
    }
    self.label(&symbol);
  }

  pub fn prologue(&mut self) {
    self.ins("stp x29, x30, [sp, #-16]!");
    self.ins("mov x29, sp");
  }

  pub fn epilogue(&mut self) {
    self.ins("mov sp, x29");
    self.ins("ldp x29, x30, [sp], #16");
    self.ins("ret");
  }

  pub fn push_d(&mut self, reg: usize) {
    self.ins(format!("str d{reg}, [sp, #-16]!"));
  }

  pub fn pop_d(&mut self, reg: usize) {
    self.ins(format!("ldr d{reg}, [sp], #16"));
  }

  pub fn push_x(&mut self, reg: usize) {
    self.ins(format!("str x{reg}, [sp, #-16]!"));
  }

  pub fn pop_x(&mut self, reg: usize) {
    self.ins(format!("ldr x{reg}, [sp], #16"));
  }

  /// Release `slots` stack slots at once.
  pub fn drop_slots(&mut self, slots: usize) {
    let mut bytes = slots * SLOT;
    // `add` takes a 12-bit immediate.
    while bytes > 0 {
      let step = bytes.min(MAX_ADD_IMM);
      self.ins(format!("add sp, sp, #{step}"));
      bytes -= step;
    }
  }

  /// `x{reg}` = address of a data-section label.
  pub fn address_of(&mut self, reg: usize, label: &str) {
    match self.target {
      Target::Darwin => {
        self.ins(format!("adrp x{reg}, {label}@PAGE"));
        self.ins(format!("add x{reg}, x{reg}, {label}@PAGEOFF"));
      }
      Target::Linux => {
        self.ins(format!("adrp x{reg}, {label}"));
        self.ins(format!("add x{reg}, x{reg}, :lo12:{label}"));
      }
    }
  }

  /// `d0` = the double stored at `label`.
  pub fn load_double(&mut self, label: &str) {
    self.address_of(8, label);
    self.ins("ldr d0, [x8]");
  }

  /// `d0` = the slot at `offset` bytes from the frame pointer.
  pub fn load_frame_slot(&mut self, offset: i64) {
    let distance = offset.unsigned_abs() as usize;
    if offset >= -256 {
      self.ins(format!("ldr d0, [x29, #{offset}]"));
    } else if distance <= MAX_ADD_IMM {
      self.ins(format!("sub x9, x29, #{distance}"));
      self.ins("ldr d0, [x9]");
    } else {
      self.ins(format!("mov x9, #{}", distance & 0xffff));
      if distance > 0xffff {
        self.ins(format!("movk x9, #{}, lsl #16", distance >> 16));
      }
      self.ins("sub x9, x29, x9");
      self.ins("ldr d0, [x9]");
    }
  }

  pub fn fadd(&mut self) {
    self.ins("fadd d0, d0, d1");
  }

  pub fn fsub(&mut self) {
    self.ins("fsub d0, d1, d0");
  }

  pub fn fmul(&mut self) {
    self.ins("fmul d0, d0, d1");
  }

  pub fn fdiv(&mut self) {
    self.ins("fdiv d0, d1, d0");
  }

  /// `d0` = 1.0 if `d0 <cond> d1` else 0.0.
  pub fn compare(&mut self, cond: &str) {
    self.ins("fcmp d0, d1");
    self.ins(format!("cset x0, {cond}"));
    self.ins("ucvtf d0, x0");
  }

  pub fn zero_d0(&mut self) {
    self.ins("fmov d0, xzr");
  }

  /// Branch to `label` when `d0` is zero.
  pub fn branch_if_zero(&mut self, label: &str) {
    self.ins("fcmp d0, #0.0");
    self.ins(format!("b.eq {label}"));
  }

  pub fn branch(&mut self, label: &str) {
    self.ins(format!("b {label}"));
  }

  /// Call a platform-neutral symbol (user function or runtime routine).
  pub fn call(&mut self, name: &str) {
    let symbol = self.target.symbol(name);
    self.ins(format!("bl {symbol}"));
  }

  pub fn return_zero(&mut self) {
    self.ins("mov w0, #0");
  }

  /// Double constant, emitted by bit pattern so the value is exact.
  pub fn double_constant(&mut self, label: &str, value: f64) {
    self.label(label);
    self.ins(format!(".quad 0x{:016x} // {value:?}", value.to_bits()));
  }

  pub fn string_constant(&mut self, label: &str, value: &str) {
    self.label(label);
    self.ins(format!(".asciz \"{}\"", escape_asciz(value)));
  }
}

/// Escape a string for an `.asciz` directive.
pub fn escape_asciz(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for byte in value.bytes() {
    match byte {
      b'"' => out.push_str("\\\""),
      b'\\' => out.push_str("\\\\"),
      b'\n' => out.push_str("\\n"),
      b'\t' => out.push_str("\\t"),
      0x20..=0x7e => out.push(byte as char),
      other => {
        let _ = write!(out, "\\{other:03o}");
      }
    }
  }
  out
}
