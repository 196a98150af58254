//! A tiny AArch64 interpreter for the instruction subset clj2arm emits, with
//! the runtime library modelled in Rust. Good enough to run generated programs
//! on any host and compare what they print.

#![allow(dead_code)]

use std::collections::HashMap;

use clj2arm::{Options, Target, generate_assembly};

const MEMORY: usize = 1 << 20;
const DATA_BASE: u64 = 0x1000;
const RETURN_SENTINEL: u64 = u64::MAX;
const STEP_LIMIT: usize = 10_000_000;
/// Bytes kept free between the heap and the stack.
const STACK_GUARD: u64 = 0x1_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flags {
  Less,
  Equal,
  Greater,
  Unordered,
}

#[derive(Debug)]
struct Insn {
  mnemonic: String,
  operands: Vec<String>,
  line: usize,
}

pub struct Machine {
  code: Vec<Insn>,
  code_labels: HashMap<String, usize>,
  data_labels: HashMap<String, u64>,
  mem: Vec<u8>,
  heap: u64,
  x: [u64; 31],
  d: [f64; 32],
  sp: u64,
  flags: Flags,
  stdout: String,
  steps: usize,
}

/// Assemble `asm`, run it from `main`, and return everything it printed.
pub fn run(asm: &str) -> Result<String, String> {
  let mut machine = Machine::load(asm)?;
  machine.run()?;
  Ok(machine.stdout)
}

/// Compile for both dialects, run each, and check they agree.
pub fn compile_and_run(source: &str) -> String {
  let [linux, darwin] = [Target::Linux, Target::Darwin].map(|target| {
    let asm = generate_assembly(source, &Options { target })
      .unwrap_or_else(|err| panic!("compiling {source:?} failed: {err}"));
    run(&asm).unwrap_or_else(|err| panic!("running {source:?} failed: {err}\n{asm}"))
  });
  assert_eq!(linux, darwin, "dialects disagree on {source:?}");
  linux
}

/// `printf("%g")`.
pub fn format_g(value: f64) -> String {
  if value.is_nan() {
    return "nan".into();
  }
  if value.is_infinite() {
    return if value > 0.0 { "inf" } else { "-inf" }.into();
  }
  if value == 0.0 {
    return if value.is_sign_negative() { "-0" } else { "0" }.into();
  }
  let sci = format!("{value:.5e}");
  let (mantissa, exp) = sci.split_once('e').unwrap();
  let exp: i32 = exp.parse().unwrap();
  if !(-4..6).contains(&exp) {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}e{sign}{:02}", trim_zeros(mantissa), exp.abs())
  } else {
    let decimals = (5 - exp) as usize;
    trim_zeros(&format!("{value:.decimals$}")).to_string()
  }
}

fn trim_zeros(text: &str) -> &str {
  if text.contains('.') {
    text.trim_end_matches('0').trim_end_matches('.')
  } else {
    text
  }
}

impl Machine {
  pub fn load(asm: &str) -> Result<Self, String> {
    let mut machine = Machine {
      code: Vec::new(),
      code_labels: HashMap::new(),
      data_labels: HashMap::new(),
      mem: vec![0; MEMORY],
      heap: 0,
      x: [0; 31],
      d: [0.0; 32],
      sp: MEMORY as u64,
      flags: Flags::Unordered,
      stdout: String::new(),
      steps: 0,
    };

    let mut in_data = false;
    let mut cursor = DATA_BASE;
    for (idx, raw) in asm.lines().enumerate() {
      let line = raw.trim();
      let lineno = idx + 1;
      if line.is_empty() || line.starts_with("//") {
        continue;
      }
      if let Some(label) = line.strip_suffix(':')
        && !label.contains(char::is_whitespace)
      {
        let fresh = if in_data {
          machine.data_labels.insert(label.to_string(), cursor).is_none()
        } else {
          machine
            .code_labels
            .insert(label.to_string(), machine.code.len())
            .is_none()
        };
        if !fresh {
          return Err(format!("line {lineno}: label {label} defined twice"));
        }
        continue;
      }

      let (head, rest) = split_mnemonic(line);
      if head.starts_with('.') {
        match head {
          ".text" => in_data = false,
          ".data" => in_data = true,
          ".section" => in_data = rest.starts_with("__DATA"),
          ".p2align" if in_data => {
            let shift: u32 = rest.parse().map_err(|_| format!("line {lineno}: bad alignment"))?;
            cursor = cursor.next_multiple_of(1 << shift);
          }
          ".quad" => {
            let hex = rest.split("//").next().unwrap_or_default().trim();
            let bits = u64::from_str_radix(hex.trim_start_matches("0x"), 16)
              .map_err(|_| format!("line {lineno}: bad .quad {hex}"))?;
            machine.write_u64(cursor, bits)?;
            cursor += 8;
          }
          ".asciz" => {
            let mut bytes = unescape_asciz(rest).map_err(|err| format!("line {lineno}: {err}"))?;
            bytes.push(0);
            machine.write_bytes(cursor, &bytes)?;
            cursor += bytes.len() as u64;
          }
          ".p2align" | ".globl" | ".type" | ".build_version" => {}
          other => return Err(format!("line {lineno}: unsupported directive {other}")),
        }
        continue;
      }

      if in_data {
        return Err(format!("line {lineno}: instruction in a data section"));
      }
      machine.code.push(Insn {
        mnemonic: head.to_string(),
        operands: split_operands(rest),
        line: lineno,
      });
    }

    machine.heap = cursor.next_multiple_of(16);
    Ok(machine)
  }

  pub fn run(&mut self) -> Result<(), String> {
    let entry = ["main", "_main"]
      .iter()
      .find_map(|name| self.code_labels.get(*name))
      .copied()
      .ok_or("no main routine")?;

    self.x[30] = RETURN_SENTINEL;
    let mut pc = entry as u64;
    while pc != RETURN_SENTINEL {
      self.steps += 1;
      if self.steps > STEP_LIMIT {
        return Err("step limit exceeded".into());
      }
      let insn = self
        .code
        .get(pc as usize)
        .ok_or_else(|| format!("pc {pc} ran off the end of the code"))?;
      let line = insn.line;
      let mnemonic = insn.mnemonic.clone();
      let operands = insn.operands.clone();
      pc = self
        .exec(&mnemonic, &operands, pc)
        .map_err(|err| format!("line {line}: {mnemonic} {}: {err}", operands.join(", ")))?;
    }

    if self.sp != MEMORY as u64 {
      return Err(format!("stack not restored on exit (sp = {:#x})", self.sp));
    }
    if self.x[0] as u32 != 0 {
      return Err(format!("main returned {}", self.x[0] as u32));
    }
    Ok(())
  }

  fn exec(&mut self, mnemonic: &str, operands: &[String], pc: u64) -> Result<u64, String> {
    let ops: Vec<&str> = operands.iter().map(String::as_str).collect();
    let next = pc + 1;
    match (mnemonic, ops.as_slice()) {
      ("stp", [a, b, mem @ ..]) => {
        let (va, vb) = (self.xreg(a)?, self.xreg(b)?);
        let addr = self.address(mem)?;
        self.write_u64(addr, va)?;
        self.write_u64(addr + 8, vb)?;
      }
      ("ldp", [a, b, mem @ ..]) => {
        let addr = self.address(mem)?;
        let (va, vb) = (self.read_u64(addr)?, self.read_u64(addr + 8)?);
        self.set_xreg(a, va)?;
        self.set_xreg(b, vb)?;
      }
      ("str", [reg, mem @ ..]) => {
        let bits = self.reg_bits(reg)?;
        let addr = self.address(mem)?;
        self.write_u64(addr, bits)?;
      }
      ("ldr", [reg, mem @ ..]) => {
        let addr = self.address(mem)?;
        let bits = self.read_u64(addr)?;
        self.set_reg_bits(reg, bits)?;
      }
      ("mov", [dst, src]) => {
        let value = if src.starts_with('#') {
          imm(src)? as u64
        } else {
          self.xreg(src)?
        };
        self.set_xreg(dst, value)?;
      }
      ("movk", [dst, value, shift]) => {
        let shift = shift
          .strip_prefix("lsl ")
          .ok_or_else(|| "movk without lsl".to_string())
          .and_then(|s| imm(s.trim()))?;
        let mask = 0xffff_u64 << shift;
        let old = self.xreg(dst)?;
        self.set_xreg(dst, (old & !mask) | ((imm(value)? as u64) << shift))?;
      }
      ("adrp", [dst, symbol]) => {
        let label = symbol.trim_end_matches("@PAGE");
        let addr = self.data_address(label)?;
        self.set_xreg(dst, addr & !0xfff)?;
      }
      ("add", [dst, src, operand]) => {
        let base = self.xreg(src)?;
        let addend = if let Some(label) = operand.strip_suffix("@PAGEOFF") {
          self.data_address(label)? & 0xfff
        } else if let Some(label) = operand.strip_prefix(":lo12:") {
          self.data_address(label)? & 0xfff
        } else {
          imm(operand)? as u64
        };
        self.set_xreg(dst, base.wrapping_add(addend))?;
      }
      ("sub", [dst, src, operand]) => {
        let base = self.xreg(src)?;
        let value = if operand.starts_with('#') {
          imm(operand)? as u64
        } else {
          self.xreg(operand)?
        };
        self.set_xreg(dst, base.wrapping_sub(value))?;
      }
      ("fadd" | "fsub" | "fmul" | "fdiv", [dst, a, b]) => {
        let (lhs, rhs) = (self.d[dreg(a)?], self.d[dreg(b)?]);
        self.d[dreg(dst)?] = match mnemonic {
          "fadd" => lhs + rhs,
          "fsub" => lhs - rhs,
          "fmul" => lhs * rhs,
          _ => lhs / rhs,
        };
      }
      ("fcmp", [a, b]) => {
        let lhs = self.d[dreg(a)?];
        let rhs = match b.strip_prefix('#') {
          Some(literal) => literal.parse::<f64>().map_err(|e| e.to_string())?,
          None => self.d[dreg(b)?],
        };
        self.flags = match lhs.partial_cmp(&rhs) {
          Some(std::cmp::Ordering::Less) => Flags::Less,
          Some(std::cmp::Ordering::Equal) => Flags::Equal,
          Some(std::cmp::Ordering::Greater) => Flags::Greater,
          None => Flags::Unordered,
        };
      }
      ("cset", [dst, cond]) => {
        let holds = self.condition(cond)?;
        self.set_xreg(dst, u64::from(holds))?;
      }
      ("ucvtf", [dst, src]) => {
        let value = self.xreg(src)?;
        self.d[dreg(dst)?] = value as f64;
      }
      ("fmov", [dst, src]) => {
        let bits = self.xreg(src)?;
        self.d[dreg(dst)?] = f64::from_bits(bits);
      }
      ("b", [label]) => return self.code_address(label),
      (branch, [label]) if branch.starts_with("b.") => {
        if self.condition(&branch[2..])? {
          return self.code_address(label);
        }
      }
      ("bl", [symbol]) => {
        if self.sp % 16 != 0 {
          return Err(format!("misaligned stack at call (sp = {:#x})", self.sp));
        }
        if let Some(&target) = self.code_labels.get(*symbol) {
          self.x[30] = next;
          return Ok(target as u64);
        }
        let routine = symbol.strip_prefix('_').unwrap_or(symbol);
        self.call_runtime(routine)?;
      }
      ("ret", []) => return Ok(self.x[30]),
      _ => return Err("unsupported instruction".into()),
    }
    Ok(next)
  }

  fn condition(&self, cond: &str) -> Result<bool, String> {
    use Flags::*;
    let flags = self.flags;
    Ok(match cond {
      "eq" => flags == Equal,
      "ne" => flags != Equal,
      // After fcmp, lt and le also hold for unordered operands; mi and ls do not.
      "lt" => matches!(flags, Less | Unordered),
      "le" => matches!(flags, Less | Equal | Unordered),
      "mi" => flags == Less,
      "ls" => matches!(flags, Less | Equal),
      "gt" => flags == Greater,
      "ge" => matches!(flags, Greater | Equal),
      other => return Err(format!("unknown condition {other}")),
    })
  }

  /// Resolve a memory operand, applying pre/post-index writeback.
  fn address(&mut self, operands: &[&str]) -> Result<u64, String> {
    let (mem, post) = match operands {
      [mem] => (*mem, None),
      [mem, step] => (*mem, Some(imm(step)?)),
      _ => return Err("bad memory operand".into()),
    };
    let pre_index = mem.ends_with('!');
    let inner = mem
      .trim_end_matches('!')
      .strip_prefix('[')
      .and_then(|m| m.strip_suffix(']'))
      .ok_or_else(|| format!("bad memory operand {mem}"))?;
    let (base, offset) = match inner.split_once(',') {
      Some((base, offset)) => (base.trim(), imm(offset.trim())?),
      None => (inner.trim(), 0),
    };

    let base_value = self.xreg(base)?;
    let addr = base_value.wrapping_add_signed(offset);
    if pre_index {
      self.set_xreg(base, addr)?;
      Ok(addr)
    } else if let Some(step) = post {
      self.set_xreg(base, base_value.wrapping_add_signed(step))?;
      Ok(base_value)
    } else {
      Ok(addr)
    }
  }

  fn code_address(&self, label: &str) -> Result<u64, String> {
    self
      .code_labels
      .get(label)
      .map(|&idx| idx as u64)
      .ok_or_else(|| format!("unknown code label {label}"))
  }

  fn data_address(&self, label: &str) -> Result<u64, String> {
    self
      .data_labels
      .get(label)
      .copied()
      .ok_or_else(|| format!("unknown data label {label}"))
  }

  // -------------------------------------------------------------------
  // Registers
  // -------------------------------------------------------------------

  fn xreg(&self, name: &str) -> Result<u64, String> {
    match name {
      "sp" => Ok(self.sp),
      "xzr" | "wzr" => Ok(0),
      _ => {
        let (wide, idx) = gpr(name)?;
        let value = self.x[idx];
        Ok(if wide { value } else { value & 0xffff_ffff })
      }
    }
  }

  fn set_xreg(&mut self, name: &str, value: u64) -> Result<(), String> {
    match name {
      "sp" => self.sp = value,
      "xzr" | "wzr" => {}
      _ => {
        let (wide, idx) = gpr(name)?;
        self.x[idx] = if wide { value } else { value & 0xffff_ffff };
      }
    }
    Ok(())
  }

  fn reg_bits(&self, name: &str) -> Result<u64, String> {
    if name.starts_with('d') {
      Ok(self.d[dreg(name)?].to_bits())
    } else {
      self.xreg(name)
    }
  }

  fn set_reg_bits(&mut self, name: &str, bits: u64) -> Result<(), String> {
    if name.starts_with('d') {
      self.d[dreg(name)?] = f64::from_bits(bits);
      Ok(())
    } else {
      self.set_xreg(name, bits)
    }
  }

  // -------------------------------------------------------------------
  // Memory
  // -------------------------------------------------------------------

  fn check(&self, addr: u64, len: usize) -> Result<usize, String> {
    let start = addr as usize;
    if addr < DATA_BASE || start.checked_add(len).is_none_or(|end| end > self.mem.len()) {
      return Err(format!("access outside memory at {addr:#x}"));
    }
    Ok(start)
  }

  fn aligned(addr: u64) -> Result<(), String> {
    if addr % 8 != 0 {
      return Err(format!("misaligned 8-byte access at {addr:#x}"));
    }
    Ok(())
  }

  fn read_u64(&self, addr: u64) -> Result<u64, String> {
    Self::aligned(addr)?;
    let start = self.check(addr, 8)?;
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&self.mem[start..start + 8]);
    Ok(u64::from_le_bytes(bytes))
  }

  fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), String> {
    Self::aligned(addr)?;
    self.write_bytes(addr, &value.to_le_bytes())
  }

  fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), String> {
    let start = self.check(addr, bytes.len())?;
    self.mem[start..start + bytes.len()].copy_from_slice(bytes);
    Ok(())
  }

  fn read_cstr(&self, addr: u64) -> Result<Vec<u8>, String> {
    let start = self.check(addr, 1)?;
    let len = self.mem[start..]
      .iter()
      .position(|&b| b == 0)
      .ok_or("unterminated string")?;
    Ok(self.mem[start..start + len].to_vec())
  }

  fn alloc(&mut self, size: usize) -> Result<u64, String> {
    let addr = self.heap;
    let end = addr + (size as u64).next_multiple_of(16).max(16);
    if end + STACK_GUARD > self.sp {
      return Err("heap ran into the stack".into());
    }
    self.heap = end;
    Ok(addr)
  }

  // -------------------------------------------------------------------
  // Runtime library
  // -------------------------------------------------------------------

  fn alloc_str(&mut self, bytes: &[u8]) -> Result<u64, String> {
    let addr = self.alloc(bytes.len() + 1)?;
    self.write_bytes(addr, bytes)?;
    self.write_bytes(addr + bytes.len() as u64, &[0])?;
    Ok(addr)
  }

  /// Lists are `[count][items...]`, laid out like the C runtime's.
  fn read_list(&self, addr: u64) -> Result<Vec<f64>, String> {
    let count = self.read_u64(addr)?;
    (0..count)
      .map(|i| self.read_u64(addr + 8 + i * 8).map(f64::from_bits))
      .collect()
  }

  fn alloc_list(&mut self, items: &[f64]) -> Result<u64, String> {
    let addr = self.alloc(8 + items.len() * 8)?;
    self.write_u64(addr, items.len() as u64)?;
    for (i, item) in items.iter().enumerate() {
      self.write_u64(addr + 8 + i as u64 * 8, item.to_bits())?;
    }
    Ok(addr)
  }

  fn call_runtime(&mut self, routine: &str) -> Result<(), String> {
    let (x0, x1) = (self.x[0], self.x[1]);
    let (d0, d1) = (self.d[0], self.d[1]);

    match routine {
      "print_double" => {
        self.stdout.push_str(&format_g(d0));
        self.stdout.push('\n');
      }
      "str_length" => self.d[0] = self.read_cstr(x0)?.len() as f64,
      "str_char_at" => {
        let bytes = self.read_cstr(x0)?;
        self.d[0] = if d0 >= 0.0 && d0 < bytes.len() as f64 {
          f64::from(bytes[d0 as usize])
        } else {
          0.0
        };
      }
      "str_concat" => {
        let mut bytes = self.read_cstr(x0)?;
        bytes.extend(self.read_cstr(x1)?);
        self.x[0] = self.alloc_str(&bytes)?;
      }
      "substring" => {
        let bytes = self.read_cstr(x0)?;
        let clamp = |value: f64| {
          if value > 0.0 {
            (value as usize).min(bytes.len())
          } else {
            0
          }
        };
        let from = clamp(d0);
        let to = clamp(d1).max(from);
        let slice = bytes[from..to].to_vec();
        self.x[0] = self.alloc_str(&slice)?;
      }
      "create_list" => self.x[0] = self.alloc_list(&[])?,
      "cons" => {
        let mut items = vec![d0];
        items.extend(self.read_list(x0)?);
        self.x[0] = self.alloc_list(&items)?;
      }
      "first" => self.d[0] = self.read_list(x0)?.first().copied().unwrap_or(0.0),
      "rest" => {
        let items = self.read_list(x0)?;
        self.x[0] = self.alloc_list(items.get(1..).unwrap_or_default())?;
      }
      "append_elem" => {
        let mut items = self.read_list(x0)?;
        items.push(d0);
        self.x[0] = self.alloc_list(&items)?;
      }
      "list_count" => self.d[0] = self.read_list(x0)?.len() as f64,
      "print_list" => {
        let items = self.read_list(x0)?;
        let rendered: Vec<String> = items.into_iter().map(format_g).collect();
        self.stdout.push('(');
        self.stdout.push_str(&rendered.join(" "));
        self.stdout.push_str(")\n");
      }
      other => return Err(format!("call to unknown routine {other}")),
    }

    // Caller-saved registers are garbage after a call.
    for reg in 1..8 {
      self.d[reg] = f64::NAN;
    }
    for reg in 1..16 {
      self.x[reg] = 0xdead_beef;
    }
    Ok(())
  }
}

fn split_mnemonic(line: &str) -> (&str, &str) {
  match line.split_once(char::is_whitespace) {
    Some((head, rest)) => (head, rest.trim()),
    None => (line, ""),
  }
}

/// Split on commas that are not inside `[...]`.
fn split_operands(text: &str) -> Vec<String> {
  let mut out = Vec::new();
  let mut depth = 0;
  let mut current = String::new();
  for ch in text.chars() {
    match ch {
      '[' => depth += 1,
      ']' => depth -= 1,
      ',' if depth == 0 => {
        out.push(current.trim().to_string());
        current.clear();
        continue;
      }
      _ => {}
    }
    current.push(ch);
  }
  if !current.trim().is_empty() {
    out.push(current.trim().to_string());
  }
  out
}

fn imm(text: &str) -> Result<i64, String> {
  text
    .trim()
    .trim_start_matches('#')
    .parse()
    .map_err(|_| format!("bad immediate {text}"))
}

fn gpr(name: &str) -> Result<(bool, usize), String> {
  let (wide, digits) = match name.as_bytes().first() {
    Some(b'x') => (true, &name[1..]),
    Some(b'w') => (false, &name[1..]),
    _ => return Err(format!("not a general register: {name}")),
  };
  let idx: usize = digits
    .parse()
    .map_err(|_| format!("not a general register: {name}"))?;
  if idx > 30 {
    return Err(format!("not a general register: {name}"));
  }
  Ok((wide, idx))
}

fn dreg(name: &str) -> Result<usize, String> {
  name
    .strip_prefix('d')
    .and_then(|digits| digits.parse().ok())
    .filter(|&idx: &usize| idx < 32)
    .ok_or_else(|| format!("not a double register: {name}"))
}

fn unescape_asciz(text: &str) -> Result<Vec<u8>, String> {
  let inner = text
    .strip_prefix('"')
    .and_then(|t| t.strip_suffix('"'))
    .ok_or("unquoted .asciz")?;
  let bytes = inner.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'\\' {
      out.push(bytes[i]);
      i += 1;
      continue;
    }
    let escaped = *bytes.get(i + 1).ok_or("dangling backslash")?;
    match escaped {
      b'n' => out.push(b'\n'),
      b't' => out.push(b'\t'),
      b'"' => out.push(b'"'),
      b'\\' => out.push(b'\\'),
      b'0'..=b'7' => {
        let digits = &inner[i + 1..(i + 4).min(inner.len())];
        out.push(u8::from_str_radix(digits, 8).map_err(|e| e.to_string())?);
        i += 4;
        continue;
      }
      other => return Err(format!("unknown escape \\{}", other as char)),
    }
    i += 2;
  }
  Ok(out)
}
