//! Deduplicating literal pools flushed into the data section.
//!
//! Numbers are keyed by their IEEE-754 bit pattern, strings by content. A
//! repeat insertion hands back the label assigned the first time, so every
//! distinct literal has exactly one data entry. Label numbers are drawn from
//! the caller's counter, the same one `if` labels come from.

use std::collections::HashMap;

/// Monotonic label counter shared by pools and control flow.
#[derive(Debug, Default)]
pub struct LabelCounter(usize);

impl LabelCounter {
  pub fn next(&mut self) -> usize {
    let n = self.0;
    self.0 += 1;
    n
  }
}

#[derive(Debug, Default)]
pub struct NumberPool {
  entries: Vec<(String, f64)>,
  by_bits: HashMap<u64, usize>,
}

impl NumberPool {
  /// Label for `value`, allocating one on first sight.
  pub fn intern(&mut self, value: f64, counter: &mut LabelCounter) -> &str {
    let index = match self.by_bits.get(&value.to_bits()) {
      Some(&index) => index,
      None => {
        let index = self.entries.len();
        self
          .entries
          .push((format!(".L_const_{}", counter.next()), value));
        self.by_bits.insert(value.to_bits(), index);
        index
      }
    };
    &self.entries[index].0
  }

  /// `(label, value)` pairs in first-insertion order.
  pub fn entries(&self) -> impl Iterator<Item = (&str, f64)> {
    self
      .entries
      .iter()
      .map(|(label, value)| (label.as_str(), *value))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[derive(Debug, Default)]
pub struct StringPool {
  entries: Vec<(String, String)>,
  by_content: HashMap<String, usize>,
}

impl StringPool {
  pub fn intern(&mut self, value: &str, counter: &mut LabelCounter) -> &str {
    let index = match self.by_content.get(value) {
      Some(&index) => index,
      None => {
        let index = self.entries.len();
        self
          .entries
          .push((format!(".L_str_{}", counter.next()), value.to_string()));
        self.by_content.insert(value.to_string(), index);
        index
      }
    };
    &self.entries[index].0
  }

  pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .entries
      .iter()
      .map(|(label, value)| (label.as_str(), value.as_str()))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
