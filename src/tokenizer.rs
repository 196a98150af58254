//! Lexical analysis: turns the raw source into a vector of tokens.
//!
//! The tokenizer knows nothing about forms or special names; it only splits
//! delimiters, numbers, symbols and string literals. Bad input does not stop
//! the scan. It becomes an `Error` token and the parser reports the first one
//! it reaches, so diagnostics always point at a real source position.

use std::fmt;

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
  LParen,
  RParen,
  LBracket,
  RBracket,
  Num(f64),
  Symbol,
  /// String literal with escapes already decoded.
  Str(String),
  Error(String),
  Eof,
}

/// Lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  /// Source slice that produced the token (empty for `Eof`).
  pub text: String,
  pub line: usize,
  pub column: usize,
  /// Byte offset of the first character, used for caret diagnostics.
  pub loc: usize,
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let kind = match &self.kind {
      TokenKind::LParen => "LEFT_PAREN",
      TokenKind::RParen => "RIGHT_PAREN",
      TokenKind::LBracket => "LEFT_BRACKET",
      TokenKind::RBracket => "RIGHT_BRACKET",
      TokenKind::Num(_) => "NUMBER",
      TokenKind::Symbol => "SYMBOL",
      TokenKind::Str(_) => "STRING",
      TokenKind::Error(_) => "ERROR",
      TokenKind::Eof => "EOF",
    };
    write!(f, "[{}:{}] {kind:<13}", self.line, self.column)?;
    match &self.kind {
      TokenKind::Error(message) => write!(f, " {message}"),
      TokenKind::Eof => Ok(()),
      _ => write!(f, " '{}'", self.text),
    }
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
///
/// Never fails today; the `Result` keeps the signature aligned with the rest
/// of the pipeline.
pub fn tokenize(source: &str) -> CompileResult<Vec<Token>> {
  let mut lexer = Lexer::new(source);
  let mut tokens = Vec::new();

  loop {
    let token = lexer.next_token();
    let done = token.kind == TokenKind::Eof;
    tokens.push(token);
    if done {
      break;
    }
  }

  Ok(tokens)
}

/// Return the first error token as a located diagnostic, if any.
pub fn first_error(tokens: &[Token], source: &str) -> Option<CompileError> {
  tokens.iter().find_map(|token| match &token.kind {
    TokenKind::Error(message) => Some(CompileError::at(source, token.loc, message.clone())),
    _ => None,
  })
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => t.text.clone(),
    },
    None => "EOF".to_string(),
  }
}

fn is_symbol_char(c: char) -> bool {
  c.is_ascii_alphanumeric()
    || matches!(
      c,
      '+' | '-' | '*' | '/' | '=' | '!' | '<' | '>' | '?' | '_' | '.'
    )
}

struct Lexer<'a> {
  source: &'a str,
  pos: usize,
  line: usize,
  column: usize,
}

impl<'a> Lexer<'a> {
  fn new(source: &'a str) -> Self {
    Self {
      source,
      pos: 0,
      line: 1,
      column: 1,
    }
  }

  fn peek(&self) -> Option<char> {
    self.source[self.pos..].chars().next()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.pos += c.len_utf8();
    if c == '\n' {
      self.line += 1;
      self.column = 1;
    } else {
      self.column += 1;
    }
    Some(c)
  }

  fn skip_trivia(&mut self) {
    while let Some(c) = self.peek() {
      match c {
        ' ' | '\t' | '\n' | '\r' | ',' => {
          self.bump();
        }
        ';' => {
          while let Some(c) = self.peek() {
            if c == '\n' {
              break;
            }
            self.bump();
          }
        }
        _ => break,
      }
    }
  }

  fn next_token(&mut self) -> Token {
    self.skip_trivia();

    let start = self.pos;
    let (line, column) = (self.line, self.column);
    let Some(c) = self.bump() else {
      return Token {
        kind: TokenKind::Eof,
        text: String::new(),
        line,
        column,
        loc: start,
      };
    };

    let kind = match c {
      '(' => TokenKind::LParen,
      ')' => TokenKind::RParen,
      '[' => TokenKind::LBracket,
      ']' => TokenKind::RBracket,
      '"' => self.string_literal(),
      '-' if self.peek().is_some_and(|n| n.is_ascii_digit()) => self.number(start),
      c if c.is_ascii_digit() => self.number(start),
      c if is_symbol_char(c) => {
        while self.peek().is_some_and(is_symbol_char) {
          self.bump();
        }
        TokenKind::Symbol
      }
      other => TokenKind::Error(format!("unexpected character '{other}'")),
    };

    Token {
      kind,
      text: self.source[start..self.pos].to_string(),
      line,
      column,
      loc: start,
    }
  }

  fn number(&mut self, start: usize) -> TokenKind {
    while self
      .peek()
      .is_some_and(|c| c.is_ascii_digit() || c == '.')
    {
      self.bump();
    }
    let text = &self.source[start..self.pos];
    match text.parse::<f64>() {
      Ok(value) if value.is_finite() => TokenKind::Num(value),
      Ok(_) => TokenKind::Error(format!("number literal out of range: {text}")),
      Err(err) => TokenKind::Error(format!("invalid number '{text}': {err}")),
    }
  }

  fn string_literal(&mut self) -> TokenKind {
    let mut value = String::new();
    loop {
      match self.bump() {
        None => return TokenKind::Error("unterminated string literal".to_string()),
        Some('"') => return TokenKind::Str(value),
        Some('\\') => match self.bump() {
          Some('n') => value.push('\n'),
          Some('t') => value.push('\t'),
          Some('\\') => value.push('\\'),
          Some('"') => value.push('"'),
          Some(other) => {
            // Resynchronise on the closing quote so the next token is sane.
            self.skip_rest_of_string();
            return TokenKind::Error(format!("unknown escape sequence '\\{other}'"));
          }
          None => return TokenKind::Error("unterminated string literal".to_string()),
        },
        Some(c) => value.push(c),
      }
    }
  }

  fn skip_rest_of_string(&mut self) {
    while let Some(c) = self.bump() {
      match c {
        '"' => break,
        '\\' => {
          self.bump();
        }
        _ => {}
      }
    }
  }
}
