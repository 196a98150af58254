//! Recursive-descent parser producing the s-expression tree.
//!
//! The grammar is tiny: a program is a sequence of forms, a form is an atom
//! or a delimited sequence of forms. A program with a single form is returned
//! as that form; anything else comes back wrapped in one top-level list.

use crate::ast::Node;
use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind, describe_token, first_error};

/// Parse a whole program, unwrapping it when it holds a single form.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Node> {
  let mut forms = parse_program(tokens, source)?;
  if forms.len() == 1 {
    return Ok(forms.remove(0));
  }
  Ok(Node::List(forms))
}

/// Parse a whole program into its top-level forms.
pub fn parse_program(tokens: Vec<Token>, source: &str) -> CompileResult<Vec<Node>> {
  if let Some(err) = first_error(&tokens, source) {
    return Err(err);
  }

  let mut stream = TokenStream::new(tokens, source);

  if stream.is_eof() {
    return Err(CompileError::at(source, 0, "program is empty"));
  }

  let mut forms = Vec::new();
  while !stream.is_eof() {
    forms.push(parse_form(&mut stream)?);
  }
  Ok(forms)
}

fn parse_form(stream: &mut TokenStream) -> CompileResult<Node> {
  let Some(token) = stream.advance() else {
    return Err(stream.error_at_end("unexpected end of input"));
  };

  match token.kind.clone() {
    TokenKind::LParen => parse_sequence(stream, token, TokenKind::RParen),
    TokenKind::LBracket => parse_sequence(stream, token, TokenKind::RBracket),
    TokenKind::Num(value) => Ok(Node::Number(value)),
    TokenKind::Symbol => Ok(Node::Symbol(token.text)),
    TokenKind::Str(value) => Ok(Node::Str(value)),
    TokenKind::RParen | TokenKind::RBracket => Err(CompileError::at(
      stream.source,
      token.loc,
      format!("unexpected \"{}\"", token.text),
    )),
    TokenKind::Error(message) => Err(CompileError::at(stream.source, token.loc, message)),
    TokenKind::Eof => Err(stream.error_at_end("unexpected end of input")),
  }
}

fn parse_sequence(stream: &mut TokenStream, open: Token, close: TokenKind) -> CompileResult<Node> {
  let mut items = Vec::new();

  loop {
    let next = stream.peek().map(|token| token.kind.clone());
    match next {
      Some(kind) if kind == close => {
        stream.advance();
        return Ok(Node::List(items));
      }
      Some(TokenKind::RParen | TokenKind::RBracket) => {
        let got = describe_token(stream.peek());
        let expected = if close == TokenKind::RParen { ")" } else { "]" };
        return Err(CompileError::at(
          stream.source,
          stream.loc(),
          format!("expected \"{expected}\" to close \"{}\", but got \"{got}\"", open.text),
        ));
      }
      Some(TokenKind::Eof) | None => {
        return Err(CompileError::at(
          stream.source,
          open.loc,
          format!("unclosed \"{}\"", open.text),
        ));
      }
      Some(_) => items.push(parse_form(stream)?),
    }
  }
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn advance(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned()?;
    self.pos += 1;
    Some(token)
  }

  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  fn error_at_end(&self, message: &str) -> CompileError {
    CompileError::at(self.source, self.source.len(), message)
  }

  fn is_eof(&self) -> bool {
    matches!(
      self.peek().map(|token| &token.kind),
      Some(TokenKind::Eof) | None
    )
  }
}
