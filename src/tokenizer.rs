//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer knows nothing about semantics beyond classifying words into
//! keywords, builtin type names and identifiers. Multi-character operators
//! are matched before single-character ones to avoid ambiguity.

use log::trace;

use crate::diagnostic::{Location, Reporter};
use crate::error::CompileResult;

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  LParen,
  RParen,
  Colon,
  Keyword,
  Type,
  Operator,
  Integer,
  Ident,
  Eof,
}

impl TokenKind {
  pub fn describe(self) -> &'static str {
    match self {
      TokenKind::LParen => "'('",
      TokenKind::RParen => "')'",
      TokenKind::Colon => "':'",
      TokenKind::Keyword => "keyword",
      TokenKind::Type => "type",
      TokenKind::Operator => "binary operator",
      TokenKind::Integer => "integer literal",
      TokenKind::Ident => "identifier",
      TokenKind::Eof => "EOF",
    }
  }
}

const KEYWORDS: &[&str] = &[
  "let", "defun", "exfun", "return", "if", "else", "while", "for", "typedef", "true", "false",
  "struct",
];

const BUILTIN_TYPES: &[&str] = &["void", "s64", "u64", "bool"];

const OPERATORS: &[&str] = &[
  ":=", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub location: Location,
  pub text: String,
}

impl Token {
  pub fn new(kind: TokenKind, location: Location, text: impl Into<String>) -> Self {
    Self {
      kind,
      location,
      text: text.into(),
    }
  }

  pub fn is(&self, kind: TokenKind, text: &str) -> bool {
    self.kind == kind && self.text == text
  }

  /// Human-friendly description used in diagnostics.
  pub fn describe(&self) -> String {
    match self.kind {
      TokenKind::Eof | TokenKind::LParen | TokenKind::RParen | TokenKind::Colon => {
        self.kind.describe().to_string()
      }
      kind => format!("{} '{}'", kind.describe(), self.text),
    }
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str, reporter: &Reporter) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;
  let mut line = 1;
  let mut column = 1;

  while i < bytes.len() {
    let c = bytes[i];
    if c == b'\n' {
      i += 1;
      line += 1;
      column = 1;
      continue;
    }

    if c == b' ' || c == b'\t' || c == b'\r' {
      i += 1;
      column += 1;
      continue;
    }

    // Comments run to the end of the line.
    if c == b';' {
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
      }
      continue;
    }

    let location = Location::new(line, column);
    let start = i;

    let negative = c == b'-' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
    if c.is_ascii_digit() || negative {
      if negative {
        i += 1;
      }
      if bytes[i] == b'0' {
        i += 1;
      } else {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
          i += 1;
        }
      }
      if negative && &input[start..i] == "-0" {
        // `-0` is not a literal; lex the minus as an operator instead.
        i = start;
      } else {
        if i < bytes.len() && bytes[i] == b'u' {
          i += 1;
        }
        push(&mut tokens, TokenKind::Integer, location, &input[start..i]);
        column += (i - start) as u32;
        continue;
      }
    }

    if let Some(op) = OPERATORS.iter().find(|op| input[i..].starts_with(*op)) {
      i += op.len();
      column += op.len() as u32;
      push(&mut tokens, TokenKind::Operator, location, op);
      continue;
    }

    if let Some(kind) = match c {
      b'(' => Some(TokenKind::LParen),
      b')' => Some(TokenKind::RParen),
      b':' => Some(TokenKind::Colon),
      _ => None,
    } {
      i += 1;
      column += 1;
      push(&mut tokens, kind, location, &input[start..i]);
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let word = &input[start..i];
      let kind = if KEYWORDS.contains(&word) {
        TokenKind::Keyword
      } else if BUILTIN_TYPES.contains(&word) {
        TokenKind::Type
      } else {
        TokenKind::Ident
      };
      column += (i - start) as u32;
      push(&mut tokens, kind, location, word);
      continue;
    }

    return Err(reporter.fatal(location, "unknown syntax"));
  }

  tokens.push(Token::new(TokenKind::Eof, Location::new(line, column), ""));
  Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, kind: TokenKind, location: Location, text: &str) {
  trace!("token {kind:?} '{text}' at {location}");
  tokens.push(Token::new(kind, location, text));
}

/// Lightweight cursor over the token vector with bounded lookahead.
///
/// Peeking or consuming past the end keeps yielding the `Eof` token.
pub struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  pub fn new(mut tokens: Vec<Token>) -> Self {
    if tokens.last().is_none_or(|token| token.kind != TokenKind::Eof) {
      let location = tokens.last().map(|token| token.location).unwrap_or_default();
      tokens.push(Token::new(TokenKind::Eof, location, ""));
    }
    Self { tokens, pos: 0 }
  }

  pub fn peek(&self, offset: usize) -> &Token {
    let last = self.tokens.len() - 1;
    &self.tokens[(self.pos + offset).min(last)]
  }

  pub fn consume(&mut self) -> Token {
    let token = self.peek(0).clone();
    if token.kind != TokenKind::Eof {
      self.pos += 1;
    }
    token
  }

  /// Consume the current token, reporting a fatal error if it is not of `kind`.
  pub fn expect(&mut self, kind: TokenKind, reporter: &Reporter) -> CompileResult<Token> {
    let token = self.peek(0);
    if token.kind != kind {
      return Err(reporter.fatal(
        token.location,
        format!("expected {}, got {}", kind.describe(), token.describe()),
      ));
    }
    Ok(self.consume())
  }

  pub fn is_eof(&self) -> bool {
    self.peek(0).kind == TokenKind::Eof
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lex(input: &str) -> Vec<Token> {
    tokenize(input, &Reporter::new("test")).unwrap()
  }

  fn kinds(input: &str) -> Vec<TokenKind> {
    lex(input).into_iter().map(|token| token.kind).collect()
  }

  #[test]
  fn classifies_words() {
    assert_eq!(
      kinds("(let s64 x)"),
      vec![
        TokenKind::LParen,
        TokenKind::Keyword,
        TokenKind::Type,
        TokenKind::Ident,
        TokenKind::RParen,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn keywords_need_a_word_boundary() {
    let tokens = lex("letter iffy");
    assert_eq!(tokens[0].kind, TokenKind::Ident);
    assert_eq!(tokens[0].text, "letter");
    assert_eq!(tokens[1].kind, TokenKind::Ident);
  }

  #[test]
  fn minus_is_an_operator_unless_a_digit_follows() {
    let tokens = lex("(- 5 -3)");
    assert_eq!(tokens[1].kind, TokenKind::Operator);
    assert_eq!(tokens[2].text, "5");
    assert_eq!(tokens[3].kind, TokenKind::Integer);
    assert_eq!(tokens[3].text, "-3");
  }

  #[test]
  fn prefers_longest_operator() {
    let tokens = lex(":= <= <");
    let texts: Vec<_> = tokens.iter().map(|token| token.text.as_str()).collect();
    assert_eq!(texts, vec![":=", "<=", "<", ""]);
    assert_eq!(lex("a: s64")[1].kind, TokenKind::Colon);
  }

  #[test]
  fn unsigned_suffix_is_part_of_the_literal() {
    let tokens = lex("42u 0");
    assert_eq!(tokens[0].text, "42u");
    assert_eq!(tokens[1].text, "0");
  }

  #[test]
  fn tracks_lines_and_columns_across_comments() {
    let tokens = lex("; header\n  (foo ; trailing\n\tbar)");
    assert_eq!(tokens[0].location, Location::new(2, 3));
    assert_eq!(tokens[1].location, Location::new(2, 4));
    assert_eq!(tokens[2].location, Location::new(3, 2));
  }

  #[test]
  fn unknown_characters_are_fatal() {
    let err = tokenize("(+ 1 $)", &Reporter::new("bad.lisp")).unwrap_err();
    assert_eq!(err.to_string(), "bad.lisp:1:6: fatal: unknown syntax");
  }

  #[test]
  fn stream_repeats_eof() {
    let mut stream = TokenStream::new(lex("x"));
    assert_eq!(stream.peek(5).kind, TokenKind::Eof);
    assert_eq!(stream.consume().text, "x");
    assert_eq!(stream.consume().kind, TokenKind::Eof);
    assert_eq!(stream.consume().kind, TokenKind::Eof);
    assert!(stream.is_eof());
  }

  #[test]
  fn expect_reports_mismatch() {
    let reporter = Reporter::new("t");
    let mut stream = TokenStream::new(lex(")"));
    let err = stream.expect(TokenKind::LParen, &reporter).unwrap_err();
    assert_eq!(err.to_string(), "t:1:1: fatal: expected '(', got ')'");
  }
}
