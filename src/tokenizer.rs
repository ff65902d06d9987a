//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer is intentionally forgiving – it never fails. Bytes it does
//! not recognise become one-byte `Unknown` tokens and the parser decides
//! what to do with them. Multi-character operators are matched before their
//! single-character prefixes to avoid ambiguity, and every lexeme is a
//! borrowed view into the source buffer.

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  EndOfFile,
  Unknown,
  IntLiteral,
  Identifier,

  // Keywords
  IntType,
  Return,
  If,
  While,

  // Operators
  Add,
  Sub,
  Mult,
  Div,
  Eq,
  EqCmp,
  NeCmp,
  LtCmp,
  GtCmp,
  AndCmp,
  OrCmp,
  Not,

  // Punctuation
  Semicolon,
  LParen,
  RParen,
  LBrace,
  RBrace,
  Comma,
}

/// 1-based position of the first byte of a lexeme. Lines split on `\n`;
/// every other byte advances the column by one (tabs are not expanded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
  pub line: usize,
  pub col: usize,
}

/// Thin wrapper for lexical information needed by later stages.
///
/// The lexeme borrows from the source buffer, so the buffer must outlive
/// the token vector. Nothing is copied at this stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
  pub kind: TokenKind,
  pub loc: Location,
  pub lexeme: &'a str,
}

/// Lex the input into a flat vector of tokens terminated by a single
/// `EndOfFile` marker at the post-last location.
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
  let mut scanner = Scanner::new(source);
  let mut tokens = Vec::new();

  loop {
    let token = scanner.next_token();
    let done = token.kind == TokenKind::EndOfFile;
    tokens.push(token);
    if done {
      break;
    }
  }

  tokens
}

/// Cursor over the source bytes with line/column bookkeeping.
struct Scanner<'a> {
  source: &'a str,
  bytes: &'a [u8],
  pos: usize,
  line: usize,
  col: usize,
}

impl<'a> Scanner<'a> {
  fn new(source: &'a str) -> Self {
    Self {
      source,
      bytes: source.as_bytes(),
      pos: 0,
      line: 1,
      col: 1,
    }
  }

  fn peek(&self) -> Option<u8> {
    self.bytes.get(self.pos).copied()
  }

  fn peek_next(&self) -> Option<u8> {
    self.bytes.get(self.pos + 1).copied()
  }

  fn advance(&mut self) -> Option<u8> {
    let byte = self.peek()?;
    self.pos += 1;
    if byte == b'\n' {
      self.line += 1;
      self.col = 1;
    } else {
      self.col += 1;
    }
    Some(byte)
  }

  fn location(&self) -> Location {
    Location {
      line: self.line,
      col: self.col,
    }
  }

  fn skip_whitespace(&mut self) {
    while let Some(byte) = self.peek() {
      if matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
        self.advance();
      } else {
        break;
      }
    }
  }

  fn next_token(&mut self) -> Token<'a> {
    self.skip_whitespace();

    let loc = self.location();
    let start = self.pos;

    let Some(byte) = self.peek() else {
      // Post-last location, empty lexeme.
      return Token {
        kind: TokenKind::EndOfFile,
        loc,
        lexeme: &self.source[start..],
      };
    };

    // Maximal run of digits
    if byte.is_ascii_digit() {
      while self.peek().is_some_and(|b| b.is_ascii_digit()) {
        self.advance();
      }
      return self.token(TokenKind::IntLiteral, loc, start);
    }

    // Maximal identifier run, then reclassify against the keyword table
    if byte.is_ascii_alphabetic() || byte == b'_' {
      while self
        .peek()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
      {
        self.advance();
      }
      let kind = match &self.source[start..self.pos] {
        "int" => TokenKind::IntType,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "while" => TokenKind::While,
        _ => TokenKind::Identifier,
      };
      return self.token(kind, loc, start);
    }

    // Operators and punctuation. Two-character operators win over their
    // one-character prefixes; a lone `&` or `|` is not in the language.
    self.advance();
    let kind = match byte {
      b'+' => TokenKind::Add,
      b'-' => TokenKind::Sub,
      b'*' => TokenKind::Mult,
      b'/' => TokenKind::Div,
      b'=' => self.two_char(b'=', TokenKind::EqCmp, TokenKind::Eq),
      b'!' => self.two_char(b'=', TokenKind::NeCmp, TokenKind::Not),
      b'&' => self.two_char(b'&', TokenKind::AndCmp, TokenKind::Unknown),
      b'|' => self.two_char(b'|', TokenKind::OrCmp, TokenKind::Unknown),
      b'<' => TokenKind::LtCmp,
      b'>' => TokenKind::GtCmp,
      b';' => TokenKind::Semicolon,
      b'(' => TokenKind::LParen,
      b')' => TokenKind::RParen,
      b'{' => TokenKind::LBrace,
      b'}' => TokenKind::RBrace,
      b',' => TokenKind::Comma,
      _ => TokenKind::Unknown,
    };
    self.token(kind, loc, start)
  }

  /// Consume the next byte and return `long` if it matches, else `short`.
  fn two_char(&mut self, expected: u8, long: TokenKind, short: TokenKind) -> TokenKind {
    if self.peek() == Some(expected) {
      self.advance();
      long
    } else {
      short
    }
  }

  fn token(&self, kind: TokenKind, loc: Location, start: usize) -> Token<'a> {
    Token {
      kind,
      loc,
      lexeme: &self.source[start..self.pos],
    }
  }
}
