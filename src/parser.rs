//! Recursive-descent parser producing the program AST.
//!
//! One grammar rule per precedence level, each delegating upward to the next
//! tighter one, so left-associative trees fall out naturally. Statements are
//! a thin layer above the expression ladder; the only lookahead anywhere is
//! the single token that separates `x = …;` from an expression statement.
//!
//! The parser owns all syntactic knowledge. It does not resolve names –
//! that happens in codegen, where unknown identifiers surface as errors.

use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind};

/// Longest accepted variable/function name, in bytes.
pub const MAX_IDENT_LEN: usize = 32;

/// Unary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Negate,
  Not,
}

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Gt,
  And,
  Or,
}

/// Expression tree. Every expression evaluates to a 32-bit signed integer;
/// child links are owning and unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
  IntLiteral {
    value: i32,
  },
  Identifier {
    name: String,
  },
  Unary {
    op: UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    left: Box<Expr>,
    right: Box<Expr>,
  },
  Call {
    name: String,
    args: Vec<Expr>,
  },
}

impl Expr {
  pub fn literal(value: i32) -> Self {
    Self::IntLiteral { value }
  }

  pub fn identifier(name: impl Into<String>) -> Self {
    Self::Identifier { name: name.into() }
  }

  pub fn unary(op: UnaryOp, operand: Expr) -> Self {
    Self::Unary {
      op,
      operand: Box::new(operand),
    }
  }

  pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
    Self::Binary {
      op,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
    Self::Call {
      name: name.into(),
      args,
    }
  }
}

/// Statements. `If` has no else branch and assignment is a statement, not
/// an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
  VarDecl {
    name: String,
    init: Option<Expr>,
  },
  Assignment {
    name: String,
    value: Expr,
  },
  Return {
    value: Expr,
  },
  If {
    condition: Expr,
    then_block: Block,
  },
  While {
    condition: Expr,
    body: Block,
  },
  Block(Block),
  Expr {
    expression: Expr,
  },
}

/// A brace-delimited statement sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
  pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
  pub name: String,
  pub params: Vec<String>,
  pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
  pub functions: Vec<Function>,
}

/// Parse a token stream into a `Program`.
///
/// The stream must carry the trailing `EndOfFile` marker that `tokenize`
/// produces; the parser leans on it instead of bounds checks.
pub fn parse<'a>(tokens: &'a [Token<'a>]) -> CompileResult<Program> {
  debug_assert!(
    matches!(tokens.last().map(|t| t.kind), Some(TokenKind::EndOfFile)),
    "token stream must end with EndOfFile"
  );

  let mut parser = Parser { tokens, pos: 0 };
  let mut functions = Vec::new();
  while !parser.is_at_end() {
    functions.push(parser.function()?);
  }

  Ok(Program { functions })
}

/// Cursor over the token slice. Tokens are `Copy`, so navigation hands them
/// out by value and nothing here fights the borrow checker.
struct Parser<'a> {
  tokens: &'a [Token<'a>],
  pos: usize,
}

impl<'a> Parser<'a> {
  // ----- Token navigation -----

  fn peek(&self) -> Token<'a> {
    self.tokens[self.pos]
  }

  fn previous(&self) -> Token<'a> {
    self.tokens[self.pos - 1]
  }

  fn is_at_end(&self) -> bool {
    self.peek().kind == TokenKind::EndOfFile
  }

  fn advance(&mut self) -> Token<'a> {
    if !self.is_at_end() {
      self.pos += 1;
    }
    self.previous()
  }

  fn check(&self, kind: TokenKind) -> bool {
    !self.is_at_end() && self.peek().kind == kind
  }

  /// Consume the current token if it has the given kind.
  fn eat(&mut self, kind: TokenKind) -> bool {
    if self.check(kind) {
      self.advance();
      return true;
    }
    false
  }

  fn expect(&mut self, kind: TokenKind, msg: &str) -> CompileResult<Token<'a>> {
    if self.check(kind) {
      return Ok(self.advance());
    }
    Err(CompileError::parse(msg, self.peek().loc))
  }

  // ----- Expressions -----

  fn expression(&mut self) -> CompileResult<Expr> {
    self.logic_or()
  }

  fn logic_or(&mut self) -> CompileResult<Expr> {
    let mut left = self.logic_and()?;

    while self.eat(TokenKind::OrCmp) {
      let right = self.logic_and()?;
      left = Expr::binary(BinaryOp::Or, left, right);
    }

    Ok(left)
  }

  fn logic_and(&mut self) -> CompileResult<Expr> {
    let mut left = self.comparison()?;

    while self.eat(TokenKind::AndCmp) {
      let right = self.comparison()?;
      left = Expr::binary(BinaryOp::And, left, right);
    }

    Ok(left)
  }

  fn comparison(&mut self) -> CompileResult<Expr> {
    let mut left = self.addition()?;

    loop {
      let op = match self.peek().kind {
        TokenKind::EqCmp => BinaryOp::Eq,
        TokenKind::NeCmp => BinaryOp::Ne,
        TokenKind::LtCmp => BinaryOp::Lt,
        TokenKind::GtCmp => BinaryOp::Gt,
        _ => break,
      };
      self.advance();
      let right = self.addition()?;
      left = Expr::binary(op, left, right);
    }

    Ok(left)
  }

  fn addition(&mut self) -> CompileResult<Expr> {
    let mut left = self.multiplication()?;

    loop {
      let op = match self.peek().kind {
        TokenKind::Add => BinaryOp::Add,
        TokenKind::Sub => BinaryOp::Sub,
        _ => break,
      };
      self.advance();
      let right = self.multiplication()?;
      left = Expr::binary(op, left, right);
    }

    Ok(left)
  }

  fn multiplication(&mut self) -> CompileResult<Expr> {
    let mut left = self.unary()?;

    loop {
      let op = match self.peek().kind {
        TokenKind::Mult => BinaryOp::Mul,
        TokenKind::Div => BinaryOp::Div,
        _ => break,
      };
      self.advance();
      let right = self.unary()?;
      left = Expr::binary(op, left, right);
    }

    Ok(left)
  }

  fn unary(&mut self) -> CompileResult<Expr> {
    if self.eat(TokenKind::Sub) {
      let operand = self.unary()?;
      return Ok(Expr::unary(UnaryOp::Negate, operand));
    }

    if self.eat(TokenKind::Not) {
      let operand = self.unary()?;
      return Ok(Expr::unary(UnaryOp::Not, operand));
    }

    self.primary()
  }

  fn primary(&mut self) -> CompileResult<Expr> {
    // Integer literal
    if self.eat(TokenKind::IntLiteral) {
      let token = self.previous();
      let value = token
        .lexeme
        .parse::<i32>()
        .map_err(|_| CompileError::parse("integer literal out of range", token.loc))?;
      return Ok(Expr::IntLiteral { value });
    }

    // Identifier, or a call when a '(' follows
    if self.eat(TokenKind::Identifier) {
      let name = self.previous().lexeme.to_string();

      if self.eat(TokenKind::LParen) {
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
          loop {
            args.push(self.expression()?);
            if !self.eat(TokenKind::Comma) {
              break;
            }
          }
        }
        self.expect(TokenKind::RParen, "expected ')' after arguments")?;
        return Ok(Expr::Call { name, args });
      }

      return Ok(Expr::Identifier { name });
    }

    // Parenthesized expression
    if self.eat(TokenKind::LParen) {
      let expr = self.expression()?;
      self.expect(TokenKind::RParen, "expected ')' after expression")?;
      return Ok(expr);
    }

    Err(CompileError::parse("expected expression", self.peek().loc))
  }

  // ----- Statements -----

  fn statement(&mut self) -> CompileResult<Stmt> {
    match self.peek().kind {
      TokenKind::IntType => self.declaration(),
      TokenKind::Return => self.return_statement(),
      TokenKind::If => self.if_statement(),
      TokenKind::While => self.while_statement(),
      TokenKind::LBrace => Ok(Stmt::Block(self.block()?)),
      _ => self.assignment_or_expr_stmt(),
    }
  }

  fn declaration(&mut self) -> CompileResult<Stmt> {
    self.expect(TokenKind::IntType, "expected 'int'")?;

    let name_tok = self.expect(TokenKind::Identifier, "expected variable name")?;
    if name_tok.lexeme.len() > MAX_IDENT_LEN {
      return Err(CompileError::parse(
        "identifier exceeds maximum length",
        name_tok.loc,
      ));
    }
    let name = name_tok.lexeme.to_string();

    let init = if self.eat(TokenKind::Eq) {
      Some(self.expression()?)
    } else {
      None
    };

    self.expect(TokenKind::Semicolon, "expected ';' after declaration")?;

    Ok(Stmt::VarDecl { name, init })
  }

  fn assignment_or_expr_stmt(&mut self) -> CompileResult<Stmt> {
    // Lookahead: identifier followed by '=' means assignment
    if self.check(TokenKind::Identifier)
      && self.pos + 1 < self.tokens.len()
      && self.tokens[self.pos + 1].kind == TokenKind::Eq
    {
      let name = self.advance().lexeme.to_string();
      self.advance(); // consume '='
      let value = self.expression()?;
      self.expect(TokenKind::Semicolon, "expected ';' after assignment")?;
      return Ok(Stmt::Assignment { name, value });
    }

    let expression = self.expression()?;
    self.expect(TokenKind::Semicolon, "expected ';' after expression")?;
    Ok(Stmt::Expr { expression })
  }

  fn return_statement(&mut self) -> CompileResult<Stmt> {
    self.expect(TokenKind::Return, "expected 'return'")?;
    let value = self.expression()?;
    self.expect(TokenKind::Semicolon, "expected ';' after return value")?;
    Ok(Stmt::Return { value })
  }

  fn if_statement(&mut self) -> CompileResult<Stmt> {
    self.expect(TokenKind::If, "expected 'if'")?;
    self.expect(TokenKind::LParen, "expected '(' after 'if'")?;
    let condition = self.expression()?;
    self.expect(TokenKind::RParen, "expected ')' after if condition")?;
    let then_block = self.block()?;
    Ok(Stmt::If {
      condition,
      then_block,
    })
  }

  fn while_statement(&mut self) -> CompileResult<Stmt> {
    self.expect(TokenKind::While, "expected 'while'")?;
    self.expect(TokenKind::LParen, "expected '(' after 'while'")?;
    let condition = self.expression()?;
    self.expect(TokenKind::RParen, "expected ')' after while condition")?;
    let body = self.block()?;
    Ok(Stmt::While { condition, body })
  }

  fn block(&mut self) -> CompileResult<Block> {
    self.expect(TokenKind::LBrace, "expected '{'")?;

    let mut statements = Vec::new();
    while !self.check(TokenKind::RBrace) && !self.is_at_end() {
      statements.push(self.statement()?);
    }

    self.expect(TokenKind::RBrace, "expected '}'")?;

    Ok(Block { statements })
  }

  // ----- Functions -----

  fn function(&mut self) -> CompileResult<Function> {
    self.expect(TokenKind::IntType, "expected 'int' return type")?;

    let name_tok = self.expect(TokenKind::Identifier, "expected function name")?;
    if name_tok.lexeme.len() > MAX_IDENT_LEN {
      return Err(CompileError::parse(
        "function name exceeds maximum length",
        name_tok.loc,
      ));
    }
    let name = name_tok.lexeme.to_string();

    self.expect(TokenKind::LParen, "expected '(' after function name")?;

    let mut params = Vec::new();
    if !self.check(TokenKind::RParen) {
      loop {
        self.expect(TokenKind::IntType, "expected 'int'")?;
        let param_tok = self.expect(TokenKind::Identifier, "expected parameter name")?;
        if param_tok.lexeme.len() > MAX_IDENT_LEN {
          return Err(CompileError::parse(
            "identifier exceeds maximum length",
            param_tok.loc,
          ));
        }
        params.push(param_tok.lexeme.to_string());
        if !self.eat(TokenKind::Comma) {
          break;
        }
      }
    }

    self.expect(TokenKind::RParen, "expected ')' after parameters")?;

    let body = self.block()?;

    Ok(Function { name, params, body })
  }
}
