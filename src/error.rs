//! Shared error utilities used across the compilation pipeline.
//!
//! Diagnostics are kept lightweight on purpose – a parse error carries the
//! line/column of the offending token, a codegen error only a message (the
//! source mapping is dropped once tokens become an AST). The `Display` forms
//! are exactly what the driver prints to stderr.

use snafu::Snafu;

use crate::tokenizer::Location;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("Parse error [{line}:{col}]: {message}"))]
  Parse {
    message: String,
    line: usize,
    col: usize,
  },

  #[snafu(display("Codegen error: {message}"))]
  Codegen { message: String },
}

impl CompileError {
  /// Construct a parse error anchored at a token location.
  pub fn parse(message: impl Into<String>, loc: Location) -> Self {
    Self::Parse {
      message: message.into(),
      line: loc.line,
      col: loc.col,
    }
  }

  /// Construct a codegen error. No location: name resolution happens after
  /// token positions have been discarded.
  pub fn codegen(message: impl Into<String>) -> Self {
    Self::Codegen {
      message: message.into(),
    }
  }
}
