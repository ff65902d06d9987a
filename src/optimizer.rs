//! Optional AST optimization passes.
//!
//! Two rewrites, applied bottom-up in a single pass:
//! - constant folding: any expression subtree whose leaves are all integer
//!   literals collapses to one literal, with 32-bit wrap-around semantics;
//! - dead-branch elimination: an `if` whose condition folds to a literal is
//!   inlined (nonzero) or dropped (zero).
//!
//! Folding is confluent and strictly shrinks the tree, so one pass reaches
//! the fixed point and running the pass again changes nothing.

use crate::parser::{BinaryOp, Block, Expr, Program, Stmt, UnaryOp};

/// Fold constant expressions and clean dead branches, in place.
pub fn optimize(program: &mut Program) {
  for func in &mut program.functions {
    opt_block(&mut func.body);
  }
}

fn opt_block(block: &mut Block) {
  let stmts = std::mem::take(&mut block.statements);
  let mut rewritten = Vec::with_capacity(stmts.len());
  for stmt in stmts {
    opt_stmt(stmt, &mut rewritten);
  }
  block.statements = rewritten;
}

/// Rewrite one statement into zero or one replacements appended to `out`.
/// Only `if` can vanish or change shape; `while` stays even when its
/// condition folds to zero.
fn opt_stmt(mut stmt: Stmt, out: &mut Vec<Stmt>) {
  match &mut stmt {
    Stmt::VarDecl { init, .. } => {
      if let Some(init) = init {
        fold_expr(init);
      }
    }
    Stmt::Assignment { value, .. } => {
      fold_expr(value);
    }
    Stmt::Return { value } => {
      fold_expr(value);
    }
    Stmt::If {
      condition,
      then_block,
    } => {
      // Fold the condition first, then recurse into the body
      let val = fold_expr(condition);
      opt_block(then_block);

      if let Some(val) = val {
        if val != 0 {
          // Always true: inline the block
          out.push(Stmt::Block(std::mem::take(then_block)));
        }
        // Always false: no replacement at all
        return;
      }
    }
    Stmt::While { condition, body } => {
      fold_expr(condition);
      opt_block(body);
    }
    Stmt::Block(block) => {
      opt_block(block);
    }
    Stmt::Expr { expression } => {
      fold_expr(expression);
    }
  }

  out.push(stmt);
}

/// Fold constants in place. Returns the value when the whole subtree is
/// constant, so callers can judge `if` conditions.
fn fold_expr(expr: &mut Expr) -> Option<i32> {
  let value = match expr {
    Expr::IntLiteral { value } => Some(*value),

    Expr::Identifier { .. } => None,

    Expr::Call { args, .. } => {
      // The call itself never folds; constant subtrees in arguments do.
      for arg in args {
        fold_expr(arg);
      }
      None
    }

    Expr::Unary { op, operand } => {
      let val = fold_expr(operand)?;
      Some(match op {
        UnaryOp::Negate => val.wrapping_neg(),
        UnaryOp::Not => (val == 0) as i32,
      })
    }

    Expr::Binary { op, left, right } => {
      let lval = fold_expr(left);
      let rval = fold_expr(right);
      match (lval, rval) {
        (Some(l), Some(r)) => eval_binary(*op, l, r),
        _ => None,
      }
    }
  };

  if let Some(val) = value
    && !matches!(expr, Expr::IntLiteral { .. })
  {
    *expr = Expr::IntLiteral { value: val };
  }

  value
}

/// Two's-complement evaluation of a binary operator on constants.
/// Division by a literal zero is left alone so the generated code keeps the
/// runtime trap.
fn eval_binary(op: BinaryOp, l: i32, r: i32) -> Option<i32> {
  match op {
    BinaryOp::Add => Some(l.wrapping_add(r)),
    BinaryOp::Sub => Some(l.wrapping_sub(r)),
    BinaryOp::Mul => Some(l.wrapping_mul(r)),
    BinaryOp::Div => (r != 0).then(|| l.wrapping_div(r)),
    BinaryOp::Eq => Some((l == r) as i32),
    BinaryOp::Ne => Some((l != r) as i32),
    BinaryOp::Lt => Some((l < r) as i32),
    BinaryOp::Gt => Some((l > r) as i32),
    BinaryOp::And => Some((l != 0 && r != 0) as i32),
    BinaryOp::Or => Some((l != 0 || r != 0) as i32),
  }
}
