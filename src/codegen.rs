//! Code generation: lower the AST into x86-64 assembly, GAS Intel syntax.
//!
//! Single pass, syntax-directed. Expression values live in a pool of three
//! callee-saved scratch registers and spill to the runtime stack when the
//! pool runs dry; locals and parameters are homed to 64-bit stack slots
//! below `rbp` and accessed through their low 32 bits. The System V AMD64
//! convention covers the first six integer arguments, which is also the
//! hard limit on parameters and call arguments.

use std::collections::HashMap;

use crate::error::{CompileError, CompileResult};
use crate::parser::{BinaryOp, Block, Expr, Function, Program, Stmt, UnaryOp};

/// Callee-saved scratch registers. Three slots cover a binary operator with
/// one pending value; anything deeper spills.
const SCRATCH_REGS: [&str; 3] = ["rbx", "r12", "r13"];

/// System V integer argument registers, in parameter order.
const ARG_REGS_32: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
const ARG_REGS_64: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

const MAX_CALL_ARGS: usize = 6;

/// 32-bit name of a scratch register.
fn reg32(reg64: &str) -> &'static str {
  match reg64 {
    "rbx" => "ebx",
    "r12" => "r12d",
    "r13" => "r13d",
    _ => unreachable!("not a scratch register: {reg64}"),
  }
}

/// Where an expression result lives: a scratch register, or spilled on top
/// of the runtime stack (pushed as a 64-bit value).
type ExprValue = Option<&'static str>;

/// Translates a whole program into assembly text.
///
/// Construction runs the full translation; `get_assembly` only renders the
/// accumulated lines. The label counter is per-instance and shared by all
/// functions of one compilation.
#[derive(Debug)]
pub struct Codegen {
  label_counter: usize,
  next_var_offset: i64,
  var_offsets: HashMap<String, i64>,
  reg_used: [bool; 3],
  epilogue_label: String,
  lines: Vec<String>,
}

impl Codegen {
  pub fn new(program: &Program) -> CompileResult<Self> {
    if !program.functions.iter().any(|f| f.name == "main") {
      return Err(CompileError::codegen("No entry found"));
    }

    let mut codegen = Self {
      label_counter: 2,
      next_var_offset: 0,
      var_offsets: HashMap::new(),
      reg_used: [false; 3],
      epilogue_label: String::new(),
      lines: Vec::new(),
    };

    for func in &program.functions {
      codegen.gen_function(func)?;
    }

    Ok(codegen)
  }

  /// Render the finished assembly. Header, blank line, then the function
  /// bodies joined with `\n` – no trailing newline.
  pub fn get_assembly(&self) -> String {
    let mut out = String::from(".intel_syntax noprefix\n.global main\n\n");
    out.push_str(&self.lines.join("\n"));
    out
  }

  fn emit(&mut self, line: impl Into<String>) {
    self.lines.push(line.into());
  }

  /// Labels 0 and 1 are reserved; the counter starts at 2 and never resets.
  fn next_label(&mut self) -> usize {
    let id = self.label_counter;
    self.label_counter += 1;
    id
  }

  /// First free scratch register, marked busy. `None` when the pool is full.
  fn alloc_reg(&mut self) -> ExprValue {
    for (i, used) in self.reg_used.iter_mut().enumerate() {
      if !*used {
        *used = true;
        return Some(SCRATCH_REGS[i]);
      }
    }
    None
  }

  fn free_reg(&mut self, reg: &str) {
    if let Some(i) = SCRATCH_REGS.iter().position(|&r| r == reg) {
      self.reg_used[i] = false;
    }
  }

  /// Allocate the next stack slot for `name` and grow the frame. Rebinding
  /// an existing name gets a fresh slot; the function scope is flat.
  fn alloc_slot(&mut self, name: &str) -> i64 {
    self.next_var_offset -= 8;
    self.var_offsets.insert(name.to_string(), self.next_var_offset);
    self.emit("    sub rsp, 8");
    self.next_var_offset
  }

  fn var_offset(&self, name: &str) -> CompileResult<i64> {
    self
      .var_offsets
      .get(name)
      .copied()
      .ok_or_else(|| CompileError::codegen(format!("Unknown variable '{name}'")))
  }

  // ----- Functions -----

  fn gen_function(&mut self, func: &Function) -> CompileResult<()> {
    // Reset per-function state
    self.var_offsets.clear();
    self.next_var_offset = -24; // saved rbx/r12/r13 occupy [-24, -8]
    self.reg_used = [false; 3];
    self.epilogue_label = format!(".Lfunc_{}", self.next_label());

    self.emit(format!("{}:", func.name));

    // Prologue: save the frame pointer and all three scratch registers.
    // The epilogue's frame math assumes all three slots exist, so they are
    // saved even when the body never touches r12 or r13.
    self.emit("    push rbp");
    self.emit("    mov rbp, rsp");
    self.emit("    push rbx");
    self.emit("    push r12");
    self.emit("    push r13");

    if func.params.len() > MAX_CALL_ARGS {
      return Err(CompileError::codegen(format!(
        "Function '{}' has more than {MAX_CALL_ARGS} parameters",
        func.name
      )));
    }

    // Home each incoming argument in a fresh stack slot. The upper half of
    // the slot is never written; all reads go through the low 32 bits.
    for (i, param) in func.params.iter().enumerate() {
      let offset = self.alloc_slot(param);
      self.emit(format!(
        "    mov DWORD PTR [rbp + {offset}], {}",
        ARG_REGS_32[i]
      ));
    }

    self.gen_block(&func.body)?;

    // Epilogue: the common return trampoline every `return` jumps to
    let label = self.epilogue_label.clone();
    self.emit(format!("{label}:"));
    self.emit("    lea rsp, [rbp - 24]");
    self.emit("    pop r13");
    self.emit("    pop r12");
    self.emit("    pop rbx");
    self.emit("    pop rbp");
    self.emit("    ret");

    Ok(())
  }

  fn gen_block(&mut self, block: &Block) -> CompileResult<()> {
    for stmt in &block.statements {
      self.gen_stmt(stmt)?;
    }
    Ok(())
  }

  // ----- Statements -----

  fn gen_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
    match stmt {
      Stmt::Return { value } => {
        match self.gen_expr(value)? {
          Some(reg) => {
            self.emit(format!("    mov eax, {}", reg32(reg)));
            self.free_reg(reg);
          }
          None => self.emit("    pop rax"),
        }
        let label = self.epilogue_label.clone();
        self.emit(format!("    jmp {label}"));
      }

      Stmt::VarDecl { name, init } => {
        let offset = self.alloc_slot(name);
        if let Some(init) = init {
          self.store_to_slot(init, offset)?;
        }
      }

      Stmt::Assignment { name, value } => {
        let offset = self.var_offset(name)?;
        self.store_to_slot(value, offset)?;
      }

      Stmt::If {
        condition,
        then_block,
      } => {
        let else_label = self.next_label();
        let end_label = self.next_label();

        self.gen_condition(condition)?;
        self.emit(format!("    je .L{else_label}"));

        self.gen_block(then_block)?;
        self.emit(format!("    jmp .L{end_label}"));

        // No else clause in the language; both labels are still emitted so
        // every `if` has the same shape.
        self.emit(format!(".L{else_label}:"));
        self.emit(format!(".L{end_label}:"));
      }

      Stmt::While { condition, body } => {
        let loop_label = self.next_label();
        let end_label = self.next_label();

        self.emit(format!(".L{loop_label}:"));
        self.gen_condition(condition)?;
        self.emit(format!("    je .L{end_label}"));

        self.gen_block(body)?;
        self.emit(format!("    jmp .L{loop_label}"));

        self.emit(format!(".L{end_label}:"));
      }

      Stmt::Block(block) => self.gen_block(block)?,

      Stmt::Expr { expression } => match self.gen_expr(expression)? {
        Some(reg) => self.free_reg(reg),
        None => self.emit("    pop rax"),
      },
    }

    Ok(())
  }

  /// Evaluate `value` and store its low 32 bits into the slot at `offset`.
  fn store_to_slot(&mut self, value: &Expr, offset: i64) -> CompileResult<()> {
    match self.gen_expr(value)? {
      Some(reg) => {
        self.emit(format!(
          "    mov DWORD PTR [rbp + {offset}], {}",
          reg32(reg)
        ));
        self.free_reg(reg);
      }
      None => {
        self.emit("    pop rax");
        self.emit(format!("    mov DWORD PTR [rbp + {offset}], eax"));
      }
    }
    Ok(())
  }

  /// Evaluate a branch condition and set ZF from it.
  fn gen_condition(&mut self, condition: &Expr) -> CompileResult<()> {
    match self.gen_expr(condition)? {
      Some(reg) => {
        let r = reg32(reg);
        self.emit(format!("    test {r}, {r}"));
        self.free_reg(reg);
      }
      None => {
        self.emit("    pop rax");
        self.emit("    test eax, eax");
      }
    }
    Ok(())
  }

  // ----- Expressions -----

  /// Evaluate an expression. The result is either parked in a scratch
  /// register or, when the pool was full, pushed on the runtime stack.
  fn gen_expr(&mut self, expr: &Expr) -> CompileResult<ExprValue> {
    match expr {
      Expr::IntLiteral { value } => {
        let dest = self.alloc_reg();
        match dest {
          Some(reg) => self.emit(format!("    mov {}, {value}", reg32(reg))),
          None => self.emit(format!("    push {value}")),
        }
        Ok(dest)
      }

      Expr::Identifier { name } => {
        let offset = self.var_offset(name)?;
        let dest = self.alloc_reg();
        match dest {
          Some(reg) => self.emit(format!(
            "    mov {}, DWORD PTR [rbp + {offset}]",
            reg32(reg)
          )),
          None => {
            self.emit(format!("    mov eax, DWORD PTR [rbp + {offset}]"));
            self.emit("    push rax");
          }
        }
        Ok(dest)
      }

      Expr::Unary { op, operand } => {
        // Operand lands in eax regardless of where it was evaluated to
        match self.gen_expr(operand)? {
          Some(reg) => {
            self.emit(format!("    mov eax, {}", reg32(reg)));
            self.free_reg(reg);
          }
          None => self.emit("    pop rax"),
        }

        match op {
          UnaryOp::Negate => self.emit("    neg eax"),
          UnaryOp::Not => {
            self.emit("    test eax, eax");
            self.emit("    sete al");
            self.emit("    movzx eax, al");
          }
        }

        Ok(self.home_result())
      }

      Expr::Binary { op, left, right } => {
        // Left first, then right; either result may spill while the other
        // stage runs.
        let left_val = self.gen_expr(left)?;
        let right_val = self.gen_expr(right)?;

        // Stage right in ecx, then left in eax. Right pops first: when both
        // spilled, right was pushed last and sits on top.
        match right_val {
          Some(reg) => {
            self.emit(format!("    mov ecx, {}", reg32(reg)));
            self.free_reg(reg);
          }
          None => self.emit("    pop rcx"),
        }
        match left_val {
          Some(reg) => {
            self.emit(format!("    mov eax, {}", reg32(reg)));
            self.free_reg(reg);
          }
          None => self.emit("    pop rax"),
        }

        match op {
          BinaryOp::Add => self.emit("    add eax, ecx"),
          BinaryOp::Sub => self.emit("    sub eax, ecx"),
          BinaryOp::Mul => self.emit("    imul eax, ecx"),
          BinaryOp::Div => {
            self.emit("    cdq");
            self.emit("    idiv ecx");
          }
          BinaryOp::Eq => self.emit_compare("sete"),
          BinaryOp::Ne => self.emit_compare("setne"),
          BinaryOp::Lt => self.emit_compare("setl"),
          BinaryOp::Gt => self.emit_compare("setg"),
          BinaryOp::And => {
            // Both operands were evaluated already; normalize each to 0/1
            // and combine. No short-circuiting in this language.
            self.emit("    test eax, eax");
            self.emit("    setne al");
            self.emit("    test ecx, ecx");
            self.emit("    setne cl");
            self.emit("    and al, cl");
            self.emit("    movzx eax, al");
          }
          BinaryOp::Or => {
            self.emit("    or eax, ecx");
            self.emit("    test eax, eax");
            self.emit("    setne al");
            self.emit("    movzx eax, al");
          }
        }

        Ok(self.home_result())
      }

      Expr::Call { name, args } => {
        if args.len() > MAX_CALL_ARGS {
          return Err(CompileError::codegen(format!(
            "Call to '{name}' has more than {MAX_CALL_ARGS} arguments"
          )));
        }

        // Evaluate left to right, parking every value on the runtime stack
        // so nested calls cannot exhaust the pool. A spilled result is
        // already there.
        for arg in args {
          if let Some(reg) = self.gen_expr(arg)? {
            self.emit(format!("    push {reg}"));
            self.free_reg(reg);
          }
        }

        // Pop into the ABI registers in reverse: the last argument is on top
        for i in (0..args.len()).rev() {
          self.emit(format!("    pop {}", ARG_REGS_64[i]));
        }

        self.emit(format!("    call {name}"));

        Ok(self.home_result())
      }
    }
  }

  /// `cmp` + setcc + zero-extend, for the comparison operators.
  fn emit_compare(&mut self, setcc: &str) {
    self.emit("    cmp eax, ecx");
    self.emit(format!("    {setcc} al"));
    self.emit("    movzx eax, al");
  }

  /// Move a result out of eax into a scratch register, or push it when the
  /// pool is full.
  fn home_result(&mut self) -> ExprValue {
    let dest = self.alloc_reg();
    match dest {
      Some(reg) => self.emit(format!("    mov {}, eax", reg32(reg))),
      None => self.emit("    push rax"),
    }
    dest
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn assembly(source: &str) -> String {
    let tokens = tokenize(source);
    let program = parse(&tokens).expect("parse failed");
    Codegen::new(&program).expect("codegen failed").get_assembly()
  }

  fn gen_error(source: &str) -> CompileError {
    let tokens = tokenize(source);
    let program = parse(&tokens).expect("parse failed");
    Codegen::new(&program).expect_err("expected a codegen error")
  }

  /// All `.L`-prefixed label definitions, in emission order.
  fn label_defs(asm: &str) -> Vec<&str> {
    asm
      .lines()
      .filter(|l| l.starts_with(".L") && l.ends_with(':'))
      .collect()
  }

  #[test]
  fn golden_return_42() {
    let expected = [
      ".intel_syntax noprefix",
      ".global main",
      "",
      "main:",
      "    push rbp",
      "    mov rbp, rsp",
      "    push rbx",
      "    push r12",
      "    push r13",
      "    mov ebx, 42",
      "    mov eax, ebx",
      "    jmp .Lfunc_2",
      ".Lfunc_2:",
      "    lea rsp, [rbp - 24]",
      "    pop r13",
      "    pop r12",
      "    pop rbx",
      "    pop rbp",
      "    ret",
    ]
    .join("\n");
    assert_eq!(assembly("int main () { return 42; }"), expected);
  }

  #[test]
  fn no_trailing_newline() {
    let asm = assembly("int main () { return 0; }");
    assert!(!asm.ends_with('\n'));
    assert!(asm.ends_with("    ret"));
  }

  #[test]
  fn header_lines() {
    let asm = assembly("int main () { return 0; }");
    assert!(asm.starts_with(".intel_syntax noprefix\n.global main\n\nmain:"));
  }

  #[test]
  fn parameters_are_homed_in_order() {
    let asm = assembly(
      "int add (int a, int b) { return a + b; } int main () { return add (1, 2); }",
    );
    assert!(asm.contains("    mov DWORD PTR [rbp + -32], edi"));
    assert!(asm.contains("    mov DWORD PTR [rbp + -40], esi"));
    // Reads come back through the same slots
    assert!(asm.contains("    mov ebx, DWORD PTR [rbp + -32]"));
    assert!(asm.contains("    mov r12d, DWORD PTR [rbp + -40]"));
  }

  #[test]
  fn six_parameters_compile() {
    let asm = assembly(
      "int f (int a, int b, int c, int d, int e, int g) { return g; } \
       int main () { return f (1, 2, 3, 4, 5, 6); }",
    );
    assert!(asm.contains("    mov DWORD PTR [rbp + -72], r9d"));
  }

  #[test]
  fn seven_parameters_are_rejected() {
    let err = gen_error(
      "int f (int a, int b, int c, int d, int e, int g, int h) { return 0; } \
       int main () { return 0; }",
    );
    assert_eq!(
      err.to_string(),
      "Codegen error: Function 'f' has more than 6 parameters"
    );
  }

  #[test]
  fn seven_arguments_are_rejected() {
    let err = gen_error("int main () { return f (1, 2, 3, 4, 5, 6, 7); }");
    assert_eq!(
      err.to_string(),
      "Codegen error: Call to 'f' has more than 6 arguments"
    );
  }

  #[test]
  fn missing_main_is_rejected() {
    let err = gen_error("int f () { return 0; }");
    assert_eq!(err.to_string(), "Codegen error: No entry found");
  }

  #[test]
  fn unknown_identifier_is_rejected() {
    let err = gen_error("int main () { return x; }");
    assert_eq!(err.to_string(), "Codegen error: Unknown variable 'x'");
  }

  #[test]
  fn assignment_to_unknown_name_is_rejected() {
    let err = gen_error("int main () { x = 1; return 0; }");
    assert_eq!(err.to_string(), "Codegen error: Unknown variable 'x'");
  }

  #[test]
  fn if_emits_adjacent_labels() {
    let asm = assembly("int main () { if (1) { return 1; } return 2; }");
    // else and end labels back to back, uniform shape with no else clause
    assert!(asm.contains(".L3:\n.L4:"));
    assert!(asm.contains("    je .L3"));
    assert!(asm.contains("    jmp .L4"));
  }

  #[test]
  fn while_emits_loop_shape() {
    let asm = assembly("int main () { int x = 0; while (x < 3) { x = x + 1; } return x; }");
    assert!(asm.contains(".L3:"));
    assert!(asm.contains("    je .L4"));
    assert!(asm.contains("    jmp .L3"));
    assert!(asm.contains(".L4:"));
    // Loop entry label precedes the backward jump
    let entry = asm.find(".L3:").unwrap();
    let back = asm.find("    jmp .L3").unwrap();
    assert!(entry < back);
  }

  #[test]
  fn labels_are_unique_across_output() {
    let asm = assembly(
      "int f (int x) { if (x) { return 1; } while (x) { x = 0; } return x; } \
       int main () { if (0) { return f (1); } return f (0); }",
    );
    let mut labels = label_defs(&asm);
    let total = labels.len();
    labels.sort();
    labels.dedup();
    assert_eq!(labels.len(), total, "duplicate label in:\n{asm}");
  }

  #[test]
  fn label_counter_is_shared_across_functions() {
    let asm = assembly("int f () { return 1; } int main () { return f (); }");
    assert!(asm.contains(".Lfunc_2:"));
    assert!(asm.contains(".Lfunc_3:"));
  }

  #[test]
  fn every_return_jumps_to_the_one_epilogue() {
    let asm = assembly("int main () { if (1) { return 1; } return 2; }");
    let jumps = asm.matches("    jmp .Lfunc_2").count();
    assert_eq!(jumps, 2);
    assert_eq!(asm.matches(".Lfunc_2:").count(), 1);
  }

  #[test]
  fn division_goes_through_eax() {
    let asm = assembly("int main () { return 7 / 2; }");
    assert!(asm.contains("    mov ecx, r12d\n    mov eax, ebx\n    cdq\n    idiv ecx"));
  }

  #[test]
  fn comparison_sequence() {
    let asm = assembly("int main () { return 1 < 2; }");
    assert!(asm.contains("    cmp eax, ecx\n    setl al\n    movzx eax, al"));
  }

  #[test]
  fn logical_and_normalizes_both_operands() {
    let asm = assembly("int main () { return 2 && 3; }");
    assert!(asm.contains(
      "    test eax, eax\n    setne al\n    test ecx, ecx\n    setne cl\n    and al, cl\n    movzx eax, al"
    ));
  }

  #[test]
  fn logical_or_normalizes_result() {
    let asm = assembly("int main () { return 0 || 5; }");
    assert!(asm.contains("    or eax, ecx\n    test eax, eax\n    setne al\n    movzx eax, al"));
  }

  #[test]
  fn unary_not_sequence() {
    let asm = assembly("int main () { return !0; }");
    assert!(asm.contains("    test eax, eax\n    sete al\n    movzx eax, al"));
  }

  #[test]
  fn unary_negate_sequence() {
    let asm = assembly("int main () { int x = 3; return -x; }");
    assert!(asm.contains("    neg eax"));
  }

  #[test]
  fn deep_expression_spills_to_stack() {
    // Three literals fill the pool; the fourth and fifth must spill
    let asm = assembly("int main () { return 1 + (2 + (3 + (4 + 5))); }");
    assert!(asm.contains("    push 4"));
    assert!(asm.contains("    push 5"));
    assert!(asm.contains("    pop rcx"));
    assert!(asm.contains("    pop rax"));
  }

  #[test]
  fn call_pops_arguments_in_reverse() {
    let asm = assembly(
      "int add (int a, int b) { return a + b; } int main () { return add (10, 32); }",
    );
    let rsi = asm.find("    pop rsi").unwrap();
    let rdi = asm.find("    pop rdi").unwrap();
    assert!(rsi < rdi, "rsi must pop before rdi:\n{asm}");
    assert!(asm.contains("    call add"));
  }

  #[test]
  fn call_result_comes_from_eax() {
    let asm = assembly("int f () { return 1; } int main () { return f (); }");
    assert!(asm.contains("    call f\n    mov ebx, eax"));
  }

  #[test]
  fn nested_calls_release_the_pool() {
    let asm = assembly(
      "int f (int a) { return a; } int main () { return f (f (f (1))); }",
    );
    assert_eq!(asm.matches("    call f").count(), 3);
    // Each argument travels through the stack, so the pool never overflows
    // into eax-relative addressing for the call sequence itself.
    assert!(asm.contains("    push rbx"));
    assert!(asm.contains("    pop rdi"));
  }

  #[test]
  fn var_decl_allocates_eagerly() {
    let asm = assembly("int main () { int x = 7; return x; }");
    assert!(asm.contains("    sub rsp, 8\n    mov ebx, 7\n    mov DWORD PTR [rbp + -32], ebx"));
  }

  #[test]
  fn redeclaration_rebinds_to_a_fresh_slot() {
    let asm = assembly("int main () { int x = 1; int x = 2; return x; }");
    assert!(asm.contains("    mov DWORD PTR [rbp + -32], ebx"));
    assert!(asm.contains("    mov DWORD PTR [rbp + -40], ebx"));
    // The final read targets the newer slot
    assert!(asm.contains("    mov ebx, DWORD PTR [rbp + -40]"));
  }

  #[test]
  fn expression_statement_discards_value() {
    let asm = assembly("int f () { return 1; } int main () { f (); return 0; }");
    // Call result is homed then simply dropped; no stray pop
    assert!(asm.contains("    call f\n    mov ebx, eax\n    mov ebx, 0"));
  }

  #[test]
  fn while_zero_is_still_emitted() {
    let asm = assembly("int main () { while (0) { 1; } return 2; }");
    assert!(asm.contains(".L3:\n    mov ebx, 0\n    test ebx, ebx\n    je .L4"));
  }
}
