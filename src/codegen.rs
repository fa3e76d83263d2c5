//! Code generation: lower the checked tree into AT&T x86-64 assembly.
//!
//! The emitter is a stack machine: every expression leaves a single 8-byte
//! slot on the stack and statements pop it again. Locals live in the frame
//! below `%rbp`; offsets are assigned per function before its body is
//! emitted. The evaluation-stack depth is tracked so calls can be padded to
//! keep `%rsp` 16-byte aligned.

use log::debug;
use snafu::ensure;

use crate::ast::{ArithOp, BinOp, CompareOp, IntegerValue, Node, NodeKind, Program};
use crate::diagnostic::{Location, Reporter};
use crate::error::{CompileResult, NotImplementedSnafu};
use crate::symbol::{SymbolId, SymbolKind, SymbolTable};
use crate::ty::{Builtin, TypeId, TypeKind, TypeTable, align_to};

const ARG_REGS_64: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];
const ARG_REGS_8: [&str; 6] = ["%dil", "%sil", "%dl", "%cl", "%r8b", "%r9b"];

/// Emit assembly for a whole program.
///
/// Frame offsets are written back into the symbol table. Top-level
/// statements become a synthetic `main` returning 0, emitted last, unless
/// the program defines `main` itself.
pub fn generate(
  program: &Program,
  types: &TypeTable,
  symbols: &mut SymbolTable,
  reporter: &Reporter,
) -> CompileResult<String> {
  let mut codegen = Codegen {
    types,
    symbols,
    reporter,
    asm: String::new(),
    externs: String::new(),
    label_count: 0,
    depth: 0,
  };

  let mut user_main = false;
  for node in &program.items {
    match &node.kind {
      NodeKind::ExternFunctionDecl => codegen.declare_extern(node),
      NodeKind::FunctionDef { params, body } => {
        let name = codegen.function_name(node);
        user_main |= name == "main";
        let body: Vec<&Node> = body.iter().collect();
        codegen.gen_function(&name, node.location, params, &body, false)?;
      }
      _ => {}
    }
  }
  if !user_main {
    let body: Vec<&Node> = program.toplevel_statements().collect();
    codegen.gen_function("main", Location::new(1, 1), &[], &body, true)?;
  }

  let mut out = String::from(".section .text\n.globl main\n");
  out.push_str(&codegen.externs);
  out.push_str(&codegen.asm);
  debug!(
    "emitted {} lines of assembly, {} labels",
    out.lines().count(),
    codegen.label_count
  );
  Ok(out)
}

/// Width of a scalar slot in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
  Byte,
  Quad,
}

struct Codegen<'a> {
  types: &'a TypeTable,
  symbols: &'a mut SymbolTable,
  reporter: &'a Reporter,
  asm: String,
  externs: String,
  label_count: usize,
  /// 8-byte slots currently pushed by the function being emitted.
  depth: usize,
}

impl Codegen<'_> {
  fn emit(&mut self, instruction: &str) {
    self.asm.push_str("    ");
    self.asm.push_str(instruction);
    self.asm.push('\n');
  }

  fn push(&mut self, operand: &str) {
    self.emit(&format!("pushq {operand}"));
    self.depth += 1;
  }

  fn pop(&mut self, register: &str) {
    self.emit(&format!("popq {register}"));
    self.depth -= 1;
  }

  fn next_label(&mut self) -> String {
    let label = format!(".L{}", self.label_count);
    self.label_count += 1;
    label
  }

  fn label(&mut self, label: &str) {
    self.asm.push_str(label);
    self.asm.push_str(":\n");
  }

  fn emit_epilogue(&mut self) {
    self.emit("movq %rbp, %rsp");
    self.emit("popq %rbp");
    self.emit("ret");
  }

  fn function_name(&self, node: &Node) -> String {
    let id = node
      .symbol
      .unwrap_or_else(|| panic!("function at {} has no symbol", node.location));
    self.symbols.get(id).name.clone()
  }

  fn declare_extern(&mut self, node: &Node) {
    let name = self.function_name(node);
    self.externs.push_str(&format!(".extern {name}\n"));
  }

  fn width(&self, ty: TypeId, location: Location) -> CompileResult<Width> {
    match self.types.get(self.types.resolve(ty)).kind {
      TypeKind::Bool => Ok(Width::Byte),
      TypeKind::S64 | TypeKind::U64 => Ok(Width::Quad),
      TypeKind::Void | TypeKind::Struct { .. } | TypeKind::Definition { .. } => {
        Err(self.reporter.not_implemented(
          location,
          format!("values of type {} in registers", self.types.describe(ty)),
        ))
      }
    }
  }

  fn variable(&self, node: &Node) -> SymbolId {
    match node.symbol {
      Some(id) if node.is_storage() => id,
      _ => panic!("node at {} is not a variable", node.location),
    }
  }

  fn place_local(&mut self, id: SymbolId, frame: &mut u64) {
    let ty = self.types.get(self.symbols.get(id).ty());
    *frame += ty.size;
    if let SymbolKind::LocalVar { offset, .. } = &mut self.symbols.get_mut(id).kind {
      *offset = Some(*frame);
    }
  }

  /// Assign frame offsets to the locals declared in `node`, depth-first.
  fn layout(&mut self, node: &Node, frame: &mut u64) {
    match &node.kind {
      NodeKind::VarDecl => {
        if let Some(id) = node.symbol {
          self.place_local(id, frame);
        }
      }
      NodeKind::BinOp { lhs, rhs, .. } => {
        self.layout(lhs, frame);
        self.layout(rhs, frame);
      }
      NodeKind::Scope(nodes) | NodeKind::FunctionCall { args: nodes } => {
        for node in nodes {
          self.layout(node, frame);
        }
      }
      NodeKind::If {
        cond,
        then_body,
        else_body,
      } => {
        self.layout(cond, frame);
        for node in then_body.iter().chain(else_body.iter().flatten()) {
          self.layout(node, frame);
        }
      }
      NodeKind::While { cond, body } => {
        self.layout(cond, frame);
        for node in body {
          self.layout(node, frame);
        }
      }
      NodeKind::For {
        init,
        cond,
        step,
        body,
      } => {
        self.layout(init, frame);
        self.layout(cond, frame);
        self.layout(step, frame);
        for node in body {
          self.layout(node, frame);
        }
      }
      NodeKind::Cast { expr, .. } => self.layout(expr, frame),
      NodeKind::Return {
        value: Some(value), ..
      } => self.layout(value, frame),
      _ => {}
    }
  }

  fn gen_function(
    &mut self,
    name: &str,
    location: Location,
    params: &[SymbolId],
    body: &[&Node],
    exit_zero: bool,
  ) -> CompileResult<()> {
    ensure!(
      params.len() <= ARG_REGS_64.len(),
      NotImplementedSnafu {
        file: self.reporter.file_name(),
        line: location.line,
        column: location.column,
        feature: format!("'{name}' takes parameters on the stack"),
        diagnostics: self.reporter.diagnostics().to_vec(),
      }
    );

    let mut frame = 0;
    for &param in params {
      self.place_local(param, &mut frame);
    }
    for node in body {
      self.layout(node, &mut frame);
    }
    let frame = align_to(frame, 16);

    self.depth = 0;
    self.asm.push_str(&format!("\n{name}:\n"));
    self.emit("pushq %rbp");
    self.emit("movq %rsp, %rbp");
    if frame > 0 {
      self.emit(&format!("subq ${frame}, %rsp"));
    }

    for (index, &param) in params.iter().enumerate() {
      let offset = self.symbols.get(param).offset();
      match self.width(self.symbols.get(param).ty(), location)? {
        Width::Byte => self.emit(&format!("movb {}, -{offset}(%rbp)", ARG_REGS_8[index])),
        Width::Quad => self.emit(&format!("movq {}, -{offset}(%rbp)", ARG_REGS_64[index])),
      }
    }

    for node in body {
      self.gen_stmt(node)?;
      debug_assert_eq!(self.depth, 0, "statement left values on the stack");
    }

    if exit_zero {
      self.emit("movq $0, %rax");
    }
    self.emit_epilogue();
    debug!("generated '{name}' with a {frame}-byte frame");
    Ok(())
  }

  fn gen_stmt(&mut self, node: &Node) -> CompileResult<()> {
    match &node.kind {
      NodeKind::Scope(stmts) => {
        for stmt in stmts {
          self.gen_stmt(stmt)?;
        }
      }
      NodeKind::BinOp {
        op: BinOp::Assign,
        lhs,
        rhs,
      } => self.gen_assign(lhs, rhs)?,
      NodeKind::If {
        cond,
        then_body,
        else_body,
      } => {
        let else_label = self.next_label();
        self.gen_condition(cond, &else_label)?;
        for stmt in then_body {
          self.gen_stmt(stmt)?;
        }
        match else_body {
          Some(else_body) => {
            let end_label = self.next_label();
            self.emit(&format!("jmp {end_label}"));
            self.label(&else_label);
            for stmt in else_body {
              self.gen_stmt(stmt)?;
            }
            self.label(&end_label);
          }
          None => self.label(&else_label),
        }
      }
      NodeKind::While { cond, body } => {
        let begin = self.next_label();
        let end = self.next_label();
        self.label(&begin);
        self.gen_condition(cond, &end)?;
        for stmt in body {
          self.gen_stmt(stmt)?;
        }
        self.emit(&format!("jmp {begin}"));
        self.label(&end);
      }
      NodeKind::For {
        init,
        cond,
        step,
        body,
      } => {
        let begin = self.next_label();
        let end = self.next_label();
        self.gen_stmt(init)?;
        self.label(&begin);
        self.gen_condition(cond, &end)?;
        for stmt in body {
          self.gen_stmt(stmt)?;
        }
        self.gen_stmt(step)?;
        self.emit(&format!("jmp {begin}"));
        self.label(&end);
      }
      NodeKind::Return { value, .. } => {
        if let Some(value) = value {
          if is_expression(value) {
            self.gen_expr(value)?;
            self.pop("%rax");
          } else {
            self.gen_stmt(value)?;
          }
        }
        self.emit_epilogue();
      }
      NodeKind::ExternFunctionDecl => self.declare_extern(node),
      NodeKind::VarDecl | NodeKind::TypedefDecl | NodeKind::Empty => {}
      NodeKind::FunctionDef { .. } => {
        panic!("function at {} is nested in another function", node.location)
      }
      NodeKind::Integer(_)
      | NodeKind::Boolean(_)
      | NodeKind::VarRef
      | NodeKind::BinOp { .. }
      | NodeKind::FunctionCall { .. }
      | NodeKind::Cast { .. } => {
        self.gen_expr(node)?;
        self.pop("%rax");
      }
    }
    Ok(())
  }

  /// Evaluate `cond` and jump to `false_label` when it is zero.
  fn gen_condition(&mut self, cond: &Node, false_label: &str) -> CompileResult<()> {
    self.gen_expr(cond)?;
    self.pop("%rax");
    self.emit("cmpq $0, %rax");
    self.emit(&format!("je {false_label}"));
    Ok(())
  }

  fn gen_expr(&mut self, node: &Node) -> CompileResult<()> {
    match &node.kind {
      NodeKind::Integer(literal) => self.gen_integer(literal.value),
      NodeKind::Boolean(value) => self.push(if *value { "$1" } else { "$0" }),
      NodeKind::VarRef | NodeKind::VarDecl => {
        let id = self.variable(node);
        self.load(id, node.location)?;
      }
      NodeKind::BinOp {
        op: BinOp::Assign,
        lhs,
        rhs,
      } => {
        self.gen_assign(lhs, rhs)?;
        self.push("%rax");
      }
      NodeKind::BinOp { op, lhs, rhs } => self.gen_binop(*op, lhs, rhs)?,
      NodeKind::FunctionCall { args } => self.gen_call(node, args)?,
      NodeKind::Cast { target, expr } => self.gen_cast(*target, expr)?,
      _ => panic!("node at {} is not an expression", node.location),
    }
    Ok(())
  }

  fn gen_integer(&mut self, value: IntegerValue) {
    let fits = match value {
      IntegerValue::Signed(v) => i32::try_from(v).is_ok(),
      IntegerValue::Unsigned(v) => i32::try_from(v).is_ok(),
    };
    let text = match value {
      IntegerValue::Signed(v) => v.to_string(),
      // Same bit pattern; gas wants the immediate in signed range.
      IntegerValue::Unsigned(v) => (v as i64).to_string(),
    };
    if fits {
      self.push(&format!("${text}"));
    } else {
      self.emit(&format!("movabsq ${text}, %rax"));
      self.push("%rax");
    }
  }

  fn load(&mut self, id: SymbolId, location: Location) -> CompileResult<()> {
    let symbol = self.symbols.get(id);
    let offset = symbol.offset();
    match self.width(symbol.ty(), location)? {
      Width::Byte => self.emit(&format!("movzbq -{offset}(%rbp), %rax")),
      Width::Quad => self.emit(&format!("movq -{offset}(%rbp), %rax")),
    }
    self.push("%rax");
    Ok(())
  }

  /// Store the value of `rhs` into `lhs`; the value stays in `%rax`.
  fn gen_assign(&mut self, lhs: &Node, rhs: &Node) -> CompileResult<()> {
    self.gen_expr(rhs)?;
    self.pop("%rax");

    let id = self.variable(lhs);
    let symbol = self.symbols.get(id);
    let offset = symbol.offset();
    match self.width(symbol.ty(), lhs.location)? {
      Width::Byte => self.emit(&format!("movb %al, -{offset}(%rbp)")),
      Width::Quad => self.emit(&format!("movq %rax, -{offset}(%rbp)")),
    }
    Ok(())
  }

  fn gen_binop(&mut self, op: BinOp, lhs: &Node, rhs: &Node) -> CompileResult<()> {
    self.gen_expr(rhs)?;
    self.gen_expr(lhs)?;
    self.pop("%rax");
    self.pop("%rdi");

    let unsigned = self
      .types
      .is_unsigned(lhs.type_shallow(self.symbols, self.types));
    match op {
      BinOp::Arith(ArithOp::Add) => self.emit("addq %rdi, %rax"),
      BinOp::Arith(ArithOp::Sub) => self.emit("subq %rdi, %rax"),
      BinOp::Arith(ArithOp::Mul) => self.emit("imulq %rdi, %rax"),
      BinOp::Arith(arith @ (ArithOp::Div | ArithOp::Mod)) => {
        if unsigned {
          self.emit("xorl %edx, %edx");
          self.emit("divq %rdi");
        } else {
          self.emit("cqto");
          self.emit("idivq %rdi");
        }
        if arith == ArithOp::Mod {
          self.push("%rdx");
          return Ok(());
        }
      }
      BinOp::Compare(cmp) => {
        self.emit("xorq %rsi, %rsi");
        self.emit("cmpq %rdi, %rax");
        self.emit(&format!("{} %sil", set_instruction(cmp, unsigned)));
        self.push("%rsi");
        return Ok(());
      }
      BinOp::Assign => unreachable!("assignment is generated by gen_assign"),
    }
    self.push("%rax");
    Ok(())
  }

  fn gen_call(&mut self, node: &Node, args: &[Node]) -> CompileResult<()> {
    let callee = node
      .symbol
      .unwrap_or_else(|| panic!("call at {} has no callee", node.location));

    for (index, arg) in args.iter().enumerate() {
      ensure!(
        index < ARG_REGS_64.len(),
        NotImplementedSnafu {
          file: self.reporter.file_name(),
          line: arg.location.line,
          column: arg.location.column,
          feature: "arguments passed on the stack",
          diagnostics: self.reporter.diagnostics().to_vec(),
        }
      );

      // Registers loaded so far survive a nested call or operator.
      let loaded = &ARG_REGS_64[..index];
      let save = !arg.is_leaf() && !loaded.is_empty();
      if save {
        for register in loaded {
          self.push(register);
        }
      }
      self.gen_expr(arg)?;
      self.pop(ARG_REGS_64[index]);
      if save {
        for register in loaded.iter().rev() {
          self.pop(register);
        }
      }
    }

    let symbol = self.symbols.get(callee);
    let name = symbol.name.clone();
    let returns_bool = self
      .types
      .is_builtin(self.types.resolve(symbol.ty()), Builtin::Bool);

    let pad = self.depth % 2 == 1;
    if pad {
      self.emit("subq $8, %rsp");
    }
    self.emit("movq $0, %rax");
    self.emit(&format!("call {name}"));
    if pad {
      self.emit("addq $8, %rsp");
    }
    if returns_bool {
      self.emit("movzbq %al, %rax");
    }
    self.push("%rax");
    Ok(())
  }

  fn gen_cast(&mut self, target: TypeId, expr: &Node) -> CompileResult<()> {
    self.gen_expr(expr)?;
    let to_bool = self
      .types
      .is_builtin(self.types.resolve(target), Builtin::Bool);
    let from = expr.type_deep(self.symbols, self.types);
    if to_bool && !self.types.is_builtin(from, Builtin::Bool) {
      self.pop("%rax");
      self.emit("cmpq $0, %rax");
      self.emit("setne %al");
      self.emit("movzbq %al, %rax");
      self.push("%rax");
    }
    Ok(())
  }
}

fn is_expression(node: &Node) -> bool {
  matches!(
    node.kind,
    NodeKind::Integer(_)
      | NodeKind::Boolean(_)
      | NodeKind::VarRef
      | NodeKind::VarDecl
      | NodeKind::BinOp { .. }
      | NodeKind::FunctionCall { .. }
      | NodeKind::Cast { .. }
  )
}

fn set_instruction(cmp: CompareOp, unsigned: bool) -> &'static str {
  match (cmp, unsigned) {
    (CompareOp::Eq, _) => "sete",
    (CompareOp::Ne, _) => "setne",
    (CompareOp::Lt, false) => "setl",
    (CompareOp::Le, false) => "setle",
    (CompareOp::Gt, false) => "setg",
    (CompareOp::Ge, false) => "setge",
    (CompareOp::Lt, true) => "setb",
    (CompareOp::Le, true) => "setbe",
    (CompareOp::Gt, true) => "seta",
    (CompareOp::Ge, true) => "setae",
  }
}
