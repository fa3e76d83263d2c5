//! Type checking pass over the finished tree.
//!
//! Read-only: every violation is recorded through the reporter and the walk
//! continues. The only early exit is a cast from a type the backend has no
//! conversion for.

use crate::ast::{BinOp, Node, NodeKind, Program};
use crate::diagnostic::Reporter;
use crate::error::CompileResult;
use crate::symbol::{Param, SymbolKind, SymbolTable};
use crate::ty::{Builtin, TypeId, TypeKind, TypeTable};

pub fn check(
  program: &Program,
  types: &TypeTable,
  symbols: &SymbolTable,
  reporter: &mut Reporter,
) -> CompileResult<()> {
  let mut checker = Checker {
    types,
    symbols,
    reporter,
  };
  for node in &program.items {
    checker.check_node(node)?;
  }
  Ok(())
}

struct Checker<'a> {
  types: &'a TypeTable,
  symbols: &'a SymbolTable,
  reporter: &'a mut Reporter,
}

impl Checker<'_> {
  fn shallow(&self, node: &Node) -> TypeId {
    node.type_shallow(self.symbols, self.types)
  }

  fn void(&self) -> TypeId {
    self.types.builtin(Builtin::Void)
  }

  fn describe(&self, id: TypeId) -> String {
    self.types.describe(id)
  }

  fn describe_list(&self, ids: impl IntoIterator<Item = TypeId>) -> String {
    let names: Vec<_> = ids.into_iter().map(|id| self.describe(id)).collect();
    format!("({})", names.join(" "))
  }

  fn check_all(&mut self, nodes: &[Node]) -> CompileResult<()> {
    for node in nodes {
      self.check_node(node)?;
    }
    Ok(())
  }

  fn check_node(&mut self, node: &Node) -> CompileResult<()> {
    match &node.kind {
      NodeKind::BinOp { op, lhs, rhs } => {
        self.check_node(lhs)?;
        self.check_node(rhs)?;
        self.check_binop(node, *op, lhs, rhs);
      }
      NodeKind::FunctionCall { args } => {
        self.check_all(args)?;
        self.check_call(node, args);
      }
      NodeKind::If {
        cond,
        then_body,
        else_body,
      } => {
        self.check_node(cond)?;
        self.expect_bool(cond);
        self.check_all(then_body)?;
        if let Some(else_body) = else_body {
          self.check_all(else_body)?;
        }
      }
      NodeKind::While { cond, body } => {
        self.check_node(cond)?;
        self.expect_bool(cond);
        self.check_all(body)?;
      }
      NodeKind::For {
        init,
        cond,
        step,
        body,
      } => {
        self.check_node(init)?;
        self.check_node(cond)?;
        self.check_node(step)?;
        self.expect_bool(cond);
        self.check_all(body)?;
      }
      NodeKind::Scope(stmts) => self.check_all(stmts)?,
      NodeKind::Cast { target, expr } => {
        self.check_node(expr)?;
        self.check_cast(node, *target, expr)?;
      }
      NodeKind::VarDecl => {
        let ty = node.type_deep(self.symbols, self.types);
        if ty == self.void() {
          self.reporter.error(
            node.location,
            format!("variable of type {}", self.describe(ty)),
          );
        }
      }
      NodeKind::FunctionDef { body, .. } => {
        self.check_signature(node);
        self.check_all(body)?;
      }
      NodeKind::ExternFunctionDecl => self.check_signature(node),
      NodeKind::Return { value, function } => {
        let got = match value {
          Some(value) => {
            self.check_node(value)?;
            self.shallow(value)
          }
          None => self.void(),
        };
        let expected = self.symbols.get(*function).ty();
        if got != expected {
          let location = value.as_ref().map_or(node.location, |value| value.location);
          self.reporter.error(
            location,
            format!(
              "expected type {}, got {}",
              self.describe(expected),
              self.describe(got)
            ),
          );
        }
      }
      NodeKind::Integer(_)
      | NodeKind::Boolean(_)
      | NodeKind::VarRef
      | NodeKind::TypedefDecl
      | NodeKind::Empty => {}
    }
    Ok(())
  }

  fn check_binop(&mut self, node: &Node, op: BinOp, lhs: &Node, rhs: &Node) {
    let lhs_type = self.shallow(lhs);
    let rhs_type = self.shallow(rhs);
    let void = self.void();

    if lhs_type == void {
      self.reporter.error(
        node.location,
        format!("lvalue is of type {}", self.describe(void)),
      );
    }
    if rhs_type == void {
      self.reporter.error(
        node.location,
        format!("rvalue is of type {}", self.describe(void)),
      );
    }
    if lhs_type != rhs_type {
      self.reporter.error(
        node.location,
        format!(
          "operand type mismatch: lvalue {}, rvalue {}",
          self.describe(lhs_type),
          self.describe(rhs_type)
        ),
      );
    } else if self.is_struct(lhs_type) {
      self.reporter.error(
        node.location,
        format!(
          "operands of type {} are not scalars",
          self.describe(lhs_type)
        ),
      );
    }

    if op == BinOp::Assign && !lhs.is_storage() {
      self
        .reporter
        .error(node.location, "lvalue is not a storage location");
    }
  }

  fn check_call(&mut self, node: &Node, args: &[Node]) {
    let symbols = self.symbols;
    let Some(symbol) = node.symbol.map(|id| symbols.get(id)) else {
      return;
    };
    let SymbolKind::Function {
      params, prototyped, ..
    } = &symbol.kind
    else {
      return;
    };

    let got: Vec<TypeId> = args.iter().map(|arg| self.shallow(arg)).collect();
    if !prototyped {
      let void = self.void();
      for (arg, ty) in args.iter().zip(&got) {
        if *ty == void {
          self.reporter.error(
            arg.location,
            format!("argument of type {} passed to '{}'", self.describe(void), symbol.name),
          );
        }
      }
      return;
    }

    let expected: Vec<TypeId> = params.iter().map(|param: &Param| param.ty).collect();
    if got.len() != expected.len() {
      self.reporter.error(
        node.location,
        format!(
          "expected {} arguments, got {}: got {}, expected {}",
          expected.len(),
          got.len(),
          self.describe_list(got.iter().copied()),
          self.describe_list(expected.iter().copied())
        ),
      );
    } else if got != expected {
      self.reporter.error(
        node.location,
        format!(
          "mismatched types in call to '{}': got {}, expected {}",
          symbol.name,
          self.describe_list(got.iter().copied()),
          self.describe_list(expected.iter().copied())
        ),
      );
    }
  }

  fn expect_bool(&mut self, cond: &Node) {
    let got = self.shallow(cond);
    let expected = self.types.builtin(Builtin::Bool);
    if got != expected {
      self.reporter.error(
        cond.location,
        format!(
          "expected type {}, got {}",
          self.describe(expected),
          self.describe(got)
        ),
      );
    }
  }

  fn check_cast(&mut self, node: &Node, target: TypeId, expr: &Node) -> CompileResult<()> {
    if self.is_struct(target) {
      self.reporter.error(
        node.location,
        format!("can't cast to type {}", self.describe(target)),
      );
    }

    let from = expr.type_deep(self.symbols, self.types);
    match self.types.get(from).kind {
      TypeKind::S64 | TypeKind::U64 | TypeKind::Bool => Ok(()),
      TypeKind::Void => {
        self.reporter.error(
          node.location,
          format!("can't cast from type {}", self.describe(from)),
        );
        Ok(())
      }
      TypeKind::Struct { .. } | TypeKind::Definition { .. } => Err(self.reporter.not_implemented(
        node.location,
        format!("cast from type {}", self.describe(from)),
      )),
    }
  }

  fn check_signature(&mut self, node: &Node) {
    let symbols = self.symbols;
    let Some(symbol) = node.symbol.map(|id| symbols.get(id)) else {
      return;
    };
    let SymbolKind::Function { params, .. } = &symbol.kind else {
      return;
    };

    for param in params {
      if !self.types.is_scalar(param.ty) {
        self.reporter.error(
          node.location,
          format!(
            "parameter '{}' of '{}' has non-scalar type {}",
            param.name,
            symbol.name,
            self.describe(param.ty)
          ),
        );
      }
    }

    let ret = symbol.ty();
    if ret != self.void() && !self.types.is_scalar(ret) {
      self.reporter.error(
        node.location,
        format!(
          "'{}' returns non-scalar type {}",
          symbol.name,
          self.describe(ret)
        ),
      );
    }
  }

  fn is_struct(&self, id: TypeId) -> bool {
    matches!(self.types.get(self.types.resolve(id)).kind, TypeKind::Struct { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn check_source(source: &str) -> (CompileResult<()>, Vec<String>) {
    let mut reporter = Reporter::new("test.lisp");
    let mut types = TypeTable::new();
    let mut symbols = SymbolTable::new();
    let tokens = tokenize(source, &reporter).unwrap();
    let program = parse(tokens, &mut types, &mut symbols, &mut reporter).unwrap();
    assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    let result = check(&program, &types, &symbols, &mut reporter);
    let messages = reporter
      .diagnostics()
      .iter()
      .map(|diagnostic| diagnostic.message.clone())
      .collect();
    (result, messages)
  }

  fn errors(source: &str) -> Vec<String> {
    let (result, messages) = check_source(source);
    result.unwrap();
    messages
  }

  #[test]
  fn well_typed_program_passes() {
    let messages = errors(
      "(defun add (a: s64 b: s64) s64 ((return (+ a b))))
       (let s64 x)
       (:= x (add 2 3))
       (while (< x 10) (:= x (+ x 1)))",
    );
    assert!(messages.is_empty(), "{messages:?}");
  }

  #[test]
  fn assignment_to_a_literal_is_the_only_error() {
    assert_eq!(errors("(:= 5 3)"), vec!["lvalue is not a storage location"]);
  }

  #[test]
  fn operand_types_must_match() {
    assert_eq!(
      errors("(let s64 x) (:= x true)"),
      vec!["operand type mismatch: lvalue s64, rvalue bool"]
    );
  }

  #[test]
  fn typedefs_are_distinct_for_assignment() {
    assert_eq!(
      errors("(typedef meters s64) (let meters d) (:= d 5) (:= d (meters 5))"),
      vec!["operand type mismatch: lvalue meters, rvalue s64"]
    );
  }

  #[test]
  fn void_operands_are_reported() {
    assert_eq!(
      errors("(exfun tick) (let s64 x) (:= x (tick))"),
      vec![
        "rvalue is of type void",
        "operand type mismatch: lvalue s64, rvalue void"
      ]
    );
  }

  #[test]
  fn call_arity_and_types_are_checked() {
    let source = "(defun f (a: s64 b: bool) s64 ((return a)))
                  (f 1)
                  (f 1 2)";
    assert_eq!(
      errors(source),
      vec![
        "expected 2 arguments, got 1: got (s64), expected (s64 bool)",
        "mismatched types in call to 'f': got (s64 s64), expected (s64 bool)",
      ]
    );
  }

  #[test]
  fn unprototyped_externs_accept_any_scalar_arguments() {
    assert!(errors("(exfun foo) (foo 1 2 3 4 5 6 7)").is_empty());
    assert_eq!(
      errors("(exfun foo) (foo (foo))"),
      vec!["argument of type void passed to 'foo'"]
    );
  }

  #[test]
  fn conditions_must_be_bool() {
    assert_eq!(
      errors(
        "(let s64 i)
         (if i)
         (while 1)
         (for (:= i 0) (+ i 1) (+ i 1))"
      ),
      vec![
        "expected type bool, got s64",
        "expected type bool, got s64",
        "expected type bool, got s64",
      ]
    );
  }

  #[test]
  fn for_only_checks_the_condition() {
    assert!(errors("(for (let s64 i) (< i 3) (:= i (+ i 1)))").is_empty());
  }

  #[test]
  fn return_type_must_match() {
    assert_eq!(
      errors("(defun f () bool ((return 1)))"),
      vec!["expected type bool, got s64"]
    );
    assert_eq!(
      errors("(defun g () s64 ((return)))"),
      vec!["expected type s64, got void"]
    );
    assert!(errors("(defun h () void ((return)))").is_empty());
  }

  #[test]
  fn casts_from_void_are_reported() {
    assert_eq!(
      errors("(exfun tick) (s64 (tick))"),
      vec!["can't cast from type void"]
    );
  }

  #[test]
  fn casts_between_scalars_pass_through_typedefs() {
    assert!(errors("(typedef flag bool) (let flag f) (s64 f) (u64 (bool 1))").is_empty());
  }

  #[test]
  fn casts_from_structs_are_not_implemented() {
    let (result, _) = check_source("(let (struct a: s64) p) (s64 p)");
    assert!(matches!(result, Err(CompileError::NotImplemented { .. })));
  }

  #[test]
  fn void_variables_and_struct_operands_are_reported() {
    assert_eq!(
      errors("(let void v) (typedef pair (struct a: s64 b: s64)) (let pair p) (let pair q) (:= p q)"),
      vec!["variable of type void", "operands of type pair are not scalars"]
    );
  }

  #[test]
  fn signatures_must_be_scalar() {
    assert_eq!(
      errors("(typedef pair (struct a: s64)) (exfun take (p: pair) pair)"),
      vec![
        "parameter 'p' of 'take' has non-scalar type pair",
        "'take' returns non-scalar type pair",
      ]
    );
  }
}
