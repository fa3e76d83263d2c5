//! Syntax tree produced by the parser.
//!
//! Every node owns its children. Symbols and types are referenced by id and
//! live in the tables, which outlive the tree.

use crate::diagnostic::Location;
use crate::symbol::{SymbolId, SymbolKind, SymbolTable};
use crate::ty::{Builtin, TypeId, TypeTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
  Add,
  Sub,
  Mul,
  Div,
  Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
  Eq,
  Ne,
  Le,
  Lt,
  Ge,
  Gt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
  Assign,
  Arith(ArithOp),
  Compare(CompareOp),
}

impl BinOp {
  pub fn from_operator(text: &str) -> Option<Self> {
    let op = match text {
      ":=" => BinOp::Assign,
      "+" => BinOp::Arith(ArithOp::Add),
      "-" => BinOp::Arith(ArithOp::Sub),
      "*" => BinOp::Arith(ArithOp::Mul),
      "/" => BinOp::Arith(ArithOp::Div),
      "%" => BinOp::Arith(ArithOp::Mod),
      "==" => BinOp::Compare(CompareOp::Eq),
      "!=" => BinOp::Compare(CompareOp::Ne),
      "<=" => BinOp::Compare(CompareOp::Le),
      "<" => BinOp::Compare(CompareOp::Lt),
      ">=" => BinOp::Compare(CompareOp::Ge),
      ">" => BinOp::Compare(CompareOp::Gt),
      _ => return None,
    };
    Some(op)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerValue {
  Signed(i64),
  Unsigned(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerLiteral {
  pub value: IntegerValue,
  pub bits: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
  Integer(IntegerLiteral),
  Boolean(bool),
  BinOp {
    op: BinOp,
    lhs: Box<Node>,
    rhs: Box<Node>,
  },
  Scope(Vec<Node>),
  VarDecl,
  VarRef,
  ExternFunctionDecl,
  FunctionDef {
    params: Vec<SymbolId>,
    body: Vec<Node>,
  },
  FunctionCall {
    args: Vec<Node>,
  },
  If {
    cond: Box<Node>,
    then_body: Vec<Node>,
    else_body: Option<Vec<Node>>,
  },
  While {
    cond: Box<Node>,
    body: Vec<Node>,
  },
  For {
    init: Box<Node>,
    cond: Box<Node>,
    step: Box<Node>,
    body: Vec<Node>,
  },
  Cast {
    target: TypeId,
    expr: Box<Node>,
  },
  Return {
    value: Option<Box<Node>>,
    function: SymbolId,
  },
  TypedefDecl,
  Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
  pub location: Location,
  /// Declared or referenced symbol, if the node names one.
  pub symbol: Option<SymbolId>,
  pub kind: NodeKind,
}

impl Node {
  pub fn new(location: Location, kind: NodeKind) -> Self {
    Self {
      location,
      symbol: None,
      kind,
    }
  }

  pub fn with_symbol(location: Location, symbol: Option<SymbolId>, kind: NodeKind) -> Self {
    Self {
      location,
      symbol,
      kind,
    }
  }

  pub fn empty(location: Location) -> Self {
    Self::new(location, NodeKind::Empty)
  }

  /// Nodes that denote an addressable variable.
  pub fn is_storage(&self) -> bool {
    matches!(self.kind, NodeKind::VarRef | NodeKind::VarDecl)
  }

  /// Literals, variable reads and declarations, and `Empty` only touch
  /// `%rax` when generated.
  pub fn is_leaf(&self) -> bool {
    matches!(
      self.kind,
      NodeKind::Integer(_) | NodeKind::Boolean(_) | NodeKind::VarRef | NodeKind::VarDecl | NodeKind::Empty
    )
  }

  /// Type of the node without following typedefs.
  pub fn type_shallow(&self, symbols: &SymbolTable, types: &TypeTable) -> TypeId {
    let void = types.builtin(Builtin::Void);
    match &self.kind {
      NodeKind::Integer(literal) => match literal.value {
        IntegerValue::Signed(_) => types.builtin(Builtin::S64),
        IntegerValue::Unsigned(_) => types.builtin(Builtin::U64),
      },
      NodeKind::Boolean(_) => types.builtin(Builtin::Bool),
      NodeKind::BinOp { op, lhs, .. } => match op {
        BinOp::Assign | BinOp::Arith(_) => lhs.type_shallow(symbols, types),
        BinOp::Compare(_) => types.builtin(Builtin::Bool),
      },
      NodeKind::VarDecl | NodeKind::VarRef => self
        .symbol
        .and_then(|id| symbols.get(id).ty)
        .unwrap_or(void),
      NodeKind::FunctionCall { .. } => match self.symbol.map(|id| symbols.get(id)) {
        Some(symbol) if matches!(symbol.kind, SymbolKind::Function { .. }) => {
          symbol.ty.unwrap_or(void)
        }
        _ => void,
      },
      NodeKind::Cast { target, .. } => *target,
      NodeKind::Scope(_)
      | NodeKind::ExternFunctionDecl
      | NodeKind::FunctionDef { .. }
      | NodeKind::If { .. }
      | NodeKind::While { .. }
      | NodeKind::For { .. }
      | NodeKind::Return { .. }
      | NodeKind::TypedefDecl
      | NodeKind::Empty => void,
    }
  }

  /// Type of the node after following the typedef chain.
  pub fn type_deep(&self, symbols: &SymbolTable, types: &TypeTable) -> TypeId {
    types.resolve(self.type_shallow(symbols, types))
  }
}

/// Parsed compilation unit: top-level items in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
  pub items: Vec<Node>,
}

impl Program {
  /// Top-level statements that make up the synthetic `main`.
  pub fn toplevel_statements(&self) -> impl Iterator<Item = &Node> {
    self.items.iter().filter(|node| {
      !matches!(
        node.kind,
        NodeKind::FunctionDef { .. } | NodeKind::ExternFunctionDecl | NodeKind::TypedefDecl
      )
    })
  }

  pub fn has_toplevel_statements(&self) -> bool {
    self.toplevel_statements().next().is_some()
  }
}
