//! Symbol table: an arena of symbol records plus a stack of lexical scopes.
//!
//! Scopes only map names to ids. Popping a scope drops the lookup map, the
//! records themselves stay addressable for the later passes (frame layout,
//! code generation).

use std::collections::HashMap;

use log::debug;

use crate::ty::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolTag {
  LocalVar,
  Function,
  Type,
}

/// Name and type of a function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
  pub name: String,
  pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
  LocalVar {
    /// Bytes below `%rbp`, filled in by the code generator.
    offset: Option<u64>,
    /// Function whose frame holds the variable; `None` for top-level code.
    function: Option<SymbolId>,
  },
  Function {
    params: Vec<Param>,
    /// Unprototyped externs skip arity and argument type checks.
    prototyped: bool,
    external: bool,
  },
  Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
  pub name: String,
  /// Variable type, function return type, or the type a name denotes.
  /// `None` until the declaring construct has been fully parsed.
  pub ty: Option<TypeId>,
  pub kind: SymbolKind,
}

impl Symbol {
  fn placeholder(name: &str, tag: SymbolTag) -> Self {
    let kind = match tag {
      SymbolTag::LocalVar => SymbolKind::LocalVar {
        offset: None,
        function: None,
      },
      SymbolTag::Function => SymbolKind::Function {
        params: Vec::new(),
        prototyped: true,
        external: false,
      },
      SymbolTag::Type => SymbolKind::Type,
    };
    Self {
      name: name.to_string(),
      ty: None,
      kind,
    }
  }

  pub fn tag(&self) -> SymbolTag {
    match self.kind {
      SymbolKind::LocalVar { .. } => SymbolTag::LocalVar,
      SymbolKind::Function { .. } => SymbolTag::Function,
      SymbolKind::Type => SymbolTag::Type,
    }
  }

  /// Declared type; only valid after the declaration was populated.
  pub fn ty(&self) -> TypeId {
    self
      .ty
      .unwrap_or_else(|| panic!("symbol '{}' used before its type was set", self.name))
  }

  pub fn offset(&self) -> u64 {
    match self.kind {
      SymbolKind::LocalVar {
        offset: Some(offset),
        ..
      } => offset,
      _ => panic!("symbol '{}' has no frame offset", self.name),
    }
  }
}

#[derive(Debug)]
pub struct SymbolTable {
  symbols: Vec<Symbol>,
  scopes: Vec<HashMap<String, SymbolId>>,
}

impl Default for SymbolTable {
  fn default() -> Self {
    Self::new()
  }
}

impl SymbolTable {
  /// A table holding only the global scope.
  pub fn new() -> Self {
    Self {
      symbols: Vec::new(),
      scopes: vec![HashMap::new()],
    }
  }

  pub fn push_scope(&mut self) {
    self.scopes.push(HashMap::new());
  }

  pub fn pop_scope(&mut self) {
    assert!(self.scopes.len() > 1, "popping the global scope");
    self.scopes.pop();
  }

  /// Number of open scopes, the global one included.
  pub fn depth(&self) -> usize {
    self.scopes.len()
  }

  /// Declare `name` in the current scope. Returns `None` without allocating
  /// if the current scope already holds the name.
  pub fn declare(&mut self, name: &str, tag: SymbolTag) -> Option<SymbolId> {
    let scope = self.scopes.last_mut().expect("scope stack is never empty");
    if scope.contains_key(name) {
      return None;
    }
    let id = SymbolId(self.symbols.len() as u32);
    self.symbols.push(Symbol::placeholder(name, tag));
    scope.insert(name.to_string(), id);
    debug!("declared {tag:?} '{name}' as {id:?} at depth {}", self.scopes.len() - 1);
    Some(id)
  }

  /// Innermost declaration of `name`.
  pub fn resolve(&self, name: &str) -> Option<SymbolId> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.get(name).copied())
  }

  /// Innermost declaration of `name`, provided it carries `tag`.
  pub fn resolve_with_tag(&self, name: &str, tag: SymbolTag) -> Option<SymbolId> {
    self
      .resolve(name)
      .filter(|&id| self.get(id).tag() == tag)
  }

  pub fn get(&self, id: SymbolId) -> &Symbol {
    self
      .symbols
      .get(id.index())
      .unwrap_or_else(|| panic!("invalid symbol id {id:?}"))
  }

  pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
    self
      .symbols
      .get_mut(id.index())
      .unwrap_or_else(|| panic!("invalid symbol id {id:?}"))
  }

  /// Replace a record wholesale. The tag of a symbol never changes.
  pub fn set(&mut self, id: SymbolId, symbol: Symbol) {
    let slot = self.get_mut(id);
    assert_eq!(slot.tag(), symbol.tag(), "symbol tag changed for {id:?}");
    *slot = symbol;
  }

  pub fn len(&self) -> usize {
    self.symbols.len()
  }

  pub fn is_empty(&self) -> bool {
    self.symbols.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ty::{Builtin, TypeTable};

  #[test]
  fn redeclaring_in_the_same_scope_fails() {
    let mut table = SymbolTable::new();
    assert!(table.declare("x", SymbolTag::LocalVar).is_some());
    assert!(table.declare("x", SymbolTag::LocalVar).is_none());
    assert!(table.declare("x", SymbolTag::Function).is_none());
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn shadowing_in_a_nested_scope_succeeds() {
    let mut table = SymbolTable::new();
    let outer = table.declare("x", SymbolTag::LocalVar).unwrap();
    table.push_scope();
    let inner = table.declare("x", SymbolTag::LocalVar).unwrap();
    assert_ne!(outer, inner);
    assert_eq!(table.resolve("x"), Some(inner));
    table.pop_scope();
    assert_eq!(table.resolve("x"), Some(outer));
  }

  #[test]
  fn resolve_finds_the_innermost_of_many() {
    let mut table = SymbolTable::new();
    let mut last = table.declare("v", SymbolTag::LocalVar).unwrap();
    for _ in 0..4 {
      table.push_scope();
      table.push_scope();
      last = table.declare("v", SymbolTag::LocalVar).unwrap();
    }
    assert_eq!(table.resolve("v"), Some(last));
    assert_eq!(table.depth(), 9);
  }

  #[test]
  fn resolve_with_tag_respects_shadowing() {
    let mut table = SymbolTable::new();
    let function = table.declare("f", SymbolTag::Function).unwrap();
    assert_eq!(table.resolve_with_tag("f", SymbolTag::Function), Some(function));
    table.push_scope();
    table.declare("f", SymbolTag::LocalVar).unwrap();
    assert_eq!(table.resolve_with_tag("f", SymbolTag::Function), None);
    assert!(table.resolve_with_tag("f", SymbolTag::LocalVar).is_some());
    assert_eq!(table.resolve("missing"), None);
  }

  #[test]
  fn records_survive_scope_pop() {
    let types = TypeTable::new();
    let mut table = SymbolTable::new();
    table.push_scope();
    let id = table.declare("y", SymbolTag::LocalVar).unwrap();
    table.get_mut(id).ty = Some(types.builtin(Builtin::S64));
    table.pop_scope();
    assert_eq!(table.resolve("y"), None);
    assert_eq!(table.get(id).name, "y");
    assert_eq!(table.get(id).ty(), types.builtin(Builtin::S64));
  }

  #[test]
  fn set_patches_a_record() {
    let types = TypeTable::new();
    let mut table = SymbolTable::new();
    let id = table.declare("f", SymbolTag::Function).unwrap();
    let mut symbol = table.get(id).clone();
    symbol.ty = Some(types.builtin(Builtin::Bool));
    symbol.kind = SymbolKind::Function {
      params: vec![Param {
        name: "a".into(),
        ty: types.builtin(Builtin::S64),
      }],
      prototyped: true,
      external: true,
    };
    table.set(id, symbol);
    assert_eq!(table.get(id).ty(), types.builtin(Builtin::Bool));
  }

  #[test]
  #[should_panic(expected = "popping the global scope")]
  fn popping_the_global_scope_panics() {
    SymbolTable::new().pop_scope();
  }
}
