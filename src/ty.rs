//! Flat registry of type descriptors addressed by `TypeId`.
//!
//! Builtins are registered once when the table is created. Compound types
//! are never deduplicated: every struct type expression gets its own id.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
  Void,
  S64,
  U64,
  Bool,
}

impl Builtin {
  pub const ALL: [Builtin; 4] = [Builtin::Void, Builtin::S64, Builtin::U64, Builtin::Bool];

  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "void" => Some(Builtin::Void),
      "s64" => Some(Builtin::S64),
      "u64" => Some(Builtin::U64),
      "bool" => Some(Builtin::Bool),
      _ => None,
    }
  }

  fn descriptor(self) -> Type {
    let (kind, size) = match self {
      Builtin::Void => (TypeKind::Void, 0),
      Builtin::S64 => (TypeKind::S64, 8),
      Builtin::U64 => (TypeKind::U64, 8),
      Builtin::Bool => (TypeKind::Bool, 1),
    };
    Type {
      kind,
      size,
      align: size.max(1),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
  pub name: String,
  pub ty: TypeId,
  pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
  Void,
  S64,
  U64,
  Bool,
  Struct { fields: Vec<Field> },
  /// A typedef; `defined_as` always refers to an earlier entry.
  Definition { name: String, defined_as: TypeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
  pub kind: TypeKind,
  pub size: u64,
  pub align: u64,
}

#[derive(Debug)]
pub struct TypeTable {
  types: Vec<Type>,
  builtins: HashMap<Builtin, TypeId>,
}

impl Default for TypeTable {
  fn default() -> Self {
    Self::new()
  }
}

impl TypeTable {
  pub fn new() -> Self {
    let mut table = Self {
      types: Vec::new(),
      builtins: HashMap::new(),
    };
    for builtin in Builtin::ALL {
      table.register_builtin(builtin);
    }
    table
  }

  /// Id of a builtin, registering it on first use.
  pub fn register_builtin(&mut self, builtin: Builtin) -> TypeId {
    if let Some(&id) = self.builtins.get(&builtin) {
      return id;
    }
    let id = self.register(builtin.descriptor());
    self.builtins.insert(builtin, id);
    id
  }

  pub fn builtin(&self, builtin: Builtin) -> TypeId {
    self.builtins[&builtin]
  }

  /// Always allocates a fresh id.
  pub fn register(&mut self, ty: Type) -> TypeId {
    let id = TypeId(self.types.len() as u32);
    self.types.push(ty);
    id
  }

  pub fn get(&self, id: TypeId) -> &Type {
    self
      .types
      .get(id.index())
      .unwrap_or_else(|| panic!("invalid type id {id:?}"))
  }

  pub fn len(&self) -> usize {
    self.types.len()
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty()
  }

  /// Lay out `fields` in order, aligning each one, and register the struct.
  pub fn register_struct(&mut self, fields: Vec<(String, TypeId)>) -> TypeId {
    let mut offset = 0;
    let mut align = 1;
    let mut laid_out = Vec::with_capacity(fields.len());
    for (name, ty) in fields {
      let field = self.get(ty);
      offset = align_to(offset, field.align);
      align = align.max(field.align);
      laid_out.push(Field { name, ty, offset });
      offset += field.size;
    }
    self.register(Type {
      kind: TypeKind::Struct { fields: laid_out },
      size: align_to(offset, align),
      align,
    })
  }

  /// Register a typedef of `defined_as`, inheriting its size and alignment.
  pub fn register_definition(&mut self, name: impl Into<String>, defined_as: TypeId) -> TypeId {
    let underlying = self.get(defined_as);
    let (size, align) = (underlying.size, underlying.align);
    self.register(Type {
      kind: TypeKind::Definition {
        name: name.into(),
        defined_as,
      },
      size,
      align,
    })
  }

  /// Follow the typedef chain down to a concrete type.
  pub fn resolve(&self, mut id: TypeId) -> TypeId {
    while let TypeKind::Definition { defined_as, .. } = self.get(id).kind {
      id = defined_as;
    }
    id
  }

  pub fn is_builtin(&self, id: TypeId, builtin: Builtin) -> bool {
    self.builtins.get(&builtin) == Some(&id)
  }

  /// True for s64, u64 and bool after following typedefs.
  pub fn is_scalar(&self, id: TypeId) -> bool {
    matches!(
      self.get(self.resolve(id)).kind,
      TypeKind::S64 | TypeKind::U64 | TypeKind::Bool
    )
  }

  pub fn is_unsigned(&self, id: TypeId) -> bool {
    matches!(self.get(self.resolve(id)).kind, TypeKind::U64)
  }

  pub fn describe(&self, id: TypeId) -> String {
    match &self.get(id).kind {
      TypeKind::Void => "void".to_string(),
      TypeKind::S64 => "s64".to_string(),
      TypeKind::U64 => "u64".to_string(),
      TypeKind::Bool => "bool".to_string(),
      TypeKind::Struct { fields } => {
        let mut s = String::from("struct (");
        for field in fields {
          s.push_str(&format!("{}: {} ", field.name, self.describe(field.ty)));
        }
        s.push(')');
        s
      }
      TypeKind::Definition { name, .. } => name.clone(),
    }
  }
}

/// Round `n` up to a multiple of `align`.
pub(crate) fn align_to(n: u64, align: u64) -> u64 {
  n.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builtin_lookup_is_idempotent() {
    let mut types = TypeTable::new();
    let before = types.len();
    let s64 = types.builtin(Builtin::S64);
    assert_eq!(types.register_builtin(Builtin::S64), s64);
    assert_eq!(types.register_builtin(Builtin::S64), s64);
    assert_eq!(types.len(), before);
  }

  #[test]
  fn builtin_sizes() {
    let types = TypeTable::new();
    assert_eq!(types.get(types.builtin(Builtin::Void)).size, 0);
    assert_eq!(types.get(types.builtin(Builtin::S64)).size, 8);
    assert_eq!(types.get(types.builtin(Builtin::U64)).align, 8);
    assert_eq!(types.get(types.builtin(Builtin::Bool)).size, 1);
  }

  #[test]
  fn structs_are_not_deduplicated() {
    let mut types = TypeTable::new();
    let s64 = types.builtin(Builtin::S64);
    let a = types.register_struct(vec![("x".into(), s64)]);
    let b = types.register_struct(vec![("x".into(), s64)]);
    assert_ne!(a, b);
    assert_eq!(types.get(a), types.get(b));
  }

  #[test]
  fn struct_fields_are_aligned() {
    let mut types = TypeTable::new();
    let s64 = types.builtin(Builtin::S64);
    let boolean = types.builtin(Builtin::Bool);
    let id = types.register_struct(vec![
      ("flag".into(), boolean),
      ("value".into(), s64),
      ("other".into(), boolean),
    ]);
    let ty = types.get(id);
    let TypeKind::Struct { fields } = &ty.kind else {
      panic!("expected a struct");
    };
    let offsets: Vec<_> = fields.iter().map(|field| field.offset).collect();
    assert_eq!(offsets, vec![0, 8, 16]);
    assert_eq!(ty.size, 24);
    assert_eq!(ty.align, 8);
    assert_eq!(types.describe(id), "struct (flag: bool value: s64 other: bool )");
  }

  #[test]
  fn typedef_chains_resolve_deeply() {
    let mut types = TypeTable::new();
    let u64 = types.builtin(Builtin::U64);
    let mut id = u64;
    for depth in 0..5 {
      id = types.register_definition(format!("t{depth}"), id);
    }
    assert!(matches!(types.get(id).kind, TypeKind::Definition { .. }));
    assert_eq!(types.resolve(id), u64);
    assert_eq!(types.get(id).size, 8);
    assert!(types.is_scalar(id));
    assert!(types.is_unsigned(id));
    assert_eq!(types.describe(id), "t4");
  }
}
