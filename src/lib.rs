//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` splits the source into a flat token stream.
//! - `parser` builds the tree and fills the symbol and type tables.
//! - `checker` validates types over the finished tree.
//! - `codegen` lowers the checked tree into x86-64 AT&T assembly.
//! - `diagnostic` and `error` carry findings between the phases.
//!
//! Non-fatal findings gate the pipeline between phases: code generation
//! never runs over a tree with known errors.

pub mod ast;
pub mod checker;
pub mod codegen;
pub mod diagnostic;
pub mod error;
pub mod parser;
pub mod symbol;
pub mod tokenizer;
pub mod ty;

use log::debug;

use crate::ast::Program;
use crate::diagnostic::{Phase, Reporter};
use crate::symbol::SymbolTable;
use crate::ty::TypeTable;

pub use error::{CompileError, CompileResult};

/// A parsed and type-checked compilation unit, ready for code generation.
#[derive(Debug)]
pub struct Compilation {
  pub program: Program,
  pub types: TypeTable,
  pub symbols: SymbolTable,
  pub reporter: Reporter,
}

impl Compilation {
  pub fn generate(&mut self) -> CompileResult<String> {
    codegen::generate(&self.program, &self.types, &mut self.symbols, &self.reporter)
  }
}

/// Run every phase up to and including type checking.
pub fn analyze(source: &str, file_name: &str) -> CompileResult<Compilation> {
  let mut reporter = Reporter::new(file_name);
  let mut types = TypeTable::new();
  let mut symbols = SymbolTable::new();

  let tokens = tokenizer::tokenize(source, &reporter)?;
  debug!("{file_name}: {} tokens", tokens.len());
  let program = parser::parse(tokens, &mut types, &mut symbols, &mut reporter)?;
  reporter.check_phase(Phase::Parse)?;

  checker::check(&program, &types, &symbols, &mut reporter)?;
  reporter.check_phase(Phase::TypeCheck)?;

  Ok(Compilation {
    program,
    types,
    symbols,
    reporter,
  })
}

/// Compile a source string into AT&T assembly.
pub fn generate_assembly(source: &str, file_name: &str) -> CompileResult<String> {
  analyze(source, file_name)?.generate()
}
