//! Diagnostic sink shared by every phase of the pipeline.
//!
//! Non-fatal findings are accumulated so a phase can surface as many of them
//! as possible; the driver gates each phase on `check_phase`. Fatal findings
//! are turned into a `CompileError` and propagated with `?`.

use std::fmt;

use log::debug;

use crate::error::{CompileError, CompileResult, FatalSnafu, HaltedSnafu, NotImplementedSnafu};

/// 1-based source position of a token or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
  pub line: u32,
  pub column: u32,
}

impl Location {
  pub fn new(line: u32, column: u32) -> Self {
    Self { line, column }
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.column)
  }
}

/// Pipeline phases that are gated on outstanding diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Parse,
  TypeCheck,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Phase::Parse => f.write_str("parsing"),
      Phase::TypeCheck => f.write_str("type checking"),
    }
  }
}

/// A single recorded non-fatal finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  pub file: String,
  pub location: Location,
  pub message: String,
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}: error: {}", self.file, self.location, self.message)
  }
}

#[derive(Debug)]
pub struct Reporter {
  file_name: String,
  diagnostics: Vec<Diagnostic>,
}

impl Reporter {
  pub fn new(file_name: impl Into<String>) -> Self {
    Self {
      file_name: file_name.into(),
      diagnostics: Vec::new(),
    }
  }

  pub fn file_name(&self) -> &str {
    &self.file_name
  }

  /// Record a non-fatal error; the current phase keeps going.
  pub fn error(&mut self, location: Location, message: impl Into<String>) {
    let message = message.into();
    debug!("diagnostic at {location}: {message}");
    self.diagnostics.push(Diagnostic {
      file: self.file_name.clone(),
      location,
      message,
    });
  }

  /// Build a fatal error. The caller returns it to abort the pipeline.
  /// Findings recorded so far travel with it.
  pub fn fatal(&self, location: Location, message: impl Into<String>) -> CompileError {
    FatalSnafu {
      file: self.file_name.as_str(),
      line: location.line,
      column: location.column,
      message,
      diagnostics: self.diagnostics.clone(),
    }
    .build()
  }

  pub fn not_implemented(&self, location: Location, feature: impl Into<String>) -> CompileError {
    NotImplementedSnafu {
      file: self.file_name.as_str(),
      line: location.line,
      column: location.column,
      feature,
      diagnostics: self.diagnostics.clone(),
    }
    .build()
  }

  pub fn has_errors(&self) -> bool {
    !self.diagnostics.is_empty()
  }

  pub fn diagnostics(&self) -> &[Diagnostic] {
    &self.diagnostics
  }

  /// Halt before the next phase if anything was reported during `phase`.
  pub fn check_phase(&mut self, phase: Phase) -> CompileResult<()> {
    if !self.has_errors() {
      debug!("{phase} finished without errors");
      return Ok(());
    }
    HaltedSnafu {
      phase,
      diagnostics: std::mem::take(&mut self.diagnostics),
    }
    .fail()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn diagnostics_render_with_file_and_location() {
    let mut reporter = Reporter::new("main.lisp");
    reporter.error(Location::new(3, 7), "operand type mismatch");
    assert_eq!(
      reporter.diagnostics()[0].to_string(),
      "main.lisp:3:7: error: operand type mismatch"
    );
  }

  #[test]
  fn phase_gate_passes_without_errors() {
    let mut reporter = Reporter::new("a.lisp");
    assert!(reporter.check_phase(Phase::Parse).is_ok());
  }

  #[test]
  fn phase_gate_drains_accumulated_errors() {
    let mut reporter = Reporter::new("a.lisp");
    reporter.error(Location::new(1, 1), "first");
    reporter.error(Location::new(2, 4), "second");

    let err = reporter.check_phase(Phase::TypeCheck).unwrap_err();
    assert_eq!(
      err.to_string(),
      "a.lisp:1:1: error: first\na.lisp:2:4: error: second"
    );
    assert!(!reporter.has_errors());
  }

  #[test]
  fn fatal_errors_carry_the_file_name() {
    let reporter = Reporter::new("x.lisp");
    let err = reporter.fatal(Location::new(5, 2), "unknown syntax");
    assert_eq!(err.to_string(), "x.lisp:5:2: fatal: unknown syntax");
    assert_eq!(err.count(), 1);
  }

  #[test]
  fn fatal_errors_render_earlier_findings_first() {
    let mut reporter = Reporter::new("x.lisp");
    reporter.error(Location::new(1, 5), "'y' is not declared");
    let err = reporter.not_implemented(Location::new(2, 1), "cast from type struct");
    assert_eq!(
      err.to_string(),
      "x.lisp:1:5: error: 'y' is not declared\nx.lisp:2:1: fatal: not implemented: cast from type struct"
    );
    assert_eq!(err.count(), 2);
  }
}
