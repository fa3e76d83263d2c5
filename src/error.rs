//! Errors that stop the compilation pipeline.
//!
//! Fatal findings abort immediately and are rendered in the usual
//! `file:line:col: fatal: msg` style, preceded by the non-fatal findings
//! recorded before the abort. Accumulated non-fatal findings on their own
//! only stop the pipeline at a phase boundary, through `Halted`.

use snafu::Snafu;

use crate::diagnostic::{Diagnostic, Phase};

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{}{file}:{line}:{column}: fatal: {message}", render_earlier(diagnostics)))]
  Fatal {
    file: String,
    line: u32,
    column: u32,
    message: String,
    diagnostics: Vec<Diagnostic>,
  },

  #[snafu(display(
    "{}{file}:{line}:{column}: fatal: not implemented: {feature}",
    render_earlier(diagnostics)
  ))]
  NotImplemented {
    file: String,
    line: u32,
    column: u32,
    feature: String,
    diagnostics: Vec<Diagnostic>,
  },

  #[snafu(display("{}", render_diagnostics(diagnostics)))]
  Halted {
    phase: Phase,
    diagnostics: Vec<Diagnostic>,
  },
}

impl CompileError {
  /// Number of user-facing findings carried by this error.
  pub fn count(&self) -> usize {
    match self {
      CompileError::Halted { diagnostics, .. } => diagnostics.len(),
      CompileError::Fatal { diagnostics, .. } | CompileError::NotImplemented { diagnostics, .. } => {
        diagnostics.len() + 1
      }
    }
  }
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
  diagnostics
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("\n")
}

// Each earlier finding on its own line, ahead of the fatal one.
fn render_earlier(diagnostics: &[Diagnostic]) -> String {
  diagnostics.iter().map(|d| format!("{d}\n")).collect()
}
