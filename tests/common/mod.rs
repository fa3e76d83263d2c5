//! Shared helpers for the end-to-end tests.

#![allow(dead_code)]

use std::fs;
use std::process::Command;

use lispcc::CompileError;
use lispcc::diagnostic::Phase;

pub const FILE_NAME: &str = "test.lisp";

pub fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

/// Compile `source`, panicking with the rendered error on failure.
pub fn compile(source: &str) -> String {
  init_logger();
  match lispcc::generate_assembly(source, FILE_NAME) {
    Ok(asm) => asm,
    Err(err) => panic!("compilation failed:\n{err}"),
  }
}

/// Messages of the diagnostics that halted compilation, with the phase.
pub fn halted(source: &str) -> (Phase, Vec<String>) {
  init_logger();
  match lispcc::generate_assembly(source, FILE_NAME) {
    Err(CompileError::Halted { phase, diagnostics }) => (
      phase,
      diagnostics
        .into_iter()
        .map(|diagnostic| diagnostic.message)
        .collect(),
    ),
    other => panic!("expected halted compilation, got {other:?}"),
  }
}

fn have_cc() -> bool {
  Command::new("cc")
    .arg("--version")
    .output()
    .is_ok_and(|output| output.status.success())
}

/// Assemble, link and run `source`, returning the exit status. `None` when
/// no C toolchain is available to assemble the output.
pub fn run(name: &str, source: &str) -> Option<i32> {
  if !have_cc() {
    eprintln!("skipping {name}: cc not available");
    return None;
  }
  let asm = compile(source);

  let dir = tempfile::tempdir().unwrap();
  let asm_path = dir.path().join("out.s");
  let exe_path = dir.path().join("out");
  fs::write(&asm_path, asm).unwrap();

  let status = Command::new("cc")
    .arg("-o")
    .arg(&exe_path)
    .arg(&asm_path)
    .status()
    .unwrap();
  assert!(status.success(), "cc failed for {name}");

  let status = Command::new(&exe_path).status().unwrap();
  status.code()
}
