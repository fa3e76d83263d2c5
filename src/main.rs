use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;
use lispcc::CompileError;
use log::{LevelFilter, debug};
use snafu::{ResultExt, Snafu};

/// Compile a parenthesized source file into x86-64 GAS assembly.
#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
  /// Source file to compile
  input: PathBuf,

  /// Where to write the assembly
  #[arg(short, long, default_value = "out.s")]
  output: PathBuf,

  /// Enable debug logging
  #[arg(short, long)]
  verbose: bool,

  /// Print the checked syntax tree to stderr
  #[arg(long)]
  dump_ast: bool,
}

#[derive(Debug, Snafu)]
enum DriverError {
  #[snafu(display("cannot read {}: {source}", path.display()))]
  ReadInput { path: PathBuf, source: io::Error },

  #[snafu(display("cannot write {}: {source}", path.display()))]
  WriteOutput { path: PathBuf, source: io::Error },

  #[snafu(transparent)]
  Compile { source: CompileError },
}

fn init_logger(verbose: bool) {
  let default = if verbose {
    LevelFilter::Debug
  } else {
    LevelFilter::Warn
  };
  // RUST_LOG, when set, overrides the default level.
  env_logger::Builder::new()
    .filter_level(default)
    .parse_default_env()
    .init();
}

fn run(cli: &Cli) -> Result<(), DriverError> {
  let source = fs::read_to_string(&cli.input).context(ReadInputSnafu { path: &cli.input })?;
  let file_name = cli.input.display().to_string();

  let mut compilation = lispcc::analyze(&source, &file_name)?;
  if cli.dump_ast {
    eprintln!("{:#?}", compilation.program);
  }
  let asm = compilation.generate()?;

  fs::write(&cli.output, asm).context(WriteOutputSnafu { path: &cli.output })?;
  debug!("wrote {}", cli.output.display());
  Ok(())
}

fn main() {
  let cli = Cli::parse();
  init_logger(cli.verbose);

  if let Err(err) = run(&cli) {
    eprintln!("{err}");
    process::exit(1);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;
  use std::ffi::OsStr;
  use std::path::Path;

  fn cli_for(input: &Path, output: &Path) -> Cli {
    let args = [
      OsStr::new("lispcc"),
      OsStr::new("-o"),
      output.as_os_str(),
      input.as_os_str(),
    ];
    Cli::try_parse_from(args).unwrap()
  }

  #[test]
  fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
  }

  #[test]
  fn output_defaults_to_out_s() {
    let cli = Cli::try_parse_from(["lispcc", "prog.lisp"]).unwrap();
    assert_eq!(cli.output, PathBuf::from("out.s"));
    assert!(!cli.verbose && !cli.dump_ast);

    let cli = Cli::try_parse_from(["lispcc", "-v", "--dump-ast", "-o", "a.s", "prog.lisp"]).unwrap();
    assert_eq!(cli.output, PathBuf::from("a.s"));
    assert!(cli.verbose && cli.dump_ast);
  }

  #[test]
  fn missing_input_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.lisp");
    let cli = cli_for(&input, &dir.path().join("out.s"));

    let err = run(&cli).unwrap_err();
    assert!(matches!(&err, DriverError::ReadInput { path, .. } if *path == input));
    assert!(err.to_string().starts_with(&format!("cannot read {}: ", input.display())));
  }

  #[test]
  fn compile_errors_pass_through_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.lisp");
    let output = dir.path().join("out.s");
    fs::write(&input, "(:= @ 1)").unwrap();
    let cli = cli_for(&input, &output);

    let err = run(&cli).unwrap_err();
    assert!(matches!(err, DriverError::Compile { source: CompileError::Fatal { .. } }));
    assert_eq!(
      err.to_string(),
      format!("{}:1:5: fatal: unknown syntax", input.display())
    );
    assert!(!output.exists());
  }

  #[test]
  fn unwritable_output_is_a_write_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("ok.lisp");
    fs::write(&input, "(let s64 x)").unwrap();
    let output = dir.path().join("no-such-dir").join("out.s");
    let cli = cli_for(&input, &output);

    let err = run(&cli).unwrap_err();
    assert!(matches!(err, DriverError::WriteOutput { .. }), "{err:?}");
  }
}
