use std::fs;
use std::process;

/// Compiler driver: read one source file, hand the assembly text to stdout
/// or a file. Assembling and linking are the toolchain's job, e.g.
/// `minicc prog.c -o prog.s && gcc prog.s -o prog`.
#[derive(Debug, clap::Parser)]
#[clap(version, about)]
struct Args {
  /// Input source file
  input: String,

  /// Output assembly file (stdout when absent)
  #[clap(short, long)]
  output: Option<String>,

  /// Fold constants and drop dead branches before codegen
  #[clap(short = 'O', long)]
  optimize: bool,
}

fn main() {
  use clap::Parser;

  let args = Args::parse();

  let source = match fs::read_to_string(&args.input) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("Error: could not open {}: {err}", args.input);
      process::exit(1);
    }
  };

  let assembly = match minicc::compile(&source, args.optimize) {
    Ok(assembly) => assembly,
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  };

  match &args.output {
    Some(path) => {
      if let Err(err) = fs::write(path, &assembly) {
        eprintln!("Error: could not write {path}: {err}");
        process::exit(1);
      }
    }
    None => print!("{assembly}"),
  }
}
