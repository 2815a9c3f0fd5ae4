//! `adv2vm` — the adv2 virtual machine front end.
//!
//! Loads a compiled image and runs it on stdin/stdout:
//! `adv2vm [-d] IMAGE`. `-d` traces each decoded instruction and the
//! stack-cache register file to stderr.

use std::fs;
use std::path::PathBuf;

use adv2_bytecode::Image;
use adv2_cli::output;
use adv2_vm::{ExecResult, Vm};
use clap::Parser;

/// Run a compiled adv2 image.
#[derive(Parser)]
#[command(name = "adv2vm", version, about = "Run a compiled adv2 bytecode image")]
struct Args {
    /// Image file produced by `adv2c`.
    image: PathBuf,

    /// Trace every executed instruction and stack state to stderr.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => {}
        Err(message) => {
            output::print_error(&message);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let bytes = fs::read(&args.image).map_err(|e| format!("{}: {e}", args.image.display()))?;
    let image = Image::decode(&bytes).map_err(|e| e.to_string())?;

    let mut vm = Vm::new(&image);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut input = stdin.lock();
    let mut out = stdout.lock();
    let mut stderr = std::io::stderr();

    let trace: Option<&mut dyn std::io::Write> = if args.debug { Some(&mut stderr) } else { None };

    let result = vm.run(&mut input, &mut out, trace).map_err(|e| e.to_string())?;

    match result {
        ExecResult::Halted => Ok(()),
        ExecResult::UncaughtThrow(value) => Err(format!("uncaught throw: {value}")),
    }
}
