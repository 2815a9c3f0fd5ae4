//! `adv2c` — the adv2 compiler front end.
//!
//! Wires the library pipeline (`adv2_compiler::parse` → `semant::analyze` →
//! `codegen::generate_with`) to a file on disk:
//! `adv2c [-d] [-s] [-r] [-o FILE] [-t TEMPLATE] SOURCE`.

use std::fs;
use std::path::PathBuf;

use adv2_cli::{apply_template, output, render_symbol_table, FsIncludeResolver};
use adv2_compiler::{codegen, parse, semant};
use clap::Parser;

/// Compile adv2 source to a binary image.
#[derive(Parser)]
#[command(name = "adv2c", version, about = "Compile adv2 source to a bytecode image")]
struct Args {
    /// Source file to compile.
    source: PathBuf,

    /// Print a disassembly listing of the generated code segment.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Print the global and property symbol table.
    #[arg(short = 's', long = "symbols")]
    symbols: bool,

    /// Run the compiled image immediately after a successful compile.
    #[arg(short = 'r', long = "run")]
    run: bool,

    /// Output image path. Defaults to the source path with its extension
    /// replaced by `.advi`.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Wrap the image by splicing it into a template file after the
    /// `ADV2TPL\0` placeholder.
    #[arg(short = 't', long = "template")]
    template: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    if let Err(message) = run(&args) {
        output::print_error(&message);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), String> {
    let source_text = fs::read_to_string(&args.source)
        .map_err(|e| format!("{}: {e}", args.source.display()))?;
    let file_name = args.source.display().to_string();

    let resolver = FsIncludeResolver::new(&args.source);
    let spliced = adv2_compiler::preprocess_includes(&source_text, &resolver)
        .map_err(|e| adv2_compiler::render(&file_name, &source_text, std::slice::from_ref(&e)))?;

    let program = parse(&spliced).map_err(|errs| adv2_compiler::render(&file_name, &spliced, &errs))?;
    let result = semant::analyze(&program).map_err(|errs| adv2_compiler::render(&file_name, &spliced, &errs))?;

    if args.symbols {
        print!("{}", render_symbol_table(&result));
    }

    let image = codegen::generate_with(&result, &codegen::StubAssembler)
        .map_err(|errs| adv2_compiler::render(&file_name, &spliced, &errs))?;

    if args.debug {
        for insn in adv2_bytecode::disasm::decode_all(&image.code).map_err(|e| e.to_string())? {
            println!("{insn}");
        }
    }

    let image_bytes = image.encode();
    let out_bytes = match &args.template {
        Some(template_path) => {
            let template_bytes = fs::read(template_path)
                .map_err(|e| format!("{}: {e}", template_path.display()))?;
            apply_template(&template_path.display().to_string(), &template_bytes, &image_bytes)
                .map_err(|e| e.to_string())?
        }
        None => image_bytes,
    };

    let out_path = args.output.clone().unwrap_or_else(|| args.source.with_extension("advi"));
    fs::write(&out_path, &out_bytes).map_err(|e| format!("{}: {e}", out_path.display()))?;

    if args.run {
        let mut vm = adv2_vm::Vm::new(&image);
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut input = stdin.lock();
        let mut output_handle = stdout.lock();
        let result = vm
            .run(&mut input, &mut output_handle, None)
            .map_err(|e| e.to_string())?;
        match result {
            adv2_vm::ExecResult::Halted => {}
            adv2_vm::ExecResult::UncaughtThrow(value) => {
                return Err(format!("uncaught throw: {value}"));
            }
        }
    }

    Ok(())
}
