//! The backend: turns an AST file produced by `mlangfe` into a directly
//! executable ELF64 binary (§4.4-§4.9).
//!
//! Run with `--help` for the full flag list.

use std::path::PathBuf;

use clap::Parser;

use moneylang::back::{self, LowerOptions};
use moneylang::error::{print_diagnostic, Error, FileErrorKind};
use moneylang::middle;

#[derive(Debug, Parser)]
#[command(version, about = "Money-lang backend: AST file to ELF64 executable", long_about = None)]
struct Args {
    /// AST file produced by `mlangfe`.
    file: PathBuf,

    /// Where to write the compiled executable.
    #[arg(short, long)]
    output: PathBuf,

    /// Prebuilt stdlib ELF64 binary to link against.
    #[arg(long)]
    stdlib: PathBuf,

    /// Maximum number of AST nodes / IR instructions the input may expand to.
    #[arg(short = 't', long, default_value_t = 1024)]
    max_tokens: usize,

    /// Maximum number of name-table entries.
    #[arg(short = 'n', long, default_value_t = 256)]
    max_names: usize,

    /// Maximum total length, in bytes, of all interned names combined.
    #[arg(short = 'l', long, default_value_t = 2048)]
    max_names_len: usize,

    /// Also emit a NASM-compatible textual listing of the generated code.
    #[arg(long)]
    asm: bool,

    /// Also emit a per-byte-offset listing file.
    #[arg(long)]
    lst: bool,

    /// Scale every `Pay` value by 0.8 before it is returned.
    #[arg(long)]
    taxes: bool,
}

fn run(args: &Args) -> Result<(), Error> {
    let text = std::fs::read_to_string(&args.file)
        .map_err(|e| Error::file(FileErrorKind::Open, args.file.display().to_string(), e))?;

    log::info!("reading AST file {}", args.file.display());
    let (ast, mut names) = moneylang::ast_io::read(
        &text,
        args.max_tokens,
        args.max_names,
        args.max_names_len,
    )?;

    log::info!("building IR");
    let mut ir = middle::build(&ast, &mut names, args.taxes, args.max_tokens)?;
    log::debug!("produced {} IR instructions", ir.len());

    log::info!("loading stdlib {}", args.stdlib.display());
    let stdlib = back::stdlib::load(&args.stdlib)?;
    for (symbol, addr) in [
        ("__stdlib_in", stdlib.in_addr),
        ("__stdlib_out", stdlib.out_addr),
    ] {
        if let Some(id) = names.find(internment::Intern::new(symbol.to_string())) {
            names.set_address(id, addr);
        }
    }

    log::info!("lowering to machine code");
    let opts = LowerOptions {
        emit_asm: args.asm,
        emit_listing: args.lst,
    };
    let lowered = back::lower(&mut ir, &mut names, &opts)?;
    log::debug!("produced {} bytes of machine code", lowered.code.len());

    let executable = back::elf::build_executable(&stdlib.code, &lowered.code);
    back::elf::write_executable(&args.output, &executable)?;
    log::info!("wrote {}", args.output.display());

    if let Some(asm) = &lowered.asm {
        let path = args.output.with_extension("asm");
        std::fs::write(&path, asm)
            .map_err(|e| Error::file(FileErrorKind::Write, path.display().to_string(), e))?;
        log::info!("wrote {}", path.display());
    }
    if let Some(listing) = &lowered.listing {
        let path = args.output.with_extension("lst");
        std::fs::write(&path, listing)
            .map_err(|e| Error::file(FileErrorKind::Write, path.display().to_string(), e))?;
        log::info!("wrote {}", path.display());
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprint!("{e}");
            std::process::exit(3);
        }
    };

    if let Err(err) = run(&args) {
        // The AST file carries no real source positions (§4.3), so there is
        // no line to show a caret under; print the error alone.
        print_diagnostic(&err, None);
        std::process::exit(err.exit_code());
    }
}
