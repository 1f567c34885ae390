//! The frontend: lexes and parses a Money-lang source file and writes its
//! AST (plus name table) to an intermediate file the backend can pick up
//! (§4.1-§4.3).
//!
//! Run with `--help` for the full flag list.

use std::path::PathBuf;

use clap::Parser;

use moneylang::ast_io;
use moneylang::error::{print_diagnostic, Error, FileErrorKind};
use moneylang::front::ast::Ast;
use moneylang::front::lex::lex;
use moneylang::front::name_table::NameTable;
use moneylang::front::parse::parse;

#[derive(Debug, Parser)]
#[command(version, about = "Money-lang frontend: source to AST file", long_about = None)]
struct Args {
    /// Source file to compile.
    file: PathBuf,

    /// Where to write the AST file.
    #[arg(short, long)]
    output: PathBuf,

    /// Maximum number of tokens the lexer may produce.
    #[arg(short = 't', long, default_value_t = 1024)]
    max_tokens: usize,

    /// Maximum number of name-table entries.
    #[arg(short = 'n', long, default_value_t = 256)]
    max_names: usize,

    /// Maximum total length, in bytes, of all interned names combined.
    #[arg(short = 'l', long, default_value_t = 2048)]
    max_names_len: usize,
}

fn run(args: &Args, source: &str) -> Result<(), Error> {
    let file_id = internment::Intern::new(args.file.display().to_string());
    let mut names = NameTable::new(args.max_names, args.max_names_len);

    log::info!("lexing {}", args.file.display());
    let tokens = lex(source, file_id, &mut names, args.max_tokens)?;
    log::debug!("produced {} tokens", tokens.len());

    log::info!("parsing {}", args.file.display());
    let mut ast = Ast::new(args.max_tokens);
    parse(&tokens, &mut names, &mut ast)?;
    log::debug!("produced {} AST nodes, {} names", ast.len(), names.len());

    let text = ast_io::write(&ast, &names);
    std::fs::write(&args.output, text)
        .map_err(|e| Error::file(FileErrorKind::Write, args.output.display().to_string(), e))?;
    log::info!("wrote {}", args.output.display());

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

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            let err = Error::file(FileErrorKind::Open, args.file.display().to_string(), e);
            print_diagnostic(&err, None);
            std::process::exit(err.exit_code());
        }
    };

    if let Err(err) = run(&args, &source) {
        print_diagnostic(&err, Some(&source));
        std::process::exit(err.exit_code());
    }
}
