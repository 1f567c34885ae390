//! The compiler-wide error taxonomy.
//!
//! One enum for every stage: lexing, parsing, AST (de)serialization,
//! IR-building/scope resolution, and machine-code lowering/ELF emission.
//! Every stage propagates its error unmodified (`?`) to `main`, which logs
//! it and exits non-zero; there is no recovery once a non-soft error is
//! detected (see the parser's separate `Soft`/`Hard` status in `front::parse`,
//! which is not part of this enum because soft failures are not errors —
//! they are "try another production").

use crate::common::SourcePos;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot {kind} `{path}`: {source}")]
    File {
        kind: FileErrorKind,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{pos}: {message}")]
    Lex { pos: SourcePos, message: String },

    #[error("{pos}: {message}")]
    Syntax { pos: SourcePos, message: String },

    #[error("arena overflow: {what} exceeded its capacity of {capacity}")]
    ArenaOverflow { what: &'static str, capacity: usize },

    #[error("name table overflow: exceeded its capacity of {capacity} entries")]
    NameTableOverflow { capacity: usize },

    #[error("names overflow: exceeded the total name-bytes capacity of {capacity}")]
    NamesLengthOverflow { capacity: usize },

    #[error("malformed AST file: expected signature `{expected}`, found `{found}`")]
    Signature { expected: String, found: String },

    #[error("malformed AST file at byte {offset}: {message}")]
    Format { offset: usize, message: String },

    #[error("{pos}: type error: {message}")]
    Type { pos: SourcePos, message: String },

    #[error("{pos}: `{name}` is not in scope")]
    Scope { pos: SourcePos, name: String },

    #[error("{pos}: function `{name}` is declared inside another function")]
    NestedFunc { pos: SourcePos, name: String },

    #[error("{pos}: `{name}` expects {expected} argument(s), found {found}")]
    ArgsCount {
        pos: SourcePos,
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("output code buffer would exceed its maximum size of {max} bytes (needed {needed})")]
    Memory { max: usize, needed: usize },

    #[error("CLI error: {0}")]
    Cli(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    Open,
    Read,
    Write,
}

impl std::fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileErrorKind::Open => "open",
            FileErrorKind::Read => "read",
            FileErrorKind::Write => "write",
        };
        write!(f, "{s}")
    }
}

impl Error {
    pub fn file(kind: FileErrorKind, path: impl Into<String>, source: std::io::Error) -> Self {
        Error::File {
            kind,
            path: path.into(),
            source,
        }
    }

    /// The process exit code a `main` should use when this error is the
    /// reason compilation stopped (§6 "Exit codes"): file-system failures
    /// opening the input, output, or stdlib binary get their own code (4),
    /// a CLI-argument failure is handled separately by the binaries before
    /// any `Error` exists (3), and every other compiler error (lex, parse,
    /// scope, encoding, ...) is the general failure code (1).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::File { .. } => 4,
            _ => 1,
        }
    }

    /// The source position to point a caret at, for errors that carry one.
    pub fn source_pos(&self) -> Option<&SourcePos> {
        match self {
            Error::Lex { pos, .. }
            | Error::Syntax { pos, .. }
            | Error::Type { pos, .. }
            | Error::Scope { pos, .. }
            | Error::NestedFunc { pos, .. }
            | Error::ArgsCount { pos, .. } => Some(pos),
            _ => None,
        }
    }
}

/// Print `err` to stderr, preceded by a snippet of the offending source line
/// with a caret under the column, when both a position and the line it
/// points into are available (§6 "errors print a snippet of the offending
/// source line with a caret under the column, followed by the error
/// message"). `source` is the original program text; the frontend always has
/// it in hand, but the backend only works from an AST file and so passes
/// `None` unless it can opportunistically reread the path the position
/// itself names.
pub fn print_diagnostic(err: &Error, source: Option<&str>) {
    if let Some(pos) = err.source_pos() {
        let line = source.and_then(|text| text.lines().nth(pos.line.saturating_sub(1) as usize));
        if let Some(line) = line {
            eprintln!("{line}");
            eprintln!("{}^", " ".repeat(pos.col.saturating_sub(1) as usize));
        }
    }
    eprintln!("error: {err}");
}

pub type Result<T> = std::result::Result<T, Error>;
