//! The AST file serializer (§4.3).
//!
//! Writes (and reads back) the AST plus its name table in a small bracketed
//! prefix-notation text format, fronted by a versioned signature line so a
//! backend built against a different frontend version fails loudly instead
//! of misparsing a stale file:
//!
//! ```text
//! IR312:1
//! NAMETABLE size: 2 {
//! 0: "x", VAR, 0;
//! 1: "add", FUNC, 2;
//! }
//! {OPR:SEP
//!   {OPR:ACCOUNT
//!     {IDR:0}
//!     {}
//!   }
//!   {}
//! }
//! ```
//!
//! Writing is deterministic: name-table entries are emitted in index order
//! and numeric literals are formatted with Rust's round-tripping `Display`
//! for `f64` (equivalent to `%.17g`). Reading is the exact inverse;
//! `read(write(ast)) == ast` up to node identity (§8).

use std::fmt::Write as _;

use crate::common::{EntityRef, SourcePos};
use crate::error::{Error, Result};
use crate::front::ast::{Ast, NodeId, NodeValue};
use crate::front::name_table::{NameEntry, NameId, NameKind, NameTable};
use crate::front::ops::Op;

const SIGNATURE_PREFIX: &str = "IR312:";
const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------- writer

pub fn write(ast: &Ast, names: &NameTable) -> String {
    let mut out = String::new();
    writeln!(out, "{SIGNATURE_PREFIX}{FORMAT_VERSION}").unwrap();
    write_name_table(&mut out, names);
    write_node(&mut out, ast, ast.root, 0);
    out.push('\n');
    out
}

fn write_name_table(out: &mut String, names: &NameTable) {
    writeln!(out, "NAMETABLE size: {} {{", names.len()).unwrap();
    for (id, entry) in names.iter() {
        let kind = match entry.kind {
            NameKind::Undefined => "UNDEFINED",
            NameKind::Func => "FUNC",
            NameKind::Var => "VAR",
        };
        writeln!(
            out,
            "{}: {:?}, {}, {};",
            id.index(),
            entry.name.as_str(),
            kind,
            entry.args_count,
        )
        .unwrap();
    }
    out.push_str("}\n");
}

fn write_node(out: &mut String, ast: &Ast, node: Option<NodeId>, indent: usize) {
    let pad = "  ".repeat(indent);
    out.push_str(&pad);
    let Some(id) = node else {
        out.push_str("{}\n");
        return;
    };
    let n = ast.get(id);
    match n.value {
        NodeValue::Number(v) => {
            writeln!(out, "{{NUM:{v}}}").unwrap();
        }
        NodeValue::Identifier(name_id) => {
            writeln!(out, "{{IDR:{}}}", name_id.index()).unwrap();
        }
        NodeValue::Operator(op) => {
            writeln!(out, "{{OPR:{}", op.op_name()).unwrap();
            write_node(out, ast, n.left, indent + 1);
            write_node(out, ast, n.right, indent + 1);
            writeln!(out, "{pad}}}").unwrap();
        }
    }
}

// ---------------------------------------------------------------- reader

struct Cursor<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { text, bytes: text.as_bytes(), pos: 0 }
    }

    fn fmt_err(&self, message: impl Into<String>) -> Error {
        Error::Format { offset: self.pos, message: message.into() }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect_byte(&mut self, b: u8) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.fmt_err(format!("expected {:?}", b as char)))
        }
    }

    fn expect_str(&mut self, s: &str) -> Result<()> {
        self.skip_ws();
        if self.text[self.pos..].starts_with(s) {
            self.pos += s.len();
            Ok(())
        } else {
            Err(self.fmt_err(format!("expected {s:?}")))
        }
    }

    fn read_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if pred(b)) {
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn read_quoted(&mut self) -> Result<String> {
        self.expect_byte(b'"')?;
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(self.fmt_err("unterminated quoted name")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let c = self.text[self.pos..].chars().next().unwrap();
                    s.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        Ok(s)
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.skip_ws();
        let digits = self.read_while(|b| b.is_ascii_digit());
        digits.parse().map_err(|_| self.fmt_err("expected an integer"))
    }

    fn read_f64(&mut self) -> Result<f64> {
        self.skip_ws();
        let s = self.read_while(|b| {
            b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E' | b'i' | b'n' | b'f')
        });
        s.parse().map_err(|_| self.fmt_err(format!("invalid numeric literal {s:?}")))
    }

    fn read_ident(&mut self) -> &'a str {
        self.skip_ws();
        self.read_while(|b| b.is_ascii_alphanumeric() || b == b'_')
    }
}

fn read_signature(c: &mut Cursor) -> Result<()> {
    c.skip_ws();
    if !c.text[c.pos..].starts_with(SIGNATURE_PREFIX) {
        return Err(Error::Signature {
            expected: format!("{SIGNATURE_PREFIX}{FORMAT_VERSION}"),
            found: c.text.get(c.pos..c.pos + 8.min(c.text.len() - c.pos)).unwrap_or("").to_string(),
        });
    }
    c.pos += SIGNATURE_PREFIX.len();
    let version = c
        .read_while(|b| b.is_ascii_digit())
        .parse::<u32>()
        .map_err(|_| c.fmt_err("malformed version number"))?;
    if version != FORMAT_VERSION {
        return Err(Error::Signature {
            expected: format!("{SIGNATURE_PREFIX}{FORMAT_VERSION}"),
            found: format!("{SIGNATURE_PREFIX}{version}"),
        });
    }
    Ok(())
}

fn read_name_table(c: &mut Cursor, names_len_capacity: usize, name_capacity: usize) -> Result<NameTable> {
    c.expect_str("NAMETABLE")?;
    c.expect_str("size:")?;
    let size = c.read_u32()? as usize;
    c.expect_byte(b'{')?;

    let mut table = NameTable::new(name_capacity.max(size), names_len_capacity);
    let mut entries: Vec<(u32, NameEntry)> = Vec::with_capacity(size);
    for _ in 0..size {
        let idx = c.read_u32()?;
        c.expect_byte(b':')?;
        let name = c.read_quoted()?;
        c.expect_byte(b',')?;
        let kind_word = c.read_ident();
        let kind = match kind_word {
            "UNDEFINED" => NameKind::Undefined,
            "FUNC" => NameKind::Func,
            "VAR" => NameKind::Var,
            other => return Err(c.fmt_err(format!("unknown name-table kind `{other}`"))),
        };
        c.expect_byte(b',')?;
        let args_count = c.read_u32()?;
        c.expect_byte(b';')?;
        entries.push((
            idx,
            NameEntry {
                name: internment::Intern::new(name),
                kind,
                args_count,
                address: 0,
                declared_in_function: false,
            },
        ));
    }
    c.expect_byte(b'}')?;

    entries.sort_by_key(|(idx, _)| *idx);
    for (expected, (idx, entry)) in entries.into_iter().enumerate() {
        if idx as usize != expected {
            return Err(c.fmt_err(format!("name table indices must be contiguous from 0, missing {expected}")));
        }
        let id = table.insert(entry.name)?;
        if entry.kind == NameKind::Func {
            table.mark_func(id, entry.args_count);
        } else if entry.kind == NameKind::Var {
            table.mark_var(id, entry.declared_in_function);
        }
    }
    Ok(table)
}

/// Nodes reconstructed from an AST file have no real source location (the
/// format doesn't carry one, §4.3) but still need a `SourcePos` to satisfy
/// `AstNode`; every node reborn this way points at this one synthetic spot.
fn synthetic_pos() -> SourcePos {
    SourcePos::new(internment::Intern::new("<ast-file>".to_string()), 0, 0)
}

fn read_node(c: &mut Cursor, ast: &mut Ast) -> Result<Option<NodeId>> {
    c.expect_byte(b'{')?;
    c.skip_ws();
    if c.peek() == Some(b'}') {
        c.pos += 1;
        return Ok(None);
    }
    if c.text[c.pos..].starts_with("NUM:") {
        c.pos += 4;
        let v = c.read_f64()?;
        c.expect_byte(b'}')?;
        let id = ast
            .push_number(v, synthetic_pos())
            .ok_or(Error::ArenaOverflow { what: "ast nodes", capacity: ast.len() })?;
        return Ok(Some(id));
    }
    if c.text[c.pos..].starts_with("IDR:") {
        c.pos += 4;
        let idx = c.read_u32()?;
        c.expect_byte(b'}')?;
        let id = ast
            .push_identifier(NameId::new(idx as usize), synthetic_pos())
            .ok_or(Error::ArenaOverflow { what: "ast nodes", capacity: ast.len() })?;
        return Ok(Some(id));
    }
    if c.text[c.pos..].starts_with("OPR:") {
        c.pos += 4;
        let name = c.read_ident();
        let op = Op::from_op_name(name).ok_or_else(|| c.fmt_err(format!("unknown operator `{name}`")))?;
        let left = read_node(c, ast)?;
        let right = read_node(c, ast)?;
        c.expect_byte(b'}')?;
        let id = ast
            .push_op(op, left, right, synthetic_pos())
            .ok_or(Error::ArenaOverflow { what: "ast nodes", capacity: ast.len() })?;
        return Ok(Some(id));
    }
    Err(c.fmt_err("expected `NUM:`, `IDR:`, `OPR:` or `}`"))
}

/// Read an AST file written by `write`. `ast_capacity` bounds the tree
/// arena; `names_len_capacity`/`name_capacity` bound the reconstructed name
/// table the same way the original compile-time limits did.
pub fn read(text: &str, ast_capacity: usize, name_capacity: usize, names_len_capacity: usize) -> Result<(Ast, NameTable)> {
    let mut c = Cursor::new(text);
    read_signature(&mut c)?;
    let names = read_name_table(&mut c, names_len_capacity, name_capacity)?;
    let mut ast = Ast::new(ast_capacity);
    let root = read_node(&mut c, &mut ast)?;
    ast.root = root;
    Ok((ast, names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lex::lex;
    use crate::front::parse::parse;

    fn compile_ast(src: &str) -> (Ast, NameTable) {
        let mut names = NameTable::new(256, 2048);
        let file = internment::Intern::new("test.mn".to_string());
        let tokens = lex(src, file, &mut names, 4096).unwrap();
        let mut ast = Ast::new(4096);
        parse(&tokens, &mut names, &mut ast).unwrap();
        (ast, names)
    }

    #[test]
    fn round_trips_a_simple_program() {
        let (ast, names) = compile_ast("Account x % x = 3\u{20BD} + 4\u{20BD} % ShowBalance x %");
        let text = write(&ast, &names);
        assert!(text.starts_with("IR312:1"));
        let (ast2, names2) = read(&text, 4096, 256, 2048).unwrap();
        assert_eq!(ast.len(), ast2.len());
        assert_eq!(names.len(), names2.len());
        let text2 = write(&ast2, &names2);
        assert_eq!(text, text2);
    }

    #[test]
    fn rejects_wrong_signature() {
        let err = read("NOPE:1\n", 16, 16, 16).unwrap_err();
        assert!(matches!(err, Error::Signature { .. }));
    }

    #[test]
    fn rejects_malformed_tree() {
        let text = "IR312:1\nNAMETABLE size: 0 {\n}\n{OPR:ADD\n  {}\n";
        let err = read(text, 16, 16, 16).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }
}
