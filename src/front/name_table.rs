//! The name table: an append-only, capacity-bounded symbol table interning
//! every identifier seen by the lexer and recording, once the parser and IR
//! builder have looked at its use sites, what kind of thing it names.
//!
//! Mirrors `original_source/LangGlobals/include/nameTable.h`'s
//! `Identifier_t` / `NameTable_t`, adapted to Rust ownership: instead of a
//! `MemoryArena_t namesArray` of raw `char *`, names are interned `Id`s
//! (see `common::Id`), and capacity is enforced by `Arena` rather than by
//! hand-tracked `size`/`capacity` fields.

use crate::common::{Arena, HashMap, Id};
use crate::entity_ref;
use crate::error::{Error, Result};

entity_ref!(NameId);

/// What an identifier was last observed to be used as.
///
/// `Undefined` is the initial state for every interned name: the lexer
/// interns on first sight, before the parser has had a chance to see how
/// the identifier is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum NameKind {
    #[display("undefined")]
    Undefined,
    #[display("function")]
    Func,
    #[display("variable")]
    Var,
}

/// One name table record.
///
/// `address` is semantic only for `Func`: the byte offset (from code start)
/// of the function's entry label, back-filled by pass 1 of the lowerer
/// (§4.7). Variable addresses live entirely on the `LocalsStack` (§4.5);
/// this field is simply unused for `Var`/`Undefined` entries.
#[derive(Clone, Debug)]
pub struct NameEntry {
    pub name: Id,
    pub kind: NameKind,
    pub args_count: u32,
    pub address: i64,
    /// Diagnostic-only: was this identifier declared textually inside a
    /// function body? Does not participate in address resolution, which is
    /// the LocalsStack's job exclusively; kept only so error messages and
    /// the AST dump can say "local variable `x`" rather than just "`x`".
    pub declared_in_function: bool,
}

pub struct NameTable {
    entries: Arena<NameId, NameEntry>,
    by_name: HashMap<Id, NameId>,
    names_len: usize,
    names_len_capacity: usize,
}

impl NameTable {
    pub fn new(capacity: usize, names_len_capacity: usize) -> Self {
        NameTable {
            entries: Arena::with_capacity(capacity),
            by_name: HashMap::new(),
            names_len: 0,
            names_len_capacity,
        }
    }

    /// Intern `name`, returning its existing index if already present
    /// (insert-stability, §3 Data Model / §8 "Name-table intern stability").
    pub fn insert(&mut self, name: Id) -> Result<NameId> {
        if let Some(&id) = self.by_name.get(&name) {
            return Ok(id);
        }
        self.names_len += name.len();
        if self.names_len > self.names_len_capacity {
            return Err(Error::NamesLengthOverflow {
                capacity: self.names_len_capacity,
            });
        }
        let entry = NameEntry {
            name,
            kind: NameKind::Undefined,
            args_count: 0,
            address: 0,
            declared_in_function: false,
        };
        let id = self.entries.try_push(entry).ok_or(Error::NameTableOverflow {
            capacity: self.by_name.capacity().max(1),
        })?;
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn find(&self, name: Id) -> Option<NameId> {
        self.by_name.get(&name).copied()
    }

    pub fn get(&self, id: NameId) -> &NameEntry {
        &self.entries[id]
    }

    pub fn get_mut(&mut self, id: NameId) -> &mut NameEntry {
        &mut self.entries[id]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark `id` as a function with the given formal-argument count.
    /// Re-declaring an existing `Func` with a different arg count is left
    /// to the parser to reject (redeclaration is not itself modeled here).
    pub fn mark_func(&mut self, id: NameId, args_count: u32) {
        let e = self.get_mut(id);
        e.kind = NameKind::Func;
        e.args_count = args_count;
    }

    pub fn mark_var(&mut self, id: NameId, declared_in_function: bool) {
        let e = self.get_mut(id);
        e.kind = NameKind::Var;
        e.declared_in_function = declared_in_function;
    }

    pub fn set_address(&mut self, id: NameId, address: i64) {
        self.get_mut(id).address = address;
    }

    /// Iterate entries in index order (0..N-1), the order the AST
    /// serializer dumps them in for a deterministic file format.
    pub fn iter(&self) -> impl Iterator<Item = (NameId, &NameEntry)> {
        (0..self.entries.len()).map(|i| {
            let id = NameId::new(i);
            (id, &self.entries[id])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Id {
        internment::Intern::new(s.to_string())
    }

    #[test]
    fn insert_is_idempotent() {
        let mut table = NameTable::new(16, 256);
        let a = table.insert(id("x")).unwrap();
        let b = table.insert(id("x")).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let mut table = NameTable::new(16, 256);
        let a = table.insert(id("x")).unwrap();
        let b = table.insert(id("y")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn overflow_is_reported() {
        let mut table = NameTable::new(1, 256);
        table.insert(id("x")).unwrap();
        assert!(matches!(
            table.insert(id("y")),
            Err(Error::NameTableOverflow { .. })
        ));
    }

    #[test]
    fn mark_func_sets_kind_and_argcount() {
        let mut table = NameTable::new(16, 256);
        let f = table.insert(id("add")).unwrap();
        table.mark_func(f, 2);
        assert_eq!(table.get(f).kind, NameKind::Func);
        assert_eq!(table.get(f).args_count, 2);
    }
}
