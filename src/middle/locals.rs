//! The locals stack (§4.5): assigns frame-relative addresses to variables
//! and function arguments as the IR builder walks the AST, and resolves
//! identifier uses back to an `{addr, isLocal}` pair.
//!
//! Globals are addressed from a separate, never-popped counter rather than
//! through the negative-descent rule that governs scoped locals. Reading
//! push_var's "on an empty frame assigns -1" literally for top-level
//! declarations would put globals at the same small negative offsets as
//! function locals, which contradicts §4.5's "globals ... live at positive
//! offsets from a dedicated global base register" and the conventional
//! reading of `isLocal`. This module resolves that tension explicitly
//! (recorded in DESIGN.md): a name is a global exactly when it is declared
//! while the scope stack is empty (no enclosing block or function), gets
//! the next value from a monotonically increasing counter, and survives
//! every `pop_scope`. Anything declared inside a block or function follows
//! the negative-descent rule verbatim and is scoped normally.

use crate::common::HashMap;
use crate::front::name_table::NameId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    /// Resets the address cursor; entered at a function body. Crossed while
    /// resolving a name found beneath it means the name is a global.
    Func,
    /// Inherits the enclosing cursor; entered at any block (`if`/`while`
    /// body, or a bare `<...>`).
    Normal,
}

enum StackItem {
    Sentinel { kind: ScopeKind, addr: i32 },
    Var { name: NameId, addr: i32, is_local: bool },
}

impl StackItem {
    fn addr(&self) -> i32 {
        match *self {
            StackItem::Sentinel { addr, .. } => addr,
            StackItem::Var { addr, .. } => addr,
        }
    }
}

pub struct LocalsStack {
    items: Vec<StackItem>,
    globals: HashMap<NameId, i32>,
    next_global: i32,
}

impl LocalsStack {
    pub fn new() -> Self {
        LocalsStack {
            items: Vec::new(),
            globals: HashMap::new(),
            next_global: 0,
        }
    }

    fn inside_func_scope(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, StackItem::Sentinel { kind: ScopeKind::Func, .. }))
    }

    /// Open a new scope, inheriting or resetting the address cursor per
    /// `kind`.
    pub fn init_scope(&mut self, kind: ScopeKind) {
        let addr = match kind {
            ScopeKind::Func => 0,
            ScopeKind::Normal => self.items.last().map(StackItem::addr).unwrap_or(0),
        };
        self.items.push(StackItem::Sentinel { kind, addr });
    }

    /// Close the innermost scope, returning the number of variables it held
    /// (not counting the sentinel itself).
    pub fn pop_scope(&mut self) -> usize {
        let mut popped = 0;
        while let Some(item) = self.items.pop() {
            match item {
                StackItem::Sentinel { .. } => break,
                StackItem::Var { .. } => popped += 1,
            }
        }
        popped
    }

    /// Declare a variable, returning its assigned `(addr, isLocal)`.
    pub fn push_var(&mut self, name: NameId) -> (i32, bool) {
        if self.items.is_empty() {
            let addr = self.next_global;
            self.next_global += 1;
            self.globals.insert(name, addr);
            return (addr, false);
        }
        let top_addr = self.items.last().map(StackItem::addr).unwrap_or(0);
        let addr = if top_addr < 0 { top_addr - 1 } else { -1 };
        let is_local = self.inside_func_scope();
        self.items.push(StackItem::Var { name, addr, is_local });
        (addr, is_local)
    }

    /// Declare the `arg_number`-th (zero-based, left-to-right) formal
    /// argument of the function whose `FUNC_SCOPE` was just opened.
    pub fn push_arg(&mut self, name: NameId, arg_number: u32) -> i32 {
        let addr = arg_number as i32 + 2;
        self.items.push(StackItem::Var { name, addr, is_local: true });
        addr
    }

    /// Resolve a name to the address and locality it was last declared
    /// with, walking the scope stack top-down and falling back to the
    /// permanent globals table. `None` means the name is not in scope; the
    /// caller (which has the source position and the name table) turns
    /// that into `Error::Scope`.
    pub fn resolve(&self, name: NameId) -> Option<(i32, bool)> {
        for item in self.items.iter().rev() {
            if let StackItem::Var { name: n, addr, is_local } = item {
                if *n == name {
                    return Some((*addr, *is_local));
                }
            }
        }
        self.globals.get(&name).map(|&addr| (addr, false))
    }
}

impl Default for LocalsStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::name_table::NameTable;

    fn name(table: &mut NameTable, s: &str) -> NameId {
        table.insert(internment::Intern::new(s.to_string())).unwrap()
    }

    #[test]
    fn globals_get_positive_addresses_and_survive() {
        let mut names = NameTable::new(16, 256);
        let mut locals = LocalsStack::new();
        let x = name(&mut names, "x");
        let (addr, is_local) = locals.push_var(x);
        assert_eq!(addr, 0);
        assert!(!is_local);
        assert_eq!(locals.resolve(x).unwrap(), (0, false));
    }

    #[test]
    fn locals_descend_negatively_inside_a_scope() {
        let mut names = NameTable::new(16, 256);
        let mut locals = LocalsStack::new();
        locals.init_scope(ScopeKind::Normal);
        let a = name(&mut names, "a");
        let b = name(&mut names, "b");
        assert_eq!(locals.push_var(a).0, -1);
        assert_eq!(locals.push_var(b).0, -2);
    }

    #[test]
    fn args_get_rbp_positive_offsets_from_two() {
        let mut names = NameTable::new(16, 256);
        let mut locals = LocalsStack::new();
        locals.init_scope(ScopeKind::Func);
        let a = name(&mut names, "a");
        let b = name(&mut names, "b");
        assert_eq!(locals.push_arg(a, 0), 2);
        assert_eq!(locals.push_arg(b, 1), 3);
    }

    #[test]
    fn shadow_then_restore_after_scope_pop() {
        let mut names = NameTable::new(16, 256);
        let mut locals = LocalsStack::new();
        let x = name(&mut names, "x");
        locals.push_var(x); // global, addr 0
        locals.init_scope(ScopeKind::Normal);
        locals.push_var(x); // shadows with a local, addr -1
        assert_eq!(locals.resolve(x).unwrap(), (-1, false));
        locals.pop_scope();
        assert_eq!(locals.resolve(x).unwrap(), (0, false));
    }

    #[test]
    fn unresolved_name_is_not_in_scope() {
        let mut names = NameTable::new(16, 256);
        let locals = LocalsStack::new();
        let t = name(&mut names, "t");
        assert_eq!(locals.resolve(t), None);
    }

    #[test]
    fn global_visible_from_inside_a_function() {
        let mut names = NameTable::new(16, 256);
        let mut locals = LocalsStack::new();
        let g = name(&mut names, "g");
        locals.push_var(g);
        locals.init_scope(ScopeKind::Func);
        assert_eq!(locals.resolve(g).unwrap(), (0, false));
    }
}
