//! The linear stack-based intermediate representation (§4.4).
//!
//! IR nodes live in a single flat `Arena<IrId, IrInstr>`, bracketed by a
//! synthetic `START` head and `EXIT` tail once the builder finishes.  Jump
//! targets are not byte offsets — those don't exist until lowering runs —
//! they are `LabelId`s, a builder-assigned forward-reference handle resolved
//! once the corresponding `LABEL` node is actually placed, since an `if`'s
//! `JZ` is always emitted before the label it jumps to exists.

use crate::common::{Arena, EntityRef, HashMap};
use crate::entity_ref;
use crate::front::name_table::NameId;
use crate::front::ops::Op;

entity_ref!(IrId);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LabelId(u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug, derive_more::Display)]
pub enum CmpKind {
    #[display("LT")]
    Lt,
    #[display("LE")]
    Le,
    #[display("EQ")]
    Eq,
    #[display("NEQ")]
    Neq,
    #[display("GE")]
    Ge,
    #[display("GT")]
    Gt,
}

impl CmpKind {
    /// The `CMPSD` immediate predicate byte (§4.6).
    pub const fn imm8(self) -> u8 {
        match self {
            CmpKind::Lt => 1,
            CmpKind::Le => 2,
            CmpKind::Eq => 0,
            CmpKind::Neq => 4,
            CmpKind::Ge => 5,
            CmpKind::Gt => 6,
        }
    }

    pub fn from_op(op: Op) -> Option<CmpKind> {
        Some(match op {
            Op::Lt => CmpKind::Lt,
            Op::Le => CmpKind::Le,
            Op::Eq => CmpKind::Eq,
            Op::Neq => CmpKind::Neq,
            Op::Ge => CmpKind::Ge,
            Op::Gt => CmpKind::Gt,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub enum IrOp {
    Nop,
    Start,
    Exit,
    PushImm(f64),
    PushReg,
    PushMem { addr: i32, is_local: bool },
    PopMem { addr: i32, is_local: bool },
    VarDecl,
    Add,
    Sub,
    Mul,
    Div,
    Sqrt,
    /// `^`, `sin`, `cos`: accepted by the grammar and built into IR, but
    /// outside the x86-64 encoder subset in §4.6 (integer ops and the SSE
    /// add/sub/mul/div/sqrt/cmp/andpd set only). The lowerer rejects these
    /// with `UnsupportedEncoding` rather than the builder refusing them
    /// earlier, so an AST/IR dump of a program using `^` is still possible.
    Pow,
    Sin,
    Cos,
    Cmp(CmpKind),
    Jmp(LabelId),
    Jz(LabelId),
    Call { callee: NameId },
    SetFramePtr,
    Ret,
    /// `name` is `Some` for function-entry labels: pass 1 writes the
    /// resolved byte offset back into that name-table entry's `address`
    /// field so later `CALL` nodes can find it (§4.7).
    Label { name: Option<NameId> },
}

/// One IR node plus the bookkeeping the lowerer fills in during its two
/// passes. `start_offset`/`block_size` are `0` until pass 1 runs.
pub struct IrInstr {
    pub op: IrOp,
    pub comment: Option<String>,
    pub start_offset: u64,
    pub block_size: u32,
}

pub struct IrProgram {
    instrs: Arena<IrId, IrInstr>,
    labels: HashMap<LabelId, IrId>,
    /// Human-readable names for synthetic (non-function-entry) labels, e.g.
    /// `IF3_END`, `LOOP1`, `add_DECL_END` — assigned by the builder, which
    /// has the AST nesting context to keep an if/else or while's pair of
    /// labels numbered together (§9: counters threaded as explicit context,
    /// never statics). Only consulted for optional asm/listing output.
    label_names: HashMap<LabelId, String>,
    label_at_id: HashMap<IrId, LabelId>,
    next_label: u32,
}

impl IrProgram {
    pub fn with_capacity(capacity: usize) -> Self {
        IrProgram {
            instrs: Arena::with_capacity(capacity),
            labels: HashMap::new(),
            label_names: HashMap::new(),
            label_at_id: HashMap::new(),
            next_label: 0,
        }
    }

    /// Reserve a forward-reference handle for a jump whose target label has
    /// not been placed yet.
    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }

    pub fn name_label(&mut self, label: LabelId, name: String) {
        self.label_names.insert(label, name);
    }

    pub fn label_name(&self, label: LabelId) -> Option<&str> {
        self.label_names.get(&label).map(String::as_str)
    }

    /// Given a `Label` node's own id, find the synthetic label (if any) that
    /// was placed there, so asm output can print its name at the site.
    pub fn label_for_id(&self, id: IrId) -> Option<LabelId> {
        self.label_at_id.get(&id).copied()
    }

    pub fn push(&mut self, op: IrOp, comment: impl Into<Option<String>>) -> Option<IrId> {
        self.instrs.try_push(IrInstr {
            op,
            comment: comment.into(),
            start_offset: 0,
            block_size: 0,
        })
    }

    /// Push a `LABEL` node and record that `label` now points at it.
    pub fn place_label(
        &mut self,
        label: LabelId,
        name: Option<NameId>,
        comment: impl Into<Option<String>>,
    ) -> Option<IrId> {
        let id = self.push(IrOp::Label { name }, comment)?;
        self.labels.insert(label, id);
        self.label_at_id.insert(id, label);
        Some(id)
    }

    pub fn label_target(&self, label: LabelId) -> IrId {
        self.labels[&label]
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn get(&self, id: IrId) -> &IrInstr {
        &self.instrs[id]
    }

    pub fn get_mut(&mut self, id: IrId) -> &mut IrInstr {
        &mut self.instrs[id]
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = IrId> {
        (0..self.instrs.len()).map(IrId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_label_resolves_after_placement() {
        let mut ir = IrProgram::with_capacity(16);
        let l = ir.new_label();
        ir.push(IrOp::Jz(l), None);
        let label_id = ir.place_label(l, None, None).unwrap();
        assert_eq!(ir.label_target(l), label_id);
    }

    #[test]
    fn cmp_kind_imm8_matches_table() {
        assert_eq!(CmpKind::Lt.imm8(), 1);
        assert_eq!(CmpKind::Eq.imm8(), 0);
        assert_eq!(CmpKind::Gt.imm8(), 6);
    }
}
