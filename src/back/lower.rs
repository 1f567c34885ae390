//! Two-pass IR lowering driver (§4.7).
//!
//! Pass 1 walks the IR with `emitting = false`, asking the encoder for each
//! node's byte size without writing anything, and accumulates those sizes
//! into `startOffset`/`blockSize`. Function-entry labels get their resolved
//! offset written back into the name table right there, so pass 2's `CALL`
//! nodes can already see it. Pass 2 walks the same IR again with
//! `emitting = true`, this time resolving every `JMP`/`JZ`/`CALL`'s rel32
//! from the offsets pass 1 computed, and produces the machine code plus
//! (optionally) NASM-style asm and a byte-offset listing.
//!
//! Both passes share one function, `lower_instruction`, so invariant I1 (pass
//! 1 and pass 2 agree on every node's size) holds by construction rather
//! than by two independently-written code paths staying in sync.

use crate::back::encoder::{self, Mem, Reg, Xmm};
use crate::error::{Error, Result};
use crate::front::name_table::NameTable;
use crate::middle::ir::{IrId, IrOp, IrProgram, LabelId};

pub struct LowerOptions {
    pub emit_asm: bool,
    pub emit_listing: bool,
}

pub struct LowerOutput {
    pub code: Vec<u8>,
    pub asm: Option<String>,
    pub listing: Option<String>,
}

pub fn lower(ir: &mut IrProgram, names: &mut NameTable, opts: &LowerOptions) -> Result<LowerOutput> {
    pass1(ir, names)?;
    pass2(ir, names, opts)
}

fn pass1(ir: &mut IrProgram, names: &mut NameTable) -> Result<()> {
    let mut offset: u64 = 0;
    for id in ir.iter_ids() {
        let op = ir.get(id).op;
        let mut scratch = Vec::new();
        let (size, _lines) = lower_instruction(&mut scratch, false, ir, names, id, op)?;
        let instr = ir.get_mut(id);
        instr.start_offset = offset;
        instr.block_size = size;
        if let IrOp::Label { name: Some(nid) } = op {
            names.set_address(nid, offset as i64);
        }
        offset += size as u64;
    }
    Ok(())
}

fn pass2(ir: &IrProgram, names: &NameTable, opts: &LowerOptions) -> Result<LowerOutput> {
    let mut code = Vec::new();
    let mut asm = String::new();
    let mut listing = String::new();
    if opts.emit_asm {
        asm.push_str("global _start\n\n_start:\n");
    }
    for id in ir.iter_ids() {
        let instr = ir.get(id);
        let op = instr.op;

        if opts.emit_asm {
            if let IrOp::Label { name } = op {
                asm.push_str(&format!("{}:\n", label_text(ir, names, id, name)));
            }
        }

        let before = code.len();
        let (size, lines) = lower_instruction(&mut code, true, ir, names, id, op)?;
        debug_assert_eq!(size, instr.block_size, "pass 2 size diverged from pass 1");
        debug_assert_eq!(code.len() - before, size as usize);

        if opts.emit_listing && size > 0 {
            listing.push_str(&format!("; 0x{:08x}\n", instr.start_offset));
            for line in &lines {
                listing.push_str(line);
                listing.push('\n');
            }
        }
        if opts.emit_asm {
            for line in &lines {
                asm.push_str("    ");
                asm.push_str(line);
                asm.push('\n');
            }
            if let Some(comment) = &instr.comment {
                asm.push_str(&format!("    ; {comment}\n"));
            }
        }
    }

    Ok(LowerOutput {
        code,
        asm: opts.emit_asm.then_some(asm),
        listing: opts.emit_listing.then_some(listing),
    })
}

fn label_text(
    ir: &IrProgram,
    names: &NameTable,
    id: IrId,
    name: Option<crate::front::name_table::NameId>,
) -> String {
    if let Some(nid) = name {
        return names.get(nid).name.to_string();
    }
    ir.label_for_id(id)
        .and_then(|l| ir.label_name(l))
        .map(str::to_string)
        .unwrap_or_else(|| format!("L{}", id.index()))
}

fn rel_for_jump(ir: &IrProgram, emitting: bool, id: IrId, label: LabelId) -> i32 {
    if !emitting {
        return 0;
    }
    let target = ir.get(ir.label_target(label)).start_offset as i64;
    let here = ir.get(id);
    let self_end = here.start_offset as i64 + here.block_size as i64;
    (target - self_end) as i32
}

fn rel_for_call(
    ir: &IrProgram,
    names: &NameTable,
    emitting: bool,
    id: IrId,
    callee: crate::front::name_table::NameId,
) -> i32 {
    if !emitting {
        return 0;
    }
    let target_addr = names.get(callee).address;
    let self_start = ir.get(id).start_offset as i64;
    (target_addr - (self_start + 5)) as i32
}

/// The f64 bit pattern for `1.0`, used as the `andpd` mask that turns a
/// `CMPSD` all-ones/all-zeros result into a `1.0`/`0.0` boolean (§4.7 `START`).
const ONE_BITS: u64 = 0x3FF0000000000000;

/// Encode one IR node, appending bytes to `buf` when `emitting`. Returns the
/// total byte size (matching across both passes by construction, since this
/// is the only place either pass computes it) and the asm mnemonic for each
/// sub-instruction the node expanded into.
fn lower_instruction(
    buf: &mut Vec<u8>,
    emitting: bool,
    ir: &IrProgram,
    names: &NameTable,
    id: IrId,
    op: IrOp,
) -> Result<(u32, Vec<String>)> {
    let mut size = 0u32;
    let mut lines = Vec::new();
    macro_rules! push {
        ($e:expr) => {{
            let encoded = $e;
            size += encoded.size;
            lines.push(encoded.asm);
        }};
    }
    macro_rules! try_push {
        ($e:expr) => {{
            let encoded = $e?;
            size += encoded.size;
            lines.push(encoded.asm);
        }};
    }

    match op {
        IrOp::Nop | IrOp::Label { .. } => {}

        IrOp::Start => {
            push!(encoder::mov_r64_r64(buf, emitting, Reg::Rbx, Reg::Rsp));
            push!(encoder::mov_r64_imm64(buf, emitting, Reg::Rcx, ONE_BITS));
            push!(encoder::movq_xmm_r64(buf, emitting, Xmm::Xmm7, Reg::Rcx));
        }
        IrOp::Exit => {
            push!(encoder::mov_r64_imm64(buf, emitting, Reg::Rax, 0x3c));
            push!(encoder::mov_r64_imm64(buf, emitting, Reg::Rdi, 0));
            push!(encoder::syscall(buf, emitting));
        }

        IrOp::PushImm(v) => {
            push!(encoder::mov_r64_imm64(buf, emitting, Reg::Rcx, v.to_bits()));
            push!(encoder::push_r64(buf, emitting, Reg::Rcx));
        }
        IrOp::PushReg => {
            push!(encoder::push_r64(buf, emitting, Reg::Rax));
        }
        IrOp::PushMem { addr, is_local } => {
            let base = if is_local { Reg::Rbp } else { Reg::Rbx };
            try_push!(encoder::push_mem(buf, emitting, Mem::new(base, addr * 8)));
        }
        IrOp::PopMem { addr, is_local } => {
            let base = if is_local { Reg::Rbp } else { Reg::Rbx };
            try_push!(encoder::pop_mem(buf, emitting, Mem::new(base, addr * 8)));
        }
        IrOp::VarDecl => {
            push!(encoder::sub_r64_imm32(buf, emitting, Reg::Rsp, 8));
        }

        IrOp::Add | IrOp::Sub | IrOp::Mul | IrOp::Div => {
            try_push!(encoder::movq_xmm_mem(buf, emitting, Xmm::Xmm0, Mem::new(Reg::Rsp, 8)));
            let at_top = Mem::new(Reg::Rsp, 0);
            match op {
                IrOp::Add => try_push!(encoder::addsd(buf, emitting, Xmm::Xmm0, at_top)),
                IrOp::Sub => try_push!(encoder::subsd(buf, emitting, Xmm::Xmm0, at_top)),
                IrOp::Mul => try_push!(encoder::mulsd(buf, emitting, Xmm::Xmm0, at_top)),
                IrOp::Div => try_push!(encoder::divsd(buf, emitting, Xmm::Xmm0, at_top)),
                _ => unreachable!(),
            }
            push!(encoder::add_r64_imm32(buf, emitting, Reg::Rsp, 8));
            try_push!(encoder::movq_mem_xmm(buf, emitting, Mem::new(Reg::Rsp, 0), Xmm::Xmm0));
        }
        IrOp::Sqrt => {
            try_push!(encoder::movq_xmm_mem(buf, emitting, Xmm::Xmm0, Mem::new(Reg::Rsp, 0)));
            push!(encoder::sqrtsd(buf, emitting, Xmm::Xmm0, Xmm::Xmm0));
            try_push!(encoder::movq_mem_xmm(buf, emitting, Mem::new(Reg::Rsp, 0), Xmm::Xmm0));
        }
        IrOp::Cmp(kind) => {
            try_push!(encoder::movq_xmm_mem(buf, emitting, Xmm::Xmm0, Mem::new(Reg::Rsp, 8)));
            try_push!(encoder::cmpsd(buf, emitting, Xmm::Xmm0, Mem::new(Reg::Rsp, 0), kind.imm8()));
            push!(encoder::add_r64_imm32(buf, emitting, Reg::Rsp, 8));
            push!(encoder::andpd(buf, emitting, Xmm::Xmm0, Xmm::Xmm7));
            try_push!(encoder::movq_mem_xmm(buf, emitting, Mem::new(Reg::Rsp, 0), Xmm::Xmm0));
        }
        IrOp::Pow | IrOp::Sin | IrOp::Cos => {
            return Err(Error::UnsupportedEncoding(format!(
                "`{op:?}` has no x86-64 encoding (outside the supported integer/SSE subset)"
            )));
        }

        IrOp::Jmp(label) => {
            let rel = rel_for_jump(ir, emitting, id, label);
            push!(encoder::jmp_rel32(buf, emitting, rel));
        }
        IrOp::Jz(label) => {
            push!(encoder::pop_r64(buf, emitting, Reg::Rdi));
            push!(encoder::test_r64_r64(buf, emitting, Reg::Rdi, Reg::Rdi));
            let rel = rel_for_jump(ir, emitting, id, label);
            push!(encoder::jz_rel32(buf, emitting, rel));
        }
        IrOp::Call { callee } => {
            let rel = rel_for_call(ir, names, emitting, id, callee);
            push!(encoder::call_rel32(buf, emitting, rel));
            let argc = names.get(callee).args_count;
            if argc > 0 {
                push!(encoder::add_r64_imm32(buf, emitting, Reg::Rsp, 8 * argc as i32));
            }
        }
        IrOp::SetFramePtr => {
            push!(encoder::push_r64(buf, emitting, Reg::Rbp));
            push!(encoder::mov_r64_r64(buf, emitting, Reg::Rbp, Reg::Rsp));
        }
        IrOp::Ret => {
            push!(encoder::pop_r64(buf, emitting, Reg::Rax));
            push!(encoder::mov_r64_r64(buf, emitting, Reg::Rsp, Reg::Rbp));
            push!(encoder::pop_r64(buf, emitting, Reg::Rbp));
            push!(encoder::ret(buf, emitting));
        }
    }

    Ok((size, lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EntityRef;
    use crate::front::name_table::NameTable;
    use crate::middle::ir::CmpKind;

    fn names() -> NameTable {
        NameTable::new(64, 1024)
    }

    #[test]
    fn jmp_alone_is_five_bytes() {
        let mut ir = IrProgram::with_capacity(16);
        let l = ir.new_label();
        ir.push(IrOp::Jmp(l), None);
        ir.place_label(l, None, None);
        ir.push(IrOp::Exit, None);
        let mut nt = names();
        pass1(&mut ir, &mut nt).unwrap();
        assert_eq!(ir.get(crate::middle::ir::IrId::new(0)).block_size, 5);
    }

    #[test]
    fn two_pass_sizes_agree_for_a_full_program() {
        let mut nt = names();
        let tokens = crate::front::lex::lex(
            "Account x % x = 3\u{20BD} + 4\u{20BD} % ShowBalance x %",
            internment::Intern::new("t.mn".to_string()),
            &mut nt,
            4096,
        )
        .unwrap();
        let mut ast = crate::front::ast::Ast::new(4096);
        crate::front::parse::parse(&tokens, &mut nt, &mut ast).unwrap();
        let mut ir = crate::middle::build::build(&ast, &mut nt, false, 4096).unwrap();
        let sizes_before: Vec<u32> = ir.iter_ids().map(|id| ir.get(id).block_size).collect();
        assert!(sizes_before.iter().all(|&s| s == 0));
        let opts = LowerOptions { emit_asm: true, emit_listing: true };
        let out = lower(&mut ir, &mut nt, &opts).unwrap();
        assert!(!out.code.is_empty());
        assert!(out.asm.unwrap().contains("_start:"));
    }

    #[test]
    fn pow_is_rejected_as_unsupported() {
        let mut buf = Vec::new();
        let ir = IrProgram::with_capacity(4);
        let nt = names();
        let err = lower_instruction(&mut buf, false, &ir, &nt, IrId::new(0), IrOp::Pow).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
    }

    #[test]
    fn cmp_kind_imm8_reaches_the_encoder() {
        let mut buf = Vec::new();
        let ir = IrProgram::with_capacity(4);
        let nt = names();
        let (size, lines) =
            lower_instruction(&mut buf, true, &ir, &nt, IrId::new(0), IrOp::Cmp(CmpKind::Lt)).unwrap();
        assert_eq!(size, buf.len() as u32);
        assert!(lines.iter().any(|l| l.starts_with("cmpsd")));
    }
}
