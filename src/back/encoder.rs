//! Hand-rolled x86-64 instruction encoder (§4.6).
//!
//! Every function here is pure: given operands it returns the instruction's
//! byte size and a textual mnemonic, and optionally appends the encoded bytes
//! to `out`. Calling the same function with the same operands and a
//! different `emitting` flag always returns the same size — this is what
//! lets the two-pass lowerer (`back::lower`) compute block sizes on pass 1
//! and bytes on pass 2 without the sizes ever drifting between passes.
//!
//! Only the subset of encodings the lowering table in §4.7 actually needs is
//! implemented: integer push/pop/mov/arith/test/ret/syscall/jmp/jz/call, and
//! the SSE scalar-double family used for arithmetic and comparisons.

use crate::error::{Error, Result};

/// A general-purpose 64-bit register, numbered the way x86-64 numbers them
/// (so `code()` doubles as the three (or four, with REX.B/R/X) bit field
/// that goes straight into ModR/M and SIB bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum Reg {
    #[display("rax")]
    Rax,
    #[display("rcx")]
    Rcx,
    #[display("rdx")]
    Rdx,
    #[display("rbx")]
    Rbx,
    #[display("rsp")]
    Rsp,
    #[display("rbp")]
    Rbp,
    #[display("rsi")]
    Rsi,
    #[display("rdi")]
    Rdi,
    #[display("r8")]
    R8,
    #[display("r9")]
    R9,
    #[display("r10")]
    R10,
    #[display("r11")]
    R11,
    #[display("r12")]
    R12,
    #[display("r13")]
    R13,
    #[display("r14")]
    R14,
    #[display("r15")]
    R15,
}

impl Reg {
    pub fn code(self) -> u8 {
        use Reg::*;
        match self {
            Rax => 0,
            Rcx => 1,
            Rdx => 2,
            Rbx => 3,
            Rsp => 4,
            Rbp => 5,
            Rsi => 6,
            Rdi => 7,
            R8 => 8,
            R9 => 9,
            R10 => 10,
            R11 => 11,
            R12 => 12,
            R13 => 13,
            R14 => 14,
            R15 => 15,
        }
    }

    pub fn low3(self) -> u8 {
        self.code() & 0x7
    }

    pub fn is_extended(self) -> bool {
        self.code() >= 8
    }
}

/// A scalar-double XMM register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum Xmm {
    #[display("xmm0")]
    Xmm0,
    #[display("xmm1")]
    Xmm1,
    #[display("xmm2")]
    Xmm2,
    #[display("xmm7")]
    Xmm7,
}

impl Xmm {
    pub fn code(self) -> u8 {
        match self {
            Xmm::Xmm0 => 0,
            Xmm::Xmm1 => 1,
            Xmm::Xmm2 => 2,
            Xmm::Xmm7 => 7,
        }
    }
}

/// `[base + disp]`, the only addressing mode the emitter ever needs:
/// function frames (`rbp`), the global base (`rbx`), and the data stack
/// (`rsp`) are all plain register-plus-displacement.
#[derive(Clone, Copy, Debug)]
pub struct Mem {
    pub base: Reg,
    pub disp: i32,
}

impl Mem {
    pub fn new(base: Reg, disp: i32) -> Self {
        Mem { base, disp }
    }
}

/// The result of encoding one instruction: its size in bytes (used to build
/// `startOffset`/`blockSize` in pass 1, and to sanity-check pass 2 matches)
/// and its NASM-style mnemonic.
pub struct Encoded {
    pub size: u32,
    pub asm: String,
}

fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    (md << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

fn sib(scale: u8, index: u8, base: u8) -> u8 {
    (scale << 6) | ((index & 0x7) << 3) | (base & 0x7)
}

/// `r8`..`r15` are rejected as a memory base for push/pop-mem and every SSE
/// memory form (§4.6 operand restrictions); only `rsp`/`rbp`/`rbx` ever show
/// up as a base in the lowering table, so this never actually fires on
/// compiler-generated code, but we still enforce it as the encoder's
/// contract.
fn check_gpr_base(base: Reg) -> Result<()> {
    if base.is_extended() {
        return Err(Error::UnsupportedEncoding(format!(
            "{base} is not allowed as a memory base"
        )));
    }
    Ok(())
}

fn check_sse_base(base: Reg) -> Result<()> {
    check_gpr_base(base)?;
    if base == Reg::Rbp {
        return Err(Error::UnsupportedEncoding(
            "rbp is not allowed as an SSE memory base".to_string(),
        ));
    }
    Ok(())
}

/// ModR/M (+ SIB, if the base needs one) + disp32 for `[base+disp]`, with
/// `reg_field` as the ModR/M `reg` bits (either a register or an opcode
/// extension digit, per the caller).
fn mem_operand(reg_field: u8, base: Reg, disp: i32) -> Vec<u8> {
    let rm = base.low3();
    let mut out = vec![modrm(0b10, reg_field, rm)];
    if rm == 0b100 {
        // rsp (the only base whose low 3 bits are 100, since r12 is
        // rejected by check_gpr_base before we get here) needs an explicit
        // SIB byte with no index.
        out.push(sib(0, 0b100, rm));
    }
    out.extend_from_slice(&disp.to_le_bytes());
    out
}

fn finish(out: &mut Vec<u8>, emitting: bool, bytes: Vec<u8>, asm: String) -> Encoded {
    let size = bytes.len() as u32;
    if emitting {
        out.extend_from_slice(&bytes);
    }
    Encoded { size, asm }
}

pub fn push_r64(out: &mut Vec<u8>, emitting: bool, reg: Reg) -> Encoded {
    let mut bytes = Vec::new();
    if reg.is_extended() {
        bytes.push(0x41);
    }
    bytes.push(0x50 + reg.low3());
    finish(out, emitting, bytes, format!("push {reg}"))
}

pub fn pop_r64(out: &mut Vec<u8>, emitting: bool, reg: Reg) -> Encoded {
    let mut bytes = Vec::new();
    if reg.is_extended() {
        bytes.push(0x41);
    }
    bytes.push(0x58 + reg.low3());
    finish(out, emitting, bytes, format!("pop {reg}"))
}

pub fn push_mem(out: &mut Vec<u8>, emitting: bool, mem: Mem) -> Result<Encoded> {
    check_gpr_base(mem.base)?;
    let mut bytes = vec![0xFF];
    bytes.extend(mem_operand(6, mem.base, mem.disp));
    Ok(finish(
        out,
        emitting,
        bytes,
        format!("push qword [{}{:+}]", mem.base, mem.disp),
    ))
}

pub fn pop_mem(out: &mut Vec<u8>, emitting: bool, mem: Mem) -> Result<Encoded> {
    check_gpr_base(mem.base)?;
    let mut bytes = vec![0x8F];
    bytes.extend(mem_operand(0, mem.base, mem.disp));
    Ok(finish(
        out,
        emitting,
        bytes,
        format!("pop qword [{}{:+}]", mem.base, mem.disp),
    ))
}

pub fn mov_r64_r64(out: &mut Vec<u8>, emitting: bool, dst: Reg, src: Reg) -> Encoded {
    let rex = 0x48 | ((src.is_extended() as u8) << 2) | (dst.is_extended() as u8);
    let bytes = vec![rex, 0x89, modrm(0b11, src.low3(), dst.low3())];
    finish(out, emitting, bytes, format!("mov {dst}, {src}"))
}

pub fn mov_r64_imm64(out: &mut Vec<u8>, emitting: bool, dst: Reg, imm: u64) -> Encoded {
    let rex = 0x48 | (dst.is_extended() as u8);
    let mut bytes = vec![rex, 0xB8 + dst.low3()];
    bytes.extend_from_slice(&imm.to_le_bytes());
    finish(out, emitting, bytes, format!("mov {dst}, 0x{imm:016x}"))
}

pub fn add_r64_imm32(out: &mut Vec<u8>, emitting: bool, dst: Reg, imm: i32) -> Encoded {
    let rex = 0x48 | (dst.is_extended() as u8);
    let mut bytes = vec![rex, 0x81, modrm(0b11, 0, dst.low3())];
    bytes.extend_from_slice(&imm.to_le_bytes());
    finish(out, emitting, bytes, format!("add {dst}, {imm}"))
}

pub fn sub_r64_imm32(out: &mut Vec<u8>, emitting: bool, dst: Reg, imm: i32) -> Encoded {
    let rex = 0x48 | (dst.is_extended() as u8);
    let mut bytes = vec![rex, 0x81, modrm(0b11, 5, dst.low3())];
    bytes.extend_from_slice(&imm.to_le_bytes());
    finish(out, emitting, bytes, format!("sub {dst}, {imm}"))
}

pub fn test_r64_r64(out: &mut Vec<u8>, emitting: bool, a: Reg, b: Reg) -> Encoded {
    let rex = 0x48 | ((b.is_extended() as u8) << 2) | (a.is_extended() as u8);
    let bytes = vec![rex, 0x85, modrm(0b11, b.low3(), a.low3())];
    finish(out, emitting, bytes, format!("test {a}, {b}"))
}

pub fn ret(out: &mut Vec<u8>, emitting: bool) -> Encoded {
    finish(out, emitting, vec![0xC3], "ret".to_string())
}

pub fn syscall(out: &mut Vec<u8>, emitting: bool) -> Encoded {
    finish(out, emitting, vec![0x0F, 0x05], "syscall".to_string())
}

/// `rel` is the resolved rel32 displacement; pass 1 (`emitting == false`)
/// doesn't know it yet and passes `0`, which is fine since the size never
/// depends on the value.
pub fn jmp_rel32(out: &mut Vec<u8>, emitting: bool, rel: i32) -> Encoded {
    let mut bytes = vec![0xE9];
    bytes.extend_from_slice(&rel.to_le_bytes());
    finish(out, emitting, bytes, format!("jmp {rel}"))
}

pub fn jz_rel32(out: &mut Vec<u8>, emitting: bool, rel: i32) -> Encoded {
    let mut bytes = vec![0x0F, 0x84];
    bytes.extend_from_slice(&rel.to_le_bytes());
    finish(out, emitting, bytes, format!("jz {rel}"))
}

pub fn call_rel32(out: &mut Vec<u8>, emitting: bool, rel: i32) -> Encoded {
    let mut bytes = vec![0xE8];
    bytes.extend_from_slice(&rel.to_le_bytes());
    finish(out, emitting, bytes, format!("call {rel}"))
}

pub fn movq_xmm_mem(out: &mut Vec<u8>, emitting: bool, dst: Xmm, src: Mem) -> Result<Encoded> {
    check_sse_base(src.base)?;
    let mut bytes = vec![0xF3, 0x0F, 0x7E];
    bytes.extend(mem_operand(dst.code(), src.base, src.disp));
    Ok(finish(
        out,
        emitting,
        bytes,
        format!("movq {dst}, [{}{:+}]", src.base, src.disp),
    ))
}

pub fn movq_mem_xmm(out: &mut Vec<u8>, emitting: bool, dst: Mem, src: Xmm) -> Result<Encoded> {
    check_sse_base(dst.base)?;
    let mut bytes = vec![0x66, 0x0F, 0xD6];
    bytes.extend(mem_operand(src.code(), dst.base, dst.disp));
    Ok(finish(
        out,
        emitting,
        bytes,
        format!("movq [{}{:+}], {src}", dst.base, dst.disp),
    ))
}

pub fn movq_xmm_r64(out: &mut Vec<u8>, emitting: bool, dst: Xmm, src: Reg) -> Encoded {
    let rex = 0x48 | ((dst.code() >= 8) as u8) << 2 | (src.is_extended() as u8);
    let bytes = vec![
        0x66,
        rex,
        0x0F,
        0x6E,
        modrm(0b11, dst.code(), src.low3()),
    ];
    finish(out, emitting, bytes, format!("movq {dst}, {src}"))
}

fn sse_arith(
    out: &mut Vec<u8>,
    emitting: bool,
    opcode: u8,
    mnemonic: &str,
    dst: Xmm,
    src: Mem,
) -> Result<Encoded> {
    check_sse_base(src.base)?;
    let mut bytes = vec![0xF2, 0x0F, opcode];
    bytes.extend(mem_operand(dst.code(), src.base, src.disp));
    Ok(finish(
        out,
        emitting,
        bytes,
        format!("{mnemonic} {dst}, [{}{:+}]", src.base, src.disp),
    ))
}

pub fn addsd(out: &mut Vec<u8>, emitting: bool, dst: Xmm, src: Mem) -> Result<Encoded> {
    sse_arith(out, emitting, 0x58, "addsd", dst, src)
}

pub fn subsd(out: &mut Vec<u8>, emitting: bool, dst: Xmm, src: Mem) -> Result<Encoded> {
    sse_arith(out, emitting, 0x5C, "subsd", dst, src)
}

pub fn mulsd(out: &mut Vec<u8>, emitting: bool, dst: Xmm, src: Mem) -> Result<Encoded> {
    sse_arith(out, emitting, 0x59, "mulsd", dst, src)
}

pub fn divsd(out: &mut Vec<u8>, emitting: bool, dst: Xmm, src: Mem) -> Result<Encoded> {
    sse_arith(out, emitting, 0x5E, "divsd", dst, src)
}

pub fn sqrtsd(out: &mut Vec<u8>, emitting: bool, dst: Xmm, src: Xmm) -> Encoded {
    let bytes = vec![0xF2, 0x0F, 0x51, modrm(0b11, dst.code(), src.code())];
    finish(out, emitting, bytes, format!("sqrtsd {dst}, {src}"))
}

pub fn cmpsd(
    out: &mut Vec<u8>,
    emitting: bool,
    dst: Xmm,
    src: Mem,
    imm8: u8,
) -> Result<Encoded> {
    check_sse_base(src.base)?;
    let mut bytes = vec![0xF2, 0x0F, 0xC2];
    bytes.extend(mem_operand(dst.code(), src.base, src.disp));
    bytes.push(imm8);
    Ok(finish(
        out,
        emitting,
        bytes,
        format!("cmpsd {dst}, [{}{:+}], {imm8}", src.base, src.disp),
    ))
}

pub fn andpd(out: &mut Vec<u8>, emitting: bool, dst: Xmm, src: Xmm) -> Encoded {
    let bytes = vec![0x66, 0x0F, 0x54, modrm(0b11, dst.code(), src.code())];
    finish(out, emitting, bytes, format!("andpd {dst}, {src}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_register_form_needs_no_rex_for_low_registers() {
        let mut buf = Vec::new();
        let e = push_r64(&mut buf, true, Reg::Rcx);
        assert_eq!(buf, vec![0x51]);
        assert_eq!(e.size, 1);
    }

    #[test]
    fn push_register_form_adds_rex_b_for_extended_registers() {
        let mut buf = Vec::new();
        let e = push_r64(&mut buf, true, Reg::R8);
        assert_eq!(buf, vec![0x41, 0x50]);
        assert_eq!(e.size, 2);
    }

    #[test]
    fn size_is_identical_whether_or_not_emitting() {
        let mut buf = Vec::new();
        let dry = mov_r64_imm64(&mut buf, false, Reg::Rcx, 0x3FF0000000000000);
        assert!(buf.is_empty());
        let mut buf2 = Vec::new();
        let wet = mov_r64_imm64(&mut buf2, true, Reg::Rcx, 0x3FF0000000000000);
        assert_eq!(dry.size, wet.size);
        assert_eq!(buf2.len() as u32, wet.size);
    }

    #[test]
    fn call_rel32_is_five_bytes() {
        let mut buf = Vec::new();
        let e = call_rel32(&mut buf, true, -10);
        assert_eq!(e.size, 5);
        assert_eq!(buf[0], 0xE8);
    }

    #[test]
    fn extended_register_rejected_as_push_mem_base() {
        let mut buf = Vec::new();
        let err = push_mem(&mut buf, true, Mem::new(Reg::R12, 0)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
    }

    #[test]
    fn rbp_rejected_as_sse_memory_base() {
        let mut buf = Vec::new();
        let err = addsd(&mut buf, true, Xmm::Xmm0, Mem::new(Reg::Rbp, -8)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
    }

    #[test]
    fn push_mem_with_rsp_base_needs_a_sib_byte() {
        let mut buf = Vec::new();
        let e = push_mem(&mut buf, true, Mem::new(Reg::Rsp, 8)).unwrap();
        // FF /6, modrm, sib, 4 bytes disp32
        assert_eq!(e.size, 7);
        assert_eq!(buf[0], 0xFF);
    }

    #[test]
    fn cmpsd_immediate_byte_is_appended_after_the_operand() {
        let mut buf = Vec::new();
        let e = cmpsd(&mut buf, true, Xmm::Xmm0, Mem::new(Reg::Rbx, 0), 1).unwrap();
        assert_eq!(*buf.last().unwrap(), 1);
        assert_eq!(e.size, buf.len() as u32);
    }
}
