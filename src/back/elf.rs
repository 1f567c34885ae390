//! The ELF64 writer (§4.8).
//!
//! Produces the final executable as `[ELF header | 2 program headers |
//! padding to 0x1000 | stdlib code | compiled code]`, grounded on
//! `Backend/source/elfWriter.c`'s `generateElfHeader`/`generateElfPheader`
//! (same field layout, same two-`PT_LOAD` shape) and on
//! `examples/phaysaal-cosplae/src/elfgen.rs`'s byte-level `Vec<u8>`
//! construction plus `OpenOptionsExt::mode` for the 0755 executable
//! permission, since the original emits two segments where `cosplae`'s
//! single-file compiler only needs one.
//!
//! Segment layout:
//! - Segment 0 (`PF_R`): vaddr `0x400000`, file offset `0`, size `0x1000` —
//!   covers the ELF header, the two program headers, and their padding.
//! - Segment 1 (`PF_R | PF_X`): vaddr `0x401000`, file offset `0x1000`,
//!   size `stdlib.len() + code.len()` — the stdlib's code immediately
//!   followed by the freshly compiled code.
//!
//! Entry point is `0x401000 + stdlib.len()`, i.e. the first byte of the
//! compiled code (the stdlib never runs as a `_start`, only gets `call`ed
//! into).

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::{Error, FileErrorKind, Result};

const ELF_HEADER_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const PHDR_COUNT: usize = 2;
const HEADER_REGION_SIZE: u64 = 0x1000;
const HEADER_VADDR: u64 = 0x400000;
const CODE_VADDR: u64 = 0x401000;

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_R: u32 = 4;

fn phdr(out: &mut Vec<u8>, flags: u32, offset: u64, vaddr: u64, filesz: u64) {
    out.extend_from_slice(&PT_LOAD.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&vaddr.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr, same as vaddr
    out.extend_from_slice(&filesz.to_le_bytes()); // p_filesz
    out.extend_from_slice(&filesz.to_le_bytes()); // p_memsz, no uninitialized data
    out.extend_from_slice(&HEADER_REGION_SIZE.to_le_bytes()); // p_align
}

/// Build the final executable's bytes: the ELF header, two program
/// headers, padding out to `0x1000`, then `stdlib` immediately followed by
/// `code`.
pub fn build_executable(stdlib: &[u8], code: &[u8]) -> Vec<u8> {
    let stdlib_size = stdlib.len() as u64;
    let entry = CODE_VADDR + stdlib_size;
    let code_segment_size = stdlib_size + code.len() as u64;

    let mut out = Vec::with_capacity(HEADER_REGION_SIZE as usize + code_segment_size as usize);

    // ---- Elf64_Ehdr ----
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F']); // EI_MAG
    out.push(2); // EI_CLASS = ELFCLASS64
    out.push(1); // EI_DATA = little-endian
    out.push(1); // EI_VERSION
    out.push(3); // EI_OSABI = ELFOSABI_LINUX
    out.extend_from_slice(&[0u8; 8]); // EI_PAD
    out.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    out.extend_from_slice(&0x3Eu16.to_le_bytes()); // e_machine = EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&entry.to_le_bytes()); // e_entry
    out.extend_from_slice(&(ELF_HEADER_SIZE as u64).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff, no section headers
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(ELF_HEADER_SIZE as u16).to_le_bytes()); // e_ehsize
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    out.extend_from_slice(&(PHDR_COUNT as u16).to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    debug_assert_eq!(out.len(), ELF_HEADER_SIZE);

    // ---- two Elf64_Phdr ----
    phdr(&mut out, PF_R, 0, HEADER_VADDR, HEADER_REGION_SIZE);
    phdr(&mut out, PF_R | PF_X, HEADER_REGION_SIZE, CODE_VADDR, code_segment_size);

    out.resize(HEADER_REGION_SIZE as usize, 0);
    out.extend_from_slice(stdlib);
    out.extend_from_slice(code);
    out
}

/// Write `bytes` to `path` and set its mode to `0755` (§4.8 "set the
/// output file's permission mode to 0755").
pub fn write_executable(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(path)
        .map_err(|e| Error::file(FileErrorKind::Open, path.display().to_string(), e))?;
    f.write_all(bytes)
        .map_err(|e| Error::file(FileErrorKind::Write, path.display().to_string(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_is_after_the_stdlib() {
        let stdlib = vec![0u8; 40];
        let code = vec![0x90u8; 10];
        let bytes = build_executable(&stdlib, &code);
        let entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        assert_eq!(entry, CODE_VADDR + 40);
    }

    #[test]
    fn header_region_is_exactly_one_page() {
        let bytes = build_executable(&[], &[0x90]);
        assert_eq!(bytes.len(), HEADER_REGION_SIZE as usize + 1);
    }

    #[test]
    fn program_headers_describe_r_then_rx_segments() {
        let stdlib = vec![1u8; 8];
        let code = vec![2u8; 8];
        let bytes = build_executable(&stdlib, &code);
        let phoff = ELF_HEADER_SIZE;
        let first_flags = u32::from_le_bytes(bytes[phoff + 4..phoff + 8].try_into().unwrap());
        assert_eq!(first_flags, PF_R);
        let second_off = phoff + PHDR_SIZE;
        let second_flags = u32::from_le_bytes(bytes[second_off + 4..second_off + 8].try_into().unwrap());
        assert_eq!(second_flags, PF_R | PF_X);
        let second_filesz = u64::from_le_bytes(bytes[second_off + 32..second_off + 40].try_into().unwrap());
        assert_eq!(second_filesz, 16);
    }

    #[test]
    fn code_follows_stdlib_in_the_final_buffer() {
        let stdlib = vec![0xAAu8; 4];
        let code = vec![0xBBu8; 4];
        let bytes = build_executable(&stdlib, &code);
        let region = &bytes[HEADER_REGION_SIZE as usize..];
        assert_eq!(region, &[0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB]);
    }
}
