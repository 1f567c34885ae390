//! The stdlib loader (§4.9).
//!
//! The standard library is treated as an opaque pre-built ELF64 executable
//! (see spec §1: "the prebuilt ELF-packaged standard library ... consumed
//! as an opaque binary blob whose entry offsets are read from its own ELF
//! program headers"). This module reads just enough of that ELF's own
//! header and program headers to find its code segment, copies the segment
//! bytes verbatim, and recovers the two well-known entry points
//! (`__stdlib_in`/`__stdlib_out`) the backend needs to resolve calls into
//! it, mirroring `Backend/source/backend_x86_64.c`'s `includeBinStdlib`.
//!
//! The stdlib's own code segment is expected to carry its two entry offsets
//! as the first two little-endian `i64` words, by convention (§4.9): byte
//! 0 is `__stdlib_in`'s offset from the segment start, byte 8 is
//! `__stdlib_out`'s. Both are rebased here to be relative to the *compiled
//! code*'s origin (offset 0 == the first byte after the stdlib, where the
//! generated code starts) rather than the stdlib segment's own start, since
//! that is the origin every `CALL` site's rel32 math in `back::lower`
//! already assumes: `raw_offset - stdlib_len` puts both entry points at
//! negative offsets, since the stdlib lives entirely before the generated
//! code in the final layout.

use std::fs;
use std::path::Path;

use crate::error::{Error, FileErrorKind, Result};

const ELF_HEADER_SIZE: usize = 64;
const ELF_PHDR_SIZE: usize = 56;
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

pub struct StdlibImage {
    /// The stdlib's code segment, copied verbatim; placed immediately
    /// before the generated code in the final executable (§4.8).
    pub code: Vec<u8>,
    /// `__stdlib_in`'s entry offset, relative to the start of the
    /// *generated* code (i.e. negative, since the stdlib precedes it).
    pub in_addr: i64,
    /// `__stdlib_out`'s entry offset, same convention.
    pub out_addr: i64,
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

fn read_i64(buf: &[u8], off: usize) -> i64 {
    i64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

/// Read `path` as an ELF64 executable, locate its second program header
/// (the R+X code segment, by the layout every stdlib build produces: one
/// header-only R segment followed by one R+X code segment, exactly the
/// shape `back::elf` itself emits), and extract the code bytes plus the
/// two reserved entry offsets.
pub fn load(path: impl AsRef<Path>) -> Result<StdlibImage> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| {
        Error::file(FileErrorKind::Open, path.display().to_string(), e)
    })?;

    if bytes.len() < ELF_HEADER_SIZE || bytes[0..4] != ELF_MAGIC {
        return Err(Error::Format {
            offset: 0,
            message: format!("{}: not an ELF64 file", path.display()),
        });
    }
    if bytes[4] != 2 {
        return Err(Error::Format {
            offset: 4,
            message: format!("{}: not a 64-bit ELF (ELFCLASS64 expected)", path.display()),
        });
    }

    let phoff = read_u64(&bytes, 0x20) as usize;
    let phentsize = read_u16(&bytes, 0x36) as usize;
    let phnum = read_u16(&bytes, 0x38) as usize;
    if phnum < 2 {
        return Err(Error::Format {
            offset: phoff,
            message: format!(
                "{}: expected at least 2 program headers, found {phnum}",
                path.display()
            ),
        });
    }
    if phentsize < ELF_PHDR_SIZE {
        return Err(Error::Format {
            offset: phoff,
            message: format!("{}: unexpectedly small program header entry", path.display()),
        });
    }

    let code_phdr_off = phoff + phentsize; // the second header
    if bytes.len() < code_phdr_off + ELF_PHDR_SIZE {
        return Err(Error::Format {
            offset: code_phdr_off,
            message: format!("{}: truncated program header table", path.display()),
        });
    }
    let p_type = read_u32(&bytes, code_phdr_off);
    const PT_LOAD: u32 = 1;
    if p_type != PT_LOAD {
        return Err(Error::Format {
            offset: code_phdr_off,
            message: format!("{}: second program header is not PT_LOAD", path.display()),
        });
    }
    let p_offset = read_u64(&bytes, code_phdr_off + 8) as usize;
    let p_filesz = read_u64(&bytes, code_phdr_off + 32) as usize;

    if bytes.len() < p_offset + p_filesz {
        return Err(Error::Format {
            offset: p_offset,
            message: format!("{}: code segment extends past end of file", path.display()),
        });
    }
    let code = bytes[p_offset..p_offset + p_filesz].to_vec();

    if code.len() < 16 {
        return Err(Error::Format {
            offset: p_offset,
            message: format!(
                "{}: code segment too small to hold the two reserved entry offsets",
                path.display()
            ),
        });
    }
    let in_raw = read_i64(&code, 0);
    let out_raw = read_i64(&code, 8);
    let stdlib_len = code.len() as i64;

    Ok(StdlibImage {
        in_addr: in_raw - stdlib_len,
        out_addr: out_raw - stdlib_len,
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::elf;
    use std::io::Write;

    /// Build a tiny ELF64 file in the same two-PT_LOAD shape `back::elf`
    /// produces, whose "code" segment is just the 16-byte entry-offset
    /// header plus a `ret`, to exercise the loader end to end without a
    /// real prebuilt stdlib binary on disk.
    fn fake_stdlib_elf() -> Vec<u8> {
        let mut code = Vec::new();
        code.extend_from_slice(&100i64.to_le_bytes()); // __stdlib_in at +100
        code.extend_from_slice(&108i64.to_le_bytes()); // __stdlib_out at +108
        code.push(0xC3); // ret, padding
        elf::build_executable(&code, &[])
    }

    #[test]
    fn loads_code_segment_and_rebases_entry_offsets() {
        let bytes = fake_stdlib_elf();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&bytes).unwrap();
        let image = load(f.path()).unwrap();
        assert_eq!(image.code.len(), 17);
        let stdlib_len = image.code.len() as i64;
        assert_eq!(image.in_addr, 100 - stdlib_len);
        assert_eq!(image.out_addr, 108 - stdlib_len);
    }

    #[test]
    fn rejects_non_elf_input() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"not an elf file at all").unwrap();
        let err = load(f.path()).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }
}
