//! The back-end of the compiler: the x86-64 instruction encoder, the
//! two-pass IR lowering driver, the ELF64 writer, and the stdlib loader.

pub mod elf;
pub mod encoder;
pub mod lower;
pub mod stdlib;

pub use lower::{lower, LowerOptions, LowerOutput};
pub use stdlib::StdlibImage;
