//! The middle-end of the compiler: turns a parsed AST into the linear
//! stack-based IR the backend lowers to machine code (§4.4-§4.5).

pub mod build;
pub mod ir;
pub mod locals;

pub use build::build;
pub use ir::{IrId, IrInstr, IrOp, IrProgram, LabelId};
pub use locals::{LocalsStack, ScopeKind};
