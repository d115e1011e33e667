//! Bytecode representation and compilation.
//!
//! # Module Structure
//!
//! - `op` — opcode enum with per-opcode stack effects and operand widths
//! - `code` — code object: instructions, constant pool, metadata
//! - `builder` — `CodeBuilder` assembling one code object
//! - `compiler` — AST to bytecode compiler

pub use builder::{CodeBuilder, Label};
pub use code::{Code, Const};
pub use compiler::{CompileError, Compiler};
pub use op::Opcode;

mod builder;
mod code;
mod compiler;
mod op;
