#![doc = include_str!("../../../README.md")]

pub mod ast;
mod bytecode;
pub mod symtable;

pub use crate::{
    bytecode::{Code, CodeBuilder, CompileError, Compiler, Const, Label, Opcode},
    symtable::{ScopeId, ScopeMap, StaticSymbolTable, SymbolTable, VarScope},
};
