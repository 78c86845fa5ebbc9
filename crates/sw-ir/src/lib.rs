//! Word-stream IR substrate for shader-weld
//!
//! This crate provides the building blocks the linker passes operate on:
//! typed instruction records in an ordered buffer, a symbol/type context
//! with interning and id allocation, constant-buffer packing rules, and
//! final module assembly in the target binary word format.

pub mod buffer;
pub mod context;
pub mod instruction;
pub mod layout;
pub mod module;
pub mod op;
pub mod types;

pub use buffer::InstructionBuffer;
pub use context::SpirvContext;
pub use instruction::{Instruction, Operand};
pub use op::Op;
pub use types::{
    ScalarKind, StorageClass, StructMember, SymbolType, TypeModifier, VariableFlags,
};
