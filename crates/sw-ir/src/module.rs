//! Module assembly
//!
//! Produces the final linear word stream: the standard five-word header
//! followed by all instructions in section order. The context's bookkeeping
//! buffer and the code buffer are merged and stably sorted by section so
//! interleaved creation order does not leak into the output.

use crate::buffer::InstructionBuffer;
use crate::context::SpirvContext;
use crate::instruction::Instruction;
use crate::op::Op;

pub const MAGIC: u32 = 0x0723_0203;
pub const VERSION: u32 = 0x0001_0000;
pub const GENERATOR: u32 = 0x0080_0001;

/// Section rank for the stable sort. Mirrors the binary format's required
/// ordering: capabilities first, then imports, memory model, entry points,
/// debug names, annotations, types/constants/module-scope variables, and
/// finally function bodies.
fn section_rank(instruction: &Instruction) -> u32 {
    match instruction.op {
        Op::Capability => 0,
        Op::ExtInstImport => 1,
        Op::MemoryModel => 2,
        Op::EntryPoint => 3,
        Op::ExecutionMode => 4,
        Op::Name | Op::MemberName => 5,
        Op::Decorate | Op::MemberDecorate | Op::DecorateString | Op::MemberDecorateString => 6,
        op if op.is_type_decl() => 7,
        Op::Constant => 7,
        Op::Variable => 7,
        _ => 8,
    }
}

/// Assemble the context and code buffers into one serialized module.
///
/// Callers must have run the cleanup pass first: no Nop or linker-private
/// marker instructions may remain.
pub fn assemble(context: &SpirvContext, code: &InstructionBuffer) -> Vec<u32> {
    let mut instructions: Vec<&Instruction> =
        context.buffer().iter().chain(code.iter()).collect();
    instructions.sort_by_key(|i| section_rank(i));

    let mut words = Vec::new();
    words.push(MAGIC);
    words.push(VERSION);
    words.push(GENERATOR);
    words.push(context.bound());
    words.push(0);
    for instruction in instructions {
        instruction.encode(&mut words);
    }
    tracing::debug!(words = words.len(), bound = context.bound(), "assembled module");
    words
}

/// View a word stream as little-endian bytes.
pub fn as_bytes(words: &[u32]) -> &[u8] {
    bytemuck::cast_slice(words)
}
