//! Compilation pipeline
//!
//! `Mixer` drives the full pass sequence over one compilation unit: merge
//! the mixin tree, resolve link metadata, fold uniform blocks, sweep loose
//! uniforms, reflect, legalize bools, clean up, serialize. The mixer owns
//! nothing global; independent units compile on separate threads without
//! coordination, and identical inputs produce identical word streams.

use std::collections::HashSet;

use tracing::debug;

use sw_ir::op::{capability, memory_model};
use sw_ir::{module, Instruction, InstructionBuffer, Op, Operand, SpirvContext};

use crate::bools::legalize_uniform_bools;
use crate::cbuffer::{generate_default_cbuffer, merge_uniform_blocks};
use crate::error::Result;
use crate::metadata::collect_metadata;
use crate::mixin::{is_metadata_annotation, merge_mixins};
use crate::reflect::{compute_reflection, Reflection};
use crate::source::{ShaderLoader, ShaderSource};

/// The serialized module and its reflection description.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub words: Vec<u32>,
    pub reflection: Reflection,
}

impl CompiledShader {
    pub fn as_bytes(&self) -> &[u8] {
        module::as_bytes(&self.words)
    }
}

/// Pass driver for one loader.
pub struct Mixer<L> {
    loader: L,
}

impl<L: ShaderLoader> Mixer<L> {
    pub fn new(loader: L) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Compile one mixin tree into a serialized module.
    pub fn compile(&self, source: &ShaderSource) -> Result<CompiledShader> {
        let mut ctx = SpirvContext::new();
        let mut buffer = InstructionBuffer::new();

        let mut root = merge_mixins(&self.loader, &mut ctx, &mut buffer, source)?;

        ctx.buffer_mut().push(
            Instruction::new(Op::Capability).operand(Operand::Enum(capability::SHADER)),
        );
        ctx.buffer_mut().push(
            Instruction::new(Op::MemoryModel)
                .operand(Operand::Enum(memory_model::LOGICAL))
                .operand(Operand::Enum(memory_model::GLSL450)),
        );

        let mut metadata = collect_metadata(&ctx, &buffer);
        merge_uniform_blocks(&mut ctx, &mut buffer, &mut metadata)?;
        generate_default_cbuffer(&mut ctx, &mut buffer, &mut root, &mut metadata)?;
        let reflection = compute_reflection(&mut ctx, &buffer, &metadata)?;
        legalize_uniform_bools(&mut ctx, &mut buffer)?;
        cleanup(&mut ctx, &mut buffer);

        let words = module::assemble(&ctx, &buffer);
        debug!(
            words = words.len(),
            buffers = reflection.constant_buffers.len(),
            "compiled shader"
        );
        Ok(CompiledShader { words, reflection })
    }
}

/// Remove everything that must not reach the serialized module: tombstones,
/// marker instructions, the linker-private flags word on variables, consumed
/// metadata decorations, and declarations nothing references anymore.
fn cleanup(ctx: &mut SpirvContext, buffer: &mut InstructionBuffer) {
    for b in [ctx.buffer_mut(), &mut *buffer] {
        b.retain(|i| i.op != Op::Nop && !i.op.is_marker());
        for instruction in b.iter_mut() {
            if instruction.op == Op::Variable {
                instruction.operands.truncate(1);
            }
        }
    }
    ctx.buffer_mut().retain(|i| !is_metadata_annotation(i));

    // Dead declaration sweep. Dropping an unused struct frees the types it
    // referenced, so iterate to a fixpoint.
    loop {
        let mut defined: HashSet<u32> = HashSet::new();
        let mut referenced: HashSet<u32> = HashSet::new();
        for instruction in ctx.buffer().iter().chain(buffer.iter()) {
            if instruction.op.is_annotation() {
                continue;
            }
            if let Some(id) = instruction.result_id {
                defined.insert(id);
            }
            if let Some(type_id) = instruction.result_type {
                referenced.insert(type_id);
            }
            for operand in &instruction.operands {
                if let Operand::Id(id) | Operand::TypeId(id) = operand {
                    referenced.insert(*id);
                }
            }
        }

        let dead = |instruction: &Instruction| {
            if instruction.op.is_annotation() {
                return instruction.target().is_some_and(|t| !defined.contains(&t));
            }
            if instruction.op.is_type_decl() || instruction.op == Op::Constant {
                return instruction.result_id.is_some_and(|id| !referenced.contains(&id));
            }
            false
        };

        let before = ctx.buffer().len() + buffer.len();
        ctx.buffer_mut().retain(|i| !dead(i));
        buffer.retain(|i| !dead(i));
        if ctx.buffer().len() + buffer.len() == before {
            break;
        }
    }
}
