//! Uniform-block merging
//!
//! Two passes over the merged buffer. `merge_uniform_blocks` folds the
//! same-named uniform blocks contributed by different fragments into one
//! block per name, concatenating members in contribution order and rebasing
//! member indices in access chains. `generate_default_cbuffer` then sweeps
//! the remaining loose uniforms into one implicit `Globals` block, routing
//! every direct load and store through an inserted access chain.
//!
//! Both passes keep id bookkeeping global: the variable remap produced by
//! block merging is applied to the whole buffer and context exactly once,
//! after every group has been processed.

use std::collections::HashMap;

use tracing::{debug, warn};

use sw_ir::{
    Instruction, InstructionBuffer, Op, Operand, ScalarKind, SpirvContext, StorageClass,
    StructMember, SymbolType, VariableFlags,
};

use crate::error::{MixerError, Result};
use crate::metadata::{MemberMetadata, MetadataTable, VariableMetadata};
use crate::mixin::MixinNode;

/// Name of the implicit block gathering loose uniforms.
pub const DEFAULT_CBUFFER: &str = "Globals";

struct BlockVar {
    buffer_index: usize,
    var_id: u32,
    symbol: SymbolType,
    member_count: usize,
}

/// Strip a trailing `.N` disambiguation suffix from a block name.
fn base_name(name: &str) -> &str {
    if let Some(pos) = name.rfind('.') {
        let suffix = &name[pos + 1..];
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            return &name[..pos];
        }
    }
    name
}

/// Rewrite the debug name of `id` in both the name table and its emitted
/// `Name` instruction.
fn rename(ctx: &mut SpirvContext, id: u32, name: &str) {
    ctx.set_name(id, name);
    for index in 0..ctx.buffer().len() {
        let instruction = &ctx.buffer()[index];
        if instruction.op == Op::Name && instruction.target() == Some(id) {
            ctx.buffer_mut()[index].operands[1] = Operand::LiteralString(name.to_string());
        }
    }
}

fn nop_name(ctx: &mut SpirvContext, id: u32) {
    for index in 0..ctx.buffer().len() {
        let instruction = &ctx.buffer()[index];
        if instruction.op == Op::Name && instruction.target() == Some(id) {
            ctx.buffer_mut().set_nop(index);
        }
    }
}

/// Merge same-named uniform blocks into one block per name.
pub fn merge_uniform_blocks(
    ctx: &mut SpirvContext,
    buffer: &mut InstructionBuffer,
    metadata: &mut MetadataTable,
) -> Result<()> {
    // Group block variables by stripped name, in first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<BlockVar>> = HashMap::new();
    for index in 0..buffer.len() {
        let instruction = &buffer[index];
        if instruction.op != Op::Variable {
            continue;
        }
        let Some(var_id) = instruction.result_id else { continue };
        let Some(SymbolType::Pointer { base, .. }) =
            instruction.result_type.and_then(|t| ctx.type_of(t))
        else {
            continue;
        };
        let symbol = match &**base {
            SymbolType::UniformBuffer { .. } => (**base).clone(),
            _ => continue,
        };
        let member_count = match &symbol {
            SymbolType::UniformBuffer { members, .. } => members.len(),
            _ => 0,
        };
        let Some(name) = ctx.name_of(var_id) else { continue };
        let key = base_name(name).to_string();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(BlockVar {
            buffer_index: index,
            var_id,
            symbol,
            member_count,
        });
    }

    let mut remap: HashMap<u32, u32> = HashMap::new();
    for key in &order {
        let group = &groups[key];
        if group.len() == 1 {
            let only = &group[0];
            if ctx.name_of(only.var_id) != Some(key.as_str()) {
                rename(ctx, only.var_id, key);
            }
            continue;
        }
        debug!(block = %key, constituents = group.len(), "merging uniform blocks");

        // Direct access to a whole grouped block variable has no meaning
        // once members move.
        for bv in group {
            let touched = buffer.iter().any(|i| {
                matches!(i.op, Op::Load | Op::Store)
                    && i.operands.first() == Some(&Operand::Id(bv.var_id))
            });
            if touched {
                return Err(MixerError::StructuralViolation(format!(
                    "direct load/store on merged uniform block '{key}'"
                )));
            }
        }

        let mut members: Vec<StructMember> = Vec::new();
        let mut member_meta: Vec<MemberMetadata> = Vec::new();
        for bv in group {
            if let SymbolType::UniformBuffer { members: m, .. } = &bv.symbol {
                members.extend(m.iter().cloned());
            }
            member_meta.extend(metadata.buffer_members.remove(&bv.var_id).unwrap_or_default());
        }
        let merged = SymbolType::UniformBuffer { name: key.clone(), members };
        ctx.declare_uniform_buffer(&merged);
        let pointer_id = ctx.get_or_register(&merged.pointer_to(StorageClass::Uniform));

        let canonical = &group[0];
        buffer[canonical.buffer_index].result_type = Some(pointer_id);
        rename(ctx, canonical.var_id, key);
        metadata.buffer_members.insert(canonical.var_id, member_meta);

        // Access chains into later constituents index past the members
        // merged before them. The base id is fixed by the global remap; the
        // member index must move now, while constituents are still distinct.
        let mut running = 0u32;
        for (position, bv) in group.iter().enumerate() {
            if position > 0 {
                remap.insert(bv.var_id, canonical.var_id);
                buffer.set_nop(bv.buffer_index);
                nop_name(ctx, bv.var_id);
                metadata.variables.remove(&bv.var_id);

                for index in 0..buffer.len() {
                    let needs_rebase = {
                        let instruction = &buffer[index];
                        instruction.op == Op::AccessChain
                            && instruction.operands.first() == Some(&Operand::Id(bv.var_id))
                    };
                    if !needs_rebase {
                        continue;
                    }
                    let old_const = match buffer[index].operands.get(1) {
                        Some(&Operand::Id(id)) => id,
                        _ => continue,
                    };
                    let Some((kind, value)) = ctx.constant_kind_and_value(old_const) else {
                        return Err(MixerError::StructuralViolation(format!(
                            "non-constant member index into uniform block '{key}'"
                        )));
                    };
                    let rebased = ctx.compile_constant(kind, value + running);
                    buffer[index].operands[1] = Operand::Id(rebased);
                }
            }
            running += bv.member_count as u32;
        }
    }

    // One global remap, applied once.
    buffer.remap_ids(&remap);
    ctx.remap_ids(&remap);
    Ok(())
}

/// Sweep loose uniforms into the implicit `Globals` block.
///
/// Returns the id of the new block variable, or `None` when there was
/// nothing to sweep. Inserted access chains shift code indices; `root` is
/// notified so fragment spans stay valid.
pub fn generate_default_cbuffer(
    ctx: &mut SpirvContext,
    buffer: &mut InstructionBuffer,
    root: &mut MixinNode,
    metadata: &mut MetadataTable,
) -> Result<Option<u32>> {
    // A loose uniform is a uniform-storage variable whose pointee is a
    // value type: not a block, not an unresolved slot.
    let mut loose: Vec<(usize, u32, SymbolType)> = Vec::new();
    for index in 0..buffer.len() {
        let instruction = &buffer[index];
        if instruction.op != Op::Variable
            || instruction.variable_storage() != Some(StorageClass::Uniform.code())
        {
            continue;
        }
        let Some(var_id) = instruction.result_id else { continue };
        let Some(SymbolType::Pointer { base, .. }) =
            instruction.result_type.and_then(|t| ctx.type_of(t))
        else {
            continue;
        };
        match &**base {
            SymbolType::UniformBuffer { .. } | SymbolType::Shader { .. } => continue,
            pointee => loose.push((index, var_id, pointee.clone())),
        }
    }
    if loose.is_empty() {
        return Ok(None);
    }
    debug!(count = loose.len(), "sweeping loose uniforms into {DEFAULT_CBUFFER}");

    let members: Vec<StructMember> = loose
        .iter()
        .map(|(_, var_id, pointee)| {
            let name = ctx.name_of(*var_id).unwrap_or_default().to_string();
            StructMember::new(name, pointee.clone())
        })
        .collect();
    let symbol = SymbolType::UniformBuffer { name: DEFAULT_CBUFFER.into(), members };
    let struct_id = ctx.declare_uniform_buffer(&symbol);
    let pointer_id = ctx.get_or_register(&symbol.clone().pointer_to(StorageClass::Uniform));
    let block_var = ctx.alloc_id();

    // The new declaration takes the first loose uniform's slot; the rest
    // are tombstoned.
    let first_index = loose[0].0;
    buffer.replace(
        first_index,
        Instruction::with_result(Op::Variable, pointer_id, block_var)
            .operand(Operand::Enum(StorageClass::Uniform.code()))
            .operand(Operand::Literal(VariableFlags::STAGE.bits())),
    );
    for &(index, _, _) in &loose[1..] {
        buffer.set_nop(index);
    }
    ctx.emit_name(block_var, DEFAULT_CBUFFER);

    let mut member_index: HashMap<u32, u32> = HashMap::new();
    let mut member_meta: Vec<MemberMetadata> = Vec::new();
    for (position, (_, var_id, _)) in loose.iter().enumerate() {
        member_index.insert(*var_id, position as u32);
        let variable = metadata.variables.remove(var_id).unwrap_or_else(|| {
            warn!(var_id, "loose uniform without metadata");
            VariableMetadata::default()
        });
        member_meta.push(MemberMetadata {
            key: variable.link,
            logical_group: variable.logical_group,
            is_color: variable.is_color,
        });
    }
    metadata.buffer_members.insert(block_var, member_meta);
    metadata
        .variables
        .insert(block_var, VariableMetadata { link: DEFAULT_CBUFFER.into(), ..Default::default() });

    // Route every use through the block. Inserted chains are reported to
    // the mixin tree per function; span boundaries never sit inside a
    // function body.
    let member_pointer = |ctx: &mut SpirvContext, ty: &SymbolType| {
        ctx.get_or_register(&ty.clone().pointer_to(StorageClass::Uniform))
    };
    let pointees: HashMap<u32, SymbolType> =
        loose.iter().map(|(_, id, ty)| (*id, ty.clone())).collect();

    let mut index = 0;
    let mut function_start = 0;
    let mut inserted_in_function = 0usize;
    while index < buffer.len() {
        match buffer[index].op {
            Op::Function => {
                function_start = index;
                inserted_in_function = 0;
            }
            Op::FunctionEnd => {
                if inserted_in_function > 0 {
                    root.adjust_indices_after_insert(function_start, inserted_in_function);
                }
            }
            Op::Load | Op::Store => {
                let pointer_operand = match buffer[index].operands.first() {
                    Some(&Operand::Id(id)) => id,
                    _ => {
                        index += 1;
                        continue;
                    }
                };
                if let Some(&member) = member_index.get(&pointer_operand) {
                    let pointee = &pointees[&pointer_operand];
                    let chain_type = member_pointer(ctx, pointee);
                    let index_id = ctx.compile_constant(ScalarKind::Int, member);
                    let chain = ctx.alloc_id();
                    buffer.insert(
                        index,
                        Instruction::with_result(Op::AccessChain, chain_type, chain)
                            .operand(Operand::Id(block_var))
                            .operand(Operand::Id(index_id)),
                    );
                    inserted_in_function += 1;
                    index += 1;
                    buffer[index].operands[0] = Operand::Id(chain);
                }
            }
            Op::AccessChain => {
                let base = match buffer[index].operands.first() {
                    Some(&Operand::Id(id)) => id,
                    _ => {
                        index += 1;
                        continue;
                    }
                };
                if let Some(&member) = member_index.get(&base) {
                    let index_id = ctx.compile_constant(ScalarKind::Int, member);
                    buffer[index].operands[0] = Operand::Id(block_var);
                    buffer[index].operands.insert(1, Operand::Id(index_id));
                }
            }
            _ => {}
        }
        index += 1;
    }

    // Bookkeeping follows the variables into the block: entry-point
    // interfaces swap the dead ids for the block variable, annotations
    // retarget as member annotations, names disappear.
    for index in 0..ctx.buffer().len() {
        let op = ctx.buffer()[index].op;
        match op {
            Op::EntryPoint => {
                let instruction = &mut ctx.buffer_mut()[index];
                instruction
                    .operands
                    .retain(|o| !matches!(o, Operand::Id(id) if member_index.contains_key(id)));
                instruction.operands.push(Operand::Id(block_var));
            }
            Op::Decorate | Op::DecorateString => {
                let target = ctx.buffer()[index].target();
                if let Some(&member) = target.and_then(|t| member_index.get(&t)) {
                    let instruction = &mut ctx.buffer_mut()[index];
                    instruction.op = match op {
                        Op::Decorate => Op::MemberDecorate,
                        _ => Op::MemberDecorateString,
                    };
                    instruction.operands[0] = Operand::Id(struct_id);
                    instruction.operands.insert(1, Operand::Literal(member));
                }
            }
            Op::Name => {
                let target = ctx.buffer()[index].target();
                if target.is_some_and(|t| member_index.contains_key(&t)) {
                    ctx.buffer_mut().set_nop(index);
                }
            }
            _ => {}
        }
    }

    Ok(Some(block_var))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::fragment::FragmentBuilder;
    use crate::metadata::collect_metadata;
    use crate::mixin::merge_mixins;
    use crate::source::{Fragment, ShaderLoader, ShaderMacro, ShaderSource};

    struct TestLoader;

    impl ShaderLoader for TestLoader {
        fn load_shader_ir(
            &self,
            name: &str,
            _generics: &[String],
            _macros: &[ShaderMacro],
        ) -> Result<Fragment> {
            let mut builder = FragmentBuilder::new();
            match name {
                "First" => {
                    let block = builder.uniform_block(
                        "Params",
                        vec![StructMember::new("scale", SymbolType::scalar(ScalarKind::Float))],
                    );
                    builder.begin_function("first");
                    let ptr = builder.access_chain(block, 0);
                    builder.load(ptr);
                    builder.end_function();
                }
                "Second" => {
                    let block = builder.uniform_block(
                        "Params",
                        vec![
                            StructMember::new("tint", SymbolType::vector(ScalarKind::Float, 3)),
                            StructMember::new("bias", SymbolType::scalar(ScalarKind::Float)),
                        ],
                    );
                    builder.begin_function("second");
                    let ptr = builder.access_chain(block, 1);
                    builder.load(ptr);
                    builder.end_function();
                }
                "Suffixed" => {
                    builder.uniform_block(
                        "Params.0",
                        vec![StructMember::new("scale", SymbolType::scalar(ScalarKind::Float))],
                    );
                }
                "WholeBlockLoad" => {
                    let block = builder.uniform_block(
                        "Params",
                        vec![StructMember::new("scale", SymbolType::scalar(ScalarKind::Float))],
                    );
                    builder.begin_function("bad");
                    builder.load(block);
                    builder.end_function();
                }
                "Loose" => {
                    let exposure =
                        builder.uniform("Exposure", SymbolType::scalar(ScalarKind::Float));
                    let tint = builder.uniform("Tint", SymbolType::vector(ScalarKind::Float, 3));
                    builder.begin_function("loose");
                    let value = builder.load(exposure);
                    builder.store(exposure, value);
                    let _ = builder.load(tint);
                    builder.end_function();
                }
                other => return Err(MixerError::UnknownShader(other.into())),
            }
            Ok(builder.finish())
        }
    }

    fn merged(source: &ShaderSource) -> (SpirvContext, InstructionBuffer, MixinNode, MetadataTable) {
        let mut ctx = SpirvContext::new();
        let mut buffer = InstructionBuffer::new();
        let root = merge_mixins(&TestLoader, &mut ctx, &mut buffer, source).unwrap();
        let table = collect_metadata(&ctx, &buffer);
        (ctx, buffer, root, table)
    }

    fn block_vars(ctx: &SpirvContext, buffer: &InstructionBuffer) -> Vec<u32> {
        buffer
            .iter()
            .filter(|i| i.op == Op::Variable)
            .filter(|i| {
                matches!(
                    i.result_type.and_then(|t| ctx.type_of(t)),
                    Some(SymbolType::Pointer { base, .. })
                        if matches!(**base, SymbolType::UniformBuffer { .. })
                )
            })
            .filter_map(|i| i.result_id)
            .collect()
    }

    #[test]
    fn test_same_named_blocks_merge() {
        let source = ShaderSource::new("First").with_mixin("Second");
        let (mut ctx, mut buffer, _, mut table) = merged(&source);
        merge_uniform_blocks(&mut ctx, &mut buffer, &mut table).unwrap();

        let vars = block_vars(&ctx, &buffer);
        assert_eq!(vars.len(), 1);
        let canonical = vars[0];
        assert_eq!(ctx.name_of(canonical), Some("Params"));

        let pointer = ctx.type_of(
            buffer
                .iter()
                .find(|i| i.result_id == Some(canonical))
                .unwrap()
                .result_type
                .unwrap(),
        );
        let Some(SymbolType::Pointer { base, .. }) = pointer else { panic!() };
        let SymbolType::UniformBuffer { members, .. } = &**base else { panic!() };
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["scale", "tint", "bias"]);

        assert_eq!(table.buffer_members[&canonical].len(), 3);
    }

    #[test]
    fn test_later_constituent_chains_rebase() {
        let source = ShaderSource::new("First").with_mixin("Second");
        let (mut ctx, mut buffer, _, mut table) = merged(&source);
        merge_uniform_blocks(&mut ctx, &mut buffer, &mut table).unwrap();

        let canonical = block_vars(&ctx, &buffer)[0];
        let indices: Vec<u32> = buffer
            .iter()
            .filter(|i| i.op == Op::AccessChain)
            .filter(|i| i.operands.first() == Some(&Operand::Id(canonical)))
            .map(|i| match i.operands[1] {
                Operand::Id(id) => ctx.constant_value(id).unwrap(),
                _ => panic!("member index must be a constant id"),
            })
            .collect();
        // First's chain still hits member 0; Second's member 1 moved past
        // First's single member to index 2.
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_suffixed_block_merges_and_lays_out_sequentially() {
        // `Params` and `Params.0` are the same logical buffer; after merging,
        // reflection sees one buffer with both floats packed back to back.
        let source = ShaderSource::new("First").with_mixin("Suffixed");
        let (mut ctx, mut buffer, _, mut table) = merged(&source);
        merge_uniform_blocks(&mut ctx, &mut buffer, &mut table).unwrap();

        let reflection =
            crate::reflect::compute_reflection(&mut ctx, &buffer, &table).unwrap();
        assert_eq!(reflection.constant_buffers.len(), 1);
        let params = &reflection.constant_buffers[0];
        assert_eq!(params.name, "Params");
        assert_eq!(params.members.len(), 2);
        let offsets: Vec<u32> = params.members.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 4]);
    }

    #[test]
    fn test_singleton_block_keeps_stripped_name() {
        let source = ShaderSource::new("Suffixed");
        let (mut ctx, mut buffer, _, mut table) = merged(&source);
        merge_uniform_blocks(&mut ctx, &mut buffer, &mut table).unwrap();

        let var = block_vars(&ctx, &buffer)[0];
        assert_eq!(ctx.name_of(var), Some("Params"));
    }

    #[test]
    fn test_whole_block_access_is_rejected() {
        let source = ShaderSource::new("First").with_mixin("WholeBlockLoad");
        let (mut ctx, mut buffer, _, mut table) = merged(&source);
        let err = merge_uniform_blocks(&mut ctx, &mut buffer, &mut table).unwrap_err();
        assert!(matches!(err, MixerError::StructuralViolation(_)));
    }

    #[test]
    fn test_loose_uniforms_sweep_into_globals() {
        let source = ShaderSource::new("Loose");
        let (mut ctx, mut buffer, mut root, mut table) = merged(&source);
        merge_uniform_blocks(&mut ctx, &mut buffer, &mut table).unwrap();
        let block = generate_default_cbuffer(&mut ctx, &mut buffer, &mut root, &mut table)
            .unwrap()
            .expect("a default block");

        assert_eq!(ctx.name_of(block), Some(DEFAULT_CBUFFER));
        // The loose declarations are gone.
        assert_eq!(block_vars(&ctx, &buffer), vec![block]);

        // Every load and store goes through a chain on the new block.
        for instruction in buffer.iter() {
            if matches!(instruction.op, Op::Load | Op::Store) {
                let Some(&Operand::Id(pointer)) = instruction.operands.first() else { panic!() };
                let chain = buffer
                    .iter()
                    .find(|i| i.result_id == Some(pointer))
                    .expect("pointer producer");
                assert_eq!(chain.op, Op::AccessChain);
                assert_eq!(chain.operands[0], Operand::Id(block));
            }
        }

        let members = &table.buffer_members[&block];
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].key, "Loose.Exposure");
        assert_eq!(members[1].key, "Loose.Tint");
    }

    #[test]
    fn test_globals_sweep_adjusts_spans() {
        let source = ShaderSource::new("Loose");
        let (mut ctx, mut buffer, mut root, mut table) = merged(&source);
        let end_before = root.end_instruction;
        generate_default_cbuffer(&mut ctx, &mut buffer, &mut root, &mut table).unwrap();

        // Three memory operations gained one chain each.
        assert_eq!(root.end_instruction, end_before + 3);
        assert_eq!(root.end_instruction, buffer.len());
        let range = &root.shaders[0];
        assert_eq!(buffer[range.start - 1].op, Op::ShaderMarker);
        assert_eq!(buffer[range.end].op, Op::ShaderMarkerEnd);
    }

    #[test]
    fn test_no_loose_uniforms_is_a_no_op() {
        let source = ShaderSource::new("First");
        let (mut ctx, mut buffer, mut root, mut table) = merged(&source);
        let len_before = buffer.len();
        let block = generate_default_cbuffer(&mut ctx, &mut buffer, &mut root, &mut table).unwrap();
        assert!(block.is_none());
        assert_eq!(buffer.len(), len_before);
    }
}
