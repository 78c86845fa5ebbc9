//! Bool legalization for uniform blocks
//!
//! Bools cannot live in a serialized uniform block; members are stored as
//! 32-bit unsigned integers instead. The pass patches Block-decorated struct
//! declarations in place, retypes the access chains reaching into them, and
//! bridges every load and store: a patched load produces a fresh uint id and
//! an `INotEqual` immediately after it re-produces the original bool id, so
//! existing consumers keep their operand; a patched store converts the bool
//! through a `Select` inserted immediately before it.
//!
//! Runs after reflection, which reports the declared bool type. The pass is
//! idempotent: it unregisters the uniform bool pointer type when done, and
//! exits early when none is registered.

use std::collections::HashSet;

use tracing::debug;

use sw_ir::op::decoration;
use sw_ir::{
    Instruction, InstructionBuffer, Op, Operand, ScalarKind, SpirvContext, StorageClass,
    SymbolType,
};

use crate::error::{MixerError, Result};

pub fn legalize_uniform_bools(
    ctx: &mut SpirvContext,
    buffer: &mut InstructionBuffer,
) -> Result<()> {
    let bool_ty = SymbolType::scalar(ScalarKind::Bool);
    let bool_ptr = bool_ty.clone().pointer_to(StorageClass::Uniform);
    let Some(bool_ptr_id) = ctx.type_id(&bool_ptr) else {
        return Ok(());
    };
    let Some(bool_id) = ctx.type_id(&bool_ty) else {
        return Err(MixerError::StructuralViolation(
            "uniform bool pointer registered without a bool type".into(),
        ));
    };

    let block_ids: HashSet<u32> = ctx
        .buffer()
        .iter()
        .filter(|i| {
            i.op == Op::Decorate && i.operands.get(1) == Some(&Operand::Enum(decoration::BLOCK))
        })
        .filter_map(|i| i.target())
        .collect();

    // Validate before mutating anything: bools below the top level of a
    // block have no member-granular access chain to patch.
    let mut affected: Vec<(u32, SymbolType)> = Vec::new();
    for &struct_id in &block_ids {
        let Some(ty) = ctx.type_of(struct_id) else { continue };
        let members = match ty {
            SymbolType::Struct { members, .. } | SymbolType::UniformBuffer { members, .. } => {
                members
            }
            _ => continue,
        };
        let mut has_bool = false;
        for member in members {
            if member.ty == SymbolType::Scalar(ScalarKind::Bool) {
                has_bool = true;
            } else if member.ty.contains_bool() {
                return Err(MixerError::UnsupportedPattern(format!(
                    "bool nested inside uniform block member '{}'",
                    member.name
                )));
            }
        }
        if has_bool {
            affected.push((struct_id, ty.clone()));
        }
    }

    let uint_ty = SymbolType::scalar(ScalarKind::UInt);
    let uint_id = ctx.get_or_register(&uint_ty);
    let uint_ptr_id = ctx.get_or_register(&uint_ty.clone().pointer_to(StorageClass::Uniform));
    let uint_zero = ctx.compile_constant(ScalarKind::UInt, 0);
    let uint_one = ctx.compile_constant(ScalarKind::UInt, 1);

    // Patch the struct declarations word-for-word and mirror the edit in
    // the type tables, keeping every id in place.
    for (struct_id, old_ty) in affected {
        debug!(struct_id, "legalizing bool members");
        for index in 0..ctx.buffer().len() {
            let instruction = &ctx.buffer()[index];
            if instruction.op != Op::TypeStruct || instruction.result_id != Some(struct_id) {
                continue;
            }
            for operand in ctx.buffer_mut()[index].operands.iter_mut() {
                if *operand == Operand::TypeId(bool_id) {
                    *operand = Operand::TypeId(uint_id);
                }
            }
        }
        let new_ty = retype_bool_members(&old_ty);
        if let Some(pointer_id) =
            ctx.type_id(&old_ty.clone().pointer_to(StorageClass::Uniform))
        {
            ctx.replace_type(
                pointer_id,
                new_ty.clone().pointer_to(StorageClass::Uniform),
            );
        }
        ctx.replace_type(struct_id, new_ty);
    }

    // Retype the chains, then bridge loads and stores through them.
    let mut patched_chains: HashSet<u32> = HashSet::new();
    let mut index = 0;
    while index < buffer.len() {
        match buffer[index].op {
            Op::AccessChain => {
                if buffer[index].result_type == Some(bool_ptr_id) {
                    buffer[index].result_type = Some(uint_ptr_id);
                    if let Some(id) = buffer[index].result_id {
                        patched_chains.insert(id);
                    }
                }
            }
            Op::Load => {
                let through_patched = matches!(
                    buffer[index].operands.first(),
                    Some(&Operand::Id(pointer)) if patched_chains.contains(&pointer)
                );
                if through_patched {
                    let original = buffer[index].result_id.unwrap_or(0);
                    let fresh = ctx.alloc_id();
                    buffer[index].result_type = Some(uint_id);
                    buffer[index].result_id = Some(fresh);
                    buffer.insert(
                        index + 1,
                        Instruction::with_result(Op::INotEqual, bool_id, original)
                            .operand(Operand::Id(fresh))
                            .operand(Operand::Id(uint_zero)),
                    );
                    index += 1;
                }
            }
            Op::Store => {
                let through_patched = matches!(
                    buffer[index].operands.first(),
                    Some(&Operand::Id(pointer)) if patched_chains.contains(&pointer)
                );
                if through_patched {
                    let stored = match buffer[index].operands.get(1) {
                        Some(&Operand::Id(id)) => id,
                        _ => {
                            index += 1;
                            continue;
                        }
                    };
                    let fresh = ctx.alloc_id();
                    buffer.insert(
                        index,
                        Instruction::with_result(Op::Select, uint_id, fresh)
                            .operand(Operand::Id(stored))
                            .operand(Operand::Id(uint_one))
                            .operand(Operand::Id(uint_zero)),
                    );
                    index += 1;
                    buffer[index].operands[1] = Operand::Id(fresh);
                }
            }
            _ => {}
        }
        index += 1;
    }

    // Nothing points at the uniform bool pointer anymore; dropping its
    // registration makes a re-run exit early.
    ctx.remove_type(&bool_ptr);
    Ok(())
}

fn retype_bool_members(ty: &SymbolType) -> SymbolType {
    let rewrite = |members: &[sw_ir::StructMember]| {
        members
            .iter()
            .map(|m| {
                let mut member = m.clone();
                if member.ty == SymbolType::Scalar(ScalarKind::Bool) {
                    member.ty = SymbolType::Scalar(ScalarKind::UInt);
                }
                member
            })
            .collect()
    };
    match ty {
        SymbolType::Struct { name, members } => {
            SymbolType::Struct { name: name.clone(), members: rewrite(members) }
        }
        SymbolType::UniformBuffer { name, members } => {
            SymbolType::UniformBuffer { name: name.clone(), members: rewrite(members) }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentBuilder;
    use sw_ir::StructMember;

    fn bool_block_fragment() -> (SpirvContext, InstructionBuffer, u32) {
        let mut builder = FragmentBuilder::new();
        let block = builder.uniform_block(
            "Flags",
            vec![
                StructMember::new("enabled", SymbolType::scalar(ScalarKind::Bool)),
                StructMember::new("scale", SymbolType::scalar(ScalarKind::Float)),
            ],
        );
        builder.begin_function("main");
        let ptr = builder.access_chain(block, 0);
        let value = builder.load(ptr);
        builder.store(ptr, value);
        builder.end_function();
        let fragment = builder.finish();
        (fragment.context, fragment.code, block)
    }

    #[test]
    fn test_struct_words_become_uint() {
        let (mut ctx, mut buffer, _) = bool_block_fragment();
        legalize_uniform_bools(&mut ctx, &mut buffer).unwrap();

        let bool_id = ctx.type_id(&SymbolType::scalar(ScalarKind::Bool)).unwrap();
        let uint_id = ctx.type_id(&SymbolType::scalar(ScalarKind::UInt)).unwrap();
        let strukt = ctx
            .buffer()
            .iter()
            .find(|i| i.op == Op::TypeStruct)
            .expect("struct declaration");
        assert!(strukt.operands.contains(&Operand::TypeId(uint_id)));
        assert!(!strukt.operands.contains(&Operand::TypeId(bool_id)));
    }

    #[test]
    fn test_load_keeps_original_bool_id() {
        let (mut ctx, mut buffer, _) = bool_block_fragment();
        let original = buffer
            .iter()
            .find(|i| i.op == Op::Load)
            .and_then(|i| i.result_id)
            .unwrap();
        legalize_uniform_bools(&mut ctx, &mut buffer).unwrap();

        let load_index = (0..buffer.len()).find(|&i| buffer[i].op == Op::Load).unwrap();
        let load = &buffer[load_index];
        let fresh = load.result_id.unwrap();
        assert_ne!(fresh, original);
        assert_eq!(load.result_type, ctx.type_id(&SymbolType::scalar(ScalarKind::UInt)));

        let bridge = &buffer[load_index + 1];
        assert_eq!(bridge.op, Op::INotEqual);
        assert_eq!(bridge.result_id, Some(original));
        assert_eq!(bridge.operands[0], Operand::Id(fresh));
    }

    #[test]
    fn test_store_goes_through_select() {
        let (mut ctx, mut buffer, _) = bool_block_fragment();
        legalize_uniform_bools(&mut ctx, &mut buffer).unwrap();

        let store_index = (0..buffer.len()).find(|&i| buffer[i].op == Op::Store).unwrap();
        let select = &buffer[store_index - 1];
        assert_eq!(select.op, Op::Select);
        let Some(&Operand::Id(stored)) = buffer[store_index].operands.get(1) else { panic!() };
        assert_eq!(select.result_id, Some(stored));
        // The select condition is the original bool, produced by the
        // INotEqual bridge just before.
        assert_eq!(
            select.operands[0],
            Operand::Id(buffer[store_index - 2].result_id.unwrap())
        );
    }

    #[test]
    fn test_idempotent_on_legalized_buffer() {
        let (mut ctx, mut buffer, _) = bool_block_fragment();
        legalize_uniform_bools(&mut ctx, &mut buffer).unwrap();
        let words_after_first: Vec<Instruction> = buffer.iter().cloned().collect();
        legalize_uniform_bools(&mut ctx, &mut buffer).unwrap();
        let words_after_second: Vec<Instruction> = buffer.iter().cloned().collect();
        assert_eq!(words_after_first, words_after_second);
    }

    #[test]
    fn test_nested_bool_is_unsupported() {
        let mut builder = FragmentBuilder::new();
        let inner = SymbolType::Struct {
            name: "Inner".into(),
            members: vec![StructMember::new("flag", SymbolType::scalar(ScalarKind::Bool))],
        };
        let block = builder.uniform_block(
            "Flags",
            vec![
                StructMember::new("nested", inner),
                StructMember::new("enabled", SymbolType::scalar(ScalarKind::Bool)),
            ],
        );
        builder.begin_function("main");
        builder.access_chain(block, 1);
        builder.end_function();
        let mut fragment = builder.finish();

        let err = legalize_uniform_bools(&mut fragment.context, &mut fragment.code).unwrap_err();
        assert!(matches!(err, MixerError::UnsupportedPattern(_)));
    }

    #[test]
    fn test_no_uniform_bools_is_a_no_op() {
        let mut builder = FragmentBuilder::new();
        builder.uniform_block(
            "Params",
            vec![StructMember::new("scale", SymbolType::scalar(ScalarKind::Float))],
        );
        let mut fragment = builder.finish();
        let before = fragment.context.buffer().len();
        legalize_uniform_bools(&mut fragment.context, &mut fragment.code).unwrap();
        assert_eq!(fragment.context.buffer().len(), before);
    }
}
