//! Mixin merging
//!
//! Merges the fragments of a mixin tree into one shared context and code
//! buffer. Each fragment's ids are offset past the global bound, its types
//! and constants are re-interned structurally, and a remap table folds
//! duplicate declarations onto their canonical ids. Fragment boundaries stay
//! visible through linker-private marker instructions until cleanup.
//!
//! Composition slots are variables whose pointee is a shader symbol. Filling
//! a slot splices the child node's fragments behind the parent, wrapped in
//! composition markers carrying the accumulated path, and tombstones the
//! slot variable.

use std::collections::HashMap;

use tracing::{debug, trace};

use sw_ir::op::decoration;
use sw_ir::{Instruction, InstructionBuffer, Op, Operand, SpirvContext, SymbolType};

use crate::error::{MixerError, Result};
use crate::source::{Composition, Fragment, ShaderLoader, ShaderMacro, ShaderSource};

/// Code-buffer span of one merged fragment, exclusive of its markers.
#[derive(Debug, Clone)]
pub struct ShaderRange {
    pub shader: String,
    pub start: usize,
    pub end: usize,
}

/// One node of the merged mixin tree. Spans index into the shared code
/// buffer and stay valid through tombstoning; insertions must be reported
/// through `adjust_indices_after_insert`.
#[derive(Debug, Default)]
pub struct MixinNode {
    pub composition_path: String,
    pub start_instruction: usize,
    pub end_instruction: usize,
    pub shaders: Vec<ShaderRange>,
    pub children: Vec<MixinNode>,
}

impl MixinNode {
    /// Shift every recorded span for `delta` instructions inserted at `from`.
    /// A span whose end sits exactly at the insertion point grows to cover
    /// the new instructions.
    pub fn adjust_indices_after_insert(&mut self, from: usize, delta: usize) {
        if self.start_instruction > from {
            self.start_instruction += delta;
        }
        if self.end_instruction >= from {
            self.end_instruction += delta;
        }
        for range in &mut self.shaders {
            if range.start > from {
                range.start += delta;
            }
            if range.end >= from {
                range.end += delta;
            }
        }
        for child in &mut self.children {
            child.adjust_indices_after_insert(from, delta);
        }
    }
}

/// A composition slot found in a merged node.
struct Slot {
    var_id: u32,
    buffer_index: usize,
    is_array: bool,
    filled: bool,
}

/// Merge the whole mixin tree described by `source` into `ctx` and `buffer`.
pub fn merge_mixins(
    loader: &dyn ShaderLoader,
    ctx: &mut SpirvContext,
    buffer: &mut InstructionBuffer,
    source: &ShaderSource,
) -> Result<MixinNode> {
    merge_node(loader, ctx, buffer, source, "", &[])
}

fn merge_node(
    loader: &dyn ShaderLoader,
    ctx: &mut SpirvContext,
    buffer: &mut InstructionBuffer,
    source: &ShaderSource,
    path: &str,
    inherited: &[ShaderMacro],
) -> Result<MixinNode> {
    // Parent macros propagate unless shadowed locally.
    let mut macros = source.macros.clone();
    for parent in inherited {
        if !macros.iter().any(|m| m.name == parent.name) {
            macros.push(parent.clone());
        }
    }

    let start_instruction = buffer.len();
    if !path.is_empty() {
        buffer.push(
            Instruction::new(Op::CompositionMarker)
                .operand(Operand::LiteralString(path.to_string())),
        );
    }

    let mut shaders = Vec::new();
    for name in &source.mixins {
        debug!(shader = %name, path, "merging fragment");
        buffer.push(
            Instruction::new(Op::ShaderMarker).operand(Operand::LiteralString(name.clone())),
        );
        let start = buffer.len();
        let fragment = loader.load_shader_ir(name, &source.generics, &macros)?;
        merge_fragment(ctx, buffer, fragment);
        let end = buffer.len();
        buffer.push(Instruction::new(Op::ShaderMarkerEnd));
        shaders.push(ShaderRange { shader: name.clone(), start, end });
    }

    // Composition slots declared by this node's own fragments.
    let mut slots: HashMap<String, Slot> = HashMap::new();
    for index in start_instruction..buffer.len() {
        let instruction = &buffer[index];
        if instruction.op != Op::Variable {
            continue;
        }
        let Some(pointer) = instruction.result_type.and_then(|t| ctx.type_of(t)) else {
            continue;
        };
        let SymbolType::Pointer { base, .. } = pointer else { continue };
        let is_array = match &**base {
            SymbolType::Shader { .. } => false,
            SymbolType::Array { base, .. } if matches!(**base, SymbolType::Shader { .. }) => true,
            _ => continue,
        };
        let var_id = instruction.result_id.unwrap_or(0);
        let Some(name) = ctx.name_of(var_id) else { continue };
        slots.insert(
            name.to_string(),
            Slot { var_id, buffer_index: index, is_array, filled: false },
        );
    }

    let mut children = Vec::new();
    for composition in &source.compositions {
        let (name, sources): (&str, Vec<&ShaderSource>) = match composition {
            Composition::Slot { name, source } => (name, vec![source]),
            Composition::Array { name, sources } => (name, sources.iter().collect()),
        };
        let slot = slots.get_mut(name).ok_or_else(|| {
            MixerError::StructuralViolation(format!("no composition slot named '{name}'"))
        })?;
        if !slot.is_array && sources.len() != 1 {
            return Err(MixerError::StructuralViolation(format!(
                "composition slot '{name}' takes exactly one mixin, got {}",
                sources.len()
            )));
        }
        slot.filled = true;
        let use_index = slot.is_array;
        for (i, child) in sources.into_iter().enumerate() {
            let local = if use_index { format!("{name}[{i}]") } else { name.to_string() };
            let child_path =
                if path.is_empty() { local } else { format!("{local}.{path}") };
            children.push(merge_node(loader, ctx, buffer, child, &child_path, &macros)?);
        }
    }

    for (name, slot) in &slots {
        if !slot.filled {
            return Err(MixerError::StructuralViolation(format!(
                "composition slot '{name}' was never filled"
            )));
        }
        // Resolved slots leave no trace: tombstone the declaration and its
        // debug name.
        buffer.set_nop(slot.buffer_index);
        for index in 0..ctx.buffer().len() {
            let instruction = &ctx.buffer()[index];
            if instruction.op == Op::Name && instruction.target() == Some(slot.var_id) {
                ctx.buffer_mut().set_nop(index);
            }
        }
    }

    if !path.is_empty() {
        buffer.push(Instruction::new(Op::CompositionMarkerEnd));
    }

    Ok(MixinNode {
        composition_path: path.to_string(),
        start_instruction,
        end_instruction: buffer.len(),
        shaders,
        children,
    })
}

/// Splice one fragment into the shared context and code buffer.
///
/// Every fragment id is offset by the global bound at entry, then folded
/// through the re-interning remap. Both steps happen here, exactly once;
/// later passes see only canonical ids.
pub fn merge_fragment(ctx: &mut SpirvContext, buffer: &mut InstructionBuffer, fragment: Fragment) {
    let offset = ctx.bound();
    let fragment_bound = fragment.context.bound();
    let mut remap: HashMap<u32, u32> = HashMap::new();

    // Shader symbols and pointers to them declare nothing, so the
    // declaration walk below never sees them. Re-intern them from the type
    // table directly; slot resolution needs their pointee types. Sorted by
    // fragment id so allocation stays deterministic.
    let mut silent: Vec<(SymbolType, u32)> = fragment
        .context
        .registered_types()
        .filter(|(ty, _)| match ty {
            SymbolType::Shader { .. } => true,
            SymbolType::Pointer { base, .. } => matches!(**base, SymbolType::Shader { .. }),
            _ => false,
        })
        .map(|(ty, id)| (ty.clone(), id))
        .collect();
    silent.sort_by_key(|&(_, id)| id);
    for (ty, old) in silent {
        let interned = ctx.get_or_register(&ty);
        remap.insert(old + offset, interned);
    }

    for instruction in fragment.context.buffer().iter() {
        if instruction.op.is_type_decl() {
            let old = instruction.result_id.unwrap_or(0);
            if let Some(ty) = fragment.context.type_of(old) {
                let ty = ty.clone();
                let interned = ctx.get_or_register(&ty);
                remap.insert(old + offset, interned);
            } else {
                // Opaque declaration (function types); carried through.
                let mut carried = instruction.clone();
                rebase(&mut carried, offset, &remap);
                ctx.buffer_mut().push(carried);
            }
            continue;
        }
        if instruction.op == Op::Constant {
            let old = instruction.result_id.unwrap_or(0);
            if let Some((kind, bits)) = fragment.context.constant_kind_and_value(old) {
                let interned = ctx.compile_constant(kind, bits);
                remap.insert(old + offset, interned);
            } else {
                let mut carried = instruction.clone();
                rebase(&mut carried, offset, &remap);
                ctx.buffer_mut().push(carried);
            }
            continue;
        }
        if instruction.op.is_annotation() {
            let folded = instruction
                .target()
                .is_some_and(|t| remap.contains_key(&(t + offset)));
            if folded && !is_metadata_annotation(instruction) {
                // The canonical declaration already carries its names,
                // member names and layout decorations.
                trace!(?instruction.op, "dropping annotation folded onto canonical declaration");
                continue;
            }
            let mut carried = instruction.clone();
            rebase(&mut carried, offset, &remap);
            ctx.buffer_mut().push(carried);
            continue;
        }
        let mut carried = instruction.clone();
        rebase(&mut carried, offset, &remap);
        ctx.buffer_mut().push(carried);
    }

    // Name table entries follow their ids; canonical declarations keep the
    // name they already have.
    for (old, name) in fragment.context.names() {
        let new = remap.get(&(old + offset)).copied().unwrap_or(old + offset);
        if ctx.name_of(new).is_none() {
            ctx.set_name(new, name);
        }
    }

    for index in 0..fragment.code.len() {
        let mut carried = fragment.code[index].clone();
        rebase(&mut carried, offset, &remap);
        buffer.push(carried);
    }

    ctx.ensure_bound(offset + fragment_bound);
}

fn rebase(instruction: &mut Instruction, offset: u32, remap: &HashMap<u32, u32>) {
    instruction.for_each_id_mut(|id| {
        *id += offset;
        if let Some(&canonical) = remap.get(id) {
            *id = canonical;
        }
    });
}

/// Link, logical-group and color annotations survive declaration folding:
/// they belong to the fragment, not the canonical type. Cleanup strips them
/// once metadata collection has consumed them.
pub(crate) fn is_metadata_annotation(instruction: &Instruction) -> bool {
    let decoration_operand = match instruction.op {
        Op::Decorate | Op::DecorateString => instruction.operands.get(1),
        Op::MemberDecorate | Op::MemberDecorateString => instruction.operands.get(2),
        _ => return false,
    };
    matches!(
        decoration_operand,
        Some(Operand::Enum(
            decoration::LINK | decoration::LOGICAL_GROUP | decoration::COLOR
        ))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentBuilder;
    use sw_ir::{ScalarKind, StructMember};

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
                "Base" => {
                    let block = builder.uniform_block(
                        "PerDraw",
                        vec![StructMember::new("scale", SymbolType::scalar(ScalarKind::Float))],
                    );
                    builder.composition_slot("lighting", "Light");
                    builder.begin_function("main");
                    let ptr = builder.access_chain(block, 0);
                    builder.load(ptr);
                    builder.end_function();
                }
                "Extra" => {
                    builder.uniform_block(
                        "PerDraw",
                        vec![StructMember::new("scale", SymbolType::scalar(ScalarKind::Float))],
                    );
                    builder.begin_function("extra");
                    builder.end_function();
                }
                "Light" => {
                    builder.uniform("LightColor", SymbolType::vector(ScalarKind::Float, 3));
                    builder.begin_function("light");
                    builder.end_function();
                }
                "Deck" => {
                    builder.composition_slot_array("effects", "Light", 2);
                    builder.begin_function("deck");
                    builder.end_function();
                }
                other => return Err(MixerError::UnknownShader(other.into())),
            }
            Ok(builder.finish())
        }
    }

    fn merge(source: &ShaderSource) -> Result<(SpirvContext, InstructionBuffer, MixinNode)> {
        let mut ctx = SpirvContext::new();
        let mut buffer = InstructionBuffer::new();
        let root = merge_mixins(&TestLoader, &mut ctx, &mut buffer, source)?;
        Ok((ctx, buffer, root))
    }

    #[test]
    fn test_ranges_and_markers() {
        let source = ShaderSource::new("Extra").with_mixin("Extra");
        let (_, buffer, root) = merge(&source).unwrap();

        assert_eq!(root.shaders.len(), 2);
        for range in &root.shaders {
            assert_eq!(buffer[range.start - 1].op, Op::ShaderMarker);
            assert_eq!(buffer[range.end].op, Op::ShaderMarkerEnd);
        }
        assert_eq!(root.start_instruction, 0);
        assert_eq!(root.end_instruction, buffer.len());
    }

    #[test]
    fn test_shared_types_fold_onto_one_declaration() {
        let source = ShaderSource::new("Extra").with_mixin("Extra");
        let (ctx, _, _) = merge(&source).unwrap();

        let struct_decls = ctx
            .buffer()
            .iter()
            .filter(|i| i.op == Op::TypeStruct)
            .count();
        assert_eq!(struct_decls, 1);
        let float_decls = ctx
            .buffer()
            .iter()
            .filter(|i| i.op == Op::TypeFloat)
            .count();
        assert_eq!(float_decls, 1);
    }

    #[test]
    fn test_merged_ids_stay_unique() {
        let source = ShaderSource::new("Extra").with_mixin("Extra");
        let (ctx, buffer, _) = merge(&source).unwrap();

        let mut seen = std::collections::HashSet::new();
        for instruction in ctx.buffer().iter().chain(buffer.iter()) {
            if let Some(id) = instruction.result_id {
                assert!(seen.insert(id), "duplicate result id {id}");
                assert!(id < ctx.bound());
            }
        }
    }

    #[test]
    fn test_composition_splices_child_and_consumes_slot() {
        let source =
            ShaderSource::new("Base").with_composition("lighting", ShaderSource::new("Light"));
        let (ctx, buffer, root) = merge(&source).unwrap();

        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].composition_path, "lighting");

        let marker = buffer
            .iter()
            .find(|i| i.op == Op::CompositionMarker)
            .expect("composition marker");
        assert_eq!(
            marker.operands[0],
            Operand::LiteralString("lighting".into())
        );

        // The slot variable is gone; the child's variable survives.
        let slot_alive = buffer.iter().any(|i| {
            i.op == Op::Variable
                && i.result_id.is_some_and(|id| ctx.name_of(id) == Some("lighting"))
        });
        assert!(!slot_alive);
        let child_var = buffer.iter().any(|i| {
            i.op == Op::Variable
                && i.result_id.is_some_and(|id| ctx.name_of(id) == Some("LightColor"))
        });
        assert!(child_var);
    }

    #[test]
    fn test_nested_composition_path_prefixes_local_name() {
        // Base.lighting is itself a Base, whose own lighting slot is filled.
        let inner = ShaderSource::new("Base").with_composition("lighting", ShaderSource::new("Light"));
        let source = ShaderSource::new("Base").with_composition("lighting", inner);
        let (_, buffer, root) = merge(&source).unwrap();

        assert_eq!(root.children[0].children[0].composition_path, "lighting.lighting");
        let paths: Vec<_> = buffer
            .iter()
            .filter(|i| i.op == Op::CompositionMarker)
            .map(|i| i.operands[0].clone())
            .collect();
        assert!(paths.contains(&Operand::LiteralString("lighting.lighting".into())));
    }

    #[test]
    fn test_array_composition_indexes_each_child_path() {
        let source = ShaderSource::new("Deck").with_composition_array(
            "effects",
            vec![ShaderSource::new("Light"), ShaderSource::new("Light")],
        );
        let (_, buffer, root) = merge(&source).unwrap();

        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].composition_path, "effects[0]");
        assert_eq!(root.children[1].composition_path, "effects[1]");

        let paths: Vec<_> = buffer
            .iter()
            .filter(|i| i.op == Op::CompositionMarker)
            .map(|i| i.operands[0].clone())
            .collect();
        assert_eq!(
            paths,
            vec![
                Operand::LiteralString("effects[0]".into()),
                Operand::LiteralString("effects[1]".into()),
            ]
        );
    }

    #[test]
    fn test_unfilled_slot_is_rejected() {
        let source = ShaderSource::new("Base");
        let err = merge(&source).unwrap_err();
        assert!(matches!(err, MixerError::StructuralViolation(_)));
    }

    #[test]
    fn test_unknown_slot_is_rejected() {
        let source = ShaderSource::new("Extra")
            .with_composition("lighting", ShaderSource::new("Light"));
        let err = merge(&source).unwrap_err();
        assert!(matches!(err, MixerError::StructuralViolation(_)));
    }

    #[test]
    fn test_adjust_indices_after_insert() {
        let mut node = MixinNode {
            composition_path: String::new(),
            start_instruction: 0,
            end_instruction: 10,
            shaders: vec![ShaderRange { shader: "A".into(), start: 1, end: 4 }],
            children: vec![MixinNode {
                composition_path: "child".into(),
                start_instruction: 5,
                end_instruction: 9,
                shaders: vec![],
                children: vec![],
            }],
        };
        node.adjust_indices_after_insert(4, 2);
        assert_eq!(node.end_instruction, 12);
        // A span ending at the insertion point absorbs the insertion.
        assert_eq!(node.shaders[0].end, 6);
        assert_eq!(node.shaders[0].start, 1);
        assert_eq!(node.children[0].start_instruction, 7);
        assert_eq!(node.children[0].end_instruction, 11);
    }
}
