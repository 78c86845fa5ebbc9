//! Link metadata collection
//!
//! Walks the merged buffers once and resolves, for every surviving uniform
//! variable, the link key under which the host application sets its value.
//! Explicit link decorations win; otherwise the key defaults to
//! `Shader.variable`, derived from the fragment markers still present in the
//! code buffer. Variables below a composition get the composition path
//! appended, unless they were declared at stage scope.

use std::collections::HashMap;

use tracing::trace;

use sw_ir::op::decoration;
use sw_ir::{InstructionBuffer, Op, Operand, SpirvContext, SymbolType, VariableFlags};

/// Resolved metadata for one uniform variable.
#[derive(Debug, Clone, Default)]
pub struct VariableMetadata {
    pub link: String,
    pub logical_group: Option<String>,
    pub is_color: bool,
}

/// Resolved metadata for one uniform-block member.
#[derive(Debug, Clone, Default)]
pub struct MemberMetadata {
    pub key: String,
    pub logical_group: Option<String>,
    pub is_color: bool,
}

/// Metadata for every uniform variable in the merged buffer, keyed by
/// variable id. Uniform-block variables additionally carry one entry per
/// member, in member order; block merging concatenates these arrays.
#[derive(Debug, Default)]
pub struct MetadataTable {
    pub variables: HashMap<u32, VariableMetadata>,
    pub buffer_members: HashMap<u32, Vec<MemberMetadata>>,
}

/// Explicit decorations gathered from the bookkeeping buffer.
#[derive(Default)]
struct ExplicitAnnotations {
    links: HashMap<u32, String>,
    groups: HashMap<u32, String>,
    colors: HashMap<u32, bool>,
    member_links: HashMap<(u32, u32), String>,
    member_colors: HashMap<(u32, u32), bool>,
}

fn string_operand(operand: Option<&Operand>) -> Option<&str> {
    match operand {
        Some(Operand::LiteralString(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn collect_explicit(ctx: &SpirvContext) -> ExplicitAnnotations {
    let mut explicit = ExplicitAnnotations::default();
    for instruction in ctx.buffer().iter() {
        match instruction.op {
            Op::DecorateString => {
                let Some(target) = instruction.target() else { continue };
                let value = string_operand(instruction.operands.get(2));
                match (instruction.operands.get(1), value) {
                    (Some(Operand::Enum(decoration::LINK)), Some(v)) => {
                        // Duplicate decorations resolve last-wins.
                        explicit.links.insert(target, v.to_string());
                    }
                    (Some(Operand::Enum(decoration::LOGICAL_GROUP)), Some(v)) => {
                        explicit.groups.insert(target, v.to_string());
                    }
                    _ => {}
                }
            }
            Op::Decorate => {
                if let (Some(target), Some(Operand::Enum(decoration::COLOR))) =
                    (instruction.target(), instruction.operands.get(1))
                {
                    explicit.colors.insert(target, true);
                }
            }
            Op::MemberDecorateString => {
                let (Some(struct_id), Some(&Operand::Literal(member))) =
                    (instruction.target(), instruction.operands.get(1))
                else {
                    continue;
                };
                if instruction.operands.get(2) == Some(&Operand::Enum(decoration::LINK)) {
                    if let Some(v) = string_operand(instruction.operands.get(3)) {
                        explicit.member_links.insert((struct_id, member), v.to_string());
                    }
                }
            }
            Op::MemberDecorate => {
                let (Some(struct_id), Some(&Operand::Literal(member))) =
                    (instruction.target(), instruction.operands.get(1))
                else {
                    continue;
                };
                if instruction.operands.get(2) == Some(&Operand::Enum(decoration::COLOR)) {
                    explicit.member_colors.insert((struct_id, member), true);
                }
            }
            _ => {}
        }
    }
    explicit
}

/// Resolve metadata for every uniform variable of the merged buffer.
pub fn collect_metadata(ctx: &SpirvContext, buffer: &InstructionBuffer) -> MetadataTable {
    let explicit = collect_explicit(ctx);
    let mut table = MetadataTable::default();

    let mut path_stack: Vec<String> = Vec::new();
    let mut current_shader = String::new();

    for instruction in buffer.iter() {
        match instruction.op {
            Op::ShaderMarker => {
                if let Some(name) = string_operand(instruction.operands.first()) {
                    current_shader = name.to_string();
                }
            }
            Op::CompositionMarker => {
                if let Some(path) = string_operand(instruction.operands.first()) {
                    path_stack.push(path.to_string());
                }
            }
            Op::CompositionMarkerEnd => {
                path_stack.pop();
            }
            Op::Variable => {
                let Some(var_id) = instruction.result_id else { continue };
                let Some(name) = ctx.name_of(var_id) else { continue };
                let stage = instruction.variable_flags() & VariableFlags::STAGE.bits() != 0;
                let path = path_stack.last().map(String::as_str).unwrap_or("");

                let mut link = explicit
                    .links
                    .get(&var_id)
                    .cloned()
                    .unwrap_or_else(|| format!("{current_shader}.{name}"));
                if !stage && !path.is_empty() {
                    link = format!("{link}.{path}");
                }
                trace!(var_id, %link, "resolved link key");

                let metadata = VariableMetadata {
                    link,
                    logical_group: explicit.groups.get(&var_id).cloned(),
                    is_color: explicit.colors.contains_key(&var_id),
                };

                let pointee = instruction.result_type.and_then(|t| ctx.type_of(t));
                if let Some(SymbolType::Pointer { base, .. }) = pointee {
                    if let SymbolType::UniformBuffer { members, .. } = &**base {
                        let struct_id = ctx.type_id(base).unwrap_or(0);
                        let entries = members
                            .iter()
                            .enumerate()
                            .map(|(index, member)| {
                                let mut key = explicit
                                    .member_links
                                    .get(&(struct_id, index as u32))
                                    .cloned()
                                    .unwrap_or_else(|| {
                                        format!("{current_shader}.{}", member.name)
                                    });
                                if !stage && !path.is_empty() {
                                    key = format!("{key}.{path}");
                                }
                                MemberMetadata {
                                    key,
                                    logical_group: metadata.logical_group.clone(),
                                    is_color: explicit
                                        .member_colors
                                        .contains_key(&(struct_id, index as u32)),
                                }
                            })
                            .collect();
                        table.buffer_members.insert(var_id, entries);
                    }
                }

                table.variables.insert(var_id, metadata);
            }
            _ => {}
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MixerError, Result};
    use crate::fragment::FragmentBuilder;
    use crate::mixin::merge_mixins;
    use crate::source::{Fragment, ShaderLoader, ShaderMacro, ShaderSource};
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
                "Material" => {
                    let block = builder.uniform_block(
                        "Params",
                        vec![
                            StructMember::new("tint", SymbolType::vector(ScalarKind::Float, 3)),
                            StructMember::new("power", SymbolType::scalar(ScalarKind::Float)),
                        ],
                    );
                    builder.member_link_key(block, 1, "Material.SpecularPower");
                    builder.member_color(block, 0);
                    let loose = builder.uniform("Exposure", SymbolType::scalar(ScalarKind::Float));
                    builder.link_key(loose, "Camera.Exposure");
                    builder.logical_group(loose, "Camera");
                    builder.composition_slot("surface", "Surface");
                    builder.begin_function("main");
                    builder.end_function();
                }
                "Surface" => {
                    builder.uniform("Roughness", SymbolType::scalar(ScalarKind::Float));
                    let staged =
                        builder.uniform("WorldScale", SymbolType::scalar(ScalarKind::Float));
                    builder.mark_stage(staged);
                    builder.begin_function("surf");
                    builder.end_function();
                }
                other => return Err(MixerError::UnknownShader(other.into())),
            }
            Ok(builder.finish())
        }
    }

    fn collect() -> (SpirvContext, InstructionBuffer, MetadataTable) {
        let source = ShaderSource::new("Material")
            .with_composition("surface", ShaderSource::new("Surface"));
        let mut ctx = SpirvContext::new();
        let mut buffer = InstructionBuffer::new();
        merge_mixins(&TestLoader, &mut ctx, &mut buffer, &source).unwrap();
        let table = collect_metadata(&ctx, &buffer);
        (ctx, buffer, table)
    }

    fn id_by_name(ctx: &SpirvContext, buffer: &InstructionBuffer, name: &str) -> u32 {
        buffer
            .iter()
            .filter(|i| i.op == Op::Variable)
            .filter_map(|i| i.result_id)
            .find(|&id| ctx.name_of(id) == Some(name))
            .unwrap_or_else(|| panic!("no variable named {name}"))
    }

    #[test]
    fn test_default_and_explicit_links() {
        let (ctx, buffer, table) = collect();

        let params = id_by_name(&ctx, &buffer, "Params");
        assert_eq!(table.variables[&params].link, "Material.Params");

        let exposure = id_by_name(&ctx, &buffer, "Exposure");
        let metadata = &table.variables[&exposure];
        assert_eq!(metadata.link, "Camera.Exposure");
        assert_eq!(metadata.logical_group.as_deref(), Some("Camera"));
    }

    #[test]
    fn test_member_metadata() {
        let (ctx, buffer, table) = collect();
        let params = id_by_name(&ctx, &buffer, "Params");
        let members = &table.buffer_members[&params];
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].key, "Material.tint");
        assert!(members[0].is_color);
        assert_eq!(members[1].key, "Material.SpecularPower");
        assert!(!members[1].is_color);
    }

    #[test]
    fn test_composition_path_suffix_skips_stage_variables() {
        let (ctx, buffer, table) = collect();

        let roughness = id_by_name(&ctx, &buffer, "Roughness");
        assert_eq!(table.variables[&roughness].link, "Surface.Roughness.surface");

        let staged = id_by_name(&ctx, &buffer, "WorldScale");
        assert_eq!(table.variables[&staged].link, "Surface.WorldScale");
    }
}
