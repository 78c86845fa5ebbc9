//! Constant-buffer reflection
//!
//! Computes the packed layout of every surviving uniform block, emits the
//! offset and matrix-order member decorations into the context buffer, and
//! produces the serializable description the host application binds
//! parameters against. Matrix order decorations are swapped relative to the
//! source modifier: a row-major source matrix is stored column-major in the
//! word stream, and vice versa.
//!
//! Runs before bool legalization so descriptors report the declared bool
//! type rather than its storage encoding.

use serde::{Deserialize, Serialize};
use tracing::warn;

use sw_ir::op::decoration;
use sw_ir::{layout, InstructionBuffer, Op, ScalarKind, SpirvContext, SymbolType, TypeModifier};

use crate::error::{MixerError, Result};
use crate::metadata::MetadataTable;

/// Shape class of a reflected member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeClass {
    Scalar,
    Vector,
    MatrixRows,
    MatrixColumns,
    Color,
    Struct,
}

/// Scalar element kind of a reflected member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Bool,
    Int,
    UInt,
    Float,
    Double,
}

impl From<ScalarKind> for ElementKind {
    fn from(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => ElementKind::Bool,
            ScalarKind::Int => ElementKind::Int,
            ScalarKind::UInt => ElementKind::UInt,
            ScalarKind::Float => ElementKind::Float,
            ScalarKind::Double => ElementKind::Double,
        }
    }
}

/// Shape of one member type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub class: TypeClass,
    pub element: Option<ElementKind>,
    pub rows: u32,
    pub columns: u32,
    pub element_size: u32,
    /// Array element count; zero for non-arrays.
    pub elements: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberReflection {
    pub name: String,
    pub ty: TypeDescriptor,
    pub offset: u32,
    pub size: u32,
    /// Link key the host sets this member through.
    pub key: String,
    pub logical_group: Option<String>,
    pub is_color: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantBufferReflection {
    pub name: String,
    pub size: u32,
    pub members: Vec<MemberReflection>,
}

/// Reflection description of a compiled unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    pub constant_buffers: Vec<ConstantBufferReflection>,
}

fn is_matrix_like(ty: &SymbolType) -> bool {
    match ty {
        SymbolType::Matrix { .. } => true,
        SymbolType::Array { base, .. } => matches!(**base, SymbolType::Matrix { .. }),
        _ => false,
    }
}

fn describe_type(
    ty: &SymbolType,
    modifier: TypeModifier,
    is_color: bool,
) -> Result<TypeDescriptor> {
    if let SymbolType::Array { base, len } = ty {
        let mut descriptor = describe_type(base, modifier, is_color)?;
        descriptor.elements = *len;
        return Ok(descriptor);
    }
    let descriptor = match ty {
        SymbolType::Scalar(kind) => TypeDescriptor {
            class: TypeClass::Scalar,
            element: Some((*kind).into()),
            rows: 1,
            columns: 1,
            element_size: kind.byte_size(),
            elements: 0,
        },
        SymbolType::Vector { base, size } => TypeDescriptor {
            class: if is_color { TypeClass::Color } else { TypeClass::Vector },
            element: Some((*base).into()),
            rows: 1,
            columns: *size,
            element_size: base.byte_size(),
            elements: 0,
        },
        SymbolType::Matrix { base, rows, cols } => TypeDescriptor {
            class: if modifier == TypeModifier::RowMajor {
                TypeClass::MatrixRows
            } else {
                TypeClass::MatrixColumns
            },
            element: Some((*base).into()),
            rows: *rows,
            columns: *cols,
            element_size: base.byte_size(),
            elements: 0,
        },
        SymbolType::Struct { members, .. } | SymbolType::UniformBuffer { members, .. } => {
            TypeDescriptor {
                class: TypeClass::Struct,
                element: None,
                rows: 1,
                columns: members.len() as u32,
                element_size: 0,
                elements: 0,
            }
        }
        other => {
            return Err(MixerError::UnsupportedPattern(format!(
                "type {other:?} cannot appear in a uniform block"
            )))
        }
    };
    Ok(descriptor)
}

/// Compute layout and reflection for every uniform block in the buffer.
pub fn compute_reflection(
    ctx: &mut SpirvContext,
    buffer: &InstructionBuffer,
    metadata: &MetadataTable,
) -> Result<Reflection> {
    // Gather first; decorating mutates the context.
    let mut blocks: Vec<(u32, u32, String, Vec<sw_ir::StructMember>)> = Vec::new();
    for instruction in buffer.iter() {
        if instruction.op != Op::Variable {
            continue;
        }
        let Some(var_id) = instruction.result_id else { continue };
        let Some(SymbolType::Pointer { base, .. }) =
            instruction.result_type.and_then(|t| ctx.type_of(t))
        else {
            continue;
        };
        let SymbolType::UniformBuffer { name: type_name, members } = &**base else { continue };
        let struct_id = ctx.type_id(base).unwrap_or(0);
        let name = ctx.name_of(var_id).unwrap_or(type_name).to_string();
        blocks.push((var_id, struct_id, name, members.clone()));
    }

    let mut reflection = Reflection::default();
    for (var_id, struct_id, name, members) in blocks {
        let mut cursor = 0u32;
        let mut reflected = Vec::with_capacity(members.len());
        for (index, member) in members.iter().enumerate() {
            let size = layout::align_member(&member.ty, member.modifier, &mut cursor);
            let offset = cursor;
            cursor += size;

            ctx.member_decorate(struct_id, index as u32, decoration::OFFSET, &[offset]);
            if is_matrix_like(&member.ty) {
                let order = if member.modifier == TypeModifier::RowMajor {
                    decoration::COL_MAJOR
                } else {
                    decoration::ROW_MAJOR
                };
                ctx.member_decorate(struct_id, index as u32, order, &[]);
                ctx.member_decorate(
                    struct_id,
                    index as u32,
                    decoration::MATRIX_STRIDE,
                    &[layout::MATRIX_STRIDE],
                );
            }

            let member_metadata = metadata
                .buffer_members
                .get(&var_id)
                .and_then(|entries| entries.get(index));
            let (key, logical_group, is_color) = match member_metadata {
                Some(m) => (m.key.clone(), m.logical_group.clone(), m.is_color),
                None => {
                    warn!(block = %name, member = %member.name, "member without link metadata");
                    (String::new(), None, false)
                }
            };
            if is_color
                && !matches!(
                    member.ty,
                    SymbolType::Vector { base: ScalarKind::Float, size: 3 | 4 }
                )
            {
                return Err(MixerError::StructuralViolation(format!(
                    "color member '{}' must be a float3 or float4",
                    member.name
                )));
            }

            reflected.push(MemberReflection {
                name: member.name.clone(),
                ty: describe_type(&member.ty, member.modifier, is_color)?,
                offset,
                size,
                key,
                logical_group,
                is_color,
            });
        }
        reflection.constant_buffers.push(ConstantBufferReflection {
            name,
            size: layout::round_buffer_size(cursor),
            members: reflected,
        });
    }
    Ok(reflection)
}
