//! Constant-buffer packing rules
//!
//! HLSL-style layout: scalars pack tightly, vectors may not straddle a
//! 16-byte register boundary, matrices and array elements are padded to a
//! 16-byte stride, and aggregate sizes round up to 16 bytes.

use crate::types::{ScalarKind, SymbolType, TypeModifier};

/// The register size all alignment rules revolve around.
pub const REGISTER_SIZE: u32 = 16;

/// Matrix rows/columns are always padded to a full register.
pub const MATRIX_STRIDE: u32 = 16;

fn round_up(value: u32, align: u32) -> u32 {
    (value + align - 1) / align * align
}

/// Byte size and alignment of a member type under cbuffer packing.
pub fn size_and_align(ty: &SymbolType, modifier: TypeModifier) -> (u32, u32) {
    match ty {
        SymbolType::Scalar(kind) => {
            let size = kind.byte_size();
            (size, size)
        }
        SymbolType::Vector { base, size } => {
            let bytes = base.byte_size() * size;
            (bytes, base.byte_size())
        }
        SymbolType::Matrix { base, rows, cols } => {
            // Row-major matrices occupy one register per row, column-major
            // (the default) one per column.
            let (registers, elements) = match modifier {
                TypeModifier::RowMajor => (*rows, *cols),
                _ => (*cols, *rows),
            };
            let size = MATRIX_STRIDE * (registers - 1) + base.byte_size() * elements;
            (size, REGISTER_SIZE)
        }
        SymbolType::Array { base, len } => {
            let (element_size, _) = size_and_align(base, modifier);
            let stride = round_up(element_size, REGISTER_SIZE);
            (stride * len, REGISTER_SIZE)
        }
        SymbolType::Struct { members, .. } | SymbolType::UniformBuffer { members, .. } => {
            let mut cursor = 0;
            for member in members {
                let size = align_member(&member.ty, member.modifier, &mut cursor);
                cursor += size;
            }
            (round_up(cursor, REGISTER_SIZE), REGISTER_SIZE)
        }
        // Pointers, shader symbols and void never appear in buffer layouts.
        _ => (0, 1),
    }
}

/// Align `cursor` for a member of type `ty` and return the member's size.
/// The aligned cursor is the member's byte offset; the caller advances it by
/// the returned size afterwards.
pub fn align_member(ty: &SymbolType, modifier: TypeModifier, cursor: &mut u32) -> u32 {
    let (size, align) = size_and_align(ty, modifier);
    *cursor = round_up(*cursor, align);
    // A vector or small aggregate may not straddle a register boundary.
    // Zero-size types (pointers, shader symbols, void) have no layout and
    // must not feed the straddle arithmetic.
    if size > 0
        && size <= REGISTER_SIZE
        && *cursor / REGISTER_SIZE != (*cursor + size - 1) / REGISTER_SIZE
    {
        *cursor = round_up(*cursor, REGISTER_SIZE);
    }
    size
}

/// Round a buffer's total size up to the format's minimum alignment.
pub fn round_buffer_size(size: u32) -> u32 {
    round_up(size, REGISTER_SIZE)
}
