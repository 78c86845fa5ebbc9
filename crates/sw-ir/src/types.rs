//! Structural type model
//!
//! Types are interned by structure: two structurally equal types share one
//! type id. `UniformBuffer` is a struct additionally marked as a top-level
//! binding target; `Shader` is a linker-private symbol used for composition
//! slots and never serialized.

use bitflags::bitflags;

/// Scalar element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    UInt,
    Float,
    Double,
}

impl ScalarKind {
    /// Byte size in buffer layouts. Bools in uniform blocks are stored as
    /// 32-bit integers.
    pub fn byte_size(self) -> u32 {
        match self {
            ScalarKind::Double => 8,
            _ => 4,
        }
    }
}

/// Storage classes for pointers and variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Input,
    Uniform,
    Output,
    Private,
    Function,
}

impl StorageClass {
    pub fn code(self) -> u32 {
        match self {
            StorageClass::Input => 1,
            StorageClass::Uniform => 2,
            StorageClass::Output => 3,
            StorageClass::Private => 6,
            StorageClass::Function => 7,
        }
    }
}

/// Layout modifier carried on struct members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TypeModifier {
    #[default]
    None,
    RowMajor,
    ColMajor,
}

/// A named member of a struct or uniform buffer. Order is significant: it
/// determines the member index and the default byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructMember {
    pub name: String,
    pub ty: SymbolType,
    pub modifier: TypeModifier,
}

impl StructMember {
    pub fn new(name: impl Into<String>, ty: SymbolType) -> Self {
        Self { name: name.into(), ty, modifier: TypeModifier::None }
    }

    pub fn with_modifier(name: impl Into<String>, ty: SymbolType, modifier: TypeModifier) -> Self {
        Self { name: name.into(), ty, modifier }
    }
}

/// Structural types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolType {
    Void,
    Scalar(ScalarKind),
    Vector { base: ScalarKind, size: u32 },
    Matrix { base: ScalarKind, rows: u32, cols: u32 },
    Array { base: Box<SymbolType>, len: u32 },
    Struct { name: String, members: Vec<StructMember> },
    /// A struct that is a top-level uniform binding target (cbuffer).
    UniformBuffer { name: String, members: Vec<StructMember> },
    Pointer { base: Box<SymbolType>, storage: StorageClass },
    /// Composition slot target; linker-private, resolved away during merging.
    Shader { name: String },
}

impl SymbolType {
    pub fn pointer_to(self, storage: StorageClass) -> SymbolType {
        SymbolType::Pointer { base: Box::new(self), storage }
    }

    pub fn scalar(kind: ScalarKind) -> SymbolType {
        SymbolType::Scalar(kind)
    }

    pub fn vector(base: ScalarKind, size: u32) -> SymbolType {
        SymbolType::Vector { base, size }
    }

    /// Does this type contain a bool anywhere in its structure?
    pub fn contains_bool(&self) -> bool {
        match self {
            SymbolType::Scalar(ScalarKind::Bool) => true,
            SymbolType::Vector { base, .. } | SymbolType::Matrix { base, .. } => *base == ScalarKind::Bool,
            SymbolType::Array { base, .. } => base.contains_bool(),
            SymbolType::Struct { members, .. } | SymbolType::UniformBuffer { members, .. } => {
                members.iter().any(|m| m.ty.contains_bool())
            }
            SymbolType::Pointer { base, .. } => base.contains_bool(),
            _ => false,
        }
    }
}

bitflags! {
    /// Linker-private variable flags, carried as a trailing literal operand
    /// on variable declarations and stripped before serialization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VariableFlags: u32 {
        /// Declared at stage scope; its link key never gets a composition
        /// path suffix.
        const STAGE = 0x01;
    }
}
