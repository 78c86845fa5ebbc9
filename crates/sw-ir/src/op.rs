//! Opcode and enumerant definitions
//!
//! A closed set of the opcodes the linker touches. Opcode numbers follow the
//! target word-stream convention; linker-private markers live in a reserved
//! range and never survive into serialized output.

/// Opcodes handled by the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Nop,
    Name,
    MemberName,
    ExtInstImport,
    MemoryModel,
    EntryPoint,
    ExecutionMode,
    Capability,
    TypeVoid,
    TypeBool,
    TypeInt,
    TypeFloat,
    TypeVector,
    TypeMatrix,
    TypeArray,
    TypeStruct,
    TypePointer,
    TypeFunction,
    Constant,
    Function,
    FunctionEnd,
    Variable,
    Load,
    Store,
    AccessChain,
    Decorate,
    MemberDecorate,
    Select,
    INotEqual,
    Label,
    Return,
    DecorateString,
    MemberDecorateString,
    /// Marks the start of a merged fragment's instructions (linker-private).
    ShaderMarker,
    /// Marks the end of a merged fragment's instructions (linker-private).
    ShaderMarkerEnd,
    /// Marks the start of a spliced composition (linker-private).
    CompositionMarker,
    /// Marks the end of a spliced composition (linker-private).
    CompositionMarkerEnd,
    /// Any opcode the linker does not model; carried through verbatim.
    Raw(u16),
}

const OP_NOP: u16 = 0;
const OP_NAME: u16 = 5;
const OP_MEMBER_NAME: u16 = 6;
const OP_EXT_INST_IMPORT: u16 = 11;
const OP_MEMORY_MODEL: u16 = 14;
const OP_ENTRY_POINT: u16 = 15;
const OP_EXECUTION_MODE: u16 = 16;
const OP_CAPABILITY: u16 = 17;
const OP_TYPE_VOID: u16 = 19;
const OP_TYPE_BOOL: u16 = 20;
const OP_TYPE_INT: u16 = 21;
const OP_TYPE_FLOAT: u16 = 22;
const OP_TYPE_VECTOR: u16 = 23;
const OP_TYPE_MATRIX: u16 = 24;
const OP_TYPE_ARRAY: u16 = 28;
const OP_TYPE_STRUCT: u16 = 30;
const OP_TYPE_POINTER: u16 = 32;
const OP_TYPE_FUNCTION: u16 = 33;
const OP_CONSTANT: u16 = 43;
const OP_FUNCTION: u16 = 54;
const OP_FUNCTION_END: u16 = 56;
const OP_VARIABLE: u16 = 59;
const OP_LOAD: u16 = 61;
const OP_STORE: u16 = 62;
const OP_ACCESS_CHAIN: u16 = 65;
const OP_DECORATE: u16 = 71;
const OP_MEMBER_DECORATE: u16 = 72;
const OP_SELECT: u16 = 169;
const OP_I_NOT_EQUAL: u16 = 171;
const OP_LABEL: u16 = 248;
const OP_RETURN: u16 = 253;
const OP_DECORATE_STRING: u16 = 5632;
const OP_MEMBER_DECORATE_STRING: u16 = 5633;
const OP_SHADER_MARKER: u16 = 6464;
const OP_SHADER_MARKER_END: u16 = 6465;
const OP_COMPOSITION_MARKER: u16 = 6466;
const OP_COMPOSITION_MARKER_END: u16 = 6467;

impl Op {
    /// The opcode number used in the word-stream header.
    pub fn code(self) -> u16 {
        match self {
            Op::Nop => OP_NOP,
            Op::Name => OP_NAME,
            Op::MemberName => OP_MEMBER_NAME,
            Op::ExtInstImport => OP_EXT_INST_IMPORT,
            Op::MemoryModel => OP_MEMORY_MODEL,
            Op::EntryPoint => OP_ENTRY_POINT,
            Op::ExecutionMode => OP_EXECUTION_MODE,
            Op::Capability => OP_CAPABILITY,
            Op::TypeVoid => OP_TYPE_VOID,
            Op::TypeBool => OP_TYPE_BOOL,
            Op::TypeInt => OP_TYPE_INT,
            Op::TypeFloat => OP_TYPE_FLOAT,
            Op::TypeVector => OP_TYPE_VECTOR,
            Op::TypeMatrix => OP_TYPE_MATRIX,
            Op::TypeArray => OP_TYPE_ARRAY,
            Op::TypeStruct => OP_TYPE_STRUCT,
            Op::TypePointer => OP_TYPE_POINTER,
            Op::TypeFunction => OP_TYPE_FUNCTION,
            Op::Constant => OP_CONSTANT,
            Op::Function => OP_FUNCTION,
            Op::FunctionEnd => OP_FUNCTION_END,
            Op::Variable => OP_VARIABLE,
            Op::Load => OP_LOAD,
            Op::Store => OP_STORE,
            Op::AccessChain => OP_ACCESS_CHAIN,
            Op::Decorate => OP_DECORATE,
            Op::MemberDecorate => OP_MEMBER_DECORATE,
            Op::Select => OP_SELECT,
            Op::INotEqual => OP_I_NOT_EQUAL,
            Op::Label => OP_LABEL,
            Op::Return => OP_RETURN,
            Op::DecorateString => OP_DECORATE_STRING,
            Op::MemberDecorateString => OP_MEMBER_DECORATE_STRING,
            Op::ShaderMarker => OP_SHADER_MARKER,
            Op::ShaderMarkerEnd => OP_SHADER_MARKER_END,
            Op::CompositionMarker => OP_COMPOSITION_MARKER,
            Op::CompositionMarkerEnd => OP_COMPOSITION_MARKER_END,
            Op::Raw(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            OP_NOP => Op::Nop,
            OP_NAME => Op::Name,
            OP_MEMBER_NAME => Op::MemberName,
            OP_EXT_INST_IMPORT => Op::ExtInstImport,
            OP_MEMORY_MODEL => Op::MemoryModel,
            OP_ENTRY_POINT => Op::EntryPoint,
            OP_EXECUTION_MODE => Op::ExecutionMode,
            OP_CAPABILITY => Op::Capability,
            OP_TYPE_VOID => Op::TypeVoid,
            OP_TYPE_BOOL => Op::TypeBool,
            OP_TYPE_INT => Op::TypeInt,
            OP_TYPE_FLOAT => Op::TypeFloat,
            OP_TYPE_VECTOR => Op::TypeVector,
            OP_TYPE_MATRIX => Op::TypeMatrix,
            OP_TYPE_ARRAY => Op::TypeArray,
            OP_TYPE_STRUCT => Op::TypeStruct,
            OP_TYPE_POINTER => Op::TypePointer,
            OP_TYPE_FUNCTION => Op::TypeFunction,
            OP_CONSTANT => Op::Constant,
            OP_FUNCTION => Op::Function,
            OP_FUNCTION_END => Op::FunctionEnd,
            OP_VARIABLE => Op::Variable,
            OP_LOAD => Op::Load,
            OP_STORE => Op::Store,
            OP_ACCESS_CHAIN => Op::AccessChain,
            OP_DECORATE => Op::Decorate,
            OP_MEMBER_DECORATE => Op::MemberDecorate,
            OP_SELECT => Op::Select,
            OP_I_NOT_EQUAL => Op::INotEqual,
            OP_LABEL => Op::Label,
            OP_RETURN => Op::Return,
            OP_DECORATE_STRING => Op::DecorateString,
            OP_MEMBER_DECORATE_STRING => Op::MemberDecorateString,
            OP_SHADER_MARKER => Op::ShaderMarker,
            OP_SHADER_MARKER_END => Op::ShaderMarkerEnd,
            OP_COMPOSITION_MARKER => Op::CompositionMarker,
            OP_COMPOSITION_MARKER_END => Op::CompositionMarkerEnd,
            other => Op::Raw(other),
        }
    }

    /// Linker-private opcodes that must not reach serialized output.
    pub fn is_marker(self) -> bool {
        matches!(
            self,
            Op::ShaderMarker | Op::ShaderMarkerEnd | Op::CompositionMarker | Op::CompositionMarkerEnd
        )
    }

    /// Type-declaring opcodes.
    pub fn is_type_decl(self) -> bool {
        matches!(
            self,
            Op::TypeVoid
                | Op::TypeBool
                | Op::TypeInt
                | Op::TypeFloat
                | Op::TypeVector
                | Op::TypeMatrix
                | Op::TypeArray
                | Op::TypeStruct
                | Op::TypePointer
                | Op::TypeFunction
        )
    }

    /// Debug/annotation opcodes whose first operand is the target id.
    pub fn is_annotation(self) -> bool {
        matches!(
            self,
            Op::Name
                | Op::MemberName
                | Op::Decorate
                | Op::MemberDecorate
                | Op::DecorateString
                | Op::MemberDecorateString
        )
    }
}

/// Decorations the linker reads or writes.
///
/// `LINK`, `LOGICAL_GROUP` and `COLOR` are linker-private metadata carried on
/// fragment declarations; they are consumed into the reflection description
/// and stripped before serialization.
pub mod decoration {
    pub const BLOCK: u32 = 2;
    pub const ROW_MAJOR: u32 = 4;
    pub const COL_MAJOR: u32 = 5;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const BUILTIN: u32 = 11;
    pub const LOCATION: u32 = 30;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
    pub const LINK: u32 = 6100;
    pub const LOGICAL_GROUP: u32 = 6101;
    pub const COLOR: u32 = 6102;
}

/// Capability enumerants.
pub mod capability {
    pub const SHADER: u32 = 1;
}

/// Memory model enumerants.
pub mod memory_model {
    pub const LOGICAL: u32 = 0;
    pub const GLSL450: u32 = 1;
}

/// Execution model enumerants for entry points.
pub mod execution_model {
    pub const VERTEX: u32 = 0;
    pub const FRAGMENT: u32 = 4;
}

/// Encode an instruction header word: word count in the high half, opcode in
/// the low half.
pub fn encode_header(op: Op, word_count: u16) -> u32 {
    ((word_count as u32) << 16) | (op.code() as u32)
}
