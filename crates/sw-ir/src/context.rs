//! Symbol/type context
//!
//! Bidirectional maps between structural types and type ids, name tables,
//! interned constants, and the monotonically increasing id allocator. The
//! context owns its own bookkeeping buffer (type declarations, constants,
//! names, decorations) which is concatenated ahead of the code buffer at
//! serialization time and participates in global id remaps.
//!
//! The context is an explicit value passed by reference through each pass,
//! never a process-wide singleton, so concurrent compilation units stay
//! isolated.

use std::collections::HashMap;

use tracing::trace;

use crate::buffer::InstructionBuffer;
use crate::instruction::{Instruction, Operand};
use crate::op::{decoration, Op};
use crate::types::{ScalarKind, StorageClass, SymbolType};

/// Shared symbol/type context for one compilation unit.
#[derive(Debug)]
pub struct SpirvContext {
    bound: u32,
    types: HashMap<SymbolType, u32>,
    reverse_types: HashMap<u32, SymbolType>,
    constants: HashMap<(ScalarKind, u32), u32>,
    constant_values: HashMap<u32, (ScalarKind, u32)>,
    names: HashMap<u32, String>,
    buffer: InstructionBuffer,
}

impl Default for SpirvContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SpirvContext {
    /// Ids are 1-based; the allocator starts past the reserved id 0.
    pub fn new() -> Self {
        Self {
            bound: 1,
            types: HashMap::new(),
            reverse_types: HashMap::new(),
            constants: HashMap::new(),
            constant_values: HashMap::new(),
            names: HashMap::new(),
            buffer: InstructionBuffer::new(),
        }
    }

    /// Next free id. This is the sole id source; ids are never reused.
    pub fn bound(&self) -> u32 {
        self.bound
    }

    pub fn alloc_id(&mut self) -> u32 {
        let id = self.bound;
        self.bound += 1;
        id
    }

    /// Raise the bound after importing ids allocated elsewhere.
    pub fn ensure_bound(&mut self, min: u32) {
        self.bound = self.bound.max(min);
    }

    /// Bookkeeping buffer holding type/constant/name/decoration instructions.
    pub fn buffer(&self) -> &InstructionBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut InstructionBuffer {
        &mut self.buffer
    }

    /// Intern a structural type, emitting its declaration on first use.
    /// Idempotent: structurally equal types share one id.
    pub fn get_or_register(&mut self, ty: &SymbolType) -> u32 {
        if let Some(&id) = self.types.get(ty) {
            return id;
        }

        let id = match ty {
            SymbolType::Void => {
                let id = self.alloc_id();
                self.buffer.push(Instruction::with_id(Op::TypeVoid, id));
                id
            }
            SymbolType::Scalar(kind) => {
                let id = self.alloc_id();
                let instruction = match kind {
                    ScalarKind::Bool => Instruction::with_id(Op::TypeBool, id),
                    ScalarKind::Int => Instruction::with_id(Op::TypeInt, id)
                        .operand(Operand::Literal(32))
                        .operand(Operand::Literal(1)),
                    ScalarKind::UInt => Instruction::with_id(Op::TypeInt, id)
                        .operand(Operand::Literal(32))
                        .operand(Operand::Literal(0)),
                    ScalarKind::Float => {
                        Instruction::with_id(Op::TypeFloat, id).operand(Operand::Literal(32))
                    }
                    ScalarKind::Double => {
                        Instruction::with_id(Op::TypeFloat, id).operand(Operand::Literal(64))
                    }
                };
                self.buffer.push(instruction);
                id
            }
            SymbolType::Vector { base, size } => {
                let base_id = self.get_or_register(&SymbolType::Scalar(*base));
                let id = self.alloc_id();
                self.buffer.push(
                    Instruction::with_id(Op::TypeVector, id)
                        .operand(Operand::TypeId(base_id))
                        .operand(Operand::Literal(*size)),
                );
                id
            }
            SymbolType::Matrix { base, rows, cols } => {
                let column = SymbolType::Vector { base: *base, size: *rows };
                let column_id = self.get_or_register(&column);
                let id = self.alloc_id();
                self.buffer.push(
                    Instruction::with_id(Op::TypeMatrix, id)
                        .operand(Operand::TypeId(column_id))
                        .operand(Operand::Literal(*cols)),
                );
                id
            }
            SymbolType::Array { base, len } => {
                let base_id = self.get_or_register(base);
                let len_id = self.compile_constant(ScalarKind::UInt, *len);
                let id = self.alloc_id();
                self.buffer.push(
                    Instruction::with_id(Op::TypeArray, id)
                        .operand(Operand::TypeId(base_id))
                        .operand(Operand::Id(len_id)),
                );
                id
            }
            SymbolType::Struct { name, members } | SymbolType::UniformBuffer { name, members } => {
                let member_ids: Vec<u32> =
                    members.iter().map(|m| self.get_or_register(&m.ty)).collect();
                let id = self.alloc_id();
                let mut instruction = Instruction::with_id(Op::TypeStruct, id);
                for member_id in member_ids {
                    instruction.push(Operand::TypeId(member_id));
                }
                self.buffer.push(instruction);
                self.emit_name(id, name.clone());
                for (index, member) in members.iter().enumerate() {
                    self.buffer.push(
                        Instruction::new(Op::MemberName)
                            .operand(Operand::Id(id))
                            .operand(Operand::Literal(index as u32))
                            .operand(Operand::LiteralString(member.name.clone())),
                    );
                }
                if matches!(ty, SymbolType::UniformBuffer { .. }) {
                    self.decorate(id, decoration::BLOCK, &[]);
                }
                id
            }
            SymbolType::Pointer { base, storage } => {
                // Pointers to shader symbols carry no declaration; they exist
                // only until composition slots are resolved.
                if matches!(**base, SymbolType::Shader { .. }) {
                    self.alloc_id()
                } else {
                    let base_id = self.get_or_register(base);
                    let id = self.alloc_id();
                    self.buffer.push(
                        Instruction::with_id(Op::TypePointer, id)
                            .operand(Operand::Enum(storage.code()))
                            .operand(Operand::TypeId(base_id)),
                    );
                    id
                }
            }
            SymbolType::Shader { .. } => self.alloc_id(),
        };

        trace!(id, ?ty, "registered type");
        self.types.insert(ty.clone(), id);
        self.reverse_types.insert(id, ty.clone());
        id
    }

    /// Register a uniform-buffer symbol as a top-level binding target.
    pub fn declare_uniform_buffer(&mut self, symbol: &SymbolType) -> u32 {
        debug_assert!(matches!(symbol, SymbolType::UniformBuffer { .. }));
        self.get_or_register(symbol)
    }

    /// Look up the id of an already-registered type.
    pub fn type_id(&self, ty: &SymbolType) -> Option<u32> {
        self.types.get(ty).copied()
    }

    /// Resolve a registered id back to its structural type.
    pub fn type_of(&self, id: u32) -> Option<&SymbolType> {
        self.reverse_types.get(&id)
    }

    /// Replace the structural type registered under `id`, keeping the id.
    /// Used by legalization to mirror in-place word patches of struct
    /// declarations into the type tables.
    pub fn replace_type(&mut self, id: u32, new_ty: SymbolType) {
        if let Some(old) = self.reverse_types.insert(id, new_ty.clone()) {
            self.types.remove(&old);
        }
        self.types.insert(new_ty, id);
    }

    /// Unregister a type and tombstone its declaration. Callers must have
    /// rewritten every reference first.
    pub fn remove_type(&mut self, ty: &SymbolType) {
        if let Some(id) = self.types.remove(ty) {
            self.reverse_types.remove(&id);
            for index in 0..self.buffer.len() {
                let instruction = &self.buffer[index];
                if instruction.op.is_type_decl() && instruction.result_id == Some(id) {
                    self.buffer.set_nop(index);
                    break;
                }
            }
        }
    }

    /// Intern a scalar constant, emitting its declaration on first use.
    pub fn compile_constant(&mut self, kind: ScalarKind, bits: u32) -> u32 {
        if let Some(&id) = self.constants.get(&(kind, bits)) {
            return id;
        }
        let type_id = self.get_or_register(&SymbolType::Scalar(kind));
        let id = self.alloc_id();
        self.buffer.push(
            Instruction::with_result(Op::Constant, type_id, id).operand(Operand::Literal(bits)),
        );
        self.constants.insert((kind, bits), id);
        self.constant_values.insert(id, (kind, bits));
        id
    }

    /// Reverse lookup for interned constants.
    pub fn constant_value(&self, id: u32) -> Option<u32> {
        self.constant_values.get(&id).map(|&(_, bits)| bits)
    }

    pub fn constant_kind_and_value(&self, id: u32) -> Option<(ScalarKind, u32)> {
        self.constant_values.get(&id).copied()
    }

    /// Record a debug name without emitting an instruction.
    pub fn set_name(&mut self, id: u32, name: impl Into<String>) {
        self.names.insert(id, name.into());
    }

    /// Record a debug name and emit its `Name` instruction.
    pub fn emit_name(&mut self, id: u32, name: impl Into<String>) {
        let name = name.into();
        self.buffer.push(
            Instruction::new(Op::Name)
                .operand(Operand::Id(id))
                .operand(Operand::LiteralString(name.clone())),
        );
        self.names.insert(id, name);
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Every recorded debug name. Order is unspecified.
    pub fn names(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names.iter().map(|(&id, name)| (id, name.as_str()))
    }

    /// Every registered type with its id. Order is unspecified.
    pub fn registered_types(&self) -> impl Iterator<Item = (&SymbolType, u32)> {
        self.types.iter().map(|(ty, &id)| (ty, id))
    }

    pub fn decorate(&mut self, target: u32, decoration: u32, params: &[u32]) {
        let mut instruction = Instruction::new(Op::Decorate)
            .operand(Operand::Id(target))
            .operand(Operand::Enum(decoration));
        for &p in params {
            instruction.push(Operand::Literal(p));
        }
        self.buffer.push(instruction);
    }

    pub fn member_decorate(&mut self, struct_id: u32, member: u32, decoration: u32, params: &[u32]) {
        let mut instruction = Instruction::new(Op::MemberDecorate)
            .operand(Operand::Id(struct_id))
            .operand(Operand::Literal(member))
            .operand(Operand::Enum(decoration));
        for &p in params {
            instruction.push(Operand::Literal(p));
        }
        self.buffer.push(instruction);
    }

    pub fn decorate_string(&mut self, target: u32, decoration: u32, value: impl Into<String>) {
        self.buffer.push(
            Instruction::new(Op::DecorateString)
                .operand(Operand::Id(target))
                .operand(Operand::Enum(decoration))
                .operand(Operand::LiteralString(value.into())),
        );
    }

    pub fn member_decorate_string(
        &mut self,
        struct_id: u32,
        member: u32,
        decoration: u32,
        value: impl Into<String>,
    ) {
        self.buffer.push(
            Instruction::new(Op::MemberDecorateString)
                .operand(Operand::Id(struct_id))
                .operand(Operand::Literal(member))
                .operand(Operand::Enum(decoration))
                .operand(Operand::LiteralString(value.into())),
        );
    }

    /// Apply an id remap table to the bookkeeping buffer and name table.
    pub fn remap_ids(&mut self, remap: &HashMap<u32, u32>) {
        self.buffer.remap_ids(remap);
        for old in remap.keys() {
            // The canonical id keeps its own name; remapped ids disappear.
            self.names.remove(old);
        }
    }
}
