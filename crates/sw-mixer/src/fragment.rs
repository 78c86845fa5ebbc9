//! Fragment construction
//!
//! `FragmentBuilder` produces lowered fragments the way the excluded
//! frontend would: declarations in the fragment's own context, code in its
//! instruction stream, ids local to the fragment. Loader implementations and
//! tests use it to fabricate inputs for the merge pipeline.

use std::collections::HashMap;

use sw_ir::op::decoration;
use sw_ir::{
    Instruction, Op, Operand, ScalarKind, StorageClass, StructMember, SymbolType, VariableFlags,
};

use crate::source::Fragment;

/// Builds one lowered shader fragment.
pub struct FragmentBuilder {
    fragment: Fragment,
    /// Pointee type per pointer-valued id, for chains and loads.
    pointees: HashMap<u32, SymbolType>,
    /// Declared struct type id per uniform-block variable.
    block_structs: HashMap<u32, u32>,
}

impl FragmentBuilder {
    pub fn new() -> Self {
        Self {
            fragment: Fragment::default(),
            pointees: HashMap::new(),
            block_structs: HashMap::new(),
        }
    }

    pub fn finish(self) -> Fragment {
        self.fragment
    }

    fn declare_variable(&mut self, name: &str, pointee: SymbolType, storage: StorageClass) -> u32 {
        let ptr = pointee.clone().pointer_to(storage);
        let ptr_id = self.fragment.context.get_or_register(&ptr);
        let var = self.fragment.context.alloc_id();
        self.fragment.code.push(
            Instruction::with_result(Op::Variable, ptr_id, var)
                .operand(Operand::Enum(storage.code()))
                .operand(Operand::Literal(VariableFlags::empty().bits())),
        );
        self.fragment.context.emit_name(var, name);
        self.pointees.insert(var, pointee);
        var
    }

    /// Declare a named uniform block (cbuffer) variable.
    pub fn uniform_block(&mut self, name: &str, members: Vec<StructMember>) -> u32 {
        let symbol = SymbolType::UniformBuffer { name: name.into(), members };
        let struct_id = self.fragment.context.declare_uniform_buffer(&symbol);
        let var = self.declare_variable(name, symbol, StorageClass::Uniform);
        self.block_structs.insert(var, struct_id);
        var
    }

    /// Declare a loose top-level uniform, outside any explicit block.
    pub fn uniform(&mut self, name: &str, ty: SymbolType) -> u32 {
        self.declare_variable(name, ty, StorageClass::Uniform)
    }

    /// Declare a composition slot accepting one mixin of the given shader.
    pub fn composition_slot(&mut self, name: &str, shader: &str) -> u32 {
        self.declare_variable(name, SymbolType::Shader { name: shader.into() }, StorageClass::Uniform)
    }

    /// Declare an array-valued composition slot.
    pub fn composition_slot_array(&mut self, name: &str, shader: &str, len: u32) -> u32 {
        let ty = SymbolType::Array {
            base: Box::new(SymbolType::Shader { name: shader.into() }),
            len,
        };
        self.declare_variable(name, ty, StorageClass::Uniform)
    }

    /// Mark a declared variable as stage scope.
    pub fn mark_stage(&mut self, var: u32) {
        for index in 0..self.fragment.code.len() {
            let instruction = self.fragment.code.get_mut(index);
            if instruction.op == Op::Variable && instruction.result_id == Some(var) {
                instruction.operands[1] = Operand::Literal(VariableFlags::STAGE.bits());
            }
        }
    }

    /// Attach an explicit link key to a variable.
    pub fn link_key(&mut self, var: u32, key: &str) {
        self.fragment.context.decorate_string(var, decoration::LINK, key);
    }

    pub fn logical_group(&mut self, var: u32, group: &str) {
        self.fragment.context.decorate_string(var, decoration::LOGICAL_GROUP, group);
    }

    pub fn color(&mut self, var: u32) {
        self.fragment.context.decorate(var, decoration::COLOR, &[]);
    }

    /// Attach an explicit link key to a uniform-block member.
    pub fn member_link_key(&mut self, block_var: u32, member: u32, key: &str) {
        let struct_id = self.block_structs[&block_var];
        self.fragment.context.member_decorate_string(struct_id, member, decoration::LINK, key);
    }

    pub fn member_color(&mut self, block_var: u32, member: u32) {
        let struct_id = self.block_structs[&block_var];
        self.fragment.context.member_decorate(struct_id, member, decoration::COLOR, &[]);
    }

    /// Open a void function body.
    pub fn begin_function(&mut self, name: &str) -> u32 {
        let void_id = self.fragment.context.get_or_register(&SymbolType::Void);
        let fn_type = self.fragment.context.alloc_id();
        self.fragment.context.buffer_mut().push(
            Instruction::with_id(Op::TypeFunction, fn_type).operand(Operand::TypeId(void_id)),
        );
        let fn_id = self.fragment.context.alloc_id();
        self.fragment.code.push(
            Instruction::with_result(Op::Function, void_id, fn_id)
                .operand(Operand::Literal(0))
                .operand(Operand::TypeId(fn_type)),
        );
        let label = self.fragment.context.alloc_id();
        self.fragment.code.push(Instruction::with_id(Op::Label, label));
        self.fragment.context.emit_name(fn_id, name);
        fn_id
    }

    pub fn end_function(&mut self) {
        self.fragment.code.push(Instruction::new(Op::Return));
        self.fragment.code.push(Instruction::new(Op::FunctionEnd));
    }

    /// Index into a uniform-block member; returns the pointer id.
    pub fn access_chain(&mut self, base: u32, member: u32) -> u32 {
        let member_ty = match self.pointees.get(&base) {
            Some(SymbolType::UniformBuffer { members, .. }) => members[member as usize].ty.clone(),
            other => panic!("access_chain base is not a uniform block: {other:?}"),
        };
        let ptr_id = self
            .fragment
            .context
            .get_or_register(&member_ty.clone().pointer_to(StorageClass::Uniform));
        let index_id = self.fragment.context.compile_constant(ScalarKind::Int, member);
        let chain = self.fragment.context.alloc_id();
        self.fragment.code.push(
            Instruction::with_result(Op::AccessChain, ptr_id, chain)
                .operand(Operand::Id(base))
                .operand(Operand::Id(index_id)),
        );
        self.pointees.insert(chain, member_ty);
        chain
    }

    /// Load through a pointer id whose pointee the builder tracked.
    pub fn load(&mut self, pointer: u32) -> u32 {
        let ty = self.pointees[&pointer].clone();
        let type_id = self.fragment.context.get_or_register(&ty);
        let result = self.fragment.context.alloc_id();
        self.fragment.code.push(
            Instruction::with_result(Op::Load, type_id, result).operand(Operand::Id(pointer)),
        );
        result
    }

    pub fn store(&mut self, pointer: u32, value: u32) {
        self.fragment.code.push(
            Instruction::new(Op::Store)
                .operand(Operand::Id(pointer))
                .operand(Operand::Id(value)),
        );
    }

    /// Intern a constant in the fragment's context.
    pub fn constant(&mut self, kind: ScalarKind, bits: u32) -> u32 {
        self.fragment.context.compile_constant(kind, bits)
    }
}

impl Default for FragmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_block_shape() {
        let mut builder = FragmentBuilder::new();
        let block = builder.uniform_block(
            "Params",
            vec![StructMember::new("intensity", SymbolType::scalar(ScalarKind::Float))],
        );
        builder.begin_function("main");
        let ptr = builder.access_chain(block, 0);
        let value = builder.load(ptr);
        builder.end_function();
        let fragment = builder.finish();

        assert_eq!(fragment.context.name_of(block), Some("Params"));
        let loads: Vec<_> = fragment.code.iter().filter(|i| i.op == Op::Load).collect();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].result_id, Some(value));
    }

    #[test]
    fn test_variable_carries_flags_word() {
        let mut builder = FragmentBuilder::new();
        let var = builder.uniform("Color", SymbolType::vector(ScalarKind::Float, 3));
        builder.mark_stage(var);
        let fragment = builder.finish();
        let decl = fragment.code.iter().find(|i| i.op == Op::Variable).unwrap();
        assert_eq!(decl.variable_flags(), VariableFlags::STAGE.bits());
    }
}
