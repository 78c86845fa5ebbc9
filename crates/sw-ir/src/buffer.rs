//! Ordered, randomly-insertable instruction sequence
//!
//! The buffer is an arena of instruction records. Tombstoning (`set_nop`)
//! never shifts indices; insertion does, and callers holding cached scope
//! boundaries are responsible for re-deriving them through their own shift
//! notifications (see the mixin tree in sw-mixer).

use std::collections::HashMap;

use crate::instruction::Instruction;
use crate::op::Op;

/// Linear instruction buffer.
#[derive(Debug, Default, Clone)]
pub struct InstructionBuffer {
    instructions: Vec<Instruction>,
}

impl InstructionBuffer {
    pub fn new() -> Self {
        Self { instructions: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Insert at `index`, shifting everything at or after it.
    pub fn insert(&mut self, index: usize, instruction: Instruction) {
        self.instructions.insert(index, instruction);
    }

    /// Replace the instruction at `index` in place.
    pub fn replace(&mut self, index: usize, instruction: Instruction) {
        self.instructions[index] = instruction;
    }

    /// Tombstone the instruction at `index` without shifting indices.
    pub fn set_nop(&mut self, index: usize) {
        self.instructions[index] = Instruction::new(Op::Nop);
    }

    pub fn get(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Instruction {
        &mut self.instructions[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.instructions.iter_mut()
    }

    /// Apply an id remap table to every id-kind word in the buffer.
    pub fn remap_ids(&mut self, remap: &HashMap<u32, u32>) {
        if remap.is_empty() {
            return;
        }
        for instruction in self.instructions.iter_mut() {
            instruction.for_each_id_mut(|id| {
                if let Some(new_id) = remap.get(id) {
                    *id = *new_id;
                }
            });
        }
    }

    /// Drop instructions not matching the predicate. Shifts indices; only
    /// valid once no pass holds positional bookkeeping anymore.
    pub fn retain(&mut self, f: impl FnMut(&Instruction) -> bool) {
        self.instructions.retain(f);
    }

    /// Append the encoded words of every instruction to `out`.
    pub fn encode(&self, out: &mut Vec<u32>) {
        for instruction in &self.instructions {
            instruction.encode(out);
        }
    }
}

impl std::ops::Index<usize> for InstructionBuffer {
    type Output = Instruction;

    fn index(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }
}

impl std::ops::IndexMut<usize> for InstructionBuffer {
    fn index_mut(&mut self, index: usize) -> &mut Instruction {
        &mut self.instructions[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Operand;

    #[test]
    fn test_set_nop_keeps_indices() {
        let mut buffer = InstructionBuffer::new();
        buffer.push(Instruction::with_id(Op::Label, 1));
        buffer.push(Instruction::with_id(Op::Label, 2));
        buffer.set_nop(0);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer[0].op, Op::Nop);
        assert_eq!(buffer[1].result_id, Some(2));
    }

    #[test]
    fn test_remap_ids() {
        let mut buffer = InstructionBuffer::new();
        let mut store = Instruction::new(Op::Store);
        store.push(Operand::Id(5));
        store.push(Operand::Id(6));
        buffer.push(store);

        let mut remap = HashMap::new();
        remap.insert(5, 50);
        buffer.remap_ids(&remap);
        assert_eq!(buffer[0].operands[0], Operand::Id(50));
        assert_eq!(buffer[0].operands[1], Operand::Id(6));
    }

    #[test]
    fn test_insert_shifts() {
        let mut buffer = InstructionBuffer::new();
        buffer.push(Instruction::with_id(Op::Label, 1));
        buffer.push(Instruction::with_id(Op::Label, 2));
        buffer.insert(1, Instruction::new(Op::Return));
        assert_eq!(buffer[1].op, Op::Return);
        assert_eq!(buffer[2].result_id, Some(2));
    }
}
