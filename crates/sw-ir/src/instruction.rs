//! Instruction records
//!
//! An instruction is an opcode plus typed operand words. Identity is
//! positional inside a buffer, but values are addressed by result id; every
//! id reference is a plain integer handle into the shared id space and must
//! be remapped explicitly when declarations move.

use crate::op::{encode_header, Op};

/// A single typed operand word (or word run, for strings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Reference to another instruction's result id.
    Id(u32),
    /// Reference to a type id.
    TypeId(u32),
    /// A literal integer word.
    Literal(u32),
    /// A NUL-terminated, word-padded literal string.
    LiteralString(String),
    /// An enumerant word (storage class, decoration, capability, ...).
    Enum(u32),
}

impl Operand {
    fn word_count(&self) -> u16 {
        match self {
            Operand::LiteralString(s) => (s.len() as u16 / 4) + 1,
            _ => 1,
        }
    }
}

/// One IR instruction: opcode, optional result type and result id, operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub result_type: Option<u32>,
    pub result_id: Option<u32>,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(op: Op) -> Self {
        Self { op, result_type: None, result_id: None, operands: Vec::new() }
    }

    pub fn with_result(op: Op, result_type: u32, result_id: u32) -> Self {
        Self { op, result_type: Some(result_type), result_id: Some(result_id), operands: Vec::new() }
    }

    /// Result id without a result type (labels, type declarations).
    pub fn with_id(op: Op, result_id: u32) -> Self {
        Self { op, result_type: None, result_id: Some(result_id), operands: Vec::new() }
    }

    pub fn push(&mut self, operand: Operand) -> &mut Self {
        self.operands.push(operand);
        self
    }

    pub fn operand(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    /// First operand as an id, if it is one. For annotation instructions this
    /// is the decoration/name target.
    pub fn target(&self) -> Option<u32> {
        match self.operands.first() {
            Some(Operand::Id(id)) | Some(Operand::TypeId(id)) => Some(*id),
            _ => None,
        }
    }

    /// Total encoded size in words, including the header.
    pub fn word_count(&self) -> u16 {
        let mut count = 1;
        if self.result_type.is_some() {
            count += 1;
        }
        if self.result_id.is_some() {
            count += 1;
        }
        for operand in &self.operands {
            count += operand.word_count();
        }
        count
    }

    /// Append the encoded words to `out`.
    pub fn encode(&self, out: &mut Vec<u32>) {
        out.push(encode_header(self.op, self.word_count()));
        if let Some(result_type) = self.result_type {
            out.push(result_type);
        }
        if let Some(result_id) = self.result_id {
            out.push(result_id);
        }
        for operand in &self.operands {
            match operand {
                Operand::Id(w) | Operand::TypeId(w) | Operand::Literal(w) | Operand::Enum(w) => out.push(*w),
                Operand::LiteralString(s) => encode_string(s, out),
            }
        }
    }

    /// Storage class enumerant of a variable declaration.
    pub fn variable_storage(&self) -> Option<u32> {
        if self.op != Op::Variable {
            return None;
        }
        match self.operands.first() {
            Some(Operand::Enum(storage)) => Some(*storage),
            _ => None,
        }
    }

    /// Linker-private flags word trailing a variable declaration.
    pub fn variable_flags(&self) -> u32 {
        if self.op != Op::Variable {
            return 0;
        }
        match self.operands.get(1) {
            Some(Operand::Literal(flags)) => *flags,
            _ => 0,
        }
    }

    /// Visit every id-kind word (result id, result type, id operands).
    /// Literal and enum words are never ids and are left untouched.
    pub fn for_each_id_mut(&mut self, mut f: impl FnMut(&mut u32)) {
        if let Some(result_type) = self.result_type.as_mut() {
            f(result_type);
        }
        if let Some(result_id) = self.result_id.as_mut() {
            f(result_id);
        }
        for operand in self.operands.iter_mut() {
            if let Operand::Id(w) | Operand::TypeId(w) = operand {
                f(w);
            }
        }
    }
}

/// Pack a string as NUL-terminated little-endian words.
fn encode_string(s: &str, out: &mut Vec<u32>) {
    let bytes = s.as_bytes();
    let mut word = 0u32;
    let mut shift = 0;
    for &b in bytes {
        word |= (b as u32) << shift;
        shift += 8;
        if shift == 32 {
            out.push(word);
            word = 0;
            shift = 0;
        }
    }
    // The terminating NUL always fits: a full word flushes above.
    out.push(word);
}
