//! Machine basic blocks

use crate::instr::Instruction;
use crate::register::PhysicalReg;

/// Stable index of a machine basic block within its function
pub type BlockIndex = usize;

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub label: String,
    pub instrs: Vec<Instruction>,
    /// Physical registers carrying this block's parameters after lowering
    pub params: Vec<PhysicalReg>,
    pub predecessors: Vec<BlockIndex>,
    pub successors: Vec<BlockIndex>,
    pub domtree_parent: Option<BlockIndex>,
    pub domtree_children: Vec<BlockIndex>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), ..Default::default() }
    }

    pub fn append(&mut self, instr: Instruction) {
        self.instrs.push(instr);
    }

    pub fn insert(&mut self, index: usize, instr: Instruction) {
        self.instrs.insert(index, instr);
    }

    pub fn remove(&mut self, index: usize) -> Instruction {
        self.instrs.remove(index)
    }
}
