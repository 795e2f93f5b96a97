//! Machine functions, stack frames and unwind info

use crate::block::BasicBlock;
use crate::register::PhysicalReg;

/// What a stack slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSlotKind {
    /// Backing storage for an SSA alloca
    Alloca,
    /// A spilled virtual register
    Spill,
    /// Outgoing call argument area
    CallArg,
}

#[derive(Debug, Clone)]
pub struct StackSlot {
    pub size: u64,
    pub alignment: u64,
    /// Byte offset from the stack pointer after the prologue; assigned by
    /// the frame layout pass
    pub offset: i64,
    pub kind: StackSlotKind,
}

/// An ordered list of stack slots plus the finished frame size
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    pub slots: Vec<StackSlot>,
    pub size: u64,
    /// Bytes reserved below the slots for outgoing call arguments and
    /// shadow space
    pub reserved: u64,
}

impl StackFrame {
    pub fn add_slot(&mut self, size: u64, alignment: u64, kind: StackSlotKind) -> usize {
        self.slots.push(StackSlot { size, alignment, offset: 0, kind });
        self.slots.len() - 1
    }

    pub fn slot(&self, index: usize) -> &StackSlot {
        &self.slots[index]
    }

    /// Assign offsets bottom-up and round the total to 16 bytes.
    pub fn layout(&mut self) {
        let mut offset = self.reserved;
        for slot in &mut self.slots {
            offset = align_up(offset, slot.alignment);
            slot.offset = offset as i64;
            offset += slot.size;
        }
        self.size = align_up(offset, 16);
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// A pushed callee-saved register recorded for unwind tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushedReg {
    pub reg: PhysicalReg,
}

/// Prologue facts needed to build platform unwind records
#[derive(Debug, Clone, Default)]
pub struct UnwindInfo {
    pub alloca_size: u64,
    pub pushed_regs: Vec<PushedReg>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub blocks: Vec<BasicBlock>,
    pub frame: StackFrame,
    pub unwind: UnwindInfo,
    pub next_virtual_reg: u32,
    /// Register class of each virtual register, indexed by number
    pub vreg_classes: Vec<crate::RegisterClass>,
    /// Calling-convention tag understood by the owning target
    pub calling_conv: u32,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            frame: StackFrame::default(),
            unwind: UnwindInfo::default(),
            next_virtual_reg: 0,
            vreg_classes: Vec::new(),
            calling_conv: 0,
        }
    }

    pub fn create_block(&mut self, label: impl Into<String>) -> usize {
        self.blocks.push(BasicBlock::new(label));
        self.blocks.len() - 1
    }

    pub fn alloc_virtual_reg(&mut self, class: crate::RegisterClass) -> u32 {
        let reg = self.next_virtual_reg;
        self.next_virtual_reg += 1;
        self.vreg_classes.push(class);
        reg
    }

    pub fn find_block(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Renumber every instruction sequentially across the whole function.
    pub fn renumber(&mut self) {
        let mut number = 0;
        for block in &mut self.blocks {
            for instr in &mut block.instrs {
                instr.number = number;
                number += 2;
            }
        }
    }

    /// Recompute predecessor and successor edges from branch labels.
    pub fn recompute_cfg(&mut self, is_branch: impl Fn(&crate::Instruction) -> bool) {
        let labels: Vec<String> = self.blocks.iter().map(|b| b.label.clone()).collect();

        for block in &mut self.blocks {
            block.predecessors.clear();
            block.successors.clear();
        }

        let mut edges = Vec::new();
        for (index, block) in self.blocks.iter().enumerate() {
            let mut fallthrough = true;
            for instr in &block.instrs {
                if !is_branch(instr) {
                    continue;
                }

                for operand in &instr.operands {
                    if let Some(label) = operand.as_label() {
                        if let Some(target) = labels.iter().position(|l| l == label) {
                            edges.push((index, target));
                        }
                    }
                }
                fallthrough = false;
            }

            if fallthrough && index + 1 < self.blocks.len() {
                edges.push((index, index + 1));
            }
        }

        for (from, to) in edges {
            if !self.blocks[from].successors.contains(&to) {
                self.blocks[from].successors.push(to);
            }
            if !self.blocks[to].predecessors.contains(&from) {
                self.blocks[to].predecessors.push(from);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_layout_is_16_byte_aligned() {
        let mut frame = StackFrame::default();
        frame.add_slot(4, 4, StackSlotKind::Alloca);
        frame.add_slot(8, 8, StackSlotKind::Alloca);
        frame.add_slot(1, 1, StackSlotKind::Spill);
        frame.layout();

        assert_eq!(frame.slots[0].offset, 0);
        assert_eq!(frame.slots[1].offset, 8);
        assert_eq!(frame.slots[2].offset, 16);
        assert_eq!(frame.size % 16, 0);
    }
}
