//! SSA functions and basic blocks

use crate::instr::Instruction;
use crate::types::Type;
use serde::{Deserialize, Serialize};

/// An SSA virtual register number, unique within its function
pub type VirtualRegister = u32;

/// Stable index of a basic block within its function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Calling conventions understood by the backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallingConv {
    None,
    X86_64SysV,
    X86_64Ms,
    AArch64Aapcs,
    Wasm,
}

/// A function signature at the SSA level
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub return_type: Type,
    pub calling_conv: CallingConv,
    pub variadic: bool,
    pub first_variadic_index: u32,
}

impl FunctionType {
    pub fn new(params: Vec<Type>, return_type: Type, calling_conv: CallingConv) -> Self {
        Self {
            params,
            return_type,
            calling_conv,
            variadic: false,
            first_variadic_index: 0,
        }
    }
}

/// A basic block: label, typed parameters, instruction list
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub label: String,
    pub param_regs: Vec<VirtualRegister>,
    pub param_types: Vec<Type>,
    pub instrs: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), ..Default::default() }
    }

    pub fn append(&mut self, instr: Instruction) {
        self.instrs.push(instr);
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instrs.last().filter(|i| i.is_branching() || i.opcode == crate::Opcode::Ret)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }
}

/// An SSA function: signature plus its block list
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ty: FunctionType,
    pub global: bool,
    pub blocks: Vec<BasicBlock>,
    next_vreg: VirtualRegister,
}

impl Function {
    pub fn new(name: impl Into<String>, ty: FunctionType) -> Self {
        Self {
            name: name.into(),
            ty,
            global: false,
            blocks: Vec::new(),
            next_vreg: 0,
        }
    }

    pub fn create_block(&mut self, label: impl Into<String>) -> BlockId {
        self.blocks.push(BasicBlock::new(label));
        BlockId(self.blocks.len() as u32 - 1)
    }

    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[0]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn next_virtual_reg(&mut self) -> VirtualRegister {
        let reg = self.next_vreg;
        self.next_vreg += 1;
        reg
    }

    pub fn num_virtual_regs(&self) -> u32 {
        self.next_vreg
    }

    pub fn find_block(&self, label: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.label == label)
            .map(|index| BlockId(index as u32))
    }
}

/// An external function declaration
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub ty: FunctionType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Opcode, Operand, Primitive};

    #[test]
    fn test_block_termination() {
        let ty = FunctionType::new(Vec::new(), Type::VOID, CallingConv::X86_64SysV);
        let mut func = Function::new("f", ty);
        let entry = func.create_block("entry");
        assert!(!func.block(entry).is_terminated());

        func.block_mut(entry)
            .append(Instruction::new(Opcode::Ret, None, Vec::new()));
        assert!(func.block(entry).is_terminated());
    }

    #[test]
    fn test_vreg_allocation_is_unique() {
        let ty = FunctionType::new(
            vec![Type::primitive(Primitive::I32)],
            Type::VOID,
            CallingConv::X86_64SysV,
        );
        let mut func = Function::new("f", ty);
        let a = func.next_virtual_reg();
        let b = func.next_virtual_reg();
        assert_ne!(a, b);
        let _ = Operand::register(a, Type::primitive(Primitive::I32));
    }
}
