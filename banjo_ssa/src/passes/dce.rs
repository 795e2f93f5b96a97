//! Dead code elimination
//!
//! Removes instructions whose destination register is never used, as long
//! as the opcode has no side effects. Iterates to a fixpoint so chains of
//! dead definitions disappear in one run.

use crate::{Function, Module, OperandKind};
use hashbrown::HashSet;

pub struct DcePass;

impl DcePass {
    pub fn run(&self, module: &mut Module) {
        for func in &mut module.functions {
            Self::run_on_function(func);
        }
    }

    fn run_on_function(func: &mut Function) {
        loop {
            let mut used: HashSet<u32> = HashSet::new();

            for block in &func.blocks {
                for instr in &block.instrs {
                    for operand in &instr.operands {
                        match &operand.kind {
                            OperandKind::Register(reg) => {
                                used.insert(*reg);
                            }
                            OperandKind::BranchTarget(target) => {
                                for arg in &target.args {
                                    if let OperandKind::Register(reg) = arg.kind {
                                        used.insert(reg);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            let mut removed = false;
            for block in &mut func.blocks {
                let before = block.instrs.len();
                block.instrs.retain(|instr| {
                    match instr.dest {
                        Some(dest) => {
                            instr.opcode.has_side_effects() || used.contains(&dest)
                        }
                        None => true,
                    }
                });
                removed |= block.instrs.len() != before;
            }

            if !removed {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallingConv, FunctionType, Instruction, Opcode, Operand, Primitive, Type};

    #[test]
    fn test_removes_dead_chain() {
        let ty = FunctionType::new(Vec::new(), Type::VOID, CallingConv::X86_64SysV);
        let mut func = Function::new("f", ty);
        let entry = func.create_block("entry");

        let i32_ty = Type::primitive(Primitive::I32);
        let a = func.next_virtual_reg();
        let b = func.next_virtual_reg();

        let block = func.block_mut(entry);
        block.append(Instruction::new(
            Opcode::Add,
            Some(a),
            vec![
                Operand::int_immediate(1, i32_ty.clone()),
                Operand::int_immediate(2, i32_ty.clone()),
            ],
        ));
        // b uses a, but b itself is dead, so both go away.
        block.append(Instruction::new(
            Opcode::Add,
            Some(b),
            vec![
                Operand::register(a, i32_ty.clone()),
                Operand::int_immediate(3, i32_ty),
            ],
        ));
        block.append(Instruction::new(Opcode::Ret, None, Vec::new()));

        let mut module = Module::new();
        module.add_function(func);
        DcePass.run(&mut module);

        assert_eq!(module.functions[0].blocks[0].instrs.len(), 1);
    }
}
