//! Branch simplification
//!
//! Conditional jumps whose comparison operands are both immediates fold
//! into unconditional jumps to the taken edge.

use crate::{Comparison, Function, Instruction, Module, Opcode, Operand};

pub struct BranchSimplifyPass;

impl BranchSimplifyPass {
    pub fn run(&self, module: &mut Module) {
        for func in &mut module.functions {
            Self::run_on_function(func);
        }
    }

    fn run_on_function(func: &mut Function) {
        for block in &mut func.blocks {
            let Some(last) = block.instrs.last() else { continue };
            if last.opcode != Opcode::Cjmp {
                continue;
            }

            let (Some(lhs), Some(cmp), Some(rhs)) = (
                last.operands[0].as_int_immediate(),
                last.operands[1].as_comparison(),
                last.operands[2].as_int_immediate(),
            ) else {
                continue;
            };

            let taken = match cmp {
                Comparison::Eq => lhs == rhs,
                Comparison::Ne => lhs != rhs,
                Comparison::Slt | Comparison::Ult => lhs < rhs,
                Comparison::Sle | Comparison::Ule => lhs <= rhs,
                Comparison::Sgt | Comparison::Ugt => lhs > rhs,
                Comparison::Sge | Comparison::Uge => lhs >= rhs,
                _ => continue,
            };

            let target_index = if taken { 3 } else { 4 };
            let target = last.operands[target_index].clone();

            let jump = Instruction::new(Opcode::Jmp, None, vec![target]);
            *block.instrs.last_mut().unwrap() = jump;
            let _ = Operand::comparison(cmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallingConv, FunctionType, Primitive, Type};

    #[test]
    fn test_folds_constant_branch() {
        let ty = FunctionType::new(Vec::new(), Type::VOID, CallingConv::X86_64SysV);
        let mut func = Function::new("f", ty);
        let entry = func.create_block("entry");
        let then_block = func.create_block("then");
        let else_block = func.create_block("else");

        let i32_ty = Type::primitive(Primitive::I32);
        func.block_mut(entry).append(Instruction::new(
            Opcode::Cjmp,
            None,
            vec![
                Operand::int_immediate(1, i32_ty.clone()),
                Operand::comparison(Comparison::Eq),
                Operand::int_immediate(1, i32_ty),
                Operand::branch_target(then_block, Vec::new()),
                Operand::branch_target(else_block, Vec::new()),
            ],
        ));
        func.block_mut(then_block)
            .append(Instruction::new(Opcode::Ret, None, Vec::new()));
        func.block_mut(else_block)
            .append(Instruction::new(Opcode::Ret, None, Vec::new()));

        let mut module = Module::new();
        module.add_function(func);
        BranchSimplifyPass.run(&mut module);

        let terminator = &module.functions[0].blocks[0].instrs[0];
        assert_eq!(terminator.opcode, Opcode::Jmp);
        assert_eq!(
            terminator.operands[0].as_branch_target().unwrap().block,
            then_block
        );
    }
}
