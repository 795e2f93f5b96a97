//! SSA invariant verification
//!
//! Used by tests and debug builds to check that generated IR is well
//! formed: every virtual register has exactly one definition, terminators
//! appear only at block ends, and branch argument types match the target
//! block's parameter types.

use crate::{Function, Opcode, OperandKind};
use hashbrown::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub function: String,
    pub message: String,
}

pub fn verify_function(func: &Function) -> Result<(), VerifyError> {
    let error = |message: String| VerifyError { function: func.name.clone(), message };

    let mut defined: HashSet<u32> = HashSet::new();

    for block in &func.blocks {
        for reg in &block.param_regs {
            if !defined.insert(*reg) {
                return Err(error(format!("register {} defined more than once", reg)));
            }
        }
    }

    for block in &func.blocks {
        for (index, instr) in block.instrs.iter().enumerate() {
            if let Some(dest) = instr.dest {
                if !defined.insert(dest) {
                    return Err(error(format!("register {} defined more than once", dest)));
                }
            }

            let is_last = index + 1 == block.instrs.len();
            if instr.is_branching() && !is_last {
                return Err(error(format!(
                    "branch in the middle of block '{}'",
                    block.label
                )));
            }
        }
    }

    // Uses must reference defined registers, and branch arguments must agree
    // with the target block's parameters.
    for block in &func.blocks {
        for instr in &block.instrs {
            for operand in &instr.operands {
                match &operand.kind {
                    OperandKind::Register(reg) => {
                        if !defined.contains(reg) {
                            return Err(error(format!("register {} used but never defined", reg)));
                        }
                    }
                    OperandKind::BranchTarget(target) => {
                        if !instr.is_branching() {
                            return Err(error(
                                "branch target on a non-branching instruction".to_string(),
                            ));
                        }

                        let target_block = func.block(target.block);
                        if target.args.len() != target_block.param_types.len() {
                            return Err(error(format!(
                                "branch to '{}' passes {} arguments but the block has {} parameters",
                                target_block.label,
                                target.args.len(),
                                target_block.param_types.len()
                            )));
                        }

                        for (arg, param_ty) in target.args.iter().zip(&target_block.param_types) {
                            if &arg.ty != param_ty {
                                return Err(error(format!(
                                    "branch argument type mismatch at '{}'",
                                    target_block.label
                                )));
                            }
                        }
                    }
                    _ => {}
                }
            }

            if instr.opcode == Opcode::Ret && instr.operands.len() > 1 {
                return Err(error("ret with more than one operand".to_string()));
            }
        }
    }

    Ok(())
}

pub fn verify_module(module: &crate::Module) -> Result<(), VerifyError> {
    for func in &module.functions {
        verify_function(func)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallingConv, FunctionType, Instruction, Operand, Primitive, Type};

    #[test]
    fn test_detects_double_definition() {
        let ty = FunctionType::new(Vec::new(), Type::VOID, CallingConv::X86_64SysV);
        let mut func = Function::new("f", ty);
        let entry = func.create_block("entry");
        let reg = func.next_virtual_reg();

        let i32_ty = Type::primitive(Primitive::I32);
        let block = func.block_mut(entry);
        block.append(Instruction::new(
            Opcode::Add,
            Some(reg),
            vec![
                Operand::int_immediate(1, i32_ty.clone()),
                Operand::int_immediate(2, i32_ty.clone()),
            ],
        ));
        block.append(Instruction::new(
            Opcode::Add,
            Some(reg),
            vec![
                Operand::int_immediate(3, i32_ty.clone()),
                Operand::int_immediate(4, i32_ty),
            ],
        ));
        block.append(Instruction::new(Opcode::Ret, None, Vec::new()));

        let result = verify_function(&func);
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("more than once"));
    }

    #[test]
    fn test_branch_arg_type_mismatch() {
        let ty = FunctionType::new(Vec::new(), Type::VOID, CallingConv::X86_64SysV);
        let mut func = Function::new("f", ty);
        let entry = func.create_block("entry");
        let merge = func.create_block("merge");

        let param = func.next_virtual_reg();
        func.block_mut(merge).param_regs.push(param);
        func.block_mut(merge)
            .param_types
            .push(Type::primitive(Primitive::I64));
        func.block_mut(merge)
            .append(Instruction::new(Opcode::Ret, None, Vec::new()));

        // Pass an i32 where the block expects an i64.
        let arg = Operand::int_immediate(0, Type::primitive(Primitive::I32));
        func.block_mut(entry).append(Instruction::new(
            Opcode::Jmp,
            None,
            vec![Operand::branch_target(merge, vec![arg])],
        ));

        assert!(verify_function(&func).is_err());
    }
}
