//! Constant folding
//!
//! Folds integer ALU instructions whose operands are all immediates,
//! with wrap-around semantics per the result type's width and signedness,
//! and propagates the folded values into later uses.

use crate::{Function, Module, Opcode, Operand, OperandKind, Primitive, Type};
use hashbrown::HashMap;

pub struct ConstFoldPass;

impl ConstFoldPass {
    pub fn run(&self, module: &mut Module) {
        for func in &mut module.functions {
            Self::run_on_function(func);
        }
    }

    fn run_on_function(func: &mut Function) {
        let mut constants: HashMap<u32, (i128, Type)> = HashMap::new();

        for block in &mut func.blocks {
            for instr in &mut block.instrs {
                // Propagate known constants into register operands.
                for operand in &mut instr.operands {
                    if let OperandKind::Register(reg) = operand.kind {
                        if let Some((value, _)) = constants.get(&reg) {
                            operand.kind = OperandKind::IntImmediate(*value);
                        }
                    }

                    if let OperandKind::BranchTarget(target) = &mut operand.kind {
                        for arg in &mut target.args {
                            if let OperandKind::Register(reg) = arg.kind {
                                if let Some((value, _)) = constants.get(&reg) {
                                    arg.kind = OperandKind::IntImmediate(*value);
                                }
                            }
                        }
                    }
                }

                let Some(dest) = instr.dest else { continue };
                let Some(folded) = Self::fold(instr.opcode, &instr.operands) else {
                    continue;
                };

                let ty = instr.operands[0].ty.clone();
                let wrapped = wrap_to_type(&ty, folded);
                constants.insert(dest, (wrapped, ty));
            }
        }

        // Remove instructions that folded away entirely.
        for block in &mut func.blocks {
            block
                .instrs
                .retain(|instr| match instr.dest {
                    Some(dest) => !constants.contains_key(&dest),
                    None => true,
                });
        }

        // Any remaining uses of folded registers become immediates.
        for block in &mut func.blocks {
            for instr in &mut block.instrs {
                for operand in &mut instr.operands {
                    if let OperandKind::Register(reg) = operand.kind {
                        if let Some((value, _)) = constants.get(&reg) {
                            operand.kind = OperandKind::IntImmediate(*value);
                        }
                    }
                }
            }
        }
    }

    fn fold(opcode: Opcode, operands: &[Operand]) -> Option<i128> {
        let lhs = operands.first()?.as_int_immediate()?;
        let rhs = operands.get(1)?.as_int_immediate()?;

        let result = match opcode {
            Opcode::Add => lhs.wrapping_add(rhs),
            Opcode::Sub => lhs.wrapping_sub(rhs),
            Opcode::Mul => lhs.wrapping_mul(rhs),
            Opcode::Sdiv | Opcode::Udiv => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_div(rhs)
            }
            Opcode::Srem | Opcode::Urem => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_rem(rhs)
            }
            Opcode::And => lhs & rhs,
            Opcode::Or => lhs | rhs,
            Opcode::Xor => lhs ^ rhs,
            Opcode::Shl => lhs.wrapping_shl(rhs as u32),
            Opcode::Shr => lhs.wrapping_shr(rhs as u32),
            _ => return None,
        };
        Some(result)
    }
}

fn wrap_to_type(ty: &Type, value: i128) -> i128 {
    let Some(primitive) = ty.as_primitive() else {
        return value;
    };

    let bits = match primitive {
        Primitive::I8 | Primitive::U8 => 8,
        Primitive::I16 | Primitive::U16 => 16,
        Primitive::I32 | Primitive::U32 => 32,
        Primitive::I64 | Primitive::U64 | Primitive::Addr => 64,
        _ => return value,
    };

    let mask = if bits >= 128 { -1i128 } else { (1i128 << bits) - 1 };
    let wrapped = value & mask;

    if primitive.is_signed() && bits < 128 && wrapped >= (1i128 << (bits - 1)) {
        wrapped - (1i128 << bits)
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallingConv, FunctionType, Instruction};

    #[test]
    fn test_folds_add_chain() {
        let ty = FunctionType::new(
            Vec::new(),
            Type::primitive(Primitive::I32),
            CallingConv::X86_64SysV,
        );
        let mut func = Function::new("f", ty);
        let entry = func.create_block("entry");

        let i32_ty = Type::primitive(Primitive::I32);
        let a = func.next_virtual_reg();

        let block = func.block_mut(entry);
        block.append(Instruction::new(
            Opcode::Add,
            Some(a),
            vec![
                Operand::int_immediate(40, i32_ty.clone()),
                Operand::int_immediate(2, i32_ty.clone()),
            ],
        ));
        block.append(Instruction::new(
            Opcode::Ret,
            None,
            vec![Operand::register(a, i32_ty)],
        ));

        let mut module = Module::new();
        module.add_function(func);
        ConstFoldPass.run(&mut module);

        let block = &module.functions[0].blocks[0];
        assert_eq!(block.instrs.len(), 1);
        assert_eq!(block.instrs[0].operands[0].as_int_immediate(), Some(42));
    }

    #[test]
    fn test_wraps_to_width() {
        assert_eq!(wrap_to_type(&Type::primitive(Primitive::U8), 256), 0);
        assert_eq!(wrap_to_type(&Type::primitive(Primitive::I8), 128), -128);
    }
}
