//! AArch64 stack-offset fixup
//!
//! ADD and SUB take a 12-bit unsigned immediate with an optional LSL #12.
//! Frame offsets beyond 4095 are rewritten into a shifted-12 add of the
//! upper bits followed by a plain add of the remainder.

use super::opcode::{self as op};
use banjo_mcode::{operand::OperandKind, Instruction, Module, Operand};

pub fn run(module: &mut Module) {
    for func in &mut module.functions {
        let offsets: Vec<i64> = func.frame.slots.iter().map(|slot| slot.offset).collect();

        for block in &mut func.blocks {
            let mut index = 0;
            while index < block.instrs.len() {
                let instr = &block.instrs[index];

                if !matches!(instr.opcode, op::ADD | op::SUB)
                    || instr.operands.len() != 3
                {
                    index += 1;
                    continue;
                }

                let OperandKind::StackSlotOffset { slot, addend } = instr.operands[2].kind else {
                    index += 1;
                    continue;
                };

                let total_offset = offsets[slot] + addend as i64;
                assert!(total_offset >= 0 && total_offset < 4096 * 4096);

                if total_offset < 4096 {
                    let size = instr.operands[2].size;
                    block.instrs[index].operands[2] =
                        Operand::int_immediate(total_offset, size);
                    index += 1;
                    continue;
                }

                // Split into (upper << 12) plus remainder.
                let opcode = instr.opcode;
                let dest = instr.operands[0].clone();
                let size = instr.operands[2].size;

                block.instrs[index].operands[2] =
                    Operand::int_immediate(total_offset >> 12, size);
                block.instrs[index].operands.push(Operand::left_shift(12));

                let remainder = Instruction::new(
                    opcode,
                    vec![
                        dest.clone(),
                        dest,
                        Operand::int_immediate(total_offset & 0xFFF, size),
                    ],
                );
                block.insert(index + 1, remainder);
                index += 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banjo_mcode::{Function, Register, StackSlotKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_splits_large_offsets() {
        let mut func = Function::new("f");
        let entry = func.create_block("entry");

        // A slot placed beyond the 12-bit immediate range.
        for _ in 0..2 {
            func.frame.add_slot(4096, 8, StackSlotKind::Alloca);
        }
        let far_slot = func.frame.add_slot(8, 8, StackSlotKind::Alloca);
        func.frame.layout();

        func.blocks[entry].append(Instruction::new(
            op::ADD,
            vec![
                Operand::reg(Register::Physical(super::super::register::R0), 8),
                Operand::reg(Register::Physical(super::super::register::SP), 8),
                Operand::stack_slot_offset(far_slot, 0, 8),
            ],
        ));

        let mut module = Module::new();
        module.add_function(func);
        run(&mut module);

        let instrs = &module.functions[0].blocks[0].instrs;
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].operands[2].as_int_immediate(), Some(2));
        assert!(matches!(
            instrs[0].operands[3].kind,
            OperandKind::LeftShift(12)
        ));
        assert_eq!(instrs[1].operands[2].as_int_immediate(), Some(0));
    }
}
