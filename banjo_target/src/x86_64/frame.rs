//! x86-64 prologue/epilogue synthesis and stack-slot rewriting
//!
//! After allocation the frame is laid out, used callee-saved registers are
//! pushed (with EH markers for the unwind tables), the stack pointer is
//! dropped by the 16-byte-aligned frame size, and every stack-slot operand
//! becomes an RSP-relative address.

use super::abi::Abi;
use super::opcode::{self as op};
use super::register::RSP;
use banjo_mcode::{
    operand::OperandKind, Function, IndirectAddress, IndirectBase, Instruction, Operand,
    PhysicalReg, Register, PSEUDO_EH_ENDPROLOG, PSEUDO_EH_PUSHREG,
};

pub fn insert_prologue_epilogue(func: &mut Function, abi: &'static Abi) {
    let used_callee_saved = collect_used_callee_saved(func, abi);

    func.frame.layout();

    // Calls require RSP to be 16-byte aligned: the return address plus the
    // pushes plus the frame must keep that invariant.
    let pushed_bytes = 8 + 8 * used_callee_saved.len() as u64;
    if (pushed_bytes + func.frame.size) % 16 != 0 {
        func.frame.size += 8;
    }

    let frame_size = func.frame.size;
    func.unwind.alloca_size = frame_size;
    func.unwind.pushed_regs = used_callee_saved
        .iter()
        .map(|reg| banjo_mcode::func::PushedReg { reg: *reg })
        .collect();

    // Prologue in front of the entry block.
    let mut prologue = Vec::new();
    for reg in &used_callee_saved {
        prologue.push(Instruction::new(op::PUSH, vec![Operand::physical(*reg, 8)]));
        prologue.push(Instruction::new(
            PSEUDO_EH_PUSHREG,
            vec![Operand::physical(*reg, 8)],
        ));
    }
    if frame_size > 0 {
        prologue.push(Instruction::new(
            op::SUB,
            vec![
                Operand::physical(RSP, 8),
                Operand::int_immediate(frame_size as i64, 8),
            ],
        ));
    }
    prologue.push(Instruction::new(PSEUDO_EH_ENDPROLOG, Vec::<Operand>::new()));

    if let Some(entry) = func.blocks.first_mut() {
        for instr in prologue.into_iter().rev() {
            entry.instrs.insert(0, instr);
        }
    }

    // Epilogue before every return.
    for block in &mut func.blocks {
        let mut index = 0;
        while index < block.instrs.len() {
            if block.instrs[index].opcode != op::RET {
                index += 1;
                continue;
            }

            let mut epilogue = Vec::new();
            if frame_size > 0 {
                epilogue.push(Instruction::new(
                    op::ADD,
                    vec![
                        Operand::physical(RSP, 8),
                        Operand::int_immediate(frame_size as i64, 8),
                    ],
                ));
            }
            for reg in used_callee_saved.iter().rev() {
                epilogue.push(Instruction::new(op::POP, vec![Operand::physical(*reg, 8)]));
            }

            let count = epilogue.len();
            for (offset, instr) in epilogue.into_iter().enumerate() {
                block.instrs.insert(index + offset, instr);
            }
            index += count + 1;
        }
    }

    rewrite_stack_slots(func);
}

fn collect_used_callee_saved(func: &Function, abi: &'static Abi) -> Vec<PhysicalReg> {
    let mut used = Vec::new();

    for block in &func.blocks {
        for instr in &block.instrs {
            for operand in &instr.operands {
                let reg = match &operand.kind {
                    OperandKind::Reg(Register::Physical(reg)) => Some(*reg),
                    OperandKind::Indirect(address) => {
                        match address.base {
                            IndirectBase::Reg(Register::Physical(reg)) => Some(reg),
                            _ => None,
                        }
                    }
                    _ => None,
                };

                if let Some(reg) = reg {
                    if abi.callee_saved.contains(&reg) && !used.contains(&reg) {
                        used.push(reg);
                    }
                }
            }
        }
    }

    used
}

/// Replace stack-slot operands with RSP-relative addresses now that slot
/// offsets are final.
fn rewrite_stack_slots(func: &mut Function) {
    let offsets: Vec<i64> = func.frame.slots.iter().map(|slot| slot.offset).collect();

    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            for operand in &mut instr.operands {
                match &operand.kind {
                    OperandKind::StackSlot(slot) => {
                        let displacement = offsets[*slot] as i32;
                        operand.kind = OperandKind::Indirect(IndirectAddress::base_disp(
                            IndirectBase::Reg(Register::Physical(RSP)),
                            displacement,
                        ));
                    }
                    OperandKind::StackSlotOffset { slot, addend } => {
                        let displacement = offsets[*slot] as i32 + addend;
                        operand.kind = OperandKind::Indirect(IndirectAddress::base_disp(
                            IndirectBase::Reg(Register::Physical(RSP)),
                            displacement,
                        ));
                    }
                    _ => {}
                }
            }
        }
    }
}
