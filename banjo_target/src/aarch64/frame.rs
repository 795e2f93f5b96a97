//! AArch64 prologue/epilogue synthesis
//!
//! The frame reserves slots for the link register and every used
//! callee-saved register, drops SP by the aligned frame size, and saves
//! the registers with plain stores; stack-slot operands become
//! SP-relative addresses afterwards.

use super::abi::Abi;
use super::opcode::{self as op};
use super::register::{R29, R30, SP};
use banjo_mcode::{
    operand::OperandKind, Function, IndirectAddress, IndirectBase, Instruction, Operand,
    PhysicalReg, Register, StackSlotKind, PSEUDO_EH_ENDPROLOG, PSEUDO_EH_PUSHREG,
};

pub fn insert_prologue_epilogue(func: &mut Function, abi: &'static Abi) {
    let mut saved: Vec<PhysicalReg> = vec![R29, R30];
    for reg in collect_used_callee_saved(func, abi) {
        if !saved.contains(&reg) {
            saved.push(reg);
        }
    }

    // One 8-byte slot per saved register at the top of the frame.
    let mut save_slots = Vec::with_capacity(saved.len());
    for _ in &saved {
        save_slots.push(func.frame.add_slot(8, 8, StackSlotKind::Spill));
    }

    func.frame.layout();
    let frame_size = func.frame.size;
    func.unwind.alloca_size = frame_size;
    func.unwind.pushed_regs = saved
        .iter()
        .map(|reg| banjo_mcode::func::PushedReg { reg: *reg })
        .collect();

    // Prologue: sub sp, then store the saved registers.
    let mut prologue = Vec::new();
    if frame_size > 0 {
        prologue.push(Instruction::new(
            op::SUB,
            vec![
                Operand::physical(SP, 8),
                Operand::physical(SP, 8),
                Operand::int_immediate(frame_size as i64, 8),
            ],
        ));
    }
    for (reg, slot) in saved.iter().zip(&save_slots) {
        prologue.push(Instruction::new(
            op::STR,
            vec![
                Operand::indirect(
                    IndirectAddress::base(IndirectBase::StackSlot(*slot)),
                    8,
                ),
                Operand::physical(*reg, 8),
            ],
        ));
        prologue.push(Instruction::new(
            PSEUDO_EH_PUSHREG,
            vec![Operand::physical(*reg, 8)],
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
            for (reg, slot) in saved.iter().zip(&save_slots) {
                epilogue.push(Instruction::new(
                    op::LDR,
                    vec![
                        Operand::physical(*reg, 8),
                        Operand::indirect(
                            IndirectAddress::base(IndirectBase::StackSlot(*slot)),
                            8,
                        ),
                    ],
                ));
            }
            if frame_size > 0 {
                epilogue.push(Instruction::new(
                    op::ADD,
                    vec![
                        Operand::physical(SP, 8),
                        Operand::physical(SP, 8),
                        Operand::int_immediate(frame_size as i64, 8),
                    ],
                ));
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
                if let Some(Register::Physical(reg)) = operand.as_reg() {
                    if abi.callee_saved.contains(&reg) && !used.contains(&reg) {
                        used.push(reg);
                    }
                }
            }
        }
    }

    used
}

/// Replace stack-slot bases with SP plus the laid-out offset. ADD/SUB
/// against a stack-slot offset keeps its symbolic operand for the
/// stack-offset fixup pass to range-check.
fn rewrite_stack_slots(func: &mut Function) {
    let offsets: Vec<i64> = func.frame.slots.iter().map(|slot| slot.offset).collect();

    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            for operand in &mut instr.operands {
                match &operand.kind {
                    OperandKind::Indirect(address) => {
                        if let IndirectBase::StackSlot(slot) = address.base {
                            let mut address = address.clone();
                            address.base = IndirectBase::Reg(Register::Physical(SP));
                            address.displacement += offsets[slot] as i32;
                            operand.kind = OperandKind::Indirect(address);
                        }
                    }
                    OperandKind::StackSlot(slot) => {
                        let slot = *slot;
                        let _ = offsets[slot];
                        operand.kind = OperandKind::StackSlotOffset { slot, addend: 0 };
                    }
                    _ => {}
                }
            }
        }
    }
}
