//! AArch64 register analyzer

use super::abi::{Abi, AAPCS};
use super::opcode::{self as op};
use crate::codegen::{DestRole, RegInfo};
use banjo_mcode::{Instruction, Operand, PhysicalReg, RegisterClass, FLAG_FLOAT};

pub struct AArch64RegInfo {
    abi: &'static Abi,
}

const GPR_CANDIDATES: &[PhysicalReg] = &[
    super::register::R0,
    super::register::R1,
    super::register::R2,
    super::register::R3,
    super::register::R4,
    super::register::R5,
    super::register::R6,
    super::register::R7,
    super::register::R8,
    super::register::R9,
    super::register::R10,
    super::register::R11,
    super::register::R12,
    super::register::R13,
    super::register::R14,
    super::register::R15,
    super::register::R19,
    super::register::R20,
    super::register::R21,
    super::register::R22,
    super::register::R23,
    super::register::R24,
    super::register::R25,
    super::register::R26,
    super::register::R27,
    super::register::R28,
];

const FLOAT_CANDIDATES: &[PhysicalReg] = &[
    super::register::V0,
    super::register::V1,
    super::register::V2,
    super::register::V3,
    super::register::V4,
    super::register::V5,
    super::register::V6,
    super::register::V7,
    super::register::V8,
    super::register::V9,
    super::register::V10,
    super::register::V11,
    super::register::V12,
    super::register::V13,
    super::register::V14,
    super::register::V15,
];

impl AArch64RegInfo {
    pub fn new() -> Self {
        Self { abi: &AAPCS }
    }
}

impl Default for AArch64RegInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl RegInfo for AArch64RegInfo {
    fn dest_role(&self, instr: &Instruction) -> DestRole {
        match instr.opcode {
            op::MOV | op::MOVZ | op::FMOV | op::LDR | op::LDRB | op::LDRH | op::ADD | op::SUB
            | op::MUL | op::SDIV | op::UDIV | op::AND | op::ORR | op::EOR | op::LSL | op::ASR
            | op::LSR | op::CSEL | op::FADD | op::FSUB | op::FMUL | op::FDIV | op::FCVT
            | op::SCVTF | op::FCVTZS | op::FCVTZU | op::FCSEL | op::FSQRT | op::ADRP
            | op::SXTW | op::UXTW | op::SXTB | op::SXTH | op::ADD_PAGEOFF => DestRole::Def,
            op::MOVK => DestRole::UseDef,
            op::CMP | op::FCMP | op::BR | op::BLR | op::STR | op::STRB | op::STRH => DestRole::Use,
            _ => DestRole::None,
        }
    }

    fn candidates(&self, class: RegisterClass) -> &[PhysicalReg] {
        match class {
            RegisterClass::Gpr => GPR_CANDIDATES,
            RegisterClass::Float => FLOAT_CANDIDATES,
        }
    }

    fn callee_saved(&self) -> &[PhysicalReg] {
        self.abi.callee_saved
    }

    fn call_clobbered(&self) -> &[PhysicalReg] {
        self.abi.volatile
    }

    fn is_branch(&self, instr: &Instruction) -> bool {
        instr.opcode == op::B || op::is_bcond(instr.opcode)
    }

    fn is_move(&self, instr: &Instruction) -> bool {
        matches!(instr.opcode, op::MOV | op::FMOV)
            && instr.operands.len() == 2
            && instr.operands[0].is_register()
            && instr.operands[1].is_register()
    }

    fn load_from_slot(&self, dst: u32, slot: usize, size: u8, class: RegisterClass) -> Instruction {
        let mut instr = Instruction::new(
            op::LDR,
            vec![
                Operand::virtual_reg(dst, size),
                Operand::indirect(
                    banjo_mcode::IndirectAddress::base(banjo_mcode::IndirectBase::StackSlot(slot)),
                    size,
                ),
            ],
        );
        if class == RegisterClass::Float {
            instr.set_flag(FLAG_FLOAT);
        }
        instr
    }

    fn store_to_slot(&self, src: u32, slot: usize, size: u8, class: RegisterClass) -> Instruction {
        let mut instr = Instruction::new(
            op::STR,
            vec![
                Operand::indirect(
                    banjo_mcode::IndirectAddress::base(banjo_mcode::IndirectBase::StackSlot(slot)),
                    size,
                ),
                Operand::virtual_reg(src, size),
            ],
        );
        if class == RegisterClass::Float {
            instr.set_flag(FLAG_FLOAT);
        }
        instr
    }
}
