//! x86-64 register analyzer

use super::abi::Abi;
use super::opcode::{self as op};
use crate::codegen::{DestRole, RegInfo};
use banjo_mcode::{Instruction, Operand, PhysicalReg, RegisterClass, FLAG_FLOAT};

pub struct X86_64RegInfo {
    abi: &'static Abi,
}

const GPR_CANDIDATES: &[PhysicalReg] = &[
    super::register::RAX,
    super::register::RCX,
    super::register::RDX,
    super::register::R8,
    super::register::R9,
    super::register::R10,
    super::register::R11,
    super::register::RSI,
    super::register::RDI,
    super::register::RBX,
    super::register::R12,
    super::register::R13,
    super::register::R14,
    super::register::R15,
];

const FLOAT_CANDIDATES: &[PhysicalReg] = &[
    super::register::XMM0,
    super::register::XMM1,
    super::register::XMM2,
    super::register::XMM3,
    super::register::XMM4,
    super::register::XMM5,
    super::register::XMM6,
    super::register::XMM7,
    super::register::XMM8,
    super::register::XMM9,
    super::register::XMM10,
    super::register::XMM11,
    super::register::XMM12,
    super::register::XMM13,
    super::register::XMM14,
    super::register::XMM15,
];

impl X86_64RegInfo {
    pub fn new(abi: &'static Abi) -> Self {
        Self { abi }
    }
}

impl RegInfo for X86_64RegInfo {
    fn dest_role(&self, instr: &Instruction) -> DestRole {
        match instr.opcode {
            op::MOV | op::MOVSX | op::MOVZX | op::LEA | op::MOVSS | op::MOVSD | op::MOVAPS
            | op::MOVQ | op::POP | op::CVTSS2SD | op::CVTSD2SS | op::CVTSI2SS | op::CVTSI2SD
            | op::CVTSS2SI | op::CVTSD2SI | op::SQRTSS | op::SQRTSD => DestRole::Def,
            op::ADD | op::SUB | op::IMUL | op::AND | op::OR | op::XOR | op::SHL | op::SHR
            | op::ADDSS | op::ADDSD | op::SUBSS | op::SUBSD | op::MULSS | op::MULSD
            | op::DIVSS | op::DIVSD | op::XORPS => DestRole::UseDef,
            opcode if op::is_cmov(opcode) => DestRole::UseDef,
            op::CMP | op::UCOMISS | op::UCOMISD | op::PUSH | op::IDIV | op::DIV | op::CALL => {
                DestRole::Use
            }
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
        instr.opcode == op::JMP || op::is_jcc(instr.opcode)
    }

    fn is_move(&self, instr: &Instruction) -> bool {
        matches!(instr.opcode, op::MOV | op::MOVSS | op::MOVSD)
            && instr.operands.len() == 2
            && instr.operands[0].is_register()
            && instr.operands[1].is_register()
    }

    fn load_from_slot(&self, dst: u32, slot: usize, size: u8, class: RegisterClass) -> Instruction {
        let opcode = match class {
            RegisterClass::Gpr => op::MOV,
            RegisterClass::Float => op::float_mov(size),
        };

        let mut instr = Instruction::new(
            opcode,
            vec![
                Operand::virtual_reg(dst, size),
                Operand::stack_slot_offset(slot, 0, size),
            ],
        );
        if class == RegisterClass::Float {
            instr.set_flag(FLAG_FLOAT);
        }
        instr
    }

    fn store_to_slot(&self, src: u32, slot: usize, size: u8, class: RegisterClass) -> Instruction {
        let opcode = match class {
            RegisterClass::Gpr => op::MOV,
            RegisterClass::Float => op::float_mov(size),
        };

        let mut instr = Instruction::new(
            opcode,
            vec![
                Operand::stack_slot_offset(slot, 0, size),
                Operand::virtual_reg(src, size),
            ],
        );
        if class == RegisterClass::Float {
            instr.set_flag(FLAG_FLOAT);
        }
        instr
    }
}
