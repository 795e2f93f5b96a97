//! The AArch64 target

pub mod abi;
pub mod frame;
pub mod lowerer;
pub mod opcode;
pub mod reg_info;
pub mod register;
pub mod stack_offset_fixup;

use crate::codegen::{MachineBackend, MachinePassRunner, RegInfo};
use crate::{Target, TargetDescription};
use banjo_common::BanjoResult;
use banjo_mcode as mcode;
use banjo_ssa as ssa;

pub struct AArch64Target {
    description: TargetDescription,
    reg_info: reg_info::AArch64RegInfo,
}

impl AArch64Target {
    pub fn new(description: TargetDescription) -> Self {
        Self {
            description,
            reg_info: reg_info::AArch64RegInfo::new(),
        }
    }
}

impl Target for AArch64Target {
    fn description(&self) -> TargetDescription {
        self.description
    }

    fn lower(&self, module: &ssa::Module) -> BanjoResult<mcode::Module> {
        lowerer::SsaLowerer::new(module).lower_module()
    }

    fn run_machine_passes(&self, module: &mut mcode::Module) -> BanjoResult<()> {
        MachinePassRunner::new(self).run(module)
    }

    fn calling_conv(&self) -> ssa::CallingConv {
        ssa::CallingConv::AArch64Aapcs
    }
}

impl MachineBackend for AArch64Target {
    fn reg_info(&self) -> &dyn RegInfo {
        &self.reg_info
    }

    fn insert_prologue_epilogue(&self, func: &mut mcode::Function) {
        frame::insert_prologue_epilogue(func, &abi::AAPCS);
    }

    fn apply_fixups(&self, module: &mut mcode::Module) {
        stack_offset_fixup::run(module);
    }
}
