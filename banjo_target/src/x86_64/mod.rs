//! The x86-64 target

pub mod abi;
pub mod frame;
pub mod lowerer;
pub mod opcode;
pub mod reg_info;
pub mod register;

use crate::codegen::{MachineBackend, MachinePassRunner, RegInfo};
use crate::{Target, TargetDescription};
use banjo_common::BanjoResult;
use banjo_mcode as mcode;
use banjo_ssa as ssa;

pub struct X86_64Target {
    description: TargetDescription,
    reg_info: reg_info::X86_64RegInfo,
    abi: &'static abi::Abi,
}

impl X86_64Target {
    pub fn new(description: TargetDescription) -> Self {
        let calling_conv = match description.os {
            crate::OperatingSystem::Windows => ssa::CallingConv::X86_64Ms,
            _ => ssa::CallingConv::X86_64SysV,
        };
        let abi = abi::abi_for(calling_conv);

        Self {
            description,
            reg_info: reg_info::X86_64RegInfo::new(abi),
            abi,
        }
    }
}

impl Target for X86_64Target {
    fn description(&self) -> TargetDescription {
        self.description
    }

    fn lower(&self, module: &ssa::Module) -> BanjoResult<mcode::Module> {
        lowerer::SsaLowerer::new(module, self.calling_conv(), self.description.code_model)
            .lower_module()
    }

    fn run_machine_passes(&self, module: &mut mcode::Module) -> BanjoResult<()> {
        MachinePassRunner::new(self).run(module)
    }

    fn calling_conv(&self) -> ssa::CallingConv {
        match self.description.os {
            crate::OperatingSystem::Windows => ssa::CallingConv::X86_64Ms,
            _ => ssa::CallingConv::X86_64SysV,
        }
    }
}

impl MachineBackend for X86_64Target {
    fn reg_info(&self) -> &dyn RegInfo {
        &self.reg_info
    }

    fn insert_prologue_epilogue(&self, func: &mut mcode::Function) {
        frame::insert_prologue_epilogue(func, self.abi);
    }
}
