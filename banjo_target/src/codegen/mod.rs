//! Target-parameterized machine passes
//!
//! The pass runner drives each function through instruction numbering,
//! liveness, bundle-based register allocation with spilling, a second
//! numbering, and prologue/epilogue synthesis, then hands the module to
//! the target for its own fixups.

pub mod liveness;
pub mod regalloc;

use banjo_common::BanjoResult;
use banjo_mcode::{Function, Instruction, Module, PhysicalReg, RegisterClass};

/// How an instruction treats its first operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestRole {
    /// Written only (mov-like)
    Def,
    /// Read and written (two-address arithmetic)
    UseDef,
    /// Read only (cmp, push, indirect call)
    Use,
    /// Not a register operand
    None,
}

/// Register facts and spill-code construction supplied by each target
pub trait RegInfo {
    /// How the instruction's first operand participates.
    fn dest_role(&self, instr: &Instruction) -> DestRole;

    /// Allocation candidates for a class, in preference order.
    fn candidates(&self, class: RegisterClass) -> &[PhysicalReg];

    /// Registers preserved across calls.
    fn callee_saved(&self) -> &[PhysicalReg];

    /// Registers clobbered by a call instruction.
    fn call_clobbered(&self) -> &[PhysicalReg];

    fn is_branch(&self, instr: &Instruction) -> bool;

    /// A plain register-to-register move, used for allocation hints.
    fn is_move(&self, instr: &Instruction) -> bool;

    /// Build a reload of a spilled register from a stack slot.
    fn load_from_slot(&self, dst: u32, slot: usize, size: u8, class: RegisterClass) -> Instruction;

    /// Build a store of a spilled register into a stack slot.
    fn store_to_slot(&self, src: u32, slot: usize, size: u8, class: RegisterClass) -> Instruction;
}

/// The target half of the machine pass pipeline
pub trait MachineBackend {
    fn reg_info(&self) -> &dyn RegInfo;

    /// Insert the prologue and epilogue and rewrite stack-slot operands
    /// into frame-relative addresses.
    fn insert_prologue_epilogue(&self, func: &mut Function);

    /// Target-specific post passes (e.g. AArch64 stack-offset fixup).
    fn apply_fixups(&self, module: &mut Module) {
        let _ = module;
    }
}

pub struct MachinePassRunner<'a> {
    backend: &'a dyn MachineBackend,
}

impl<'a> MachinePassRunner<'a> {
    pub fn new(backend: &'a dyn MachineBackend) -> Self {
        Self { backend }
    }

    pub fn run(&self, module: &mut Module) -> BanjoResult<()> {
        for func in &mut module.functions {
            log::debug!("machine passes: {}", func.name);

            func.renumber();
            let info = self.backend.reg_info();
            func.recompute_cfg(|instr| info.is_branch(instr));

            regalloc::allocate(func, info);

            func.renumber();
            self.backend.insert_prologue_epilogue(func);
        }

        self.backend.apply_fixups(module);
        Ok(())
    }
}
