//! x86-64 calling conventions

use super::register::*;
use banjo_mcode::PhysicalReg;
use banjo_ssa::CallingConv;

pub struct Abi {
    pub int_args: &'static [PhysicalReg],
    pub float_args: &'static [PhysicalReg],
    pub int_return: PhysicalReg,
    pub float_return: PhysicalReg,
    pub volatile: &'static [PhysicalReg],
    pub callee_saved: &'static [PhysicalReg],
    /// Bytes of stack the caller reserves below its arguments
    pub shadow_space: u64,
}

pub const SYS_V: Abi = Abi {
    int_args: &[RDI, RSI, RDX, RCX, R8, R9],
    float_args: &[XMM0, XMM1, XMM2, XMM3, XMM4, XMM5, XMM6, XMM7],
    int_return: RAX,
    float_return: XMM0,
    volatile: &[
        RAX, RCX, RDX, RSI, RDI, R8, R9, R10, R11, XMM0, XMM1, XMM2, XMM3, XMM4, XMM5, XMM6,
        XMM7, XMM8, XMM9, XMM10, XMM11, XMM12, XMM13, XMM14, XMM15,
    ],
    callee_saved: &[RBX, RBP, R12, R13, R14, R15],
    shadow_space: 0,
};

pub const MS_X64: Abi = Abi {
    int_args: &[RCX, RDX, R8, R9],
    float_args: &[XMM0, XMM1, XMM2, XMM3],
    int_return: RAX,
    float_return: XMM0,
    volatile: &[RAX, RCX, RDX, R8, R9, R10, R11, XMM0, XMM1, XMM2, XMM3, XMM4, XMM5],
    callee_saved: &[
        RBX, RBP, RDI, RSI, R12, R13, R14, R15, XMM6, XMM7, XMM8, XMM9, XMM10, XMM11, XMM12,
        XMM13, XMM14, XMM15,
    ],
    shadow_space: 32,
};

pub fn abi_for(calling_conv: CallingConv) -> &'static Abi {
    match calling_conv {
        CallingConv::X86_64Ms => &MS_X64,
        _ => &SYS_V,
    }
}
