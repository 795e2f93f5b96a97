//! AArch64 AAPCS calling convention

use super::register::*;
use banjo_mcode::PhysicalReg;

pub struct Abi {
    pub int_args: &'static [PhysicalReg],
    pub float_args: &'static [PhysicalReg],
    pub int_return: PhysicalReg,
    pub float_return: PhysicalReg,
    pub volatile: &'static [PhysicalReg],
    pub callee_saved: &'static [PhysicalReg],
}

pub const AAPCS: Abi = Abi {
    int_args: &[R0, R1, R2, R3, R4, R5, R6, R7],
    float_args: &[V0, V1, V2, V3, V4, V5, V6, V7],
    int_return: R0,
    float_return: V0,
    volatile: &[
        R0, R1, R2, R3, R4, R5, R6, R7, R8, R9, R10, R11, R12, R13, R14, R15, R16, R17, V0, V1,
        V2, V3, V4, V5, V6, V7, V16,
    ],
    callee_saved: &[
        R19, R20, R21, R22, R23, R24, R25, R26, R27, R28, V8, V9, V10, V11, V12, V13, V14, V15,
    ],
};
