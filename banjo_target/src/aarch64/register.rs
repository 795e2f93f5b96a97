//! AArch64 register numbering
//!
//! General registers X0-X30 use 0-30, SP is 31, and the vector registers
//! V0-V31 follow at 32-63.

use banjo_mcode::PhysicalReg;

pub const R0: PhysicalReg = 0;
pub const R1: PhysicalReg = 1;
pub const R2: PhysicalReg = 2;
pub const R3: PhysicalReg = 3;
pub const R4: PhysicalReg = 4;
pub const R5: PhysicalReg = 5;
pub const R6: PhysicalReg = 6;
pub const R7: PhysicalReg = 7;
pub const R8: PhysicalReg = 8;
pub const R9: PhysicalReg = 9;
pub const R10: PhysicalReg = 10;
pub const R11: PhysicalReg = 11;
pub const R12: PhysicalReg = 12;
pub const R13: PhysicalReg = 13;
pub const R14: PhysicalReg = 14;
pub const R15: PhysicalReg = 15;
pub const R16: PhysicalReg = 16;
pub const R17: PhysicalReg = 17;
pub const R19: PhysicalReg = 19;
pub const R20: PhysicalReg = 20;
pub const R21: PhysicalReg = 21;
pub const R22: PhysicalReg = 22;
pub const R23: PhysicalReg = 23;
pub const R24: PhysicalReg = 24;
pub const R25: PhysicalReg = 25;
pub const R26: PhysicalReg = 26;
pub const R27: PhysicalReg = 27;
pub const R28: PhysicalReg = 28;
pub const R29: PhysicalReg = 29;
pub const R30: PhysicalReg = 30;
pub const SP: PhysicalReg = 31;

pub const V_BASE: PhysicalReg = 32;
pub const V0: PhysicalReg = 32;
pub const V1: PhysicalReg = 33;
pub const V2: PhysicalReg = 34;
pub const V3: PhysicalReg = 35;
pub const V4: PhysicalReg = 36;
pub const V5: PhysicalReg = 37;
pub const V6: PhysicalReg = 38;
pub const V7: PhysicalReg = 39;
pub const V8: PhysicalReg = 40;
pub const V9: PhysicalReg = 41;
pub const V10: PhysicalReg = 42;
pub const V11: PhysicalReg = 43;
pub const V12: PhysicalReg = 44;
pub const V13: PhysicalReg = 45;
pub const V14: PhysicalReg = 46;
pub const V15: PhysicalReg = 47;
pub const V16: PhysicalReg = 48;

pub fn is_vector(reg: PhysicalReg) -> bool {
    reg >= V_BASE
}

/// The 5-bit hardware encoding of a register.
pub fn encoding(reg: PhysicalReg) -> u32 {
    if is_vector(reg) {
        reg - V_BASE
    } else {
        reg
    }
}
