//! x86-64 register numbering
//!
//! General-purpose registers use their hardware encodings 0-15; XMM
//! registers follow at 16-31 so both classes share one numbering space.

use banjo_mcode::PhysicalReg;

pub const RAX: PhysicalReg = 0;
pub const RCX: PhysicalReg = 1;
pub const RDX: PhysicalReg = 2;
pub const RBX: PhysicalReg = 3;
pub const RSP: PhysicalReg = 4;
pub const RBP: PhysicalReg = 5;
pub const RSI: PhysicalReg = 6;
pub const RDI: PhysicalReg = 7;
pub const R8: PhysicalReg = 8;
pub const R9: PhysicalReg = 9;
pub const R10: PhysicalReg = 10;
pub const R11: PhysicalReg = 11;
pub const R12: PhysicalReg = 12;
pub const R13: PhysicalReg = 13;
pub const R14: PhysicalReg = 14;
pub const R15: PhysicalReg = 15;

pub const XMM_BASE: PhysicalReg = 16;
pub const XMM0: PhysicalReg = 16;
pub const XMM1: PhysicalReg = 17;
pub const XMM2: PhysicalReg = 18;
pub const XMM3: PhysicalReg = 19;
pub const XMM4: PhysicalReg = 20;
pub const XMM5: PhysicalReg = 21;
pub const XMM6: PhysicalReg = 22;
pub const XMM7: PhysicalReg = 23;
pub const XMM8: PhysicalReg = 24;
pub const XMM9: PhysicalReg = 25;
pub const XMM10: PhysicalReg = 26;
pub const XMM11: PhysicalReg = 27;
pub const XMM12: PhysicalReg = 28;
pub const XMM13: PhysicalReg = 29;
pub const XMM14: PhysicalReg = 30;
pub const XMM15: PhysicalReg = 31;

pub fn is_xmm(reg: PhysicalReg) -> bool {
    reg >= XMM_BASE
}

/// The 4-bit hardware encoding of a register.
pub fn encoding(reg: PhysicalReg) -> u8 {
    if is_xmm(reg) {
        (reg - XMM_BASE) as u8
    } else {
        reg as u8
    }
}
