//! Registers: physical, virtual, and their classes

use serde::{Deserialize, Serialize};

/// A target-assigned physical register number
pub type PhysicalReg = u32;

/// A virtual register number, unique within a function
pub type VirtualReg = u32;

/// Register class partitioning used by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterClass {
    /// General-purpose integer registers
    Gpr,
    /// Floating-point / vector registers
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    Physical(PhysicalReg),
    Virtual(VirtualReg),
}

impl Register {
    pub fn is_physical(&self) -> bool {
        matches!(self, Register::Physical(_))
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Register::Virtual(_))
    }

    pub fn as_physical(&self) -> Option<PhysicalReg> {
        match self {
            Register::Physical(reg) => Some(*reg),
            _ => None,
        }
    }

    pub fn as_virtual(&self) -> Option<VirtualReg> {
        match self {
            Register::Virtual(reg) => Some(*reg),
            _ => None,
        }
    }
}
