//! SSA instructions and operands

use crate::func::{BlockId, VirtualRegister};
use crate::types::Type;
use serde::{Deserialize, Serialize};

/// SSA opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // allocation
    Alloca,
    // memory
    Load,
    Store,
    LoadArg,
    MemberPtr,
    OffsetPtr,
    Copy,
    // integer ALU
    Add,
    Sub,
    Mul,
    Sdiv,
    Srem,
    Udiv,
    Urem,
    // floating ALU
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    // bit ops and shifts
    And,
    Or,
    Xor,
    Shl,
    Shr,
    // conversions
    Uextend,
    Sextend,
    Truncate,
    Fpromote,
    Fdemote,
    Utof,
    Stof,
    Ftou,
    Ftos,
    // control
    Jmp,
    Cjmp,
    Fcjmp,
    Select,
    Call,
    Ret,
    // misc
    Sqrt,
}

impl Opcode {
    pub fn is_branching(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Cjmp | Opcode::Fcjmp)
    }

    /// Whether removing an unused result of this opcode is observable.
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            Opcode::Store
                | Opcode::Copy
                | Opcode::Call
                | Opcode::Ret
                | Opcode::Jmp
                | Opcode::Cjmp
                | Opcode::Fcjmp
        )
    }
}

/// Comparison tokens carried by CJMP/FCJMP/SELECT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
    Feq,
    Fne,
    Fgt,
    Fge,
    Flt,
    Fle,
}

impl Comparison {
    pub fn negate(self) -> Comparison {
        match self {
            Comparison::Eq => Comparison::Ne,
            Comparison::Ne => Comparison::Eq,
            Comparison::Ugt => Comparison::Ule,
            Comparison::Uge => Comparison::Ult,
            Comparison::Ult => Comparison::Uge,
            Comparison::Ule => Comparison::Ugt,
            Comparison::Sgt => Comparison::Sle,
            Comparison::Sge => Comparison::Slt,
            Comparison::Slt => Comparison::Sge,
            Comparison::Sle => Comparison::Sgt,
            Comparison::Feq => Comparison::Fne,
            Comparison::Fne => Comparison::Feq,
            Comparison::Fgt => Comparison::Fle,
            Comparison::Fge => Comparison::Flt,
            Comparison::Flt => Comparison::Fge,
            Comparison::Fle => Comparison::Fgt,
        }
    }
}

/// A branch edge: target block plus the values bound to its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BranchTarget {
    pub block: BlockId,
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperandKind {
    IntImmediate(i128),
    FpImmediate(f64),
    Register(VirtualRegister),
    /// Index of a function in the owning module
    Func(u32),
    /// Index of a global in the owning module
    Global(u32),
    /// Index of an external function declaration
    ExternFunc(u32),
    /// Index of an external global declaration
    ExternGlobal(u32),
    BranchTarget(BranchTarget),
    Comparison(Comparison),
    /// A bare type token (e.g. the result type operand of CALL)
    TypeToken,
    Undef,
}

/// An SSA operand: a tagged value plus its type
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub kind: OperandKind,
    pub ty: Type,
}

impl Operand {
    pub fn int_immediate(value: i128, ty: Type) -> Operand {
        Operand { kind: OperandKind::IntImmediate(value), ty }
    }

    pub fn fp_immediate(value: f64, ty: Type) -> Operand {
        Operand { kind: OperandKind::FpImmediate(value), ty }
    }

    pub fn register(reg: VirtualRegister, ty: Type) -> Operand {
        Operand { kind: OperandKind::Register(reg), ty }
    }

    pub fn func(index: u32, ty: Type) -> Operand {
        Operand { kind: OperandKind::Func(index), ty }
    }

    pub fn global(index: u32, ty: Type) -> Operand {
        Operand { kind: OperandKind::Global(index), ty }
    }

    pub fn extern_func(index: u32, ty: Type) -> Operand {
        Operand { kind: OperandKind::ExternFunc(index), ty }
    }

    pub fn extern_global(index: u32, ty: Type) -> Operand {
        Operand { kind: OperandKind::ExternGlobal(index), ty }
    }

    pub fn branch_target(block: BlockId, args: Vec<Operand>) -> Operand {
        Operand {
            kind: OperandKind::BranchTarget(BranchTarget { block, args }),
            ty: Type::VOID,
        }
    }

    pub fn comparison(comparison: Comparison) -> Operand {
        Operand { kind: OperandKind::Comparison(comparison), ty: Type::VOID }
    }

    pub fn type_token(ty: Type) -> Operand {
        Operand { kind: OperandKind::TypeToken, ty }
    }

    pub fn undef(ty: Type) -> Operand {
        Operand { kind: OperandKind::Undef, ty }
    }

    pub fn as_register(&self) -> Option<VirtualRegister> {
        match self.kind {
            OperandKind::Register(reg) => Some(reg),
            _ => None,
        }
    }

    pub fn as_int_immediate(&self) -> Option<i128> {
        match self.kind {
            OperandKind::IntImmediate(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_branch_target(&self) -> Option<&BranchTarget> {
        match &self.kind {
            OperandKind::BranchTarget(target) => Some(target),
            _ => None,
        }
    }

    pub fn as_branch_target_mut(&mut self) -> Option<&mut BranchTarget> {
        match &mut self.kind {
            OperandKind::BranchTarget(target) => Some(target),
            _ => None,
        }
    }

    pub fn as_comparison(&self) -> Option<Comparison> {
        match self.kind {
            OperandKind::Comparison(comparison) => Some(comparison),
            _ => None,
        }
    }

    /// Whether the operand names a symbol in the module.
    pub fn is_symbol(&self) -> bool {
        matches!(
            self.kind,
            OperandKind::Func(_)
                | OperandKind::Global(_)
                | OperandKind::ExternFunc(_)
                | OperandKind::ExternGlobal(_)
        )
    }
}

/// Instruction attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrAttr {
    /// Call to a variadic function; the index of the first variadic argument
    Variadic(u32),
}

pub const FLAG_ARG_STORE: u32 = 1 << 0;
pub const FLAG_SAVE_ARG: u32 = 1 << 1;

/// An SSA instruction: opcode, optional destination register, operands
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dest: Option<VirtualRegister>,
    pub operands: Vec<Operand>,
    pub attr: Option<InstrAttr>,
    pub flags: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, dest: Option<VirtualRegister>, operands: Vec<Operand>) -> Self {
        Self { opcode, dest, operands, attr: None, flags: 0 }
    }

    pub fn with_attr(mut self, attr: InstrAttr) -> Self {
        self.attr = Some(attr);
        self
    }

    pub fn is_branching(&self) -> bool {
        self.opcode.is_branching()
    }

    pub fn is_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    /// Branch targets of a terminator, in operand order.
    pub fn branch_targets(&self) -> impl Iterator<Item = &BranchTarget> {
        self.operands.iter().filter_map(|op| op.as_branch_target())
    }
}

/// The result type of an instruction, derivable from its operand types.
pub fn result_type(instr: &Instruction, addr_type: Type) -> Type {
    match instr.opcode {
        Opcode::Alloca | Opcode::MemberPtr | Opcode::OffsetPtr => addr_type,
        Opcode::Load
        | Opcode::LoadArg
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Sdiv
        | Opcode::Srem
        | Opcode::Udiv
        | Opcode::Urem
        | Opcode::Fadd
        | Opcode::Fsub
        | Opcode::Fmul
        | Opcode::Fdiv
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Call
        | Opcode::Sqrt => instr.operands[0].ty.clone(),
        Opcode::Uextend
        | Opcode::Sextend
        | Opcode::Truncate
        | Opcode::Fpromote
        | Opcode::Fdemote
        | Opcode::Utof
        | Opcode::Stof
        | Opcode::Ftou
        | Opcode::Ftos => instr.operands[1].ty.clone(),
        Opcode::Select => instr.operands[3].ty.clone(),
        Opcode::Store | Opcode::Copy | Opcode::Jmp | Opcode::Cjmp | Opcode::Fcjmp | Opcode::Ret => {
            Type::VOID
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_result_type_conversion() {
        let instr = Instruction::new(
            Opcode::Sextend,
            Some(0),
            vec![
                Operand::register(1, Type::primitive(Primitive::I32)),
                Operand::type_token(Type::primitive(Primitive::I64)),
            ],
        );
        assert_eq!(result_type(&instr, Type::ADDR), Type::primitive(Primitive::I64));
    }

    #[test]
    fn test_comparison_negation_roundtrip() {
        for cmp in [Comparison::Eq, Comparison::Slt, Comparison::Uge, Comparison::Fgt] {
            assert_eq!(cmp.negate().negate(), cmp);
        }
    }
}
