//! SSA-form mid-level IR for the Banjo compiler
//!
//! Functions consist of basic blocks carrying typed block parameters
//! instead of phi nodes: every control-flow join is a block whose
//! parameters are the merged values, and branch operands carry the
//! argument vectors. Lowering from SIR and the mid-end passes live here
//! as well.

pub mod addr_table;
pub mod func;
pub mod gen;
pub mod instr;
pub mod module;
pub mod passes;
pub mod types;
pub mod verify;

pub use addr_table::AddrTable;
pub use func::{BasicBlock, BlockId, CallingConv, Function, FunctionType, VirtualRegister};
pub use instr::{BranchTarget, Comparison, InstrAttr, Instruction, Opcode, Operand, OperandKind};
pub use module::{
    ExternFunctionDecl, ExternGlobalDecl, Global, GlobalInitializer, Module, Structure,
    StructureMember,
};
pub use types::{Primitive, Type};
