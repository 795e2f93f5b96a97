//! WebAssembly machine opcodes

use super::WasmType;
use banjo_common::{BanjoError, BanjoResult};
use banjo_mcode::Opcode;
use banjo_ssa as ssa;

pub const NOP: Opcode = 0;
pub const END: Opcode = 1;
pub const CALL: Opcode = 2;
pub const DROP: Opcode = 3;
pub const LOCAL_GET: Opcode = 4;
pub const LOCAL_SET: Opcode = 5;
pub const I32_CONST: Opcode = 6;
pub const I64_CONST: Opcode = 7;
pub const F32_CONST: Opcode = 8;
pub const F64_CONST: Opcode = 9;
pub const I32_ADD: Opcode = 10;
pub const I32_SUB: Opcode = 11;
pub const I32_MUL: Opcode = 12;
pub const I32_DIV_S: Opcode = 13;
pub const I32_DIV_U: Opcode = 14;
pub const I32_REM_S: Opcode = 15;
pub const I32_REM_U: Opcode = 16;
pub const I64_ADD: Opcode = 17;
pub const I64_SUB: Opcode = 18;
pub const I64_MUL: Opcode = 19;
pub const I64_DIV_S: Opcode = 20;
pub const I64_DIV_U: Opcode = 21;
pub const I64_REM_S: Opcode = 22;
pub const I64_REM_U: Opcode = 23;
pub const F32_ADD: Opcode = 24;
pub const F64_ADD: Opcode = 25;

/// The stack-machine opcode for an SSA arithmetic operation.
pub fn arith(opcode: ssa::Opcode, ty: WasmType) -> BanjoResult<Opcode> {
    let result = match (opcode, ty) {
        (ssa::Opcode::Add, WasmType::I32) => I32_ADD,
        (ssa::Opcode::Sub, WasmType::I32) => I32_SUB,
        (ssa::Opcode::Mul, WasmType::I32) => I32_MUL,
        (ssa::Opcode::Sdiv, WasmType::I32) => I32_DIV_S,
        (ssa::Opcode::Udiv, WasmType::I32) => I32_DIV_U,
        (ssa::Opcode::Srem, WasmType::I32) => I32_REM_S,
        (ssa::Opcode::Urem, WasmType::I32) => I32_REM_U,
        (ssa::Opcode::Add, WasmType::I64) => I64_ADD,
        (ssa::Opcode::Sub, WasmType::I64) => I64_SUB,
        (ssa::Opcode::Mul, WasmType::I64) => I64_MUL,
        (ssa::Opcode::Sdiv, WasmType::I64) => I64_DIV_S,
        (ssa::Opcode::Udiv, WasmType::I64) => I64_DIV_U,
        (ssa::Opcode::Srem, WasmType::I64) => I64_REM_S,
        (ssa::Opcode::Urem, WasmType::I64) => I64_REM_U,
        (ssa::Opcode::Fadd, WasmType::F32) => F32_ADD,
        (ssa::Opcode::Fadd, WasmType::F64) => F64_ADD,
        _ => {
            return Err(BanjoError::codegen(format!(
                "no wasm encoding for {:?} over {:?}",
                opcode, ty
            )));
        }
    };
    Ok(result)
}

/// The binary encoding of a wasm opcode.
pub fn encoding(opcode: Opcode) -> u8 {
    match opcode {
        END => 0x0B,
        CALL => 0x10,
        DROP => 0x1A,
        LOCAL_GET => 0x20,
        LOCAL_SET => 0x21,
        I32_CONST => 0x41,
        I64_CONST => 0x42,
        F32_CONST => 0x43,
        F64_CONST => 0x44,
        I32_ADD => 0x6A,
        I32_SUB => 0x6B,
        I32_MUL => 0x6C,
        I32_DIV_S => 0x6D,
        I32_DIV_U => 0x6E,
        I32_REM_S => 0x6F,
        I32_REM_U => 0x70,
        I64_ADD => 0x7C,
        I64_SUB => 0x7D,
        I64_MUL => 0x7E,
        I64_DIV_S => 0x7F,
        I64_DIV_U => 0x80,
        I64_REM_S => 0x81,
        I64_REM_U => 0x82,
        F32_ADD => 0x92,
        F64_ADD => 0xA0,
        _ => 0x01,
    }
}
