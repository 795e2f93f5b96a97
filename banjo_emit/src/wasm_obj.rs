//! WebAssembly object building and emission
//!
//! Emits the 1.0 binary format with the `linking` and `reloc.CODE` custom
//! sections from the tool conventions: type (1), import (2), function
//! (3), code (10), data (11) and data count (12) sections, a symbol-table
//! subsection (0x08), and function-index relocations with padded 5-byte
//! LEB placeholders so the linker can patch them in place.

use banjo_common::{BanjoError, BanjoResult};
use banjo_mcode::Module;
use banjo_target::wasm::{opcode, WasmFuncType, WasmModData, WasmType};

use crate::buffer::WriteBuffer;

pub mod reloc {
    pub const FUNCTION_INDEX_LEB: u8 = 0x00;
}

pub mod symbol_flags {
    pub const UNDEFINED: u32 = 0x10;
    pub const EXPORTED: u32 = 0x20;
}

#[derive(Debug, Clone)]
struct WasmRelocEntry {
    reloc_type: u8,
    offset: u32,
    index: u32,
}

#[derive(Debug, Clone)]
struct WasmSymbol {
    flags: u32,
    index: u32,
    name: String,
}

/// Serialize a lowered machine module into a wasm object file.
pub fn emit(module: &Module) -> BanjoResult<Vec<u8>> {
    let mod_data = module
        .target_data
        .as_ref()
        .and_then(|data| data.downcast_ref::<WasmModData>())
        .ok_or_else(|| BanjoError::encode("machine module carries no wasm payload"))?;

    let mut types: Vec<WasmFuncType> = Vec::new();
    let mut out = WriteBuffer::new();

    // Magic and version.
    out.write_data(b"\0asm");
    out.write_u32(1);

    // Types: one per import, then one per function.
    for import in &mod_data.func_imports {
        types.push(import.ty.clone());
    }
    for func in &module.functions {
        let data = mod_data
            .func_data
            .get(&func.name)
            .ok_or_else(|| BanjoError::encode("function has no wasm type data"))?;
        types.push(data.ty.clone());
    }

    emit_type_section(&mut out, &types);
    emit_import_section(&mut out, mod_data);
    emit_function_section(&mut out, module, mod_data);
    emit_data_count_section(&mut out);

    let mut relocs = Vec::new();
    emit_code_section(&mut out, module, mod_data, &mut relocs)?;
    emit_data_section(&mut out);

    let symbols = build_symbols(module, mod_data);
    emit_linking_section(&mut out, &symbols);

    if !relocs.is_empty() {
        emit_reloc_section(&mut out, &relocs);
    }

    Ok(out.into_data())
}

fn value_type(ty: WasmType) -> u8 {
    match ty {
        WasmType::I32 => 0x7F,
        WasmType::I64 => 0x7E,
        WasmType::F32 => 0x7D,
        WasmType::F64 => 0x7C,
    }
}

fn emit_section(out: &mut WriteBuffer, id: u8, data: &WriteBuffer) {
    out.write_u8(id);
    out.write_uleb128(data.size() as u64);
    out.write_buffer(data);
}

fn write_name(data: &mut WriteBuffer, name: &str) {
    data.write_uleb128(name.len() as u64);
    data.write_cstr(name);
}

fn emit_type_section(out: &mut WriteBuffer, types: &[WasmFuncType]) {
    let mut data = WriteBuffer::new();
    data.write_uleb128(types.len() as u64);

    for ty in types {
        data.write_u8(0x60); // function type marker
        data.write_uleb128(ty.params.len() as u64);
        for param in &ty.params {
            data.write_u8(value_type(*param));
        }
        match ty.result_type {
            Some(result) => {
                data.write_uleb128(1);
                data.write_u8(value_type(result));
            }
            None => data.write_uleb128(0),
        }
    }

    emit_section(out, 1, &data);
}

fn emit_import_section(out: &mut WriteBuffer, mod_data: &WasmModData) {
    let mut data = WriteBuffer::new();
    data.write_uleb128(mod_data.func_imports.len() as u64 + 1);

    // The linker-provided linear memory.
    write_name(&mut data, "env");
    write_name(&mut data, "__linear_memory");
    data.write_u8(0x02); // memory import
    data.write_u8(0x00); // no maximum
    data.write_uleb128(0); // minimum size

    for (index, import) in mod_data.func_imports.iter().enumerate() {
        write_name(&mut data, &import.module);
        write_name(&mut data, &import.name);
        data.write_u8(0x00); // function import
        data.write_uleb128(index as u64);
    }

    emit_section(out, 2, &data);
}

fn emit_function_section(out: &mut WriteBuffer, module: &Module, mod_data: &WasmModData) {
    let mut data = WriteBuffer::new();
    data.write_uleb128(module.functions.len() as u64);

    for index in 0..module.functions.len() {
        data.write_uleb128((mod_data.func_imports.len() + index) as u64);
    }

    emit_section(out, 3, &data);
}

fn emit_code_section(
    out: &mut WriteBuffer,
    module: &Module,
    mod_data: &WasmModData,
    relocs: &mut Vec<WasmRelocEntry>,
) -> BanjoResult<()> {
    let mut data = WriteBuffer::new();
    data.write_uleb128(module.functions.len() as u64);

    for func in &module.functions {
        let func_data = mod_data
            .func_data
            .get(&func.name)
            .ok_or_else(|| BanjoError::encode("function has no wasm type data"))?;

        // Locals grouped by consecutive equal types.
        let mut body = WriteBuffer::new();
        let mut groups: Vec<(u32, WasmType)> = Vec::new();
        for local in &func_data.locals {
            match groups.last_mut() {
                Some((count, ty)) if *ty == *local => *count += 1,
                _ => groups.push((1, *local)),
            }
        }
        body.write_uleb128(groups.len() as u64);
        for (count, ty) in &groups {
            body.write_uleb128(*count as u64);
            body.write_u8(value_type(*ty));
        }

        let mut body_relocs = Vec::new();
        encode_body(&mut body, func, &mut body_relocs);

        data.write_uleb128(body.size() as u64);
        let body_start = data.size() as u32;
        data.write_buffer(&body);

        for reloc in body_relocs {
            relocs.push(WasmRelocEntry {
                reloc_type: reloc.reloc_type,
                offset: body_start + reloc.offset,
                index: reloc.index,
            });
        }
    }

    emit_section(out, 10, &data);
    Ok(())
}

fn encode_body(
    body: &mut WriteBuffer,
    func: &banjo_mcode::Function,
    relocs: &mut Vec<WasmRelocEntry>,
) {
    for block in &func.blocks {
        for instr in &block.instrs {
            match instr.opcode {
                opcode::CALL => {
                    body.write_u8(opcode::encoding(opcode::CALL));

                    let index = instr.operands[0].as_int_immediate().unwrap_or(0) as u32;
                    relocs.push(WasmRelocEntry {
                        reloc_type: reloc::FUNCTION_INDEX_LEB,
                        offset: body.size() as u32,
                        index,
                    });

                    // Padded 5-byte LEB so the linker can patch in place.
                    body.write_u8(0x80 | (index & 0x7F) as u8);
                    body.write_u8(0x80 | ((index >> 7) & 0x7F) as u8);
                    body.write_u8(0x80 | ((index >> 14) & 0x7F) as u8);
                    body.write_u8(0x80 | ((index >> 21) & 0x7F) as u8);
                    body.write_u8(((index >> 28) & 0x0F) as u8);
                }
                opcode::LOCAL_GET | opcode::LOCAL_SET => {
                    body.write_u8(opcode::encoding(instr.opcode));
                    body.write_uleb128(instr.operands[0].as_int_immediate().unwrap_or(0) as u64);
                }
                opcode::I32_CONST | opcode::I64_CONST => {
                    body.write_u8(opcode::encoding(instr.opcode));
                    body.write_sleb128(instr.operands[0].as_int_immediate().unwrap_or(0));
                }
                opcode::F32_CONST => {
                    body.write_u8(opcode::encoding(instr.opcode));
                    let value = match &instr.operands[0].kind {
                        banjo_mcode::operand::OperandKind::FpImmediate(v) => *v,
                        _ => 0.0,
                    };
                    body.write_f32(value as f32);
                }
                opcode::F64_CONST => {
                    body.write_u8(opcode::encoding(instr.opcode));
                    let value = match &instr.operands[0].kind {
                        banjo_mcode::operand::OperandKind::FpImmediate(v) => *v,
                        _ => 0.0,
                    };
                    body.write_f64(value);
                }
                opcode::NOP => {}
                other => {
                    body.write_u8(opcode::encoding(other));
                }
            }
        }
    }
}

fn emit_data_section(out: &mut WriteBuffer) {
    let mut data = WriteBuffer::new();
    data.write_uleb128(0);
    emit_section(out, 11, &data);
}

fn emit_data_count_section(out: &mut WriteBuffer) {
    let mut data = WriteBuffer::new();
    data.write_uleb128(0);
    emit_section(out, 12, &data);
}

fn build_symbols(module: &Module, mod_data: &WasmModData) -> Vec<WasmSymbol> {
    let mut symbols = Vec::new();

    for (index, import) in mod_data.func_imports.iter().enumerate() {
        symbols.push(WasmSymbol {
            flags: symbol_flags::UNDEFINED,
            index: index as u32,
            name: import.name.clone(),
        });
    }

    for (index, func) in module.functions.iter().enumerate() {
        symbols.push(WasmSymbol {
            flags: symbol_flags::EXPORTED,
            index: (mod_data.func_imports.len() + index) as u32,
            name: func.name.clone(),
        });
    }

    symbols
}

fn emit_linking_section(out: &mut WriteBuffer, symbols: &[WasmSymbol]) {
    let mut data = WriteBuffer::new();
    write_name(&mut data, "linking");
    data.write_u8(0x02); // linking metadata version

    // Symbol table subsection.
    let mut subsection = WriteBuffer::new();
    subsection.write_uleb128(symbols.len() as u64);

    for symbol in symbols {
        subsection.write_u8(0x00); // function symbol
        subsection.write_uleb128(symbol.flags as u64);
        subsection.write_uleb128(symbol.index as u64);
        if symbol.flags & symbol_flags::UNDEFINED == 0 {
            write_name(&mut subsection, &symbol.name);
        }
    }

    data.write_u8(0x08); // subsection type: symbol table
    data.write_uleb128(subsection.size() as u64);
    data.write_buffer(&subsection);

    emit_section(out, 0, &data);
}

fn emit_reloc_section(out: &mut WriteBuffer, relocs: &[WasmRelocEntry]) {
    let mut data = WriteBuffer::new();
    write_name(&mut data, "reloc.CODE");
    // Section index of the code section in this layout: type, import,
    // function, data count, code.
    data.write_uleb128(4);
    data.write_uleb128(relocs.len() as u64);

    for reloc in relocs {
        data.write_u8(reloc.reloc_type);
        data.write_uleb128(reloc.offset as u64);
        data.write_uleb128(reloc.index as u64);
    }

    emit_section(out, 0, &data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_module_header() {
        let mut module = Module::new();
        module.target_data = Some(Box::new(WasmModData::default()));

        let bytes = emit(&module).unwrap();
        assert_eq!(&bytes[0..4], b"\0asm");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);
    }

    #[test]
    fn test_rejects_module_without_payload() {
        let module = Module::new();
        assert!(emit(&module).is_err());
    }
}
