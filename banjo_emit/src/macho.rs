//! Mach-O 64-bit object building and emission
//!
//! One `LC_SEGMENT_64` load command carrying `__text` (and `__data` when
//! present), plus `LC_SYMTAB` and `LC_DYSYMTAB`. Symbols are grouped
//! local, external, undefined; relocations use the ARM64 types.

use crate::binmod::{BinModule, BinSectionKind, BinSymbolKind, BinSymbolUseKind};
use crate::buffer::WriteBuffer;
use banjo_common::BanjoResult;

pub mod reloc_type {
    pub const ARM64_UNSIGNED: u8 = 0;
    pub const ARM64_BRANCH26: u8 = 2;
    pub const ARM64_PAGE21: u8 = 3;
    pub const ARM64_PAGEOFF12: u8 = 4;
}

pub mod section_flags {
    pub const SOME_INSTRUCTIONS: u32 = 0x00000400;
    pub const PURE_INSTRUCTIONS: u32 = 0x80000000;
}

pub mod vm_prot {
    pub const READ: u32 = 0x01;
    pub const WRITE: u32 = 0x02;
    pub const EXECUTE: u32 = 0x04;
}

#[derive(Debug, Clone)]
pub struct MachORelocation {
    pub address: i32,
    pub symbol_index: u32,
    pub pc_rel: bool,
    /// log2 of the relocation width in bytes
    pub length: u8,
    pub external: bool,
    pub reloc_type: u8,
}

#[derive(Debug, Clone)]
pub struct MachOSection {
    pub name: String,
    pub segment_name: String,
    pub data: Vec<u8>,
    pub relocations: Vec<MachORelocation>,
    pub flags: u32,
}

#[derive(Debug, Clone)]
pub struct MachOSymbol {
    pub name: String,
    pub external: bool,
    pub undefined: bool,
    pub section_number: u8,
    pub value: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MachOSymbolGroup {
    pub index: u32,
    pub count: u32,
}

pub struct MachOFile {
    pub cpu_type: u32,
    pub cpu_sub_type: u32,
    pub sections: Vec<MachOSection>,
    pub symbols: Vec<MachOSymbol>,
    pub local_symbols: MachOSymbolGroup,
    pub external_symbols: MachOSymbolGroup,
    pub undefined_symbols: MachOSymbolGroup,
}

pub const CPU_TYPE_ARM64: u32 = 0x0100000C;

pub struct MachOBuilder;

impl MachOBuilder {
    pub fn build(module: BinModule) -> MachOFile {
        // Group symbols local, external-defined, undefined; remember the
        // new index of every definition for relocations.
        let mut order: Vec<usize> = (0..module.symbol_defs.len()).collect();
        order.sort_by_key(|index| {
            let def = &module.symbol_defs[*index];
            match (def.kind, def.global) {
                (BinSymbolKind::Unknown, _) => 2,
                (_, true) => 1,
                (_, false) => 0,
            }
        });

        let mut new_indices = vec![0u32; module.symbol_defs.len()];
        let mut symbols = Vec::with_capacity(order.len());
        let mut local_count = 0;
        let mut external_count = 0;
        let mut undefined_count = 0;

        for (new_index, old_index) in order.iter().enumerate() {
            let def = &module.symbol_defs[*old_index];
            new_indices[*old_index] = new_index as u32;

            let undefined = def.kind == BinSymbolKind::Unknown;
            let section_number = match def.kind {
                BinSymbolKind::Unknown => 0,
                BinSymbolKind::DataLabel | BinSymbolKind::AddrTable => 2,
                _ => 1,
            };

            if undefined {
                undefined_count += 1;
            } else if def.global {
                external_count += 1;
            } else {
                local_count += 1;
            }

            symbols.push(MachOSymbol {
                name: def.name.clone(),
                external: def.global,
                undefined,
                section_number,
                value: def.offset as u64,
            });
        }

        let mut text_relocations = Vec::new();
        for use_ in &module.symbol_uses {
            if use_.section != BinSectionKind::Text {
                continue;
            }

            let (reloc_type, pc_rel, length) = match use_.kind {
                BinSymbolUseKind::Branch26 => (reloc_type::ARM64_BRANCH26, true, 2),
                BinSymbolUseKind::Page21 => (reloc_type::ARM64_PAGE21, true, 2),
                BinSymbolUseKind::PageOff12 => (reloc_type::ARM64_PAGEOFF12, false, 2),
                BinSymbolUseKind::Abs64 => (reloc_type::ARM64_UNSIGNED, false, 3),
                _ => continue,
            };

            text_relocations.push(MachORelocation {
                address: use_.address as i32,
                symbol_index: new_indices[use_.symbol_index as usize],
                pc_rel,
                length,
                external: true,
                reloc_type,
            });
        }

        let mut sections = vec![MachOSection {
            name: "__text".to_string(),
            segment_name: "__TEXT".to_string(),
            data: module.text.into_data(),
            relocations: text_relocations,
            flags: section_flags::SOME_INSTRUCTIONS | section_flags::PURE_INSTRUCTIONS,
        }];

        let data = module.data.into_data();
        if !data.is_empty() {
            sections.push(MachOSection {
                name: "__data".to_string(),
                segment_name: "__DATA".to_string(),
                data,
                relocations: Vec::new(),
                flags: 0,
            });
        }

        MachOFile {
            cpu_type: CPU_TYPE_ARM64,
            cpu_sub_type: 0,
            sections,
            symbols,
            local_symbols: MachOSymbolGroup { index: 0, count: local_count },
            external_symbols: MachOSymbolGroup {
                index: local_count,
                count: external_count,
            },
            undefined_symbols: MachOSymbolGroup {
                index: local_count + external_count,
                count: undefined_count,
            },
        }
    }
}

/// Serialize a Mach-O object to bytes.
pub fn emit(file: &MachOFile) -> BanjoResult<Vec<u8>> {
    let mut out = WriteBuffer::new();

    let segment_command_size = 72 + 80 * file.sections.len() as u32;
    let commands_size = segment_command_size + 24 + 80;
    let data_start = 32 + commands_size;

    // Section data layout, then relocations, then symtab, then strtab.
    let mut section_offsets = Vec::with_capacity(file.sections.len());
    let mut position = data_start;
    let mut total_section_size = 0u64;
    for section in &file.sections {
        section_offsets.push(position);
        position += section.data.len() as u32;
        total_section_size += section.data.len() as u64;
    }

    let mut reloc_offsets = Vec::with_capacity(file.sections.len());
    for section in &file.sections {
        reloc_offsets.push(position);
        position += section.relocations.len() as u32 * 8;
    }

    let symtab_offset = position;
    let strtab_offset = symtab_offset + file.symbols.len() as u32 * 16;

    // The first string table byte is reserved so index zero means a null
    // name.
    let mut string_table_size = 1u32;
    for symbol in &file.symbols {
        string_table_size += symbol.name.len() as u32 + 1;
    }
    while string_table_size % 8 != 0 {
        string_table_size += 1;
    }

    // Header.
    out.write_u32(0xFEEDFACF);
    out.write_u32(file.cpu_type);
    out.write_u32(file.cpu_sub_type);
    out.write_u32(0x1); // MH_OBJECT
    out.write_u32(3); // number of load commands
    out.write_u32(commands_size);
    out.write_u32(0); // flags
    out.write_u32(0); // reserved

    // LC_SEGMENT_64.
    out.write_u32(0x19);
    out.write_u32(segment_command_size);
    write_name_padded(&mut out, "");
    out.write_u64(0); // address in memory
    out.write_u64(total_section_size);
    out.write_u64(data_start as u64);
    out.write_u64(total_section_size);
    out.write_u32(vm_prot::READ | vm_prot::WRITE | vm_prot::EXECUTE);
    out.write_u32(vm_prot::READ | vm_prot::WRITE | vm_prot::EXECUTE);
    out.write_u32(file.sections.len() as u32);
    out.write_u32(0); // flags

    let mut address = 0u64;
    for (index, section) in file.sections.iter().enumerate() {
        write_name_padded(&mut out, &section.name);
        write_name_padded(&mut out, &section.segment_name);
        out.write_u64(address);
        out.write_u64(section.data.len() as u64);
        out.write_u32(section_offsets[index]);
        out.write_u32(0); // alignment
        out.write_u32(reloc_offsets[index]);
        out.write_u32(section.relocations.len() as u32);
        out.write_u32(section.flags);
        out.write_u32(0);
        out.write_u32(0);
        out.write_u32(0);
        address += section.data.len() as u64;
    }

    // LC_SYMTAB.
    out.write_u32(0x2);
    out.write_u32(24);
    out.write_u32(symtab_offset);
    out.write_u32(file.symbols.len() as u32);
    out.write_u32(strtab_offset);
    out.write_u32(string_table_size);

    // LC_DYSYMTAB.
    out.write_u32(0xB);
    out.write_u32(80);
    out.write_u32(file.local_symbols.index);
    out.write_u32(file.local_symbols.count);
    out.write_u32(file.external_symbols.index);
    out.write_u32(file.external_symbols.count);
    out.write_u32(file.undefined_symbols.index);
    out.write_u32(file.undefined_symbols.count);
    for _ in 0..12 {
        out.write_u32(0);
    }

    for section in &file.sections {
        out.write_data(&section.data);
    }

    for section in &file.sections {
        for reloc in &section.relocations {
            out.write_i32(reloc.address);

            let value = reloc.symbol_index & 0x00FF_FFFF;
            let pc_rel = (reloc.pc_rel as u32) << 24;
            let length = (reloc.length as u32) << 25;
            let external = (reloc.external as u32) << 27;
            let reloc_type = (reloc.reloc_type as u32) << 28;
            out.write_u32(value | pc_rel | length | external | reloc_type);
        }
    }

    // Symbol entries reference the string table by byte index; index zero
    // is the reserved null name.
    let mut string_index = 1u32;
    for symbol in &file.symbols {
        out.write_u32(string_index);

        let n_type = if symbol.undefined {
            0x00 | (symbol.external as u8)
        } else {
            0x0E | (symbol.external as u8)
        };
        out.write_u8(n_type);
        out.write_u8(symbol.section_number);
        out.write_u16(0); // description
        out.write_u64(symbol.value);

        string_index += symbol.name.len() as u32 + 1;
    }

    out.write_u8(0);
    let mut written = 1;
    for symbol in &file.symbols {
        out.write_cstr(&symbol.name);
        out.write_u8(0);
        written += symbol.name.len() as u32 + 1;
    }
    while written % 8 != 0 {
        out.write_u8(0);
        written += 1;
    }

    Ok(out.into_data())
}

fn write_name_padded(out: &mut WriteBuffer, name: &str) {
    debug_assert!(name.len() <= 16);
    out.write_data(name.as_bytes());
    out.write_zeroes(16 - name.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binmod::BinSymbolDef;

    #[test]
    fn test_symbol_grouping() {
        let mut module = BinModule::default();
        module.symbol_defs.push(BinSymbolDef {
            name: "_puts".to_string(),
            kind: BinSymbolKind::Unknown,
            offset: 0,
            global: true,
        });
        module.symbol_defs.push(BinSymbolDef {
            name: "_main".to_string(),
            kind: BinSymbolKind::TextFunc,
            offset: 0,
            global: true,
        });
        module.symbol_defs.push(BinSymbolDef {
            name: "_local".to_string(),
            kind: BinSymbolKind::DataLabel,
            offset: 0,
            global: false,
        });

        let file = MachOBuilder::build(module);

        assert_eq!(file.local_symbols.count, 1);
        assert_eq!(file.external_symbols.count, 1);
        assert_eq!(file.undefined_symbols.count, 1);
        assert_eq!(file.symbols[0].name, "_local");
        assert_eq!(file.symbols[1].name, "_main");
        assert_eq!(file.symbols[2].name, "_puts");
    }

    #[test]
    fn test_header_magic() {
        let mut module = BinModule::default();
        module.text.write_u32(0xD65F03C0); // ret
        let file = MachOBuilder::build(module);
        let bytes = emit(&file).unwrap();

        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 0xFEEDFACF);
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            CPU_TYPE_ARM64
        );
    }
}
