//! ELF64 relocatable object building and emission
//!
//! Produces a System V gABI relocatable object: `.text`, `.data`,
//! `.shstrtab`, `.strtab`, `.symtab` and one `.rela` section per section
//! with relocations. Local symbols precede globals and the symbol table's
//! `info` field is the index of the first non-local symbol.

use crate::binmod::{BinModule, BinSectionKind, BinSymbolKind, BinSymbolUseKind};
use crate::buffer::WriteBuffer;
use banjo_common::BanjoResult;

pub mod section_type {
    pub const PROGBITS: u32 = 1;
    pub const SYMTAB: u32 = 2;
    pub const STRTAB: u32 = 3;
    pub const RELA: u32 = 4;
}

pub mod section_flags {
    pub const WRITE: u64 = 0x1;
    pub const ALLOC: u64 = 0x2;
    pub const EXECINSTR: u64 = 0x4;
}

pub mod symbol_binding {
    pub const LOCAL: u8 = 0;
    pub const GLOBAL: u8 = 1;
}

pub mod symbol_type {
    pub const NOTYPE: u8 = 0;
    pub const OBJECT: u8 = 1;
    pub const FUNC: u8 = 2;
    pub const SECTION: u8 = 3;
}

pub mod reloc_type {
    pub const X86_64_64: u32 = 1;
    pub const X86_64_PC32: u32 = 2;
    pub const X86_64_PLT32: u32 = 4;
    pub const X86_64_GOTPCREL: u32 = 9;
}

pub mod machine {
    pub const X86_64: u16 = 62;
    pub const AARCH64: u16 = 183;
}

#[derive(Debug, Clone, Default)]
pub struct ElfSymbol {
    pub name_offset: u32,
    pub binding: u8,
    pub sym_type: u8,
    pub section_index: u16,
    pub value: u64,
}

#[derive(Debug, Clone)]
pub struct ElfRelocation {
    pub offset: u64,
    pub symbol_index: u32,
    pub reloc_type: u32,
    pub addend: i64,
}

#[derive(Debug, Clone)]
pub enum ElfSectionData {
    Bytes(Vec<u8>),
    Symbols(Vec<ElfSymbol>),
    Relocations(Vec<ElfRelocation>),
}

#[derive(Debug, Clone)]
pub struct ElfSection {
    pub name_offset: u32,
    pub section_type: u32,
    pub flags: u64,
    pub link: u32,
    pub info: u32,
    pub alignment: u64,
    pub entry_size: u64,
}

pub struct ElfFile {
    pub machine: u16,
    pub sections: Vec<(ElfSection, ElfSectionData)>,
    pub shstrtab_index: u16,
}

pub struct ElfBuilder {
    shstrtab: Vec<u8>,
    strtab: Vec<u8>,
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfBuilder {
    pub fn new() -> Self {
        // The first byte of a string table is defined to be null.
        Self {
            shstrtab: vec![0],
            strtab: vec![0],
        }
    }

    fn add_section_name(&mut self, name: &str) -> u32 {
        let offset = self.shstrtab.len() as u32;
        self.shstrtab.extend_from_slice(name.as_bytes());
        self.shstrtab.push(0);
        offset
    }

    fn add_string(&mut self, name: &str) -> u32 {
        if name.is_empty() {
            return 0;
        }
        let offset = self.strtab.len() as u32;
        self.strtab.extend_from_slice(name.as_bytes());
        self.strtab.push(0);
        offset
    }

    pub fn build(mut self, module: BinModule, machine: u16) -> ElfFile {
        let has_addr_table = module.addr_table_data.is_some();

        // Fixed section order: null, .text, .data, [.bnjatbl], .shstrtab,
        // .strtab, .symtab, then the .rela sections.
        let text_index: u16 = 1;
        let data_index: u16 = 2;
        let addr_table_index: u16 = 3;
        let base = if has_addr_table { 4 } else { 3 };
        let strtab_index = base + 1;
        let symtab_index = base + 2;

        let text_name = self.add_section_name(".text");
        let data_name = self.add_section_name(".data");
        let addr_table_name = if has_addr_table {
            Some(self.add_section_name(".bnjatbl"))
        } else {
            None
        };
        let shstrtab_name = self.add_section_name(".shstrtab");
        let strtab_name = self.add_section_name(".strtab");
        let symtab_name = self.add_section_name(".symtab");

        // Symbols: null entry, one SECTION symbol per progbits section,
        // then locals before globals.
        let mut symbols = vec![ElfSymbol::default()];
        symbols.push(ElfSymbol {
            sym_type: symbol_type::SECTION,
            section_index: text_index,
            ..Default::default()
        });
        symbols.push(ElfSymbol {
            sym_type: symbol_type::SECTION,
            section_index: data_index,
            ..Default::default()
        });
        let mut elf_symbol_indices = vec![0u32; module.symbol_defs.len()];

        for pass in 0..2 {
            let want_global = pass == 1;

            for (index, def) in module.symbol_defs.iter().enumerate() {
                if def.global != want_global {
                    continue;
                }

                let (sym_type, section_index) = match def.kind {
                    BinSymbolKind::TextFunc => (symbol_type::FUNC, text_index),
                    BinSymbolKind::TextLabel => (symbol_type::NOTYPE, text_index),
                    BinSymbolKind::DataLabel => (symbol_type::OBJECT, data_index),
                    BinSymbolKind::AddrTable => (symbol_type::OBJECT, addr_table_index),
                    BinSymbolKind::Unknown => (symbol_type::NOTYPE, 0),
                };

                elf_symbol_indices[index] = symbols.len() as u32;
                let name_offset = self.add_string(&def.name);
                symbols.push(ElfSymbol {
                    name_offset,
                    binding: if def.global {
                        symbol_binding::GLOBAL
                    } else {
                        symbol_binding::LOCAL
                    },
                    sym_type,
                    section_index,
                    value: def.offset as u64,
                });
            }
        }

        let first_global = symbols
            .iter()
            .position(|s| s.binding == symbol_binding::GLOBAL)
            .unwrap_or(symbols.len()) as u32;

        // Relocations grouped by target section.
        let mut text_relocs = Vec::new();
        let mut data_relocs = Vec::new();
        let mut addr_table_relocs = Vec::new();

        for use_ in &module.symbol_uses {
            let (reloc_type, addend) = match use_.kind {
                BinSymbolUseKind::Rel32 => (reloc_type::X86_64_PC32, -4 + use_.addend as i64),
                BinSymbolUseKind::Plt32 => (reloc_type::X86_64_PLT32, -4 + use_.addend as i64),
                BinSymbolUseKind::GotPcRel32 => {
                    (reloc_type::X86_64_GOTPCREL, -4 + use_.addend as i64)
                }
                BinSymbolUseKind::Abs64 => (reloc_type::X86_64_64, use_.addend as i64),
                // AArch64 objects go through the Mach-O path.
                _ => continue,
            };

            let reloc = ElfRelocation {
                offset: use_.address as u64,
                symbol_index: elf_symbol_indices[use_.symbol_index as usize],
                reloc_type,
                addend,
            };

            match use_.section {
                BinSectionKind::Text => text_relocs.push(reloc),
                BinSectionKind::Data => data_relocs.push(reloc),
                BinSectionKind::AddrTable => addr_table_relocs.push(reloc),
            }
        }

        let mut sections: Vec<(ElfSection, ElfSectionData)> = Vec::new();

        sections.push((
            ElfSection {
                name_offset: text_name,
                section_type: section_type::PROGBITS,
                flags: section_flags::ALLOC | section_flags::EXECINSTR,
                link: 0,
                info: 0,
                alignment: 16,
                entry_size: 0,
            },
            ElfSectionData::Bytes(module.text.into_data()),
        ));
        sections.push((
            ElfSection {
                name_offset: data_name,
                section_type: section_type::PROGBITS,
                flags: section_flags::ALLOC | section_flags::WRITE,
                link: 0,
                info: 0,
                alignment: 4,
                entry_size: 0,
            },
            ElfSectionData::Bytes(module.data.into_data()),
        ));

        if let Some(addr_table_data) = module.addr_table_data {
            sections.push((
                ElfSection {
                    name_offset: addr_table_name.unwrap(),
                    section_type: section_type::PROGBITS,
                    flags: section_flags::ALLOC | section_flags::WRITE,
                    link: 0,
                    info: 0,
                    alignment: 16,
                    entry_size: 0,
                },
                ElfSectionData::Bytes(addr_table_data.into_data()),
            ));
        }

        sections.push((
            ElfSection {
                name_offset: shstrtab_name,
                section_type: section_type::STRTAB,
                flags: 0,
                link: 0,
                info: 0,
                alignment: 1,
                entry_size: 0,
            },
            ElfSectionData::Bytes(self.shstrtab.clone()),
        ));
        sections.push((
            ElfSection {
                name_offset: strtab_name,
                section_type: section_type::STRTAB,
                flags: 0,
                link: 0,
                info: 0,
                alignment: 1,
                entry_size: 0,
            },
            ElfSectionData::Bytes(self.strtab.clone()),
        ));
        sections.push((
            ElfSection {
                name_offset: symtab_name,
                section_type: section_type::SYMTAB,
                flags: 0,
                link: strtab_index as u32,
                info: first_global,
                alignment: 8,
                entry_size: 24,
            },
            ElfSectionData::Symbols(symbols),
        ));

        let mut add_rela =
            |builder: &mut Self,
             sections: &mut Vec<(ElfSection, ElfSectionData)>,
             name: &str,
             target: u16,
             relocs: Vec<ElfRelocation>| {
                if relocs.is_empty() {
                    return;
                }
                let name_offset = builder.add_section_name(name);
                sections.push((
                    ElfSection {
                        name_offset,
                        section_type: section_type::RELA,
                        flags: 0,
                        link: symtab_index as u32,
                        info: target as u32,
                        alignment: 8,
                        entry_size: 24,
                    },
                    ElfSectionData::Relocations(relocs),
                ));
            };

        add_rela(&mut self, &mut sections, ".rela.text", text_index, text_relocs);
        add_rela(&mut self, &mut sections, ".rela.data", data_index, data_relocs);
        if has_addr_table {
            add_rela(
                &mut self,
                &mut sections,
                ".rela.bnjatbl",
                addr_table_index,
                addr_table_relocs,
            );
        }

        // Late names landed in the shstrtab after it was copied; refresh it.
        let shstrtab_position = base as usize - 1;
        sections[shstrtab_position].1 = ElfSectionData::Bytes(self.shstrtab.clone());

        ElfFile {
            machine,
            sections,
            shstrtab_index: base,
        }
    }
}

fn section_data_size(data: &ElfSectionData) -> u64 {
    match data {
        ElfSectionData::Bytes(bytes) => bytes.len() as u64,
        ElfSectionData::Symbols(symbols) => symbols.len() as u64 * 24,
        ElfSectionData::Relocations(relocs) => relocs.len() as u64 * 24,
    }
}

/// Serialize an ELF file to bytes.
pub fn emit(file: &ElfFile) -> BanjoResult<Vec<u8>> {
    let mut out = WriteBuffer::new();

    let num_sections = file.sections.len() as u16 + 1;
    let header_size = 64u64;
    let section_headers_size = 64 * num_sections as u64;

    // Data offsets are laid out after the headers.
    let mut data_offsets = Vec::with_capacity(file.sections.len());
    let mut position = header_size + section_headers_size;
    for (_, data) in &file.sections {
        data_offsets.push(position);
        position += section_data_size(data);
    }

    // Identification.
    out.write_u8(0x7F);
    out.write_u8(b'E');
    out.write_u8(b'L');
    out.write_u8(b'F');
    out.write_u8(2); // 64-bit
    out.write_u8(1); // little-endian
    out.write_u8(1); // current version
    out.write_u8(0); // System V ABI
    out.write_u8(0); // ABI version
    out.write_zeroes(7);

    out.write_u16(1); // relocatable object
    out.write_u16(file.machine);
    out.write_u32(1); // current version
    out.write_u64(0); // entry point
    out.write_u64(0); // program header offset
    out.write_u64(header_size); // section header offset
    out.write_u32(0); // flags
    out.write_u16(64); // header size
    out.write_u16(0); // program header entry size
    out.write_u16(0); // program header count
    out.write_u16(64); // section header entry size
    out.write_u16(num_sections);
    out.write_u16(file.shstrtab_index); // shstrtab section index

    // The null section header.
    out.write_zeroes(64);

    for (index, (section, data)) in file.sections.iter().enumerate() {
        out.write_u32(section.name_offset);
        out.write_u32(section.section_type);
        out.write_u64(section.flags);
        out.write_u64(0); // virtual address
        out.write_u64(data_offsets[index]);
        out.write_u64(section_data_size(data));
        out.write_u32(section.link);
        out.write_u32(section.info);
        out.write_u64(section.alignment);
        out.write_u64(section.entry_size);
    }

    for (_, data) in &file.sections {
        match data {
            ElfSectionData::Bytes(bytes) => out.write_data(bytes),
            ElfSectionData::Symbols(symbols) => {
                for symbol in symbols {
                    out.write_u32(symbol.name_offset);
                    out.write_u8(symbol.sym_type | (symbol.binding << 4));
                    out.write_u8(0); // reserved
                    out.write_u16(symbol.section_index);
                    out.write_u64(symbol.value);
                    out.write_u64(0); // size
                }
            }
            ElfSectionData::Relocations(relocs) => {
                for reloc in relocs {
                    out.write_u64(reloc.offset);
                    out.write_u64(reloc.reloc_type as u64 | ((reloc.symbol_index as u64) << 32));
                    out.write_i64(reloc.addend);
                }
            }
        }
    }

    Ok(out.into_data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binmod::{BinSymbolDef, BinSymbolUse};

    fn test_module() -> BinModule {
        let mut module = BinModule::default();
        module.text.write_data(&[0xC3]);
        module.data.write_u32(7);
        module.symbol_defs.push(BinSymbolDef {
            name: "local_data".to_string(),
            kind: BinSymbolKind::DataLabel,
            offset: 0,
            global: false,
        });
        module.symbol_defs.push(BinSymbolDef {
            name: "f".to_string(),
            kind: BinSymbolKind::TextFunc,
            offset: 0,
            global: true,
        });
        module.symbol_uses.push(BinSymbolUse {
            address: 0,
            addend: 0,
            symbol_index: 0,
            kind: BinSymbolUseKind::Rel32,
            section: BinSectionKind::Text,
        });
        module
    }

    #[test]
    fn test_locals_precede_globals() {
        let file = ElfBuilder::new().build(test_module(), machine::X86_64);

        let symtab = file
            .sections
            .iter()
            .find(|(s, _)| s.section_type == section_type::SYMTAB)
            .unwrap();
        let ElfSectionData::Symbols(symbols) = &symtab.1 else { panic!() };

        // info is the index of the first non-local symbol.
        let first_global = symtab.0.info as usize;
        assert!(symbols[..first_global]
            .iter()
            .all(|s| s.binding == symbol_binding::LOCAL));
        assert!(symbols[first_global..]
            .iter()
            .all(|s| s.binding == symbol_binding::GLOBAL));
    }

    #[test]
    fn test_header_magic() {
        let file = ElfBuilder::new().build(test_module(), machine::X86_64);
        let bytes = emit(&file).unwrap();

        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
        assert_eq!(bytes[4], 2); // 64-bit
        assert_eq!(bytes[5], 1); // little-endian
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 1); // ET_REL
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), machine::X86_64);
    }

    #[test]
    fn test_pc32_addend_is_minus_four() {
        let file = ElfBuilder::new().build(test_module(), machine::X86_64);

        let rela = file
            .sections
            .iter()
            .find(|(s, _)| s.section_type == section_type::RELA)
            .unwrap();
        let ElfSectionData::Relocations(relocs) = &rela.1 else { panic!() };
        assert_eq!(relocs[0].reloc_type, reloc_type::X86_64_PC32);
        assert_eq!(relocs[0].addend, -4);
    }
}
