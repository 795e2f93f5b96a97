//! PE/COFF object building and emission
//!
//! Sections `.text`, `.data`, `.pdata`, `.xdata`, plus `.drectve` for DLL
//! export directives and `.bnjatbl` for the hot-reload address table.
//! Data references from text are patched section-relative and relocated
//! against the section symbol; unwind info becomes Windows x64 unwind
//! records in `.xdata` with `.pdata` triples referencing them.

use crate::binmod::{
    BinModule, BinSectionKind, BinSymbolKind, BinSymbolUseKind, BinUnwindInfo,
};
use crate::buffer::WriteBuffer;
use banjo_common::BanjoResult;

pub mod section_flags {
    pub const CODE: u32 = 0x00000020;
    pub const LNK_INFO: u32 = 0x00000200;
    pub const LNK_REMOVE: u32 = 0x00000800;
    pub const INITIALIZED_DATA: u32 = 0x00000040;
    pub const ALIGN_1BYTES: u32 = 0x00100000;
    pub const ALIGN_4BYTES: u32 = 0x00300000;
    pub const ALIGN_16BYTES: u32 = 0x00500000;
    pub const EXECUTE: u32 = 0x20000000;
    pub const READ: u32 = 0x40000000;
    pub const WRITE: u32 = 0x80000000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeRelocationType {
    Amd64Addr64 = 0x0001,
    Amd64Addr32Nb = 0x0003,
    Amd64Rel32 = 0x0004,
}

#[derive(Debug, Clone)]
pub struct PeRelocation {
    pub virt_addr: u32,
    pub symbol_index: u32,
    pub reloc_type: PeRelocationType,
}

#[derive(Debug, Clone)]
pub struct PeSection {
    pub name: [u8; 8],
    pub data: Vec<u8>,
    pub relocations: Vec<PeRelocation>,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeStorageClass {
    External = 2,
    Static = 3,
}

#[derive(Debug, Clone)]
pub struct PeSymbol {
    pub name_data: u64,
    pub value: u32,
    pub section_number: i16,
    pub storage_class: PeStorageClass,
}

#[derive(Debug, Default)]
pub struct PeStringTable {
    strings: Vec<String>,
    // The string table size field includes the four bytes holding it.
    size: u32,
}

impl PeStringTable {
    fn new() -> Self {
        Self { strings: Vec::new(), size: 4 }
    }

    fn add(&mut self, name: &str) -> u32 {
        let offset = self.size;
        self.size += name.len() as u32 + 1;
        self.strings.push(name.to_string());
        offset
    }
}

pub struct PeFile {
    pub sections: Vec<PeSection>,
    pub symbols: Vec<PeSymbol>,
    pub string_table: PeStringTable,
}

impl PeFile {
    fn add_symbol(&mut self, name: &str, value: u32, section_number: i16, storage_class: PeStorageClass) {
        let name_data = if name.len() <= 8 {
            let mut bytes = [0u8; 8];
            bytes[..name.len()].copy_from_slice(name.as_bytes());
            u64::from_le_bytes(bytes)
        } else {
            // Long names live in the string table; the high half of the
            // name field is the offset.
            let offset = self.string_table.add(name);
            (offset as u64) << 32
        };

        self.symbols.push(PeSymbol {
            name_data,
            value,
            section_number,
            storage_class,
        });
    }
}

const TEXT_SECTION: usize = 0;
const DATA_SECTION: usize = 1;
const PDATA_SECTION: usize = 2;
const XDATA_SECTION: usize = 3;

pub struct PeBuilder {
    file: PeFile,
    drectve_section: Option<usize>,
    addr_table_section: Option<usize>,
    num_section_symbols: u32,
}

impl Default for PeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PeBuilder {
    pub fn new() -> Self {
        Self {
            file: PeFile {
                sections: Vec::new(),
                symbols: Vec::new(),
                string_table: PeStringTable::new(),
            },
            drectve_section: None,
            addr_table_section: None,
            num_section_symbols: 0,
        }
    }

    pub fn build(mut self, mut module: BinModule) -> PeFile {
        self.create_sections(&module);
        self.create_section_symbols();

        for def in &module.symbol_defs {
            self.process_symbol_def(def);
        }

        let uses = module.symbol_uses.clone();
        for use_ in &uses {
            self.process_symbol_use(use_, &mut module);
        }

        self.create_unwind_info(&module.unwind_info);

        self.file.sections[TEXT_SECTION].data = module.text.into_data();
        self.file.sections[DATA_SECTION].data = module.data.into_data();
        if let (Some(index), Some(data)) = (self.drectve_section, module.drectve_data) {
            self.file.sections[index].data = data.into_data();
        }
        if let (Some(index), Some(data)) = (self.addr_table_section, module.addr_table_data) {
            self.file.sections[index].data = data.into_data();
        }

        self.file
    }

    fn create_sections(&mut self, module: &BinModule) {
        use section_flags::*;

        self.file.sections = vec![
            PeSection {
                name: *b".text\0\0\0",
                data: Vec::new(),
                relocations: Vec::new(),
                flags: CODE | ALIGN_16BYTES | EXECUTE | READ,
            },
            PeSection {
                name: *b".data\0\0\0",
                data: Vec::new(),
                relocations: Vec::new(),
                flags: INITIALIZED_DATA | ALIGN_16BYTES | READ | WRITE,
            },
            PeSection {
                name: *b".pdata\0\0",
                data: Vec::new(),
                relocations: Vec::new(),
                flags: INITIALIZED_DATA | ALIGN_4BYTES | READ,
            },
            PeSection {
                name: *b".xdata\0\0",
                data: Vec::new(),
                relocations: Vec::new(),
                flags: INITIALIZED_DATA | ALIGN_4BYTES | READ,
            },
        ];

        if module.drectve_data.is_some() {
            self.drectve_section = Some(self.file.sections.len());
            self.file.sections.push(PeSection {
                name: *b".drectve",
                data: Vec::new(),
                relocations: Vec::new(),
                flags: LNK_INFO | LNK_REMOVE | ALIGN_1BYTES,
            });
        }

        if module.addr_table_data.is_some() {
            self.addr_table_section = Some(self.file.sections.len());
            self.file.sections.push(PeSection {
                name: *b".bnjatbl",
                data: Vec::new(),
                relocations: Vec::new(),
                flags: INITIALIZED_DATA | ALIGN_16BYTES | READ | WRITE,
            });
        }
    }

    fn create_section_symbols(&mut self) {
        for index in 0..self.file.sections.len() {
            let name_bytes = self.file.sections[index].name;
            let end = name_bytes.iter().position(|b| *b == 0).unwrap_or(8);
            let name = String::from_utf8_lossy(&name_bytes[..end]).to_string();

            self.file
                .add_symbol(&name, 0, section_number(index), PeStorageClass::Static);
        }
        self.num_section_symbols = self.file.sections.len() as u32;
    }

    fn process_symbol_def(&mut self, def: &crate::binmod::BinSymbolDef) {
        let section = match def.kind {
            BinSymbolKind::TextFunc | BinSymbolKind::TextLabel => section_number(TEXT_SECTION),
            BinSymbolKind::DataLabel => section_number(DATA_SECTION),
            BinSymbolKind::AddrTable => self
                .addr_table_section
                .map(section_number)
                .unwrap_or(0),
            BinSymbolKind::Unknown => 0,
        };

        let storage_class = if def.global {
            PeStorageClass::External
        } else {
            PeStorageClass::Static
        };
        self.file.add_symbol(&def.name, def.offset, section, storage_class);
    }

    fn process_symbol_use(&mut self, use_: &crate::binmod::BinSymbolUse, module: &mut BinModule) {
        let def = module.symbol_defs[use_.symbol_index as usize].clone();

        match use_.section {
            BinSectionKind::Text => {
                if def.kind == BinSymbolKind::DataLabel {
                    // Patch the section-relative displacement and relocate
                    // against the data section symbol.
                    module.text.seek(use_.address as usize);
                    module.text.write_i32(def.offset as i32 + use_.addend);

                    self.file.sections[TEXT_SECTION].relocations.push(PeRelocation {
                        virt_addr: use_.address,
                        symbol_index: DATA_SECTION as u32,
                        reloc_type: PeRelocationType::Amd64Rel32,
                    });
                } else {
                    let reloc_type = match use_.kind {
                        BinSymbolUseKind::Abs64 => PeRelocationType::Amd64Addr64,
                        _ => PeRelocationType::Amd64Rel32,
                    };
                    self.file.sections[TEXT_SECTION].relocations.push(PeRelocation {
                        virt_addr: use_.address,
                        symbol_index: use_.symbol_index + self.num_section_symbols,
                        reloc_type,
                    });
                }
            }
            BinSectionKind::Data => {
                module.data.seek(use_.address as usize);
                module.data.write_i64(0);

                self.file.sections[DATA_SECTION].relocations.push(PeRelocation {
                    virt_addr: use_.address,
                    symbol_index: use_.symbol_index + self.num_section_symbols,
                    reloc_type: PeRelocationType::Amd64Addr64,
                });
            }
            BinSectionKind::AddrTable => {
                if let Some(buffer) = &mut module.addr_table_data {
                    buffer.seek(use_.address as usize);
                    buffer.write_i64(0);
                }

                if let Some(index) = self.addr_table_section {
                    self.file.sections[index].relocations.push(PeRelocation {
                        virt_addr: use_.address,
                        symbol_index: use_.symbol_index + self.num_section_symbols,
                        reloc_type: PeRelocationType::Amd64Addr64,
                    });
                }
            }
        }
    }

    /// Windows x64 unwind records: a `.pdata` function entry per frame
    /// pointing at an `.xdata` record with prolog offsets and operation
    /// codes.
    fn create_unwind_info(&mut self, unwind_info: &[BinUnwindInfo]) {
        let mut pdata = WriteBuffer::new();
        let mut xdata = WriteBuffer::new();

        for frame in unwind_info {
            // Function start, end, and unwind-info RVAs.
            self.file.sections[PDATA_SECTION].relocations.push(PeRelocation {
                virt_addr: pdata.size() as u32,
                symbol_index: TEXT_SECTION as u32,
                reloc_type: PeRelocationType::Amd64Addr32Nb,
            });
            pdata.write_u32(frame.start_addr);

            self.file.sections[PDATA_SECTION].relocations.push(PeRelocation {
                virt_addr: pdata.size() as u32,
                symbol_index: TEXT_SECTION as u32,
                reloc_type: PeRelocationType::Amd64Addr32Nb,
            });
            pdata.write_u32(frame.end_addr);

            self.file.sections[PDATA_SECTION].relocations.push(PeRelocation {
                virt_addr: pdata.size() as u32,
                symbol_index: XDATA_SECTION as u32,
                reloc_type: PeRelocationType::Amd64Addr32Nb,
            });
            pdata.write_u32(xdata.size() as u32);

            let prolog_size = (frame.alloca_instr_end - frame.start_addr) as u8;

            xdata.write_u8(1); // version and flags
            xdata.write_u8(prolog_size);
            let num_slots_position = xdata.tell();
            xdata.write_u8(0); // slot count, patched below
            xdata.write_u8(0); // no frame register

            // Large stack allocation: opcode 1 with a 32-bit size.
            xdata.write_u8(prolog_size);
            xdata.write_u8(1 << 4 | 1);
            xdata.write_u32(frame.alloca_size);

            let mut num_slots = 3;
            for pushed in &frame.pushed_regs {
                xdata.write_u8((pushed.instr_end - frame.start_addr) as u8);
                xdata.write_u8((pushed.reg as u8) << 4);
                num_slots += 1;
            }

            // Records are padded to an even slot count.
            if num_slots % 2 != 0 {
                xdata.write_u8(0);
                xdata.write_u8(0);
            }

            let position = xdata.tell();
            xdata.seek(num_slots_position);
            xdata.write_u8(num_slots as u8);
            xdata.seek(position);
        }

        self.file.sections[PDATA_SECTION].data = pdata.into_data();
        self.file.sections[XDATA_SECTION].data = xdata.into_data();
    }
}

/// Section numbers are one-based in COFF.
fn section_number(index: usize) -> i16 {
    index as i16 + 1
}

/// Serialize a PE/COFF object to bytes.
pub fn emit(file: &PeFile, timestamp: u32) -> BanjoResult<Vec<u8>> {
    let mut out = WriteBuffer::new();

    let num_sections = file.sections.len();
    let headers_size = 20 + 40 * num_sections;

    // Lay out section data then relocations.
    let mut data_offsets = Vec::with_capacity(num_sections);
    let mut position = headers_size;
    for section in &file.sections {
        data_offsets.push(position);
        position += section.data.len();
    }
    let mut reloc_offsets = Vec::with_capacity(num_sections);
    for section in &file.sections {
        reloc_offsets.push(position);
        position += section.relocations.len() * 10;
    }
    let symbol_table_offset = position;

    // COFF header.
    out.write_u16(0x8664);
    out.write_u16(num_sections as u16);
    out.write_u32(timestamp);
    out.write_u32(symbol_table_offset as u32);
    out.write_u32(file.symbols.len() as u32);
    out.write_u16(0); // optional header size
    out.write_u16(0); // characteristics

    for (index, section) in file.sections.iter().enumerate() {
        out.write_data(&section.name);
        out.write_u32(0); // virtual size
        out.write_u32(0); // virtual address
        out.write_u32(section.data.len() as u32);
        out.write_u32(data_offsets[index] as u32);
        out.write_u32(if section.relocations.is_empty() {
            0
        } else {
            reloc_offsets[index] as u32
        });
        out.write_u32(0); // line numbers
        out.write_u16(section.relocations.len() as u16);
        out.write_u16(0); // line number count
        out.write_u32(section.flags);
    }

    for section in &file.sections {
        out.write_data(&section.data);
    }

    for section in &file.sections {
        for reloc in &section.relocations {
            out.write_u32(reloc.virt_addr);
            out.write_u32(reloc.symbol_index);
            out.write_u16(reloc.reloc_type as u16);
        }
    }

    for symbol in &file.symbols {
        out.write_u64(symbol.name_data);
        out.write_u32(symbol.value);
        out.write_i16(symbol.section_number);
        out.write_i16(0); // type
        out.write_u8(symbol.storage_class as u8);
        out.write_u8(0); // auxiliary symbol count
    }

    out.write_u32(file.string_table.size);
    for string in &file.string_table.strings {
        out.write_cstr(string);
        out.write_u8(0);
    }

    Ok(out.into_data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binmod::BinSymbolDef;

    #[test]
    fn test_sections_and_machine() {
        let mut module = BinModule::default();
        module.text.write_u8(0xC3);
        module.symbol_defs.push(BinSymbolDef {
            name: "main".to_string(),
            kind: BinSymbolKind::TextFunc,
            offset: 0,
            global: true,
        });

        let file = PeBuilder::new().build(module);
        assert_eq!(file.sections.len(), 4);
        assert_eq!(&file.sections[0].name[..5], b".text");

        let bytes = emit(&file, 0).unwrap();
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 0x8664);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 4);
    }

    #[test]
    fn test_addr_table_section_flags() {
        let mut module = BinModule::default();
        module.addr_table_data = Some(WriteBuffer::new());

        let file = PeBuilder::new().build(module);
        let section = file
            .sections
            .iter()
            .find(|s| &s.name == b".bnjatbl")
            .unwrap();

        use section_flags::*;
        assert_eq!(
            section.flags,
            INITIALIZED_DATA | ALIGN_16BYTES | READ | WRITE
        );
    }

    #[test]
    fn test_long_symbol_names_go_to_string_table() {
        let mut module = BinModule::default();
        module.symbol_defs.push(BinSymbolDef {
            name: "a_rather_long_symbol_name".to_string(),
            kind: BinSymbolKind::TextFunc,
            offset: 0,
            global: true,
        });

        let file = PeBuilder::new().build(module);
        let symbol = file.symbols.last().unwrap();
        assert_eq!(symbol.name_data & 0xFFFF_FFFF, 0);
        assert_eq!(symbol.name_data >> 32, 4);
    }
}
