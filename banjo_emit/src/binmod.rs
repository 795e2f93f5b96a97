//! The encoded binary module
//!
//! Output of the instruction encoders and input to the object-file
//! builders: raw section bytes plus symbol definitions, unresolved symbol
//! uses (relocations), unwind records, and the optional PE linker
//! directives and address-table section.

use crate::buffer::WriteBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinSymbolKind {
    TextFunc,
    TextLabel,
    DataLabel,
    AddrTable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinSymbolUseKind {
    Abs64,
    Rel32,
    Plt32,
    GotPcRel32,
    Branch26,
    Page21,
    PageOff12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinSectionKind {
    Text,
    Data,
    AddrTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinSymbolDef {
    pub name: String,
    pub kind: BinSymbolKind,
    pub offset: u32,
    pub global: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinSymbolUse {
    pub address: u32,
    pub addend: i32,
    pub symbol_index: u32,
    pub kind: BinSymbolUseKind,
    pub section: BinSectionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinPushedReg {
    pub reg: u32,
    pub instr_end: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinUnwindInfo {
    pub start_addr: u32,
    pub end_addr: u32,
    pub alloca_size: u32,
    pub alloca_instr_end: u32,
    pub pushed_regs: Vec<BinPushedReg>,
}

#[derive(Debug, Clone, Default)]
pub struct BinModule {
    pub text: WriteBuffer,
    pub data: WriteBuffer,
    pub symbol_defs: Vec<BinSymbolDef>,
    pub symbol_uses: Vec<BinSymbolUse>,
    pub unwind_info: Vec<BinUnwindInfo>,
    /// PE linker directives (`/EXPORT:...`)
    pub drectve_data: Option<WriteBuffer>,
    /// The serialized hot-reload address table section
    pub addr_table_data: Option<WriteBuffer>,
}

impl BinModule {
    pub fn find_symbol(&self, name: &str) -> Option<u32> {
        self.symbol_defs
            .iter()
            .position(|def| def.name == name)
            .map(|index| index as u32)
    }
}
