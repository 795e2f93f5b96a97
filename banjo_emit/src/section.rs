//! Section building with relaxable slices
//!
//! Sections are built as ordered slices, each with its own buffer and
//! pending symbol uses. A relaxable slice holds exactly one
//! short-encoded branch; relaxation may grow it in place and push the
//! offsets of every later slice outwards. Symbols live in one shared
//! definition table so text labels, functions and data labels share an
//! index space until the module is baked.

use crate::binmod::{
    BinModule, BinPushedReg, BinSectionKind, BinSymbolDef, BinSymbolKind, BinSymbolUse,
    BinSymbolUseKind, BinUnwindInfo,
};
use crate::buffer::WriteBuffer;
use hashbrown::HashMap;

/// An unresolved reference from a slice to a symbol
#[derive(Debug, Clone)]
pub struct SymbolUse {
    pub index: u32,
    pub local_offset: u32,
    pub kind: BinSymbolUseKind,
    pub addend: i32,
    pub is_resolved: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SectionSlice {
    pub uses: Vec<SymbolUse>,
    pub relaxable_branch: bool,
    pub buffer: WriteBuffer,
    pub offset: u32,
}

/// A symbol definition positioned by slice plus local offset
#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub name: String,
    pub kind: BinSymbolKind,
    pub global: bool,
    pub slice_index: u32,
    pub local_offset: u32,
    /// Index in the baked module's definition list
    pub bin_index: u32,
    /// Final section offset
    pub bin_offset: u32,
}

/// Unwind facts referencing symbols, resolved at bake time
#[derive(Debug, Clone)]
pub struct UnwindFrame {
    pub start_symbol: u32,
    pub end_symbol: u32,
    pub alloca_size: u32,
    pub alloca_end_label: u32,
    pub pushed_regs: Vec<(u32, u32)>,
}

/// Shared builder state for the instruction encoders
#[derive(Debug, Default)]
pub struct BinaryBuilder {
    pub text_slices: Vec<SectionSlice>,
    pub data_slices: Vec<SectionSlice>,
    pub defs: Vec<SymbolDef>,
    pub unwind_frames: Vec<UnwindFrame>,
    pub addr_table_slice: Option<SectionSlice>,
    pub symbol_indices: HashMap<String, u32>,
}

impl BinaryBuilder {
    pub fn new() -> Self {
        let mut builder = Self::default();
        builder.text_slices.push(SectionSlice::default());
        builder.data_slices.push(SectionSlice::default());
        builder
    }

    // -- text emission ------------------------------------------------------

    pub fn text(&mut self) -> &mut WriteBuffer {
        &mut self.text_slices.last_mut().unwrap().buffer
    }

    /// Current offset within the whole text section, assuming offsets are
    /// up to date.
    pub fn text_offset(&self) -> u32 {
        let slice = self.text_slices.last().unwrap();
        slice.offset + slice.buffer.size() as u32
    }

    /// Begin a slice holding a single short-form branch.
    pub fn create_relaxable_slice(&mut self) {
        self.text_slices.push(SectionSlice {
            relaxable_branch: true,
            ..Default::default()
        });
    }

    /// Close the relaxable slice; emission continues in a plain one.
    pub fn end_relaxable_slice(&mut self) {
        self.text_slices.push(SectionSlice::default());
    }

    /// Grow offsets of every slice after `starting_index` by `amount`.
    pub fn push_out_slices(&mut self, starting_index: usize, amount: u32) {
        for slice in &mut self.text_slices[starting_index..] {
            slice.offset += amount;
        }
    }

    pub fn compute_slice_offsets(&mut self) {
        let mut address = 0;
        for slice in &mut self.text_slices {
            slice.offset = address;
            address += slice.buffer.size() as u32;
        }

        let mut address = 0;
        for slice in &mut self.data_slices {
            slice.offset = address;
            address += slice.buffer.size() as u32;
        }
    }

    // -- symbols ------------------------------------------------------------

    pub fn add_symbol_def(&mut self, def: SymbolDef) -> u32 {
        let index = self.defs.len() as u32;
        self.symbol_indices.insert(def.name.clone(), index);
        self.defs.push(def);
        index
    }

    pub fn add_func_symbol(&mut self, name: impl Into<String>, global: bool) -> u32 {
        let name = name.into();
        let index = self.add_symbol_def(SymbolDef {
            name,
            kind: BinSymbolKind::TextFunc,
            global,
            slice_index: 0,
            local_offset: 0,
            bin_index: 0,
            bin_offset: 0,
        });
        self.attach_symbol_def(index);
        index
    }

    pub fn add_label_symbol(&mut self, name: impl Into<String>) -> u32 {
        let index = self.add_symbol_def(SymbolDef {
            name: name.into(),
            kind: BinSymbolKind::TextLabel,
            global: false,
            slice_index: 0,
            local_offset: 0,
            bin_index: 0,
            bin_offset: 0,
        });
        self.attach_symbol_def(index);
        index
    }

    pub fn add_unknown_symbol(&mut self, name: impl Into<String>) -> u32 {
        self.add_symbol_def(SymbolDef {
            name: name.into(),
            kind: BinSymbolKind::Unknown,
            global: true,
            slice_index: 0,
            local_offset: 0,
            bin_index: 0,
            bin_offset: 0,
        })
    }

    /// Pin a definition to the current end of the text section.
    pub fn attach_symbol_def(&mut self, index: u32) {
        let slice_index = self.text_slices.len() as u32 - 1;
        let local_offset = self.text_slices.last().unwrap().buffer.size() as u32;
        let def = &mut self.defs[index as usize];
        def.slice_index = slice_index;
        def.local_offset = local_offset;
    }

    /// An anonymous label at the current text position, used by unwind
    /// records.
    pub fn add_empty_label(&mut self) -> u32 {
        let index = self.defs.len() as u32;
        self.defs.push(SymbolDef {
            name: String::new(),
            kind: BinSymbolKind::TextLabel,
            global: false,
            slice_index: 0,
            local_offset: 0,
            bin_index: 0,
            bin_offset: 0,
        });
        self.attach_symbol_def(index);
        index
    }

    pub fn symbol_index(&mut self, name: &str) -> u32 {
        if let Some(index) = self.symbol_indices.get(name) {
            return *index;
        }
        self.add_unknown_symbol(name.to_string())
    }

    pub fn add_text_symbol_use(&mut self, symbol_index: u32, kind: BinSymbolUseKind, addend: i32) {
        let slice = self.text_slices.last_mut().unwrap();
        slice.uses.push(SymbolUse {
            index: symbol_index,
            local_offset: slice.buffer.size() as u32,
            kind,
            addend,
            is_resolved: false,
        });
    }

    pub fn add_data_symbol_use(&mut self, symbol_index: u32) {
        let slice = self.data_slices.last_mut().unwrap();
        slice.uses.push(SymbolUse {
            index: symbol_index,
            local_offset: slice.buffer.size() as u32,
            kind: BinSymbolUseKind::Abs64,
            addend: 0,
            is_resolved: false,
        });
    }

    // -- data and address table ---------------------------------------------

    pub fn generate_data_slices(&mut self, module: &banjo_mcode::Module) {
        for global in &module.globals {
            let slice_index = self.data_slices.len() as u32 - 1;
            let local_offset = self.data_slices.last().unwrap().buffer.size() as u32;

            self.add_symbol_def(SymbolDef {
                name: global.name.clone(),
                kind: BinSymbolKind::DataLabel,
                global: module.global_symbols.contains(&global.name),
                slice_index,
                local_offset,
                bin_index: 0,
                bin_offset: 0,
            });

            match &global.value {
                banjo_mcode::GlobalValue::Int(value) => {
                    let buffer = &mut self.data_slices.last_mut().unwrap().buffer;
                    match global.size {
                        1 => buffer.write_u8(*value as u8),
                        2 => buffer.write_u16(*value as u16),
                        4 => buffer.write_u32(*value as u32),
                        _ => buffer.write_u64(*value as u64),
                    }
                }
                banjo_mcode::GlobalValue::Fp(value) => {
                    let buffer = &mut self.data_slices.last_mut().unwrap().buffer;
                    match global.size {
                        4 => buffer.write_f32(*value as f32),
                        _ => buffer.write_f64(*value),
                    }
                }
                banjo_mcode::GlobalValue::Bytes(bytes)
                | banjo_mcode::GlobalValue::String(bytes) => {
                    self.data_slices.last_mut().unwrap().buffer.write_data(bytes);
                }
                banjo_mcode::GlobalValue::SymbolRef(name) => {
                    let index = self.symbol_index(name);
                    self.add_data_symbol_use(index);
                    self.data_slices.last_mut().unwrap().buffer.write_u64(0);
                }
                banjo_mcode::GlobalValue::None => {
                    let buffer = &mut self.data_slices.last_mut().unwrap().buffer;
                    buffer.write_zeroes(global.size as usize);
                }
            }
        }
    }

    pub fn generate_addr_table_slice(&mut self, module: &banjo_mcode::Module) {
        let Some(table) = &module.addr_table else {
            return;
        };

        self.add_symbol_def(SymbolDef {
            name: "addr_table".to_string(),
            kind: BinSymbolKind::AddrTable,
            global: true,
            slice_index: 0,
            local_offset: 0,
            bin_index: 0,
            bin_offset: 0,
        });

        let mut slice = SectionSlice::default();
        slice.buffer.write_u32(table.len() as u32);

        for symbol in table {
            slice.buffer.write_u32(symbol.len() as u32);
            slice.buffer.write_cstr(symbol);
        }

        for symbol in table {
            let index = *self
                .symbol_indices
                .get(symbol.as_str())
                .expect("address table entry has no symbol");

            slice.uses.push(SymbolUse {
                index,
                local_offset: slice.buffer.size() as u32,
                kind: BinSymbolUseKind::Abs64,
                addend: 0,
                is_resolved: false,
            });
            slice.buffer.write_zeroes(8);
        }

        self.addr_table_slice = Some(slice);
    }

    // -- baking -------------------------------------------------------------

    pub fn create_module(mut self) -> BinModule {
        let mut module = BinModule::default();

        self.bake_symbol_locations();
        self.merge_text_slices(&mut module);
        self.merge_data_slices(&mut module);
        self.bake_unwind_info(&mut module);
        self.bake_addr_table(&mut module);
        self.bake_symbol_defs(&mut module);

        module
    }

    fn bake_symbol_locations(&mut self) {
        let mut bin_index = 0;

        for def in &mut self.defs {
            if def.kind == BinSymbolKind::Unknown {
                def.bin_offset = 0;
            } else {
                let slices = match def.kind {
                    BinSymbolKind::DataLabel => &self.data_slices,
                    BinSymbolKind::AddrTable => {
                        def.bin_offset = 0;
                        def.bin_index = bin_index;
                        bin_index += 1;
                        continue;
                    }
                    _ => &self.text_slices,
                };
                let slice = &slices[def.slice_index as usize];
                def.bin_offset = slice.offset + def.local_offset;
            }

            if def.kind != BinSymbolKind::TextLabel {
                def.bin_index = bin_index;
                bin_index += 1;
            }
        }
    }

    fn merge_text_slices(&mut self, module: &mut BinModule) {
        for slice in &self.text_slices {
            module.text.write_buffer(&slice.buffer);

            for use_ in &slice.uses {
                if use_.is_resolved {
                    continue;
                }

                let def = &self.defs[use_.index as usize];
                if def.kind == BinSymbolKind::TextLabel {
                    continue;
                }

                module.symbol_uses.push(BinSymbolUse {
                    address: slice.offset + use_.local_offset,
                    addend: use_.addend,
                    symbol_index: def.bin_index,
                    kind: use_.kind,
                    section: BinSectionKind::Text,
                });
            }
        }
    }

    fn merge_data_slices(&mut self, module: &mut BinModule) {
        for slice in &self.data_slices {
            module.data.write_buffer(&slice.buffer);

            for use_ in &slice.uses {
                let def = &self.defs[use_.index as usize];

                module.symbol_uses.push(BinSymbolUse {
                    address: slice.offset + use_.local_offset,
                    addend: use_.addend,
                    symbol_index: def.bin_index,
                    kind: use_.kind,
                    section: BinSectionKind::Data,
                });
            }
        }
    }

    fn bake_symbol_defs(&mut self, module: &mut BinModule) {
        for def in &self.defs {
            if def.kind == BinSymbolKind::TextLabel {
                continue;
            }

            module.symbol_defs.push(BinSymbolDef {
                name: def.name.clone(),
                kind: def.kind,
                offset: def.bin_offset,
                global: def.global,
            });
        }
    }

    fn bake_unwind_info(&mut self, module: &mut BinModule) {
        for frame in &self.unwind_frames {
            let pushed_regs = frame
                .pushed_regs
                .iter()
                .rev()
                .map(|(reg, end_label)| BinPushedReg {
                    reg: *reg,
                    instr_end: self.defs[*end_label as usize].bin_offset,
                })
                .collect();

            module.unwind_info.push(BinUnwindInfo {
                start_addr: self.defs[frame.start_symbol as usize].bin_offset,
                end_addr: self.defs[frame.end_symbol as usize].bin_offset,
                alloca_size: frame.alloca_size,
                alloca_instr_end: self.defs[frame.alloca_end_label as usize].bin_offset,
                pushed_regs,
            });
        }
    }

    fn bake_addr_table(&mut self, module: &mut BinModule) {
        let Some(slice) = self.addr_table_slice.take() else {
            return;
        };

        for use_ in &slice.uses {
            let def = &self.defs[use_.index as usize];

            module.symbol_uses.push(BinSymbolUse {
                address: slice.offset + use_.local_offset,
                addend: use_.addend,
                symbol_index: def.bin_index,
                kind: use_.kind,
                section: BinSectionKind::AddrTable,
            });
        }

        module.addr_table_data = Some(slice.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_out_slices() {
        let mut builder = BinaryBuilder::new();
        builder.text().write_u32(0);
        builder.create_relaxable_slice();
        builder.text().write_u8(0xEB);
        builder.end_relaxable_slice();
        builder.text().write_u32(0);

        builder.compute_slice_offsets();
        assert_eq!(builder.text_slices[2].offset, 5);

        builder.push_out_slices(2, 3);
        assert_eq!(builder.text_slices[2].offset, 8);
    }

    #[test]
    fn test_labels_excluded_from_baked_defs() {
        let mut builder = BinaryBuilder::new();
        builder.add_func_symbol("f", true);
        builder.add_label_symbol("f.body");
        builder.compute_slice_offsets();

        let module = builder.create_module();
        assert_eq!(module.symbol_defs.len(), 1);
        assert_eq!(module.symbol_defs[0].name, "f");
    }
}
