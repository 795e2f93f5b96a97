//! The hot-reload loop
//!
//! Reads the address-table layout out of the running process, waits for
//! file-change events, recompiles affected functions, loads their bytes
//! into the target, resolves symbol uses against the live table, and
//! patches the 8-byte slots.

use crate::jit::JitCompiler;
use crate::process::{Address, MemoryProtection, TargetProcess};
use banjo_common::{BanjoError, BanjoResult};
use banjo_compiler::{CompilerConfig, ModuleProvider};
use banjo_emit::{BinModule, BinSectionKind, BinSymbolKind, BinSymbolUseKind};
use banjo_ssa::AddrTable;
use std::path::Path;

pub const ADDR_TABLE_SECTION: &str = ".bnjatbl";
pub const ADDR_TABLE_SYMBOL: &str = "addr_table";

struct LoadedFunc {
    text_addr: Address,
    data_addr: Address,
}

pub struct HotReloader<'a> {
    process: &'a mut dyn TargetProcess,
    addr_table_ptr: Address,
    addr_table: AddrTable,
}

impl<'a> HotReloader<'a> {
    /// Attach to a running process and parse its address-table layout.
    pub fn attach(process: &'a mut dyn TargetProcess) -> BanjoResult<Self> {
        let addr_table_ptr = process
            .find_section(ADDR_TABLE_SECTION)
            .ok_or_else(|| BanjoError::reload("failed to find address table in target process"))?;
        log::info!("found address table in target process");

        let mut address = addr_table_ptr;

        let mut count_bytes = [0u8; 4];
        process.read_memory(address, &mut count_bytes)?;
        let count = u32::from_le_bytes(count_bytes);
        address += 4;

        let mut addr_table = AddrTable::new();
        for _ in 0..count {
            let mut length_bytes = [0u8; 4];
            process.read_memory(address, &mut length_bytes)?;
            let length = u32::from_le_bytes(length_bytes);
            address += 4;

            let mut name = vec![0u8; length as usize];
            process.read_memory(address, &mut name)?;
            address += length as Address;

            addr_table.append(String::from_utf8_lossy(&name).to_string());
        }

        log::info!("address table layout loaded ({} symbols)", count);

        Ok(Self {
            process,
            addr_table_ptr,
            addr_table,
        })
    }

    /// Handle one file-change event: rebuild, then recompile and patch
    /// every table-resident function of the file's module (or all of them
    /// when the provider cannot narrow the file down).
    pub fn reload_file(
        &mut self,
        config: &CompilerConfig,
        provider: &mut dyn ModuleProvider,
        path: &Path,
    ) -> BanjoResult<()> {
        let module_prefix = provider
            .module_path_of(path)
            .map(|segments| segments.join("."));

        let mut compiler = JitCompiler::new(config, provider);
        if !compiler.build_ir()? {
            log::warn!("failed to reload '{}': project has errors", path.display());
            return Ok(());
        }

        let names = compiler.function_names();
        for name in names {
            if let Some(prefix) = &module_prefix {
                if !name.starts_with(prefix.as_str()) && name != "main" {
                    continue;
                }
            }

            let Some(index) = self.addr_table.find_index(&name) else {
                continue;
            };

            let encoded = compiler.compile_func(&name)?;
            let loaded = self.load_func(encoded)?;
            self.update_func_addr(&name, index, loaded.text_addr)?;
        }

        Ok(())
    }

    /// Copy an encoded function into the target: executable memory for
    /// text, writable memory for data, with local and table-based symbol
    /// uses resolved first.
    fn load_func(&mut self, mut module: BinModule) -> BanjoResult<LoadedFunc> {
        let text_size = module.text.size();
        let data_size = module.data.size();

        let text_addr = if text_size > 0 {
            self.process
                .allocate_memory(text_size, MemoryProtection::ReadWriteExecute)?
        } else {
            0
        };
        let data_addr = if data_size > 0 {
            self.process
                .allocate_memory(data_size, MemoryProtection::ReadWrite)?
        } else {
            0
        };

        let loaded = LoadedFunc { text_addr, data_addr };

        let uses = module.symbol_uses.clone();
        for use_ in &uses {
            self.resolve_symbol_use(&mut module, &loaded, use_)?;
        }

        if text_size > 0 {
            self.process.write_memory(text_addr, module.text.data())?;
        }
        if data_size > 0 {
            self.process.write_memory(data_addr, module.data.data())?;
        }

        Ok(loaded)
    }

    fn resolve_symbol_use(
        &mut self,
        module: &mut BinModule,
        loaded: &LoadedFunc,
        use_: &banjo_emit::BinSymbolUse,
    ) -> BanjoResult<()> {
        let use_addr = match use_.section {
            BinSectionKind::Text => loaded.text_addr + use_.address as Address,
            BinSectionKind::Data => loaded.data_addr + use_.address as Address,
            BinSectionKind::AddrTable => return Ok(()),
        };

        let def = module.symbol_defs[use_.symbol_index as usize].clone();
        let def_addr: Address = if def.name == ADDR_TABLE_SYMBOL {
            self.addr_table_ptr
        } else if def.kind == BinSymbolKind::DataLabel {
            loaded.data_addr + def.offset as Address
        } else {
            log::warn!("symbol '{}' is not reachable from reloaded code", def.name);
            0
        };

        match use_.kind {
            BinSymbolUseKind::Rel32 | BinSymbolUseKind::Plt32 | BinSymbolUseKind::GotPcRel32 => {
                let displacement = def_addr as i64 - (use_addr as i64 + 4);
                module.text.seek(use_.address as usize);
                module.text.write_i32(displacement as i32);
            }
            BinSymbolUseKind::Abs64 => match use_.section {
                BinSectionKind::Text => {
                    module.text.seek(use_.address as usize);
                    module.text.write_u64(def_addr);
                }
                BinSectionKind::Data => {
                    module.data.seek(use_.address as usize);
                    module.data.write_u64(def_addr);
                }
                BinSectionKind::AddrTable => {}
            },
            other => {
                return Err(BanjoError::reload(format!(
                    "unsupported relocation {:?} in reloaded code",
                    other
                )));
            }
        }

        Ok(())
    }

    /// Patch the 8-byte slot; aligned, so the write is atomic on both
    /// supported architectures.
    fn update_func_addr(&mut self, name: &str, index: u32, new_addr: Address) -> BanjoResult<()> {
        let slot_addr = self.addr_table_ptr + self.addr_table.compute_offset(index);
        self.process.write_memory(slot_addr, &new_addr.to_le_bytes())?;
        log::info!("updated function '{}'", name);
        Ok(())
    }

    pub fn addr_table(&self) -> &AddrTable {
        &self.addr_table
    }

    /// Read the current value of a table slot.
    pub fn read_slot(&mut self, index: u32) -> BanjoResult<Address> {
        let slot_addr = self.addr_table_ptr + self.addr_table.compute_offset(index);
        let mut bytes = [0u8; 8];
        self.process.read_memory(slot_addr, &mut bytes)?;
        Ok(Address::from_le_bytes(bytes))
    }
}

/// Serialize an address table into its section wire format.
pub fn serialize_addr_table(table: &AddrTable) -> Vec<u8> {
    let mut buffer = banjo_emit::WriteBuffer::new();
    buffer.write_u32(table.entries.len() as u32);
    for entry in &table.entries {
        buffer.write_u32(entry.len() as u32);
        buffer.write_cstr(entry);
    }
    for _ in &table.entries {
        buffer.write_zeroes(8);
    }
    buffer.into_data()
}
