//! Instruction encoders and object-file builders for the Banjo compiler
//!
//! Encoders turn machine modules into [`BinModule`]s (raw bytes plus
//! symbols and relocations); builders turn those into on-disk object
//! formats. [`emit_object`] dispatches over the format for the driver.

pub mod aarch64_encoder;
pub mod binmod;
pub mod buffer;
pub mod elf;
pub mod macho;
pub mod pe;
pub mod section;
pub mod wasm_obj;
pub mod x86_64_encoder;

pub use binmod::{
    BinModule, BinPushedReg, BinSectionKind, BinSymbolDef, BinSymbolKind, BinSymbolUse,
    BinSymbolUseKind, BinUnwindInfo,
};
pub use buffer::WriteBuffer;

use banjo_common::{BanjoError, BanjoResult};
use banjo_mcode as mcode;
use banjo_target::{Arch, OperatingSystem, TargetDescription};

/// On-disk object formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf,
    Pe,
    MachO,
    Wasm,
}

impl ObjectFormat {
    pub fn for_target(description: TargetDescription) -> ObjectFormat {
        match (description.arch, description.os) {
            (Arch::Wasm, _) => ObjectFormat::Wasm,
            (_, OperatingSystem::Windows) => ObjectFormat::Pe,
            (_, OperatingSystem::Macos) => ObjectFormat::MachO,
            _ => ObjectFormat::Elf,
        }
    }
}

/// Encode a machine module for its architecture.
pub fn encode_module(description: TargetDescription, module: &mcode::Module) -> BanjoResult<BinModule> {
    match description.arch {
        Arch::X86_64 => x86_64_encoder::encode(module),
        Arch::AArch64 => aarch64_encoder::encode(module),
        Arch::Wasm => Err(BanjoError::encode(
            "the WebAssembly path builds objects directly from machine code",
        )),
    }
}

/// Encode a machine module and build the object file bytes.
pub fn emit_object(description: TargetDescription, module: &mcode::Module) -> BanjoResult<Vec<u8>> {
    let format = ObjectFormat::for_target(description);

    match format {
        ObjectFormat::Wasm => wasm_obj::emit(module),
        ObjectFormat::Elf => {
            let mut bin_module = encode_module(description, module)?;
            attach_drectve(module, &mut bin_module);
            let machine = match description.arch {
                Arch::AArch64 => elf::machine::AARCH64,
                _ => elf::machine::X86_64,
            };
            let file = elf::ElfBuilder::new().build(bin_module, machine);
            elf::emit(&file)
        }
        ObjectFormat::Pe => {
            let mut bin_module = encode_module(description, module)?;
            attach_drectve(module, &mut bin_module);
            let file = pe::PeBuilder::new().build(bin_module);
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0);
            pe::emit(&file, timestamp)
        }
        ObjectFormat::MachO => {
            let bin_module = encode_module(description, module)?;
            let file = macho::MachOBuilder::build(bin_module);
            macho::emit(&file)
        }
    }
}

/// DLL exports become PE linker directives.
fn attach_drectve(module: &mcode::Module, bin_module: &mut BinModule) {
    if module.dll_exports.is_empty() {
        return;
    }

    let mut buffer = WriteBuffer::new();
    for export in &module.dll_exports {
        buffer.write_cstr("/EXPORT:");
        buffer.write_cstr(export);
        buffer.write_u8(b' ');
    }
    bin_module.drectve_data = Some(buffer);
}
