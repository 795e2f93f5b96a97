//! Target backends for the Banjo compiler
//!
//! Each target pairs a code model with an OS descriptor and supplies the
//! machinery the driver needs: SSA-to-MCode lowering, the machine pass
//! pipeline (register allocation, prologue/epilogue synthesis, target
//! fixups), and metadata such as the object-file extension.

pub mod aarch64;
pub mod codegen;
pub mod wasm;
pub mod x86_64;

use banjo_common::BanjoResult;
use banjo_mcode as mcode;
use banjo_ssa as ssa;
use serde::{Deserialize, Serialize};

/// Supported instruction-set architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    X86_64,
    AArch64,
    Wasm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatingSystem {
    Windows,
    Linux,
    Macos,
    Unknown,
    Emscripten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Environment {
    Msvc,
    Gnu,
}

/// How far code may be from the symbols it references. LARGE forces
/// calls through absolute 64-bit addresses so JIT-compiled code can
/// reach the host binary's address table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeModel {
    Small,
    Large,
}

/// A target triple plus code model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescription {
    pub arch: Arch,
    pub os: OperatingSystem,
    pub env: Environment,
    pub code_model: CodeModel,
}

impl TargetDescription {
    pub fn new(arch: Arch, os: OperatingSystem) -> Self {
        Self {
            arch,
            os,
            env: Environment::Gnu,
            code_model: CodeModel::Small,
        }
    }

    pub fn with_code_model(mut self, code_model: CodeModel) -> Self {
        self.code_model = code_model;
        self
    }
}

/// The interface the driver and the JIT compile against
pub trait Target {
    fn description(&self) -> TargetDescription;

    /// Lower an SSA module into target machine code with virtual
    /// registers.
    fn lower(&self, module: &ssa::Module) -> BanjoResult<mcode::Module>;

    /// Run register allocation, frame lowering and target fixups.
    fn run_machine_passes(&self, module: &mut mcode::Module) -> BanjoResult<()>;

    fn calling_conv(&self) -> ssa::CallingConv;

    fn output_file_ext(&self) -> &'static str {
        match (self.description().arch, self.description().os) {
            (Arch::Wasm, _) => "wasm",
            (_, OperatingSystem::Windows) => "obj",
            _ => "o",
        }
    }
}

/// Create the target for a description.
pub fn create_target(description: TargetDescription) -> Box<dyn Target> {
    match description.arch {
        Arch::X86_64 => Box::new(x86_64::X86_64Target::new(description)),
        Arch::AArch64 => Box::new(aarch64::AArch64Target::new(description)),
        Arch::Wasm => Box::new(wasm::WasmTarget::new(description)),
    }
}
