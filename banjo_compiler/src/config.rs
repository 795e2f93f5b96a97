//! Compiler configuration
//!
//! An explicit configuration value passed by reference into each stage;
//! nothing in the pipeline reads process-wide state.

use banjo_target::{Arch, CodeModel, Environment, OperatingSystem, TargetDescription};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    Executable,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    pub output_type: OutputType,
    pub arch: Arch,
    pub os: OperatingSystem,
    pub env: Environment,
    pub opt_level: u32,
    pub search_paths: Vec<PathBuf>,
    pub optional_semicolons: bool,
    pub hot_reload: bool,
    pub debug: bool,
    pub testing: bool,
    pub color_diagnostics: bool,
    pub code_model: CodeModel,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            output_type: OutputType::Object,
            arch: Arch::X86_64,
            os: OperatingSystem::Linux,
            env: Environment::Gnu,
            opt_level: 0,
            search_paths: Vec::new(),
            optional_semicolons: false,
            hot_reload: false,
            debug: false,
            testing: false,
            color_diagnostics: false,
            code_model: CodeModel::Small,
        }
    }
}

impl CompilerConfig {
    pub fn target_description(&self) -> TargetDescription {
        TargetDescription {
            arch: self.arch,
            os: self.os,
            env: self.env,
            code_model: self.code_model,
        }
    }
}
