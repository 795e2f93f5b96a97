//! The frontend seam
//!
//! Lexing, parsing and module discovery live outside this workspace; they
//! hand the compiler an SIR unit through this interface. The bundled
//! provider yields an empty unit so the driver pipeline stays exercisable
//! without a parser linked in.

use crate::config::CompilerConfig;
use banjo_common::{BanjoResult, Reports};
use banjo_sir::Unit;
use std::path::Path;

/// Source of SIR units: implemented by the external parser stack.
pub trait ModuleProvider {
    /// Load every module reachable from the configured search paths.
    fn load(&mut self, config: &CompilerConfig, reports: &mut Reports) -> BanjoResult<Unit>;

    /// The module a source file belongs to, if this provider tracks file
    /// origins (the hot reloader narrows recompilation with this).
    fn module_path_of(&self, path: &Path) -> Option<Vec<String>> {
        let _ = path;
        None
    }
}

/// Provider used when no parser is linked: an empty project.
#[derive(Debug, Default)]
pub struct EmptyProvider;

impl ModuleProvider for EmptyProvider {
    fn load(&mut self, config: &CompilerConfig, _reports: &mut Reports) -> BanjoResult<Unit> {
        if !config.search_paths.is_empty() {
            log::warn!(
                "no frontend is linked into this build; {} search path(s) ignored",
                config.search_paths.len()
            );
        }
        Ok(Unit::new())
    }
}
