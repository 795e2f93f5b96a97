//! The compilation pipeline
//!
//! Frontend (analyzed SIR) to SSA, through the mid-end passes, into the
//! target backend and out as object-file bytes. Stages return results;
//! only the binary entry point decides exit codes.

use crate::config::CompilerConfig;
use banjo_common::{BanjoError, BanjoResult, Reports};
use banjo_sir::Unit;
use banjo_target::create_target;
use std::io::Write;
use std::path::Path;

pub struct Compiler<'a> {
    config: &'a CompilerConfig,
    pub reports: Reports,
}

impl<'a> Compiler<'a> {
    pub fn new(config: &'a CompilerConfig) -> Self {
        Self {
            config,
            reports: Reports::new(),
        }
    }

    /// Run semantic analysis and the full backend over a unit, producing
    /// object-file bytes. Returns `None` when diagnostics are fatal.
    pub fn compile(&mut self, mut unit: Unit) -> BanjoResult<Option<Vec<u8>>> {
        if self.config.debug {
            std::fs::create_dir_all("logs")?;
            dump(Path::new("logs/sir.generated.txt"), &unit)?;
        }

        log::info!("analyzing {} modules", unit.mods.len());
        banjo_sema::analyze(&mut unit, &mut self.reports);

        if self.config.debug {
            dump(Path::new("logs/sir.analyzed.txt"), &unit)?;
        }

        // Backend stages must not run on invalid input.
        if !self.reports.is_valid() {
            return Ok(None);
        }

        let description = self.config.target_description();
        let target = create_target(description);

        log::info!("lowering to SSA");
        let mut ssa_module = banjo_ssa::gen::generate(&unit, target.calling_conv());

        banjo_ssa::passes::PassRunner::new()
            .with_opt_level(self.config.opt_level)
            .with_addr_table(self.config.hot_reload)
            .run(&mut ssa_module);

        if self.config.debug {
            dump(Path::new("logs/ssa.input.cryoir"), &ssa_module)?;
        }

        if let Err(error) = banjo_ssa::verify::verify_module(&ssa_module) {
            return Err(BanjoError::internal(format!(
                "invalid SSA for '{}': {}",
                error.function, error.message
            )));
        }

        log::info!("selecting instructions");
        let mut machine_module = target.lower(&ssa_module)?;

        log::info!("running machine passes");
        target.run_machine_passes(&mut machine_module)?;

        log::info!("encoding object file");
        let bytes = banjo_emit::emit_object(description, &machine_module)?;
        Ok(Some(bytes))
    }

    /// The output file name for this configuration.
    pub fn output_file_name(&self) -> String {
        let description = self.config.target_description();
        let target = create_target(description);
        format!("main.{}", target.output_file_ext())
    }

    pub fn write_output(&self, bytes: &[u8]) -> BanjoResult<()> {
        let name = self.output_file_name();
        let mut file = std::fs::File::create(&name)?;
        file.write_all(bytes)?;
        log::info!("wrote {} ({} bytes)", name, bytes.len());
        Ok(())
    }
}

fn dump(path: &Path, value: &impl std::fmt::Debug) -> BanjoResult<()> {
    let mut file = std::fs::File::create(path)?;
    write!(file, "{:#?}", value)?;
    Ok(())
}
