//! JIT compilation of single functions
//!
//! Rebuilds the whole unit from the frontend on every reload, runs the
//! address-table pass, and compiles one function at a time into a partial
//! machine module encoded with the LARGE code model so the emitted code
//! reaches the host binary's address table through absolute addresses.

use banjo_common::{BanjoError, BanjoResult, Reports};
use banjo_compiler::{CompilerConfig, ModuleProvider};
use banjo_emit::BinModule;
use banjo_ssa::AddrTable;
use banjo_target::{create_target, CodeModel};

pub struct JitCompiler<'a> {
    config: &'a CompilerConfig,
    provider: &'a mut dyn ModuleProvider,
    ssa_module: Option<banjo_ssa::Module>,
    pub reports: Reports,
}

impl<'a> JitCompiler<'a> {
    pub fn new(config: &'a CompilerConfig, provider: &'a mut dyn ModuleProvider) -> Self {
        Self {
            config,
            provider,
            ssa_module: None,
            reports: Reports::new(),
        }
    }

    /// Re-run the frontend and analysis over the whole project; returns
    /// false when diagnostics are fatal.
    pub fn build_ir(&mut self) -> BanjoResult<bool> {
        self.reports.clear();
        self.ssa_module = None;

        let mut unit = self.provider.load(self.config, &mut self.reports)?;
        banjo_sema::analyze(&mut unit, &mut self.reports);

        if !self.reports.is_valid() {
            return Ok(false);
        }

        let description = self
            .config
            .target_description()
            .with_code_model(CodeModel::Large);
        let target = create_target(description);

        let mut ssa_module = banjo_ssa::gen::generate(&unit, target.calling_conv());
        banjo_ssa::passes::AddrTablePass.run(&mut ssa_module);

        self.ssa_module = Some(ssa_module);
        Ok(true)
    }

    pub fn addr_table(&self) -> Option<&AddrTable> {
        self.ssa_module.as_ref().and_then(|m| m.addr_table.as_ref())
    }

    pub fn function_names(&self) -> Vec<String> {
        self.ssa_module
            .as_ref()
            .map(|m| m.functions.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Compile a single function into an encoded module. The partial SSA
    /// module keeps every global, extern and structure so indices stay
    /// valid, but only the requested function's code.
    pub fn compile_func(&mut self, name: &str) -> BanjoResult<BinModule> {
        let ssa_module = self
            .ssa_module
            .as_ref()
            .ok_or_else(|| BanjoError::reload("no IR built"))?;

        let func = ssa_module
            .get_function(name)
            .ok_or_else(|| BanjoError::reload(format!("unknown function '{}'", name)))?;

        let mut partial = banjo_ssa::Module::new();
        partial.functions.push(func.clone());
        partial.globals = ssa_module.globals.clone();
        partial.structures = ssa_module.structures.clone();
        partial.external_functions = ssa_module.external_functions.clone();
        partial.external_globals = ssa_module.external_globals.clone();
        partial.addr_table = ssa_module.addr_table.clone();

        // Calls into other project functions were rewritten by the
        // address-table pass, so the lone function links against nothing
        // but the table and the runtime.
        let description = self
            .config
            .target_description()
            .with_code_model(CodeModel::Large);
        let target = create_target(description);

        let mut machine_module = target.lower(&partial)?;
        // The encoded module must not redefine the table section; the
        // running process already owns it.
        machine_module.addr_table = None;
        target.run_machine_passes(&mut machine_module)?;

        banjo_emit::encode_module(description, &machine_module)
    }
}
