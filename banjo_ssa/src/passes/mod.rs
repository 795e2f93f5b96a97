//! Mid-end passes over SSA modules
//!
//! Optimization passes run conditionally on the opt level; the
//! address-table pass runs only for hot-reload builds and must run last so
//! rewritten calls are not folded back.

mod addr_table;
mod branch_simplify;
mod const_fold;
mod dce;

pub use addr_table::AddrTablePass;
pub use branch_simplify::BranchSimplifyPass;
pub use const_fold::ConstFoldPass;
pub use dce::DcePass;

use crate::Module;

#[derive(Debug, Clone, Copy, Default)]
pub struct PassRunner {
    pub opt_level: u32,
    pub generate_addr_table: bool,
}

impl PassRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_opt_level(mut self, opt_level: u32) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn with_addr_table(mut self, generate: bool) -> Self {
        self.generate_addr_table = generate;
        self
    }

    pub fn run(&self, module: &mut Module) {
        if self.opt_level > 0 {
            log::debug!("passes: constant folding");
            ConstFoldPass.run(module);
            log::debug!("passes: branch simplification");
            BranchSimplifyPass.run(module);
            log::debug!("passes: dead code elimination");
            DcePass.run(module);
        }

        if self.generate_addr_table {
            log::debug!("passes: address table");
            AddrTablePass.run(module);
        }
    }
}
