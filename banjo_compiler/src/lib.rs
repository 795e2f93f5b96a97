//! Driver library for the Banjo compiler
//!
//! The binary entry point is thin: it parses arguments into a
//! [`config::CompilerConfig`], obtains a unit from the frontend seam, and
//! runs the [`driver::Compiler`] pipeline. Exposing the pieces as a
//! library lets the hot reloader and the integration tests reuse them.

pub mod config;
pub mod driver;
pub mod frontend;
pub mod render;

pub use config::{CompilerConfig, OutputType};
pub use driver::Compiler;
pub use frontend::{EmptyProvider, ModuleProvider};
