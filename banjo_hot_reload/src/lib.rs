//! Hot reloading for Banjo programs
//!
//! Watches a source directory, recompiles changed functions with the
//! LARGE code model, loads the bytes into the target process, and patches
//! the function's slot in the address table so the next call lands in the
//! new code.

pub mod jit;
pub mod process;
pub mod reloader;
pub mod watcher;

pub use jit::JitCompiler;
pub use process::{LocalProcess, MemoryProtection, TargetProcess};
pub use reloader::HotReloader;
pub use watcher::FileWatcher;
