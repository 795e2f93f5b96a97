//! Banjo hot-reloader command-line interface

use anyhow::{bail, Result};
use banjo_compiler::{CompilerConfig, EmptyProvider};
use banjo_hot_reload::{FileWatcher, HotReloader, TargetProcess};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

/// Watches Banjo sources and live-patches a running program
#[derive(Parser)]
#[command(name = "banjo-hot-reloader")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// The executable to attach to
    #[arg(long)]
    executable: PathBuf,

    /// The source directory to watch
    #[arg(long)]
    dir: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();

    let mut process = spawn_target(&cli.executable)?;
    while !process.is_running() {
        process.poll();
    }
    log::info!("executable loaded");

    let config = CompilerConfig {
        hot_reload: true,
        search_paths: vec![cli.dir.clone()],
        ..Default::default()
    };
    let mut provider = EmptyProvider;

    let mut reloader = HotReloader::attach(process.as_mut())?;

    let (sender, receiver) = mpsc::channel();
    let watcher = FileWatcher::start(cli.dir, sender);

    while process_alive(&receiver, &config, &mut provider, &mut reloader)? {}

    watcher.stop();
    log::info!("process exited");
    Ok(())
}

fn process_alive(
    receiver: &mpsc::Receiver<PathBuf>,
    config: &CompilerConfig,
    provider: &mut EmptyProvider,
    reloader: &mut HotReloader,
) -> Result<bool> {
    match receiver.recv_timeout(Duration::from_millis(25)) {
        Ok(path) => {
            reloader.reload_file(config, provider, &path)?;
            Ok(true)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => Ok(true),
        Err(mpsc::RecvTimeoutError::Disconnected) => Ok(false),
    }
}

/// Platform process control (debug-API spawning, remote memory
/// primitives) plugs in here; this build has no backend linked.
fn spawn_target(executable: &std::path::Path) -> Result<Box<dyn TargetProcess>> {
    bail!(
        "no target-process backend is linked into this build; cannot launch '{}'",
        executable.display()
    );
}
