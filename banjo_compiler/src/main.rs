//! Banjo compiler command-line interface

use anyhow::Result;
use banjo_compiler::{config::OutputType, CompilerConfig, Compiler, EmptyProvider, ModuleProvider};
use banjo_target::{Arch, CodeModel, Environment, OperatingSystem};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// The Banjo ahead-of-time compiler
#[derive(Parser)]
#[command(name = "banjo-compiler")]
#[command(about = "Compiles Banjo source modules into native or WebAssembly objects")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Output kind to produce
    #[arg(long = "type", value_parser = parse_output_type, default_value = "object")]
    output_type: OutputType,

    /// Target architecture
    #[arg(long, value_parser = parse_arch, default_value = "x86_64")]
    arch: Arch,

    /// Target operating system
    #[arg(long, value_parser = parse_os, default_value = "linux")]
    os: OperatingSystem,

    /// Target environment
    #[arg(long, value_parser = parse_env, default_value = "gnu")]
    env: Environment,

    /// Optimization level
    #[arg(long = "opt-level", default_value_t = 0)]
    opt_level: u32,

    /// Source search root (repeatable)
    #[arg(long = "path")]
    paths: Vec<PathBuf>,

    /// Allow statements without trailing semicolons
    #[arg(long = "optional-semicolons")]
    optional_semicolons: bool,

    /// Generate the hot-reload address table
    #[arg(long = "hot-reload")]
    hot_reload: bool,

    /// Write pipeline dumps under logs/
    #[arg(long)]
    debug: bool,

    /// Compile the test driver entry point
    #[arg(long)]
    testing: bool,

    /// Render diagnostics with colors
    #[arg(long = "color-diagnostics")]
    color_diagnostics: bool,
}

fn parse_output_type(value: &str) -> Result<OutputType, String> {
    match value {
        "executable" => Ok(OutputType::Executable),
        "object" => Ok(OutputType::Object),
        other => Err(format!("unknown output type '{}'", other)),
    }
}

fn parse_arch(value: &str) -> Result<Arch, String> {
    match value {
        "x86_64" => Ok(Arch::X86_64),
        "aarch64" => Ok(Arch::AArch64),
        "wasm" => Ok(Arch::Wasm),
        other => Err(format!("unknown architecture '{}'", other)),
    }
}

fn parse_os(value: &str) -> Result<OperatingSystem, String> {
    match value {
        "windows" => Ok(OperatingSystem::Windows),
        "linux" => Ok(OperatingSystem::Linux),
        "macos" => Ok(OperatingSystem::Macos),
        "unknown" => Ok(OperatingSystem::Unknown),
        "emscripten" => Ok(OperatingSystem::Emscripten),
        other => Err(format!("unknown operating system '{}'", other)),
    }
}

fn parse_env(value: &str) -> Result<Environment, String> {
    match value {
        "msvc" => Ok(Environment::Msvc),
        "gnu" => Ok(Environment::Gnu),
        other => Err(format!("unknown environment '{}'", other)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();

    let config = CompilerConfig {
        output_type: cli.output_type,
        arch: cli.arch,
        os: cli.os,
        env: cli.env,
        opt_level: cli.opt_level,
        search_paths: cli.paths,
        optional_semicolons: cli.optional_semicolons,
        hot_reload: cli.hot_reload,
        debug: cli.debug,
        testing: cli.testing,
        color_diagnostics: cli.color_diagnostics,
        code_model: CodeModel::Small,
    };

    match run(&config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &CompilerConfig) -> Result<bool> {
    if config.debug {
        std::fs::create_dir_all("logs")?;
        std::fs::write("logs/config.json", serde_json::to_string_pretty(config)?)?;
    }

    let mut compiler = Compiler::new(config);
    let mut provider = EmptyProvider;
    let unit = provider.load(config, &mut compiler.reports)?;

    let result = compiler.compile(unit)?;
    banjo_compiler::render::print_reports(&compiler.reports, config.color_diagnostics);

    match result {
        Some(bytes) => {
            compiler.write_output(&bytes)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
