//! cafe-loader - Wii U RPL image loader
//!
//! Loads one image, logs where it landed and unloads it again.

use anyhow::{Context, Result};
use cl_core::{Config, ErrorKind};
use cl_loader::Loader;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Map an RPL image into memory and report its layout
#[derive(Parser)]
#[command(name = "cafe-loader", version, about)]
struct Cli {
    /// Path to the RPL image
    #[arg(required = true)]
    path: PathBuf,
}

fn exit_code(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::Io | ErrorKind::Handle => ExitCode::from(1),
        ErrorKind::Format => ExitCode::from(2),
        ErrorKind::Resource => ExitCode::from(3),
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::load().context("failed to load configuration")?;
    cl_core::logging::init(config.debug.log_level);

    tracing::info!("Starting cafe-loader");

    let loader = Loader::new(config);
    let handle = match loader.try_open(&cli.path) {
        Ok(handle) => handle,
        Err(e) => {
            loader.report_error(&e.to_string());
            return Ok(exit_code(e.kind()));
        }
    };

    loader.with_library(handle, |lib| {
        let plan = lib.plan();
        tracing::info!(
            "{}: {} of {} sections mapped, image 0x{:08x}..0x{:x} -> {:p} (0x{:x} bytes, {:?})",
            lib.path().display(),
            plan.sections.len(),
            lib.sections().len(),
            plan.min_addr,
            plan.max_addr,
            lib.region().base(),
            lib.region().len(),
            lib.region().flags()
        );
    });

    loader
        .close(handle)
        .with_context(|| format!("failed to close {}", handle))?;

    Ok(ExitCode::SUCCESS)
}
