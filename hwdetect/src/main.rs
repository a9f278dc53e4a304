//! Speech acceleration hardware detector
//!
//! Probes the host for NPU, GPU, iGPU and CPU capabilities, recommends a
//! backend for the TTS and STT engines, prints a human-readable report and
//! writes a JSON snapshot for the serving components.

mod cli;
mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;
use config::Config;
use hwdetect_core::npu::OpenOutcome;
use hwdetect_core::report::{self, Snapshot};
use hwdetect_core::{DetectionContext, DetectionMetrics, HardwareDetector, NpuRuntime, SystemIdentity};

/// Initialize the tracing/logging subsystem. Logs go to stderr; stdout
/// carries only the report.
fn init_logging(log_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Load, override and validate configuration
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        info!(path = ?cli.config, "Config file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if cli.cpu_only {
        config.cpu_only = true;
    }
    if let Some(output) = &cli.output {
        config.output = output.clone();
    }
    if let Some(env_file) = &cli.env_file {
        config.env_file = Some(env_file.clone());
    }
    if let Some(textfile) = &cli.metrics_file {
        config.metrics.textfile = Some(textfile.clone());
    }

    let config = config.with_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Re-render a saved snapshot
fn show(path: &Path) -> Result<()> {
    let snapshot =
        Snapshot::load(path).with_context(|| format!("Failed to load snapshot {:?}", path))?;
    println!(
        "Snapshot taken {}\n",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    print!(
        "{}",
        report::render_report(&snapshot.inventory(), &snapshot.recommendations)
    );
    Ok(())
}

/// Open the NPU runtime once and report the outcome
fn npu_check(config: &Config) -> Result<()> {
    let mut runtime = NpuRuntime::new(config.runtime_config());
    let outcome = runtime.open().context("NPU runtime failed to open")?;

    match outcome {
        OpenOutcome::Opened(path) | OpenOutcome::AlreadyOpen(path) => {
            println!("✅ NPU runtime initialized on {}", path.display());
        }
        OpenOutcome::Unavailable if config.cpu_only => {
            println!("🖥️ NPU runtime disabled (software-only mode)");
        }
        OpenOutcome::Unavailable => {
            println!("⚠️ No NPU device responded, software fallback will be used");
        }
    }

    runtime.close();
    Ok(())
}

/// Probe, arbitrate, report
async fn run(config: Config) -> Result<()> {
    let metrics = Arc::new(DetectionMetrics::new());
    let ctx = DetectionContext::new(SystemIdentity::capture(), config.to_probe_settings())
        .with_metrics(metrics.clone());

    let inventory = HardwareDetector::new().detect(&ctx).await;
    let recommendation = config.arbitrator().recommend(&inventory);
    recommendation.record_metrics(&metrics);

    print!("{}", report::render_report(&inventory, &recommendation));
    println!("\n{}", "=".repeat(50));

    let snapshot = Snapshot::new(&inventory, &recommendation);
    snapshot
        .save(&config.output)
        .with_context(|| format!("Failed to write snapshot to {:?}", config.output))?;
    println!("\n💾 Results saved to {}", config.output.display());

    if let Some(path) = &config.env_file {
        std::fs::write(path, report::render_env(&recommendation))
            .with_context(|| format!("Failed to write env file {:?}", path))?;
        info!(path = %path.display(), "Backend env file written");
    }

    if let Some(path) = &config.metrics.textfile {
        if let Err(e) = std::fs::write(path, metrics.export()) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(&cli.log_level, cli.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "hwdetect starting");

    if let Some(path) = &cli.show {
        return show(path);
    }

    let config = load_config(&cli)?;

    info!(cpu_only = config.cpu_only, output = %config.output.display(), "Configuration loaded");

    if cli.npu_check {
        return npu_check(&config);
    }

    run(config).await
}
