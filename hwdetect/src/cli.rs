//! CLI argument parsing for hwdetect

use std::path::PathBuf;

use clap::Parser;

/// Speech acceleration hardware detector - probes NPU/GPU/iGPU/CPU and
/// recommends TTS/STT backends
#[derive(Debug, Parser)]
#[command(name = "hwdetect")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/hwdetect/config.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "HWDETECT_LOG_LEVEL")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long, default_value = "false", env = "HWDETECT_LOG_JSON")]
    pub log_json: bool,

    /// Snapshot output path (overrides config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write TTS_BACKEND/STT_BACKEND lines to this file
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Write Prometheus metrics to this textfile (overrides config)
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Render a saved snapshot instead of probing
    #[arg(long, value_name = "SNAPSHOT")]
    pub show: Option<PathBuf>,

    /// Open the NPU runtime and report whether a device responds
    #[arg(long)]
    pub npu_check: bool,

    /// Force software-only execution (no NPU access)
    #[arg(long, default_value = "false")]
    pub cpu_only: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["hwdetect"]).unwrap();
        assert_eq!(cli.config.to_str().unwrap(), "/etc/hwdetect/config.yaml");
        assert!(!cli.log_json);
        assert!(cli.output.is_none());
        assert!(cli.show.is_none());
        assert!(!cli.npu_check);
        assert!(!cli.cpu_only);
    }

    #[test]
    fn test_cli_outputs() {
        let cli = Cli::try_parse_from([
            "hwdetect",
            "-o",
            "/tmp/hw.json",
            "--env-file",
            "/tmp/backend.env",
            "--metrics-file",
            "/tmp/hwdetect.prom",
        ])
        .unwrap();
        assert_eq!(cli.output.unwrap().to_str().unwrap(), "/tmp/hw.json");
        assert_eq!(cli.env_file.unwrap().to_str().unwrap(), "/tmp/backend.env");
        assert!(cli.metrics_file.is_some());
    }

    #[test]
    fn test_cli_modes() {
        let cli = Cli::try_parse_from(["hwdetect", "--npu-check", "--cpu-only"]).unwrap();
        assert!(cli.npu_check);
        assert!(cli.cpu_only);

        let cli = Cli::try_parse_from(["hwdetect", "--show", "hardware_detection.json"]).unwrap();
        assert_eq!(cli.show.unwrap().to_str().unwrap(), "hardware_detection.json");
    }
}
