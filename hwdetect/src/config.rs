//! Configuration module for hwdetect
//!
//! Handles loading and validating configuration from YAML files and environment variables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use hwdetect_core::arbiter::DEFAULT_PRIORITY;
use hwdetect_core::npu::{self, RuntimeConfig, DEFAULT_DEVICE_PATHS};
use hwdetect_core::{AccelRule, BackendArbitrator, ProbeSettings, ToolNames};

/// External tool names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_nvidia_smi")]
    pub nvidia_smi: String,

    #[serde(default = "default_vainfo")]
    pub vainfo: String,

    #[serde(default = "default_intel_gpu_frequency")]
    pub intel_gpu_frequency: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            nvidia_smi: default_nvidia_smi(),
            vainfo: default_vainfo(),
            intel_gpu_frequency: default_intel_gpu_frequency(),
        }
    }
}

/// Probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Timeout for vendor tools (nvidia-smi, vainfo)
    #[serde(with = "humantime_serde", default = "default_tool_timeout")]
    pub tool_timeout: Duration,

    /// Timeout for lightweight tool probes
    #[serde(with = "humantime_serde", default = "default_light_tool_timeout")]
    pub light_tool_timeout: Duration,

    #[serde(default = "default_dev_root")]
    pub dev_root: PathBuf,

    #[serde(default = "default_sys_root")]
    pub sys_root: PathBuf,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Install marker of the Ryzen AI software stack
    #[serde(default = "default_ryzen_ai_marker")]
    pub ryzen_ai_marker: PathBuf,

    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            tool_timeout: default_tool_timeout(),
            light_tool_timeout: default_light_tool_timeout(),
            dev_root: default_dev_root(),
            sys_root: default_sys_root(),
            proc_root: default_proc_root(),
            ryzen_ai_marker: default_ryzen_ai_marker(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Backend arbitration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationConfig {
    /// Accelerators in priority order; CPU fallback is implicit
    #[serde(default = "default_priority")]
    pub priority: Vec<AccelRule>,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
        }
    }
}

/// NPU runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpuConfig {
    /// Candidate device nodes, tried in order
    #[serde(default = "default_device_paths")]
    pub device_paths: Vec<PathBuf>,
}

impl Default for NpuConfig {
    fn default() -> Self {
        Self {
            device_paths: default_device_paths(),
        }
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Write the Prometheus text exposition here after each run
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Force software-only execution (skip NPU probes and device access)
    #[serde(default)]
    pub cpu_only: bool,

    /// Snapshot output path
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Write TTS_BACKEND/STT_BACKEND lines here
    #[serde(default)]
    pub env_file: Option<PathBuf>,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub arbitration: ArbitrationConfig,

    #[serde(default)]
    pub npu: NpuConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cpu_only: false,
            output: default_output(),
            env_file: None,
            probe: ProbeConfig::default(),
            arbitration: ArbitrationConfig::default(),
            npu: NpuConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.probe.tool_timeout.is_zero() {
            anyhow::bail!("probe.tool_timeout must be > 0");
        }
        if self.probe.light_tool_timeout.is_zero() {
            anyhow::bail!("probe.light_tool_timeout must be > 0");
        }
        if self.arbitration.priority.is_empty() {
            anyhow::bail!("arbitration.priority must name at least one accelerator");
        }
        let mut seen = HashSet::new();
        for rule in &self.arbitration.priority {
            if !seen.insert(rule) {
                anyhow::bail!("arbitration.priority lists {} more than once", rule);
            }
        }
        if self.npu.device_paths.is_empty() {
            anyhow::bail!("npu.device_paths must not be empty");
        }
        Ok(())
    }

    /// Apply `CPU_ONLY_MODE` from the environment
    pub fn with_env_overrides(mut self) -> Self {
        if npu::cpu_only_from_env() {
            self.cpu_only = true;
        }
        self
    }

    /// Probe settings for the detection context
    pub fn to_probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            tool_timeout: self.probe.tool_timeout,
            light_tool_timeout: self.probe.light_tool_timeout,
            dev_root: self.probe.dev_root.clone(),
            sys_root: self.probe.sys_root.clone(),
            proc_root: self.probe.proc_root.clone(),
            ryzen_ai_marker: self.probe.ryzen_ai_marker.clone(),
            tools: ToolNames {
                nvidia_smi: self.probe.tools.nvidia_smi.clone(),
                vainfo: self.probe.tools.vainfo.clone(),
                intel_gpu_frequency: self.probe.tools.intel_gpu_frequency.clone(),
            },
            cpu_only: self.cpu_only,
        }
    }

    pub fn arbitrator(&self) -> BackendArbitrator {
        BackendArbitrator::new(self.arbitration.priority.clone())
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            device_paths: self.npu.device_paths.clone(),
            cpu_only: self.cpu_only,
        }
    }
}

// Default value functions
fn default_output() -> PathBuf {
    PathBuf::from(hwdetect_core::report::SNAPSHOT_FILE)
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_light_tool_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_dev_root() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_sys_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_ryzen_ai_marker() -> PathBuf {
    PathBuf::from("/opt/ryzen-ai-sw")
}

fn default_nvidia_smi() -> String {
    "nvidia-smi".to_string()
}

fn default_vainfo() -> String {
    "vainfo".to_string()
}

fn default_intel_gpu_frequency() -> String {
    "intel_gpu_frequency".to_string()
}

fn default_priority() -> Vec<AccelRule> {
    DEFAULT_PRIORITY.to_vec()
}

fn default_device_paths() -> Vec<PathBuf> {
    DEFAULT_DEVICE_PATHS.iter().map(PathBuf::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.output, PathBuf::from("hardware_detection.json"));
        assert_eq!(config.arbitration.priority[0], AccelRule::AmdNpu);
        assert_eq!(config.npu.device_paths.len(), 5);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
cpu_only: false
output: /var/lib/hwdetect/hardware_detection.json

probe:
  tool_timeout: 3s
  light_tool_timeout: 500ms
  dev_root: /host/dev
  tools:
    nvidia_smi: /usr/bin/nvidia-smi

arbitration:
  priority: [nvidia_gpu, amd_npu]

npu:
  device_paths: [/dev/accel/accel0]

metrics:
  textfile: /var/lib/node_exporter/hwdetect.prom
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe.tool_timeout, Duration::from_secs(3));
        assert_eq!(config.probe.light_tool_timeout, Duration::from_millis(500));
        assert_eq!(config.probe.tools.vainfo, "vainfo");
        assert_eq!(
            config.arbitration.priority,
            vec![AccelRule::NvidiaGpu, AccelRule::AmdNpu]
        );

        let settings = config.to_probe_settings();
        assert_eq!(settings.dev_root, PathBuf::from("/host/dev"));
        assert_eq!(settings.sys_root, PathBuf::from("/sys"));
        assert_eq!(settings.tools.nvidia_smi, "/usr/bin/nvidia-smi");
    }

    #[test]
    fn test_validation_rejects() {
        let mut config = Config::default();
        config.probe.tool_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.arbitration.priority = vec![AccelRule::AmdNpu, AccelRule::AmdNpu];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.arbitration.priority.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.npu.device_paths.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "cpu_only: true\nenv_file: /run/hwdetect/backend.env\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.cpu_only);
        assert_eq!(config.env_file, Some(PathBuf::from("/run/hwdetect/backend.env")));
        assert_eq!(config.probe.tool_timeout, Duration::from_secs(5));

        assert!(Config::from_file(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_unknown_rule_rejected() {
        assert!(Config::from_yaml("arbitration:\n  priority: [rocm]\n").is_err());
    }

    #[test]
    fn test_cpu_only_flows_into_settings() {
        let config = Config {
            cpu_only: true,
            ..Config::default()
        };
        assert!(config.to_probe_settings().cpu_only);
        assert!(config.runtime_config().cpu_only);
    }
}
