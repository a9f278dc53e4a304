//! Detection context
//!
//! Everything a probe needs is passed in explicitly through a
//! [`DetectionContext`] built once at process start: the host identity,
//! probe settings, the tool runner and the metrics registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::identity::SystemIdentity;
use crate::metrics::DetectionMetrics;
use crate::probe::{ProbeError, SystemToolRunner, ToolOutput, ToolRunner};

/// Names (or paths) of the external vendor tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolNames {
    pub nvidia_smi: String,
    pub vainfo: String,
    pub intel_gpu_frequency: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            nvidia_smi: "nvidia-smi".to_string(),
            vainfo: "vainfo".to_string(),
            intel_gpu_frequency: "intel_gpu_frequency".to_string(),
        }
    }
}

/// Probe settings
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Upper bound for vendor tool invocations
    pub tool_timeout: Duration,
    /// Upper bound for lightweight tool probes
    pub light_tool_timeout: Duration,
    /// Root of the device tree (normally /dev)
    pub dev_root: PathBuf,
    /// Root of sysfs (normally /sys)
    pub sys_root: PathBuf,
    /// Root of procfs (normally /proc)
    pub proc_root: PathBuf,
    /// Install marker of the Ryzen AI software stack
    pub ryzen_ai_marker: PathBuf,
    /// External tool names
    pub tools: ToolNames,
    /// Skip every NPU probe (software-only execution)
    pub cpu_only: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(5),
            light_tool_timeout: Duration::from_secs(2),
            dev_root: PathBuf::from("/dev"),
            sys_root: PathBuf::from("/sys"),
            proc_root: PathBuf::from("/proc"),
            ryzen_ai_marker: PathBuf::from("/opt/ryzen-ai-sw"),
            tools: ToolNames::default(),
            cpu_only: false,
        }
    }
}

impl ProbeSettings {
    /// Settings rooted at a fake filesystem tree (`<root>/dev`, `<root>/sys`, ...)
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            dev_root: root.join("dev"),
            sys_root: root.join("sys"),
            proc_root: root.join("proc"),
            ryzen_ai_marker: root.join("opt/ryzen-ai-sw"),
            ..Self::default()
        }
    }
}

/// Per-run detection context
#[derive(Clone)]
pub struct DetectionContext {
    /// Host identity captured at start
    pub identity: SystemIdentity,
    /// Probe settings
    pub settings: ProbeSettings,
    tools: Arc<dyn ToolRunner>,
    metrics: Arc<DetectionMetrics>,
}

impl DetectionContext {
    /// Create a context that launches real processes
    pub fn new(identity: SystemIdentity, settings: ProbeSettings) -> Self {
        Self {
            identity,
            settings,
            tools: Arc::new(SystemToolRunner),
            metrics: Arc::new(DetectionMetrics::new()),
        }
    }

    /// Replace the tool runner
    pub fn with_tools(mut self, tools: Arc<dyn ToolRunner>) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the metrics registry
    pub fn with_metrics(mut self, metrics: Arc<DetectionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics registry for this run
    pub fn metrics(&self) -> &Arc<DetectionMetrics> {
        &self.metrics
    }

    /// Run an external tool with a hard timeout
    pub async fn run_tool(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ToolOutput, ProbeError> {
        self.tools.run(program, args, timeout).await
    }

    /// Path below the device root
    pub fn dev_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.settings.dev_root.join(relative)
    }

    /// Path below the sysfs root
    pub fn sys_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.settings.sys_root.join(relative)
    }

    /// Path below the procfs root
    pub fn proc_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.settings.proc_root.join(relative)
    }
}

impl std::fmt::Debug for DetectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionContext")
            .field("identity", &self.identity)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ProbeSettings::default();
        assert_eq!(settings.tool_timeout, Duration::from_secs(5));
        assert_eq!(settings.light_tool_timeout, Duration::from_secs(2));
        assert_eq!(settings.dev_root, PathBuf::from("/dev"));
        assert!(!settings.cpu_only);
    }

    #[test]
    fn test_rooted_paths() {
        let settings = ProbeSettings::rooted_at(Path::new("/tmp/fake"));
        let ctx = DetectionContext::new(SystemIdentity::new("Linux", "x86_64", "", 1), settings);
        assert_eq!(ctx.dev_path("dri"), PathBuf::from("/tmp/fake/dev/dri"));
        assert_eq!(ctx.sys_path("class/drm"), PathBuf::from("/tmp/fake/sys/class/drm"));
        assert_eq!(ctx.proc_path("cpuinfo"), PathBuf::from("/tmp/fake/proc/cpuinfo"));
    }
}
