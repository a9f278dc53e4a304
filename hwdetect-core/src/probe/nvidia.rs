//! NVIDIA discrete GPU probe
//!
//! Authoritative only when `nvidia-smi` reports device rows. Driver and CUDA
//! versions are enrichment: NVML first, then a second `nvidia-smi` query.
//! Failure of either enrichment never invalidates the device rows.

use std::time::Duration;

use async_trait::async_trait;
use nvml_wrapper::Nvml;
use tracing::debug;

use super::{DeviceProbe, ProbeError, ProbeMethod};
use crate::context::DetectionContext;
use crate::record::{GpuDevice, NvidiaGpuRecord};

/// Standard NVIDIA probe
pub fn default_probe() -> DeviceProbe<NvidiaGpuRecord> {
    DeviceProbe::new()
        .with_method(NvidiaSmiDevices)
        .with_method(NvmlVersions)
        .with_method(NvidiaSmiDriver)
}

/// Parse `nvidia-smi --query-gpu=name,memory.total --format=csv,noheader`
///
/// Example output:
/// ```text
/// NVIDIA GeForce RTX 4070, 12282 MiB
/// NVIDIA GeForce RTX 3060, 8192 MiB
/// ```
pub fn parse_device_rows(output: &str) -> Result<Vec<GpuDevice>, ProbeError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, memory) = line
                .rsplit_once(", ")
                .ok_or_else(|| ProbeError::malformed("nvidia-smi row", line))?;
            Ok(GpuDevice {
                name: name.trim().to_string(),
                memory: memory.trim().to_string(),
            })
        })
        .collect()
}

/// Device rows from the vendor management tool
pub struct NvidiaSmiDevices;

#[async_trait]
impl ProbeMethod<NvidiaGpuRecord> for NvidiaSmiDevices {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<NvidiaGpuRecord>, ProbeError> {
        let output = ctx
            .run_tool(
                &ctx.settings.tools.nvidia_smi,
                &["--query-gpu=name,memory.total", "--format=csv,noheader"],
                ctx.settings.tool_timeout,
            )
            .await?;

        if !output.success {
            debug!(code = ?output.code, stderr = %output.stderr.trim(), "nvidia-smi reported no devices");
            return Ok(None);
        }

        let devices = parse_device_rows(&output.stdout)?;
        if devices.is_empty() {
            return Ok(None);
        }

        for device in &devices {
            debug!(name = %device.name, memory = %device.memory, "NVIDIA device");
        }

        Ok(Some(NvidiaGpuRecord {
            available: true,
            devices,
            ..Default::default()
        }))
    }
}

/// Driver and CUDA versions through NVML
pub struct NvmlVersions;

/// NVML runs in-process, so it gets the lightweight bound
fn nvml_timeout(ctx: &DetectionContext) -> Duration {
    ctx.settings.light_tool_timeout
}

fn query_nvml() -> Result<(String, String), nvml_wrapper::error::NvmlError> {
    let nvml = Nvml::init()?;
    let driver = nvml.sys_driver_version()?;
    let cuda = nvml.sys_cuda_driver_version()?;
    let cuda = format!(
        "{}.{}",
        nvml_wrapper::cuda_driver_version_major(cuda),
        nvml_wrapper::cuda_driver_version_minor(cuda)
    );
    Ok((driver, cuda))
}

#[async_trait]
impl ProbeMethod<NvidiaGpuRecord> for NvmlVersions {
    fn name(&self) -> &'static str {
        "nvml"
    }

    fn enrichment_only(&self) -> bool {
        true
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<NvidiaGpuRecord>, ProbeError> {
        let timeout = nvml_timeout(ctx);
        // A blocking thread cannot be cancelled: on timeout it keeps running
        // until NVML returns, so the bound is the short one.
        let query = tokio::task::spawn_blocking(query_nvml);

        let versions = match tokio::time::timeout(timeout, query).await {
            Ok(Ok(Ok(versions))) => versions,
            Ok(Ok(Err(e))) => {
                debug!(error = %e, "NVML unavailable");
                return Ok(None);
            }
            Ok(Err(e)) => return Err(ProbeError::Other(format!("NVML query panicked: {}", e))),
            Err(_) => {
                return Err(ProbeError::Timeout {
                    tool: "nvml".to_string(),
                    timeout,
                })
            }
        };

        let (driver, cuda) = versions;
        Ok(Some(NvidiaGpuRecord {
            driver_version: Some(driver),
            cuda_version: Some(cuda),
            ..Default::default()
        }))
    }
}

/// Driver version from a secondary `nvidia-smi` query
pub struct NvidiaSmiDriver;

#[async_trait]
impl ProbeMethod<NvidiaGpuRecord> for NvidiaSmiDriver {
    fn name(&self) -> &'static str {
        "nvidia-smi-driver"
    }

    fn enrichment_only(&self) -> bool {
        true
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<NvidiaGpuRecord>, ProbeError> {
        let output = ctx
            .run_tool(
                &ctx.settings.tools.nvidia_smi,
                &["--query-gpu=driver_version", "--format=csv,noheader"],
                ctx.settings.tool_timeout,
            )
            .await?;

        if !output.success {
            return Ok(None);
        }

        let driver = output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);

        Ok(driver.map(|driver| NvidiaGpuRecord {
            driver_version: Some(driver),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::ProbeSettings;
    use crate::identity::SystemIdentity;
    use crate::probe::ScriptedTools;
    use crate::record::CapabilityRecord;

    const ROWS: &str = "nvidia-smi --query-gpu=name,memory.total --format=csv,noheader";
    const DRIVER: &str = "nvidia-smi --query-gpu=driver_version --format=csv,noheader";

    fn ctx(tools: Arc<ScriptedTools>) -> DetectionContext {
        DetectionContext::new(
            SystemIdentity::new("Linux", "x86_64", "", 1),
            ProbeSettings::default(),
        )
        .with_tools(tools)
    }

    #[test]
    fn test_nvml_uses_light_bound() {
        let ctx = ctx(Arc::new(ScriptedTools::new()));
        assert_eq!(nvml_timeout(&ctx), ctx.settings.light_tool_timeout);
        assert!(nvml_timeout(&ctx) < ctx.settings.tool_timeout);
    }

    #[test]
    fn test_parse_rows() {
        let devices =
            parse_device_rows("NVIDIA GeForce RTX 4070, 12282 MiB\nModelX, 8192 MiB\n\n").unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].name, "ModelX");
        assert_eq!(devices[1].memory, "8192 MiB");
    }

    #[test]
    fn test_parse_malformed_row() {
        assert!(matches!(
            parse_device_rows("No devices were found"),
            Err(ProbeError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_rows_with_driver_enrichment() {
        let tools = Arc::new(ScriptedTools::new());
        tools.respond(ROWS, "ModelX, 8192 MiB\n").respond(DRIVER, "550.54.14\n");

        let record = default_probe().run(&ctx(tools)).await;
        assert!(record.available);
        assert_eq!(
            record.devices,
            vec![GpuDevice {
                name: "ModelX".to_string(),
                memory: "8192 MiB".to_string()
            }]
        );
        assert!(record.driver_version.is_some());
    }

    #[tokio::test]
    async fn test_failed_enrichment_keeps_devices() {
        let tools = Arc::new(ScriptedTools::new());
        tools.respond(ROWS, "ModelX, 8192 MiB\n").time_out(DRIVER);

        let record = default_probe().run(&ctx(tools)).await;
        assert!(record.available);
        assert_eq!(record.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_tool_is_absent() {
        let tools = Arc::new(ScriptedTools::new());
        let record = default_probe().run(&ctx(tools.clone())).await;
        assert!(record.is_unset());
        // Enrichment never runs for an absent class
        assert_eq!(tools.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_failure_is_absent() {
        let tools = Arc::new(ScriptedTools::new());
        tools.fail(ROWS, 9, "NVIDIA-SMI has failed");
        let record = default_probe().run(&ctx(tools)).await;
        assert!(record.is_unset());
    }
}
