//! Integrated GPU probes (Intel and AMD)
//!
//! Render-capable nodes under `<dev_root>/dri` are enumerated in minor
//! order. Each node is identified through the vendor diagnostic tool
//! (Intel only) and the sysfs PCI vendor ID of its DRM card. The first node
//! that identifies as the target vendor wins.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::{DeviceProbe, ProbeError, ProbeMethod};
use crate::context::DetectionContext;
use crate::record::{AmdIgpuRecord, IntelIgpuRecord};

/// PCI vendor ID of Intel
pub const INTEL_VENDOR_ID: &str = "0x8086";
/// PCI vendor ID of AMD/ATI
pub const AMD_VENDOR_ID: &str = "0x1002";

/// First DRM render minor
const RENDER_MINOR_BASE: u32 = 128;

/// Processor name fragments of AMD parts with Radeon graphics on die
const AMD_IGPU_MARKERS: &[&str] = &["780m", "680m", "vega", "radeon"];

/// Standard Intel iGPU probe
pub fn intel_probe() -> DeviceProbe<IntelIgpuRecord> {
    DeviceProbe::new()
        .with_method(IntelRenderNodes)
        .with_method(IntelGpuFrequency)
}

/// Standard AMD iGPU probe
pub fn amd_probe() -> DeviceProbe<AmdIgpuRecord> {
    DeviceProbe::new()
        .with_method(AmdRenderNodes)
        .with_method(AmdProcessorLabel)
}

/// List `renderD*` nodes sorted by minor number
pub async fn render_nodes(dev_root: &Path) -> Result<Vec<PathBuf>, ProbeError> {
    let dri = dev_root.join("dri");
    let mut entries = match tokio::fs::read_dir(&dri).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut nodes = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if render_minor(&path).is_some() {
            nodes.push(path);
        }
    }
    nodes.sort_by_key(|p| render_minor(p));
    Ok(nodes)
}

fn render_minor(node: &Path) -> Option<u32> {
    node.file_name()?
        .to_str()?
        .strip_prefix("renderD")?
        .parse()
        .ok()
}

/// DRM card index of a render node (`renderD128` -> `card0`)
pub fn card_index(node: &Path) -> Option<u32> {
    render_minor(node)?.checked_sub(RENDER_MINOR_BASE)
}

fn card_device_dir(ctx: &DetectionContext, node: &Path) -> Option<PathBuf> {
    let card = card_index(node)?;
    Some(ctx.sys_path(format!("class/drm/card{}/device", card)))
}

async fn read_trimmed(path: &Path) -> Result<Option<String>, ProbeError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether the sysfs vendor file of the node's card matches `vendor_id`
async fn sysfs_vendor_matches(
    ctx: &DetectionContext,
    node: &Path,
    vendor_id: &str,
) -> Result<bool, ProbeError> {
    let Some(device_dir) = card_device_dir(ctx, node) else {
        return Ok(false);
    };
    let vendor = read_trimmed(&device_dir.join("vendor")).await?;
    trace!(node = %node.display(), vendor = ?vendor, "sysfs vendor");
    Ok(vendor.is_some_and(|v| v.eq_ignore_ascii_case(vendor_id)))
}

/// Vendor check for one node; a read error skips the node, not the scan
async fn node_vendor_matches(ctx: &DetectionContext, node: &Path, vendor_id: &str) -> bool {
    match sysfs_vendor_matches(ctx, node, vendor_id).await {
        Ok(matched) => matched,
        Err(e) => {
            warn!(node = %node.display(), error = %e, "Unreadable sysfs vendor, skipping node");
            false
        }
    }
}

/// Render nodes identified as Intel via `vainfo`, then sysfs
pub struct IntelRenderNodes;

#[async_trait]
impl ProbeMethod<IntelIgpuRecord> for IntelRenderNodes {
    fn name(&self) -> &'static str {
        "render-nodes"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<IntelIgpuRecord>, ProbeError> {
        let mut vainfo_usable = true;

        for node in render_nodes(&ctx.settings.dev_root).await? {
            let device = node.to_string_lossy().to_string();

            if vainfo_usable {
                let result = ctx
                    .run_tool(
                        &ctx.settings.tools.vainfo,
                        &["--display", "drm", "--device", &device],
                        ctx.settings.tool_timeout,
                    )
                    .await;

                match result {
                    Ok(output) if output.stdout.contains("Intel") => {
                        let driver = if output.stdout.contains("i915") { "i915" } else { "xe" };
                        return Ok(Some(IntelIgpuRecord {
                            available: true,
                            device: Some(node),
                            driver: Some(driver.to_string()),
                        }));
                    }
                    Ok(_) => {}
                    Err(ProbeError::ToolMissing(tool)) => {
                        debug!(tool = %tool, "vainfo not installed, using sysfs only");
                        vainfo_usable = false;
                    }
                    Err(e) => {
                        debug!(node = %device, error = %e, "vainfo probe failed");
                    }
                }
            }

            if node_vendor_matches(ctx, &node, INTEL_VENDOR_ID).await {
                return Ok(Some(IntelIgpuRecord {
                    available: true,
                    device: Some(node),
                    driver: None,
                }));
            }
        }

        Ok(None)
    }
}

/// Last-resort signal: the Intel frequency-control tool works
pub struct IntelGpuFrequency;

#[async_trait]
impl ProbeMethod<IntelIgpuRecord> for IntelGpuFrequency {
    fn name(&self) -> &'static str {
        "intel-gpu-frequency"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<IntelIgpuRecord>, ProbeError> {
        let output = ctx
            .run_tool(
                &ctx.settings.tools.intel_gpu_frequency,
                &["--get"],
                ctx.settings.light_tool_timeout,
            )
            .await?;

        Ok(output.success.then(|| IntelIgpuRecord {
            available: true,
            ..Default::default()
        }))
    }
}

/// Render nodes identified as AMD via sysfs
pub struct AmdRenderNodes;

#[async_trait]
impl ProbeMethod<AmdIgpuRecord> for AmdRenderNodes {
    fn name(&self) -> &'static str {
        "render-nodes"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<AmdIgpuRecord>, ProbeError> {
        for node in render_nodes(&ctx.settings.dev_root).await? {
            if !node_vendor_matches(ctx, &node, AMD_VENDOR_ID).await {
                continue;
            }

            let model = match card_device_dir(ctx, &node) {
                Some(dir) => {
                    let product = dir.join("product");
                    match read_trimmed(&product).await {
                        Ok(model) => model.filter(|m| !m.is_empty()),
                        Err(e) => {
                            warn!(path = %product.display(), error = %e, "Unreadable sysfs product, model left unset");
                            None
                        }
                    }
                }
                None => None,
            };

            return Ok(Some(AmdIgpuRecord {
                available: true,
                device: Some(node),
                driver: Some("amdgpu".to_string()),
                model,
            }));
        }

        Ok(None)
    }
}

/// Labels the iGPU from the processor name when sysfs gave no model
pub struct AmdProcessorLabel;

#[async_trait]
impl ProbeMethod<AmdIgpuRecord> for AmdProcessorLabel {
    fn name(&self) -> &'static str {
        "processor-label"
    }

    fn enrichment_only(&self) -> bool {
        true
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<AmdIgpuRecord>, ProbeError> {
        let processor = ctx.identity.processor_lower();
        let amd_part = processor.contains("amd") || processor.contains("ryzen");
        let has_graphics = AMD_IGPU_MARKERS.iter().any(|m| processor.contains(m));

        Ok((amd_part && has_graphics).then(|| AmdIgpuRecord {
            model: Some("AMD Radeon Graphics (iGPU)".to_string()),
            ..Default::default()
        }))
    }
}
