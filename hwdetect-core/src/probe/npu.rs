//! AMD NPU (Ryzen AI / XDNA) probe
//!
//! Independent signals, each able to establish availability on its own:
//! - dedicated kernel driver node (`/dev/xdna`)
//! - accel class node used by the NPU runtime (`/dev/accel/accel0`)
//! - any device node named `npu*`
//! - known processor models (the only source of tier and TOPS)
//! - Ryzen AI software install marker
//!
//! When only device/driver signals match, the record is available but
//! unidentified: tier and TOPS stay unset.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{DeviceProbe, ProbeError, ProbeMethod};
use crate::context::DetectionContext;
use crate::npu;
use crate::record::{AmdNpuRecord, NpuTier};

/// Known NPU-equipped processor families: (model substrings, tier, TOPS)
const KNOWN_MODELS: &[(&[&str], NpuTier, u32)] = &[
    // Ryzen 7040 series (Phoenix)
    (&["7840", "7940", "7640", "7540"], NpuTier::Xdna1, 16),
    // Ryzen 8040 series (Hawk Point)
    (&["8840", "8940", "8640", "8540"], NpuTier::Xdna1, 16),
    // Ryzen AI 300 series (Strix Point)
    (&["ai 3"], NpuTier::Xdna2, 50),
];

/// Marketing names of the AI 300 series ("Ryzen AI 9 HX 370", "Ryzen AI 7 PRO 360")
static STRIX_POINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ryzen ai \d+ (?:hx |pro )?3\d\d").expect("valid regex"));

/// Standard NPU probe
pub fn default_probe() -> DeviceProbe<AmdNpuRecord> {
    DeviceProbe::new()
        .with_method(XdnaDriverNode)
        .with_method(AccelNode)
        .with_method(NpuDeviceNodes)
        .with_method(KnownModelTable)
        .with_method(RyzenAiSoftware)
}

/// Look up a processor string in the known-model table
pub fn lookup_model(processor: &str) -> Option<(NpuTier, u32)> {
    let processor = processor.to_lowercase();
    KNOWN_MODELS
        .iter()
        .find(|(models, _, _)| models.iter().any(|m| processor.contains(m)))
        .map(|(_, tier, tops)| (*tier, *tops))
        .or_else(|| STRIX_POINT.is_match(&processor).then_some((NpuTier::Xdna2, 50)))
}

async fn exists(path: &std::path::Path) -> Result<bool, ProbeError> {
    Ok(tokio::fs::try_exists(path).await?)
}

/// Dedicated XDNA kernel driver node
pub struct XdnaDriverNode;

#[async_trait]
impl ProbeMethod<AmdNpuRecord> for XdnaDriverNode {
    fn name(&self) -> &'static str {
        "xdna-driver"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<AmdNpuRecord>, ProbeError> {
        let present = exists(&ctx.dev_path("xdna")).await?;
        Ok(present.then(|| AmdNpuRecord::with_driver("xdna")))
    }
}

/// Accel class node, existence check only (no open)
pub struct AccelNode;

#[async_trait]
impl ProbeMethod<AmdNpuRecord> for AccelNode {
    fn name(&self) -> &'static str {
        "accel-node"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<AmdNpuRecord>, ProbeError> {
        let candidates = [ctx.dev_path("accel").join("accel0")];
        let found = npu::present_device_nodes(&candidates);
        Ok((!found.is_empty()).then(|| AmdNpuRecord::with_driver("amdxdna")))
    }
}

/// Any `npu*` node in the device root
pub struct NpuDeviceNodes;

#[async_trait]
impl ProbeMethod<AmdNpuRecord> for NpuDeviceNodes {
    fn name(&self) -> &'static str {
        "device-pattern"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<AmdNpuRecord>, ProbeError> {
        let mut entries = match tokio::fs::read_dir(&ctx.settings.dev_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with("npu") {
                return Ok(Some(AmdNpuRecord::with_driver("npu")));
            }
        }

        Ok(None)
    }
}

/// Processor model lookup
pub struct KnownModelTable;

#[async_trait]
impl ProbeMethod<AmdNpuRecord> for KnownModelTable {
    fn name(&self) -> &'static str {
        "model-table"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<AmdNpuRecord>, ProbeError> {
        Ok(lookup_model(&ctx.identity.processor)
            .map(|(tier, tops)| AmdNpuRecord::identified(tier, tops)))
    }
}

/// Ryzen AI software stack install marker
pub struct RyzenAiSoftware;

#[async_trait]
impl ProbeMethod<AmdNpuRecord> for RyzenAiSoftware {
    fn name(&self) -> &'static str {
        "ryzen-ai-sw"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<AmdNpuRecord>, ProbeError> {
        let present = exists(&ctx.settings.ryzen_ai_marker).await?;
        Ok(present.then(|| AmdNpuRecord::with_driver("ryzen-ai-sw")))
    }
}
