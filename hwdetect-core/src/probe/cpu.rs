//! CPU probe
//!
//! Every host has a CPU, so this class is always available. Vendor and
//! feature flags are best-effort enrichment from the platform processor text.

use async_trait::async_trait;

use super::{DeviceProbe, ProbeError, ProbeMethod};
use crate::context::DetectionContext;
use crate::record::{CpuFeature, CpuRecord};

/// Standard CPU probe: cpuinfo first, then platform facts
pub fn default_probe() -> DeviceProbe<CpuRecord> {
    DeviceProbe::new()
        .with_method(CpuInfoMethod)
        .with_method(PlatformMethod)
}

/// Reads vendor and feature flags from `<proc_root>/cpuinfo`
pub struct CpuInfoMethod;

#[async_trait]
impl ProbeMethod<CpuRecord> for CpuInfoMethod {
    fn name(&self) -> &'static str {
        "cpuinfo"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<CpuRecord>, ProbeError> {
        let path = ctx.proc_path("cpuinfo");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(ProbeError::malformed("cpuinfo", e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(parse_cpuinfo(&content)))
    }
}

/// Parse vendor and features out of cpuinfo text
pub fn parse_cpuinfo(content: &str) -> CpuRecord {
    let mut vendor = None;
    let mut model = None;
    let mut flags: Option<&str> = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "vendor_id" if vendor.is_none() => vendor = vendor_from_text(value),
            "model name" if model.is_none() && !value.is_empty() => model = Some(value.to_string()),
            "flags" | "Features" if flags.is_none() => flags = Some(value),
            _ => {}
        }
    }

    // Some kernels omit vendor_id; fall back to the whole text
    if vendor.is_none() {
        vendor = vendor_from_text(content);
    }

    let mut features = Vec::new();
    if let Some(flags) = flags {
        let tokens: Vec<String> = flags.split_whitespace().map(str::to_lowercase).collect();
        if tokens.iter().any(|t| t == "avx2") {
            features.push(CpuFeature::Avx2);
        }
        if tokens.iter().any(|t| t.starts_with("avx512")) {
            features.push(CpuFeature::Avx512);
        }
    }

    CpuRecord {
        available: true,
        vendor,
        model,
        cores: None,
        features,
    }
}

fn vendor_from_text(text: &str) -> Option<String> {
    if text.contains("AMD") {
        Some("AMD".to_string())
    } else if text.contains("Intel") {
        Some("Intel".to_string())
    } else {
        None
    }
}

/// Platform-reported processor string and core count
pub struct PlatformMethod;

#[async_trait]
impl ProbeMethod<CpuRecord> for PlatformMethod {
    fn name(&self) -> &'static str {
        "platform"
    }

    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<CpuRecord>, ProbeError> {
        let identity = &ctx.identity;
        let processor = identity.processor.trim();

        let vendor = if processor.contains("AMD") || identity.processor_lower().contains("ryzen") {
            Some("AMD".to_string())
        } else {
            vendor_from_text(processor)
        };

        Ok(Some(CpuRecord {
            available: true,
            vendor,
            model: (!processor.is_empty()).then(|| processor.to_string()),
            cores: Some(identity.cpu_count),
            features: Vec::new(),
        }))
    }
}
