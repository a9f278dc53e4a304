//! Capability records
//!
//! One strongly-typed record per hardware class. A record is either the
//! default "not available" value (every field unset) or an available record
//! carrying whatever identifying fields the probes could resolve.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Hardware classes probed by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareClass {
    /// Host CPU
    Cpu,
    /// NVIDIA discrete GPU
    NvidiaGpu,
    /// AMD Ryzen AI NPU (XDNA)
    AmdNpu,
    /// Intel integrated GPU
    IntelIgpu,
    /// AMD integrated GPU
    AmdIgpu,
}

impl HardwareClass {
    /// All classes, in detection order
    pub const ALL: [HardwareClass; 5] = [
        HardwareClass::Cpu,
        HardwareClass::NvidiaGpu,
        HardwareClass::AmdNpu,
        HardwareClass::IntelIgpu,
        HardwareClass::AmdIgpu,
    ];

    /// Human-readable label used in reports
    pub fn label(&self) -> &'static str {
        match self {
            HardwareClass::Cpu => "CPU",
            HardwareClass::NvidiaGpu => "NVIDIA GPU",
            HardwareClass::AmdNpu => "AMD NPU",
            HardwareClass::IntelIgpu => "Intel iGPU",
            HardwareClass::AmdIgpu => "AMD iGPU",
        }
    }
}

impl fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareClass::Cpu => write!(f, "cpu"),
            HardwareClass::NvidiaGpu => write!(f, "nvidia_gpu"),
            HardwareClass::AmdNpu => write!(f, "amd_npu"),
            HardwareClass::IntelIgpu => write!(f, "intel_igpu"),
            HardwareClass::AmdIgpu => write!(f, "amd_igpu"),
        }
    }
}

/// Common behaviour of every capability record
pub trait CapabilityRecord: Default + Clone + PartialEq + Send + Sync + 'static {
    /// The class this record describes
    const CLASS: HardwareClass;

    /// Whether the hardware was detected
    fn is_available(&self) -> bool;

    /// Fill fields that are still unset from a lower-priority signal.
    ///
    /// Fields already set are never overwritten.
    fn fill_missing(&mut self, later: Self);

    /// Whether this record equals the "not available" default
    fn is_unset(&self) -> bool {
        *self == Self::default()
    }
}

fn fill<T>(slot: &mut Option<T>, later: Option<T>) {
    if slot.is_none() {
        *slot = later;
    }
}

/// CPU instruction-set features relevant for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuFeature {
    #[serde(rename = "AVX2")]
    Avx2,
    #[serde(rename = "AVX512")]
    Avx512,
}

impl fmt::Display for CpuFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuFeature::Avx2 => write!(f, "AVX2"),
            CpuFeature::Avx512 => write!(f, "AVX512"),
        }
    }
}

/// CPU detection result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuRecord {
    pub available: bool,
    /// "AMD" or "Intel" when recognised
    pub vendor: Option<String>,
    /// Processor model string
    pub model: Option<String>,
    /// Logical core count
    pub cores: Option<usize>,
    /// Detected instruction-set features
    #[serde(default)]
    pub features: Vec<CpuFeature>,
}

impl CpuRecord {
    /// Vendor name or "unknown"
    pub fn vendor_or_unknown(&self) -> &str {
        self.vendor.as_deref().unwrap_or("unknown")
    }
}

impl CapabilityRecord for CpuRecord {
    const CLASS: HardwareClass = HardwareClass::Cpu;

    fn is_available(&self) -> bool {
        self.available
    }

    fn fill_missing(&mut self, later: Self) {
        self.available |= later.available;
        fill(&mut self.vendor, later.vendor);
        fill(&mut self.model, later.model);
        fill(&mut self.cores, later.cores);
        if self.features.is_empty() {
            self.features = later.features;
        }
    }
}

/// One NVIDIA device row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDevice {
    /// Device name as reported by the vendor tool
    pub name: String,
    /// Total memory, verbatim (e.g. "8192 MiB")
    pub memory: String,
}

/// NVIDIA discrete GPU detection result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvidiaGpuRecord {
    pub available: bool,
    #[serde(default)]
    pub devices: Vec<GpuDevice>,
    pub cuda_version: Option<String>,
    pub driver_version: Option<String>,
}

impl CapabilityRecord for NvidiaGpuRecord {
    const CLASS: HardwareClass = HardwareClass::NvidiaGpu;

    fn is_available(&self) -> bool {
        self.available
    }

    fn fill_missing(&mut self, later: Self) {
        self.available |= later.available;
        if self.devices.is_empty() {
            self.devices = later.devices;
        }
        fill(&mut self.cuda_version, later.cuda_version);
        fill(&mut self.driver_version, later.driver_version);
    }
}

/// AMD NPU capability tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NpuTier {
    /// Phoenix / Hawk Point
    #[serde(rename = "XDNA1")]
    Xdna1,
    /// Strix Point
    #[serde(rename = "XDNA2")]
    Xdna2,
}

impl fmt::Display for NpuTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NpuTier::Xdna1 => write!(f, "XDNA1"),
            NpuTier::Xdna2 => write!(f, "XDNA2"),
        }
    }
}

/// Tri-state view of the NPU record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NpuStatus<'a> {
    /// No signal at all
    Unavailable,
    /// A device/driver signal exists but the model is unknown
    Unidentified { driver: Option<&'a str> },
    /// Model matched the known-processor table
    Identified {
        tier: NpuTier,
        tops: u32,
        driver: Option<&'a str>,
    },
}

/// AMD NPU detection result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmdNpuRecord {
    pub available: bool,
    /// Which signal established the device ("xdna", "amdxdna", "npu", "ryzen-ai-sw")
    pub driver: Option<String>,
    #[serde(rename = "type")]
    pub tier: Option<NpuTier>,
    /// Throughput rating in TOPS
    pub tops: Option<u32>,
}

impl AmdNpuRecord {
    /// A positive signal from a driver or device-node probe
    pub fn with_driver(driver: impl Into<String>) -> Self {
        Self {
            available: true,
            driver: Some(driver.into()),
            tier: None,
            tops: None,
        }
    }

    /// A positive signal from the known-model table
    pub fn identified(tier: NpuTier, tops: u32) -> Self {
        Self {
            available: true,
            driver: None,
            tier: Some(tier),
            tops: Some(tops),
        }
    }

    /// Tri-state status
    pub fn status(&self) -> NpuStatus<'_> {
        if !self.available {
            return NpuStatus::Unavailable;
        }
        let driver = self.driver.as_deref();
        match (self.tier, self.tops) {
            (Some(tier), Some(tops)) => NpuStatus::Identified { tier, tops, driver },
            _ => NpuStatus::Unidentified { driver },
        }
    }
}

impl CapabilityRecord for AmdNpuRecord {
    const CLASS: HardwareClass = HardwareClass::AmdNpu;

    fn is_available(&self) -> bool {
        self.available
    }

    fn fill_missing(&mut self, later: Self) {
        self.available |= later.available;
        fill(&mut self.driver, later.driver);
        // tier and tops come from the same table row
        if self.tier.is_none() && self.tops.is_none() {
            self.tier = later.tier;
            self.tops = later.tops;
        }
    }
}

/// Intel integrated GPU detection result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelIgpuRecord {
    pub available: bool,
    /// Render node that identified as Intel
    pub device: Option<PathBuf>,
    /// "i915" or "xe"
    pub driver: Option<String>,
}

impl CapabilityRecord for IntelIgpuRecord {
    const CLASS: HardwareClass = HardwareClass::IntelIgpu;

    fn is_available(&self) -> bool {
        self.available
    }

    fn fill_missing(&mut self, later: Self) {
        self.available |= later.available;
        fill(&mut self.device, later.device);
        fill(&mut self.driver, later.driver);
    }
}

/// AMD integrated GPU detection result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmdIgpuRecord {
    pub available: bool,
    pub device: Option<PathBuf>,
    pub driver: Option<String>,
    pub model: Option<String>,
}

impl CapabilityRecord for AmdIgpuRecord {
    const CLASS: HardwareClass = HardwareClass::AmdIgpu;

    fn is_available(&self) -> bool {
        self.available
    }

    fn fill_missing(&mut self, later: Self) {
        self.available |= later.available;
        fill(&mut self.device, later.device);
        fill(&mut self.driver, later.driver);
        fill(&mut self.model, later.model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_unset() {
        assert!(CpuRecord::default().is_unset());
        assert!(NvidiaGpuRecord::default().is_unset());
        assert!(AmdNpuRecord::default().is_unset());
        assert!(IntelIgpuRecord::default().is_unset());
        assert!(AmdIgpuRecord::default().is_unset());
        assert!(!AmdNpuRecord::default().is_available());
    }

    #[test]
    fn test_fill_missing_never_overwrites() {
        let mut record = AmdNpuRecord::with_driver("xdna");
        record.fill_missing(AmdNpuRecord::with_driver("ryzen-ai-sw"));
        assert_eq!(record.driver.as_deref(), Some("xdna"));

        record.fill_missing(AmdNpuRecord::identified(NpuTier::Xdna1, 16));
        assert_eq!(record.tier, Some(NpuTier::Xdna1));
        assert_eq!(record.tops, Some(16));

        record.fill_missing(AmdNpuRecord::identified(NpuTier::Xdna2, 50));
        assert_eq!(record.tops, Some(16));
    }

    #[test]
    fn test_npu_status_tri_state() {
        assert_eq!(AmdNpuRecord::default().status(), NpuStatus::Unavailable);
        assert_eq!(
            AmdNpuRecord::with_driver("npu").status(),
            NpuStatus::Unidentified { driver: Some("npu") }
        );
        assert_eq!(
            AmdNpuRecord::identified(NpuTier::Xdna2, 50).status(),
            NpuStatus::Identified {
                tier: NpuTier::Xdna2,
                tops: 50,
                driver: None
            }
        );
    }

    #[test]
    fn test_npu_serializes_tier_as_type() {
        let json = serde_json::to_value(AmdNpuRecord::identified(NpuTier::Xdna1, 16)).unwrap();
        assert_eq!(json["type"], "XDNA1");
        assert_eq!(json["tops"], 16);
        assert_eq!(json["available"], true);
    }

    #[test]
    fn test_class_display() {
        assert_eq!(HardwareClass::NvidiaGpu.to_string(), "nvidia_gpu");
        assert_eq!(HardwareClass::AmdIgpu.label(), "AMD iGPU");
    }
}
