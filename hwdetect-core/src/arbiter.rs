//! Backend arbitration
//!
//! A pure, total mapping from an inventory to one backend per consumer.
//! Rules are evaluated in priority order and the first match wins; when no
//! rule matches, both consumers fall back to the CPU backend.
//!
//! The default order ranks the maturity of each accelerator's software
//! stack, not measured throughput:
//! AMD NPU > Intel iGPU > NVIDIA GPU > AMD iGPU (unsupported) > CPU.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::inventory::HardwareInventory;
use crate::metrics::DetectionMetrics;
use crate::record::{HardwareClass, NpuStatus};

/// Reason given when nothing accelerates
pub const CPU_FALLBACK_REASON: &str = "no acceleration hardware detected";

/// Backend identifiers read by the serving components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cpu,
    Npu,
    Igpu,
    Cuda,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Npu => "npu",
            Backend::Igpu => "igpu",
            Backend::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Components that consume a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consumer {
    /// Text-to-speech engine
    Tts,
    /// Speech-to-text engine
    Stt,
}

impl Consumer {
    /// Engine served by this consumer slot
    pub fn engine(&self) -> &'static str {
        match self {
            Consumer::Tts => "kokoro",
            Consumer::Stt => "whisperx",
        }
    }

    /// Environment variable carrying the backend id
    pub fn env_var(&self) -> &'static str {
        match self {
            Consumer::Tts => "TTS_BACKEND",
            Consumer::Stt => "STT_BACKEND",
        }
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consumer::Tts => write!(f, "tts"),
            Consumer::Stt => write!(f, "stt"),
        }
    }
}

/// How the chosen backend relates to the detected hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    /// An accelerator was selected
    Accelerated,
    /// Hardware present but no accelerated path is wired; CPU backend used
    DetectedUnsupported,
    /// Nothing to accelerate with
    CpuFallback,
}

/// One entry of the priority list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelRule {
    AmdNpu,
    IntelIgpu,
    NvidiaGpu,
    AmdIgpu,
}

impl AccelRule {
    /// Hardware class this rule inspects
    pub fn class(&self) -> HardwareClass {
        match self {
            AccelRule::AmdNpu => HardwareClass::AmdNpu,
            AccelRule::IntelIgpu => HardwareClass::IntelIgpu,
            AccelRule::NvidiaGpu => HardwareClass::NvidiaGpu,
            AccelRule::AmdIgpu => HardwareClass::AmdIgpu,
        }
    }

    fn evaluate(&self, inventory: &HardwareInventory) -> Option<RuleMatch> {
        let hw = &inventory.hardware;
        match self {
            AccelRule::AmdNpu => match hw.amd_npu.status() {
                NpuStatus::Unavailable => None,
                NpuStatus::Identified { tier, tops, .. } => Some(RuleMatch::accelerated(
                    Backend::Npu,
                    "amd_npu.tops",
                    format!("AMD NPU detected via amd_npu.tops: {} rated at {} TOPS", tier, tops),
                )),
                NpuStatus::Unidentified { .. } => Some(RuleMatch::accelerated(
                    Backend::Npu,
                    "amd_npu.available",
                    "AMD NPU detected via amd_npu.available (throughput unknown)".to_string(),
                )),
            },
            AccelRule::IntelIgpu => {
                if !hw.intel_igpu.available {
                    return None;
                }
                Some(match &hw.intel_igpu.device {
                    Some(device) => RuleMatch::accelerated(
                        Backend::Igpu,
                        "intel_igpu.device",
                        format!(
                            "Intel iGPU detected via intel_igpu.device ({}), accelerated through OpenVINO",
                            device.display()
                        ),
                    ),
                    None => RuleMatch::accelerated(
                        Backend::Igpu,
                        "intel_igpu.available",
                        "Intel iGPU detected via intel_igpu.available, accelerated through OpenVINO"
                            .to_string(),
                    ),
                })
            }
            AccelRule::NvidiaGpu => {
                if !hw.nvidia_gpu.available {
                    return None;
                }
                Some(match hw.nvidia_gpu.devices.first() {
                    Some(device) => RuleMatch::accelerated(
                        Backend::Cuda,
                        "nvidia_gpu.devices[0]",
                        format!("NVIDIA GPU detected via nvidia_gpu.devices[0]: {}", device.name),
                    ),
                    None => RuleMatch::accelerated(
                        Backend::Cuda,
                        "nvidia_gpu.available",
                        "NVIDIA GPU detected via nvidia_gpu.available".to_string(),
                    ),
                })
            }
            AccelRule::AmdIgpu => hw.amd_igpu.available.then(|| RuleMatch {
                backend: Backend::Cpu,
                status: RecommendationStatus::DetectedUnsupported,
                field: Some("amd_igpu.available"),
                reason: "AMD iGPU detected via amd_igpu.available but no accelerated path is wired; using optimized CPU backend".to_string(),
            }),
        }
    }
}

impl fmt::Display for AccelRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class())
    }
}

struct RuleMatch {
    backend: Backend,
    status: RecommendationStatus,
    field: Option<&'static str>,
    reason: String,
}

impl RuleMatch {
    fn accelerated(backend: Backend, field: &'static str, reason: String) -> Self {
        Self {
            backend,
            status: RecommendationStatus::Accelerated,
            field: Some(field),
            reason,
        }
    }

    fn cpu_fallback() -> Self {
        Self {
            backend: Backend::Cpu,
            status: RecommendationStatus::CpuFallback,
            field: None,
            reason: CPU_FALLBACK_REASON.to_string(),
        }
    }
}

/// Recommendation for one consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerRecommendation {
    pub consumer: Consumer,
    pub backend: Backend,
    pub status: RecommendationStatus,
    pub reason: String,
    /// Inventory field that triggered the decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Model variant hint (STT only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Backend per consumer; keyed by engine name when serialized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "kokoro")]
    pub tts: ConsumerRecommendation,
    #[serde(rename = "whisperx")]
    pub stt: ConsumerRecommendation,
}

impl Recommendation {
    /// Both consumer entries, TTS first
    pub fn consumers(&self) -> [&ConsumerRecommendation; 2] {
        [&self.tts, &self.stt]
    }

    /// Record the selected backends in `metrics`
    pub fn record_metrics(&self, metrics: &DetectionMetrics) {
        for entry in self.consumers() {
            metrics.set_backend(&entry.consumer.to_string(), entry.backend.as_str());
        }
    }
}

/// Default priority list
pub const DEFAULT_PRIORITY: [AccelRule; 4] = [
    AccelRule::AmdNpu,
    AccelRule::IntelIgpu,
    AccelRule::NvidiaGpu,
    AccelRule::AmdIgpu,
];

/// Maps an inventory to a recommendation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendArbitrator {
    priority: Vec<AccelRule>,
}

impl Default for BackendArbitrator {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY.to_vec())
    }
}

impl BackendArbitrator {
    /// Arbitrator with a custom priority list (CPU fallback is implicit)
    pub fn new(priority: Vec<AccelRule>) -> Self {
        Self { priority }
    }

    pub fn priority(&self) -> &[AccelRule] {
        &self.priority
    }

    /// Pick a backend for every consumer
    pub fn recommend(&self, inventory: &HardwareInventory) -> Recommendation {
        let (rule, decision) = self
            .priority
            .iter()
            .find_map(|rule| rule.evaluate(inventory).map(|m| (Some(*rule), m)))
            .unwrap_or_else(|| (None, RuleMatch::cpu_fallback()));

        info!(
            rule = %rule.map(|r| r.to_string()).unwrap_or_else(|| "cpu".to_string()),
            backend = %decision.backend,
            "Backend selected"
        );

        let entry = |consumer: Consumer| ConsumerRecommendation {
            consumer,
            backend: decision.backend,
            status: decision.status,
            reason: decision.reason.clone(),
            field: decision.field.map(str::to_string),
            variant: (consumer == Consumer::Stt).then(|| "full".to_string()),
        };

        Recommendation {
            tts: entry(Consumer::Tts),
            stt: entry(Consumer::Stt),
        }
    }
}
