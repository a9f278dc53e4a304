//! Report rendering and the detection snapshot
//!
//! Rendering is pure: functions return text and never touch the
//! filesystem. [`Snapshot`] is the one structured record a run persists.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::arbiter::{ConsumerRecommendation, Recommendation};
use crate::identity::SystemIdentity;
use crate::inventory::{DetectedHardware, HardwareInventory};
use crate::record::NpuStatus;

/// Default snapshot file name
pub const SNAPSHOT_FILE: &str = "hardware_detection.json";

const RULE: &str = "==================================================";

/// Snapshot read/write errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted result of one detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub system: SystemIdentity,
    pub hardware: DetectedHardware,
    pub recommendations: Recommendation,
}

impl Snapshot {
    /// Snapshot stamped with the current time
    pub fn new(inventory: &HardwareInventory, recommendations: &Recommendation) -> Self {
        Self {
            generated_at: Utc::now(),
            system: inventory.system.clone(),
            hardware: inventory.hardware.clone(),
            recommendations: recommendations.clone(),
        }
    }

    /// Inventory this snapshot was taken from
    pub fn inventory(&self) -> HardwareInventory {
        HardwareInventory::new(self.system.clone(), self.hardware.clone())
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the snapshot as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "Snapshot saved");
        Ok(())
    }

    /// Read a snapshot written by [`Snapshot::save`]
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let json = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

fn mark(available: bool) -> &'static str {
    if available {
        "✅"
    } else {
        "❌"
    }
}

/// Human-readable multi-line report
pub fn render_report(inventory: &HardwareInventory, recommendation: &Recommendation) -> String {
    let mut out = String::new();
    let system = &inventory.system;
    let hw = &inventory.hardware;

    // Writing to a String cannot fail
    let _ = writeln!(out, "Speech Acceleration Hardware Report");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out);

    let _ = writeln!(out, "System Information:");
    let _ = writeln!(out, "  OS: {}", system.os);
    let _ = writeln!(out, "  Architecture: {}", system.arch);
    let _ = writeln!(out, "  Processor: {}", system.processor);
    let _ = writeln!(out);

    let _ = writeln!(out, "Detected Hardware:");

    let cores = hw
        .cpu
        .cores
        .map(|c| c.to_string())
        .unwrap_or_else(|| "?".to_string());
    let _ = writeln!(
        out,
        "  {} CPU: {} ({} cores)",
        mark(hw.cpu.available),
        hw.cpu.vendor_or_unknown(),
        cores
    );
    if !hw.cpu.features.is_empty() {
        let features: Vec<String> = hw.cpu.features.iter().map(|f| f.to_string()).collect();
        let _ = writeln!(out, "     Features: {}", features.join(", "));
    }

    if hw.nvidia_gpu.available {
        let _ = writeln!(out, "  ✅ NVIDIA GPU: {} device(s)", hw.nvidia_gpu.devices.len());
        for device in &hw.nvidia_gpu.devices {
            let _ = writeln!(out, "     - {} ({})", device.name, device.memory);
        }
        if let Some(driver) = &hw.nvidia_gpu.driver_version {
            let cuda = hw.nvidia_gpu.cuda_version.as_deref().unwrap_or("unknown");
            let _ = writeln!(out, "     Driver: {}, CUDA: {}", driver, cuda);
        }
    } else {
        let _ = writeln!(out, "  ❌ NVIDIA GPU: Not detected");
    }

    match hw.amd_npu.status() {
        NpuStatus::Identified { tier, tops, .. } => {
            let _ = writeln!(out, "  ✅ AMD NPU: {} ({} TOPS)", tier, tops);
        }
        NpuStatus::Unidentified { driver } => {
            let _ = writeln!(
                out,
                "  ✅ AMD NPU: model unknown (signal: {})",
                driver.unwrap_or("unknown")
            );
        }
        NpuStatus::Unavailable => {
            let _ = writeln!(out, "  ❌ AMD NPU: Not detected");
        }
    }

    if hw.intel_igpu.available {
        let device = hw
            .intel_igpu
            .device
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "Detected".to_string());
        match &hw.intel_igpu.driver {
            Some(driver) => {
                let _ = writeln!(out, "  ✅ Intel iGPU: {} ({})", device, driver);
            }
            None => {
                let _ = writeln!(out, "  ✅ Intel iGPU: {}", device);
            }
        }
    } else {
        let _ = writeln!(out, "  ❌ Intel iGPU: Not detected");
    }

    if hw.amd_igpu.available {
        let _ = writeln!(
            out,
            "  ✅ AMD iGPU: {} (no accelerated path)",
            hw.amd_igpu.model.as_deref().unwrap_or("Detected")
        );
    } else {
        let _ = writeln!(out, "  ❌ AMD iGPU: Not detected");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Recommended Configuration:");
    for entry in recommendation.consumers() {
        let _ = writeln!(out, "  {}", render_consumer(entry));
    }

    out
}

fn render_consumer(entry: &ConsumerRecommendation) -> String {
    let variant = entry
        .variant
        .as_deref()
        .map(|v| format!(" [{}]", v))
        .unwrap_or_default();
    format!(
        "{} ({}): {}{} ({})",
        entry.consumer.engine(),
        entry.consumer,
        entry.backend,
        variant,
        entry.reason
    )
}

/// `KEY=value` lines for the serving components
pub fn render_env(recommendation: &Recommendation) -> String {
    recommendation
        .consumers()
        .iter()
        .map(|entry| format!("{}={}\n", entry.consumer.env_var(), entry.backend))
        .collect()
}
