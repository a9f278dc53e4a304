//! Hardware inventory
//!
//! One capability record per class plus the host identity. The five class
//! probes have no data dependency on each other and run concurrently; each
//! owns only its own record, and the inventory is assembled once all of them
//! have finished.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::DetectionContext;
use crate::identity::SystemIdentity;
use crate::probe::{self, DeviceProbe};
use crate::record::{
    AmdIgpuRecord, AmdNpuRecord, CpuRecord, HardwareClass, IntelIgpuRecord, NvidiaGpuRecord,
};

/// Per-class detection results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedHardware {
    pub cpu: CpuRecord,
    pub nvidia_gpu: NvidiaGpuRecord,
    pub amd_npu: AmdNpuRecord,
    pub intel_igpu: IntelIgpuRecord,
    pub amd_igpu: AmdIgpuRecord,
}

impl DetectedHardware {
    /// Whether `class` was detected
    pub fn is_available(&self, class: HardwareClass) -> bool {
        match class {
            HardwareClass::Cpu => self.cpu.available,
            HardwareClass::NvidiaGpu => self.nvidia_gpu.available,
            HardwareClass::AmdNpu => self.amd_npu.available,
            HardwareClass::IntelIgpu => self.intel_igpu.available,
            HardwareClass::AmdIgpu => self.amd_igpu.available,
        }
    }
}

/// Result of one detection run; read-only once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInventory {
    pub system: SystemIdentity,
    pub hardware: DetectedHardware,
}

impl HardwareInventory {
    pub fn new(system: SystemIdentity, hardware: DetectedHardware) -> Self {
        Self { system, hardware }
    }

    /// Whether `class` was detected
    pub fn is_available(&self, class: HardwareClass) -> bool {
        self.hardware.is_available(class)
    }

    /// Detected classes, in detection order
    pub fn available_classes(&self) -> Vec<HardwareClass> {
        HardwareClass::ALL
            .into_iter()
            .filter(|class| self.is_available(*class))
            .collect()
    }
}

/// Runs every class probe and assembles the inventory
pub struct HardwareDetector {
    cpu: DeviceProbe<CpuRecord>,
    nvidia_gpu: DeviceProbe<NvidiaGpuRecord>,
    amd_npu: DeviceProbe<AmdNpuRecord>,
    intel_igpu: DeviceProbe<IntelIgpuRecord>,
    amd_igpu: DeviceProbe<AmdIgpuRecord>,
}

impl Default for HardwareDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareDetector {
    /// Detector with the standard probe methods for every class
    pub fn new() -> Self {
        Self {
            cpu: probe::cpu::default_probe(),
            nvidia_gpu: probe::nvidia::default_probe(),
            amd_npu: probe::npu::default_probe(),
            intel_igpu: probe::igpu::intel_probe(),
            amd_igpu: probe::igpu::amd_probe(),
        }
    }

    /// Replace the NPU probe
    pub fn with_npu_probe(mut self, probe: DeviceProbe<AmdNpuRecord>) -> Self {
        self.amd_npu = probe;
        self
    }

    /// Probe the host. Never fails: every class degrades to "not available".
    pub async fn detect(&self, ctx: &DetectionContext) -> HardwareInventory {
        info!(system = %ctx.identity, "Starting hardware detection");

        let npu = async {
            if ctx.settings.cpu_only {
                info!("Software-only mode, skipping NPU probes");
                AmdNpuRecord::default()
            } else {
                self.amd_npu.run(ctx).await
            }
        };

        let (cpu, nvidia_gpu, amd_npu, intel_igpu, amd_igpu) = futures::join!(
            self.cpu.run(ctx),
            self.nvidia_gpu.run(ctx),
            npu,
            self.intel_igpu.run(ctx),
            self.amd_igpu.run(ctx),
        );

        let inventory = HardwareInventory::new(
            ctx.identity.clone(),
            DetectedHardware {
                cpu,
                nvidia_gpu,
                amd_npu,
                intel_igpu,
                amd_igpu,
            },
        );

        for class in HardwareClass::ALL {
            ctx.metrics().set_available(class, inventory.is_available(class));
        }
        info!(
            available = ?inventory.available_classes(),
            "Hardware detection complete"
        );

        inventory
    }
}
