//! End-to-end detection scenarios against fake device trees

use std::path::Path;
use std::sync::Arc;

use hwdetect_core::arbiter::{Backend, RecommendationStatus, CPU_FALLBACK_REASON};
use hwdetect_core::npu::{MockDriver, OpenOutcome, RuntimeConfig, SynthesisInputs, STYLE_DIM};
use hwdetect_core::probe::ScriptedTools;
use hwdetect_core::record::NpuTier;
use hwdetect_core::report::Snapshot;
use hwdetect_core::{
    BackendArbitrator, CapabilityRecord, DetectionContext, HardwareDetector, HardwareInventory,
    NpuRuntime, NpuStatus, ProbeSettings, Recommendation, SystemIdentity,
};

const NVIDIA_ROWS: &str = "nvidia-smi --query-gpu=name,memory.total --format=csv,noheader";

struct Host {
    root: tempfile::TempDir,
    tools: Arc<ScriptedTools>,
    processor: String,
}

impl Host {
    fn new(processor: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("dev")).unwrap();
        Self {
            root,
            tools: Arc::new(ScriptedTools::new()),
            processor: processor.to_string(),
        }
    }

    fn touch(&self, relative: &str) -> &Self {
        let path = self.root.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
        self
    }

    fn context(&self) -> DetectionContext {
        DetectionContext::new(
            SystemIdentity::new("Linux", "x86_64", self.processor.as_str(), 8),
            ProbeSettings::rooted_at(self.root.path()),
        )
        .with_tools(self.tools.clone())
    }

    async fn detect(&self) -> (HardwareInventory, Recommendation) {
        let inventory = HardwareDetector::new().detect(&self.context()).await;
        let recommendation = BackendArbitrator::default().recommend(&inventory);
        (inventory, recommendation)
    }
}

fn assert_absent_records_are_unset(inventory: &HardwareInventory) {
    let hw = &inventory.hardware;
    if !hw.nvidia_gpu.available {
        assert!(hw.nvidia_gpu.is_unset());
    }
    if !hw.amd_npu.available {
        assert!(hw.amd_npu.is_unset());
    }
    if !hw.intel_igpu.available {
        assert!(hw.intel_igpu.is_unset());
    }
    if !hw.amd_igpu.available {
        assert!(hw.amd_igpu.is_unset());
    }
}

#[tokio::test]
async fn scenario_cpu_only_host() {
    let host = Host::new("Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz");
    let (inventory, rec) = host.detect().await;

    let hw = &inventory.hardware;
    assert!(hw.cpu.available);
    assert!(!hw.nvidia_gpu.available);
    assert!(!hw.amd_npu.available);
    assert!(!hw.intel_igpu.available);
    assert!(!hw.amd_igpu.available);
    assert_absent_records_are_unset(&inventory);

    for entry in rec.consumers() {
        assert_eq!(entry.backend, Backend::Cpu);
        assert_eq!(entry.reason, CPU_FALLBACK_REASON);
    }
}

#[tokio::test]
async fn scenario_npu_node_with_unknown_model() {
    let host = Host::new("AMD Ryzen 5 5600X 6-Core Processor");
    host.touch("dev/npu0");
    let (inventory, rec) = host.detect().await;

    let npu = &inventory.hardware.amd_npu;
    assert!(npu.available);
    assert!(npu.tier.is_none());
    assert!(npu.tops.is_none());
    assert!(matches!(npu.status(), NpuStatus::Unidentified { .. }));

    assert_eq!(rec.tts.backend, Backend::Npu);
    assert_eq!(rec.stt.backend, Backend::Npu);
    assert!(!rec.tts.reason.contains("TOPS"));
}

#[tokio::test]
async fn scenario_known_model_without_device_node() {
    let host = Host::new("AMD Ryzen 7 7840HS w/ Radeon 780M Graphics");
    let (inventory, rec) = host.detect().await;

    let npu = &inventory.hardware.amd_npu;
    assert!(npu.available);
    assert_eq!(npu.tier, Some(NpuTier::Xdna1));
    assert_eq!(npu.tops, Some(16));
    assert_eq!(rec.tts.backend, Backend::Npu);
    assert!(rec.tts.reason.contains("16 TOPS"));

    // The processor label alone does not make an AMD iGPU available
    assert!(!inventory.hardware.amd_igpu.available);
    assert_absent_records_are_unset(&inventory);
}

#[tokio::test]
async fn scenario_single_nvidia_device() {
    let host = Host::new("Intel(R) Xeon(R) CPU E5-2680 v4");
    host.tools.respond(NVIDIA_ROWS, "ModelX, 8192 MiB\n");
    let (inventory, rec) = host.detect().await;

    let gpu = &inventory.hardware.nvidia_gpu;
    assert_eq!(gpu.devices.len(), 1);
    assert_eq!(gpu.devices[0].name, "ModelX");
    assert_eq!(gpu.devices[0].memory, "8192 MiB");
    assert_eq!(rec.tts.backend, Backend::Cuda);
    assert!(rec.stt.reason.contains("ModelX"));
}

#[tokio::test]
async fn npu_wins_over_cuda() {
    let host = Host::new("AMD Ryzen AI 9 HX 370 w/ Radeon 890M");
    host.touch("dev/accel/accel0");
    host.tools.respond(NVIDIA_ROWS, "NVIDIA GeForce RTX 4090, 24564 MiB\n");
    let (inventory, rec) = host.detect().await;

    assert!(inventory.hardware.nvidia_gpu.available);
    assert_eq!(inventory.hardware.amd_npu.driver.as_deref(), Some("amdxdna"));
    assert_eq!(inventory.hardware.amd_npu.tier, Some(NpuTier::Xdna2));
    assert_eq!(rec.tts.backend, Backend::Npu);
    assert_eq!(rec.stt.backend, Backend::Npu);
}

#[tokio::test]
async fn amd_igpu_only_stays_on_cpu() {
    let host = Host::new("AMD Ryzen 5 5600G with Radeon Graphics");
    host.touch("dev/dri/renderD128");
    std::fs::create_dir_all(host.root.path().join("sys/class/drm/card0/device")).unwrap();
    std::fs::write(
        host.root.path().join("sys/class/drm/card0/device/vendor"),
        "0x1002\n",
    )
    .unwrap();
    let (inventory, rec) = host.detect().await;

    assert!(inventory.hardware.amd_igpu.available);
    assert_eq!(
        inventory.hardware.amd_igpu.model.as_deref(),
        Some("AMD Radeon Graphics (iGPU)")
    );
    assert_eq!(rec.tts.backend, Backend::Cpu);
    assert_eq!(rec.tts.status, RecommendationStatus::DetectedUnsupported);
}

#[tokio::test]
async fn broken_environment_still_produces_a_report() {
    let host = Host::new("");
    host.tools
        .respond(NVIDIA_ROWS, "garbage without separator\n")
        .time_out("vainfo")
        .time_out("intel_gpu_frequency");
    host.touch("dev/dri/renderD128");
    std::fs::create_dir_all(host.root.path().join("proc")).unwrap();
    std::fs::write(host.root.path().join("proc/cpuinfo"), [0xff, 0xfe, 0x00]).unwrap();

    let ctx = host.context();
    let inventory = HardwareDetector::new().detect(&ctx).await;
    let rec = BackendArbitrator::default().recommend(&inventory);

    assert!(inventory.hardware.cpu.available);
    assert!(!inventory.hardware.nvidia_gpu.available);
    assert!(!inventory.hardware.intel_igpu.available);
    assert_absent_records_are_unset(&inventory);
    assert_eq!(rec.tts.backend, Backend::Cpu);
    assert!(ctx.metrics().export().contains("hwdetect_probe_errors_total"));
}

#[tokio::test]
async fn snapshot_round_trip() {
    let host = Host::new("AMD Ryzen 7 8840U w/ Radeon 780M Graphics");
    host.touch("dev/xdna");
    host.tools.respond(NVIDIA_ROWS, "ModelX, 8192 MiB\n");
    let (inventory, rec) = host.detect().await;

    let json = serde_json::to_string(&inventory).unwrap();
    let decoded: HardwareInventory = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, inventory);

    let path = host.root.path().join("hardware_detection.json");
    Snapshot::new(&inventory, &rec).save(&path).unwrap();
    let loaded = Snapshot::load(&path).unwrap();
    assert_eq!(loaded.inventory(), inventory);
    assert_eq!(loaded.recommendations, rec);
}

#[test]
fn runtime_falls_back_to_software_executor() {
    let root = tempfile::tempdir().unwrap();
    let accel = root.path().join("accel0");
    std::fs::write(&accel, b"").unwrap();
    let driver = MockDriver::new();

    let mut runtime = NpuRuntime::with_driver(
        RuntimeConfig {
            device_paths: vec![root.path().join("missing"), accel.clone()],
            cpu_only: false,
        },
        Arc::new(driver.clone()),
    );

    assert_eq!(runtime.open().unwrap(), OpenOutcome::Opened(accel));
    runtime.load_model(vec![0u8; 1024]).unwrap();

    let inputs = SynthesisInputs::new(vec![0, 50, 83, 54, 0], vec![0.0; STYLE_DIM], 1.0);
    let output = runtime.run_inference(&inputs).unwrap();
    assert_eq!(output.audio.len(), 5 * 256);
    assert_eq!(output.executed_by.to_string(), "software_fallback");

    runtime.close();
    assert_eq!(driver.live_nodes(), 0);
}

#[test]
fn runtime_without_devices_is_unavailable() {
    let root = tempfile::tempdir().unwrap();
    let mut runtime = NpuRuntime::with_driver(
        RuntimeConfig {
            device_paths: vec![Path::new("/nonexistent/accel0").to_path_buf(), root.path().join("kfd")],
            cpu_only: false,
        },
        Arc::new(MockDriver::new()),
    );

    assert_eq!(runtime.open().unwrap(), OpenOutcome::Unavailable);
    assert!(!runtime.is_available());
}
