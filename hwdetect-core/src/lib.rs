//! hwdetect core library
//!
//! Speech-acceleration hardware detection and backend arbitration.
//! This crate probes the host for CPU features, NVIDIA GPUs, AMD NPUs and
//! integrated GPUs, picks a backend for the TTS and STT engines, renders the
//! detection report, and provides the NPU device runtime.

pub mod arbiter;
pub mod context;
pub mod identity;
pub mod inventory;
pub mod metrics;
pub mod npu;
pub mod probe;
pub mod record;
pub mod report;

// Re-export common types
pub use arbiter::{AccelRule, Backend, BackendArbitrator, Consumer, Recommendation};
pub use context::{DetectionContext, ProbeSettings, ToolNames};
pub use identity::SystemIdentity;
pub use inventory::{DetectedHardware, HardwareDetector, HardwareInventory};
pub use metrics::DetectionMetrics;
pub use npu::{NpuRuntime, RuntimeConfig, RuntimeError, RuntimeState};
pub use probe::ProbeError;
pub use record::{CapabilityRecord, HardwareClass, NpuStatus};
pub use report::{Snapshot, SnapshotError};
