//! AMD NPU device runtime
//!
//! Opens an XDNA device node, verifies it answers the capability query,
//! allocates device buffers for model payloads and runs synthesis through an
//! [`InferenceExecutor`]. When no hardware execution path is wired, the
//! runtime selects the [`SoftwareFallbackExecutor`] and says so in every
//! output it produces.
//!
//! Lifecycle:
//! `Closed -> Opening -> Open -> Released`, with `Unavailable` absorbing when
//! no candidate device responds (or software-only mode is forced).

mod driver;
mod executor;
mod handle;
mod mock;
mod runtime;

pub use driver::{BufferType, DeviceDriver, DeviceInfo, DeviceNode, XdnaDriver};
pub use executor::{
    DeviceExecutor, ExecutorKind, InferenceExecutor, InferenceOutput, SoftwareFallbackExecutor,
    SynthesisInputs, SAMPLES_PER_TOKEN, STYLE_DIM,
};
pub use handle::{DeviceBuffer, DeviceHandle};
pub use mock::MockDriver;
pub use runtime::{NpuRuntime, OpenOutcome, RuntimeConfig, RuntimeState, SharedNpuRuntime};

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Candidate device nodes, in the order they are tried
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/accel/accel0",
    "/dev/dri/renderD128",
    "/dev/dri/renderD129",
    "/dev/kfd",
    "/dev/dri/card1",
];

/// Environment variable forcing software-only execution
pub const CPU_ONLY_ENV: &str = "CPU_ONLY_MODE";

/// Errors raised by the NPU runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Operation requires an open device
    #[error("NPU device is not open")]
    NotOpen,

    /// The runtime was closed after use
    #[error("NPU runtime was released")]
    Released,

    /// No device responded, or software-only mode is active
    #[error("NPU device not available")]
    Unavailable,

    /// Another handle in this process owns the device
    #[error("NPU device {} is already claimed", .0.display())]
    Busy(PathBuf),

    /// Buffer allocation on the device failed
    #[error("Failed to allocate {size} byte device buffer: {reason}")]
    Allocation { size: usize, reason: String },

    /// Inference requested before a model was loaded
    #[error("No model loaded")]
    NoModel,

    /// The buffer's device handle has been closed
    #[error("Device buffer is no longer valid (handle closed)")]
    BufferInvalidated,

    /// Inputs do not match the synthesis tensor contract
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The device has no execution path for this workload
    #[error("Device execution failed: {0}")]
    Execution(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Subset of `candidates` that exist on this host (no open, no ioctl)
pub fn present_device_nodes(candidates: &[PathBuf]) -> Vec<PathBuf> {
    candidates
        .iter()
        .filter(|path| path.exists())
        .cloned()
        .collect()
}

/// Default candidate paths re-rooted below `dev_root` (normally `/dev`)
pub fn default_device_paths(dev_root: &Path) -> Vec<PathBuf> {
    DEFAULT_DEVICE_PATHS
        .iter()
        .map(|path| {
            let relative = Path::new(path).strip_prefix("/dev").unwrap_or(Path::new(path));
            dev_root.join(relative)
        })
        .collect()
}

/// Interpret a boolean-like environment value ("1", "true", "yes")
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Whether `CPU_ONLY_MODE` forces software-only execution
pub fn cpu_only_from_env() -> bool {
    std::env::var(CPU_ONLY_ENV)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}
