//! NPU runtime lifecycle

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    DeviceBuffer, DeviceDriver, DeviceExecutor, DeviceHandle, ExecutorKind, InferenceExecutor,
    InferenceOutput, RuntimeError, SoftwareFallbackExecutor, SynthesisInputs, XdnaDriver,
    DEFAULT_DEVICE_PATHS,
};

/// Runtime shared between async callers; the mutex serialises device access
pub type SharedNpuRuntime = Arc<tokio::sync::Mutex<NpuRuntime>>;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// No handle yet
    Closed,
    /// Trying candidate devices
    Opening,
    /// A device handle is live
    Open,
    /// Closed after use; terminal
    Released,
    /// No device responded, or software-only mode; absorbing
    Unavailable,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeState::Closed => write!(f, "CLOSED"),
            RuntimeState::Opening => write!(f, "OPENING"),
            RuntimeState::Open => write!(f, "OPEN"),
            RuntimeState::Released => write!(f, "RELEASED"),
            RuntimeState::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// Result of [`NpuRuntime::open`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A device answered the capability query
    Opened(PathBuf),
    /// A handle was already open; nothing changed
    AlreadyOpen(PathBuf),
    /// No device available; callers fall back to software
    Unavailable,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Candidate device nodes, tried in order
    pub device_paths: Vec<PathBuf>,
    /// Never touch the device
    pub cpu_only: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_paths: DEFAULT_DEVICE_PATHS.iter().map(PathBuf::from).collect(),
            cpu_only: false,
        }
    }
}

struct LoadedModel {
    buffer: DeviceBuffer,
    executor: Box<dyn InferenceExecutor>,
}

/// Single-owner NPU runtime
pub struct NpuRuntime {
    config: RuntimeConfig,
    driver: Arc<dyn DeviceDriver>,
    state: RuntimeState,
    handle: Option<DeviceHandle>,
    model: Option<LoadedModel>,
}

impl NpuRuntime {
    /// Runtime backed by the amdxdna kernel driver
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_driver(config, Arc::new(XdnaDriver))
    }

    /// Runtime backed by a custom driver
    pub fn with_driver(config: RuntimeConfig, driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            config,
            driver,
            state: RuntimeState::Closed,
            handle: None,
            model: None,
        }
    }

    /// Wrap for shared async use
    pub fn shared(self) -> SharedNpuRuntime {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Whether a device handle is live
    pub fn is_available(&self) -> bool {
        self.state == RuntimeState::Open
    }

    /// Path of the open device
    pub fn device_path(&self) -> Option<&Path> {
        self.handle.as_ref().map(DeviceHandle::path)
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Executor bound to the loaded model
    pub fn executor_kind(&self) -> Option<ExecutorKind> {
        self.model.as_ref().map(|m| m.executor.kind())
    }

    /// Open the first candidate device that answers the capability query.
    ///
    /// Finding no device is not an error: the runtime becomes `Unavailable`
    /// and [`OpenOutcome::Unavailable`] is returned.
    pub fn open(&mut self) -> Result<OpenOutcome, RuntimeError> {
        match self.state {
            RuntimeState::Open => {
                let path = self.device_path().map(Path::to_path_buf).unwrap_or_default();
                return Ok(OpenOutcome::AlreadyOpen(path));
            }
            RuntimeState::Released => return Err(RuntimeError::Released),
            RuntimeState::Unavailable => return Ok(OpenOutcome::Unavailable),
            RuntimeState::Closed | RuntimeState::Opening => {}
        }

        if self.config.cpu_only {
            info!("NPU runtime in software-only mode");
            self.state = RuntimeState::Unavailable;
            return Ok(OpenOutcome::Unavailable);
        }

        self.state = RuntimeState::Opening;

        for path in &self.config.device_paths {
            if !path.exists() {
                debug!(device = %path.display(), "Candidate not present");
                continue;
            }

            match DeviceHandle::open(self.driver.as_ref(), path) {
                Ok(handle) => {
                    self.handle = Some(handle);
                    self.state = RuntimeState::Open;
                    return Ok(OpenOutcome::Opened(path.clone()));
                }
                Err(RuntimeError::Busy(path)) => {
                    self.state = RuntimeState::Closed;
                    return Err(RuntimeError::Busy(path));
                }
                Err(e) => {
                    warn!(device = %path.display(), error = %e, "Device did not respond to NPU capability query");
                }
            }
        }

        warn!("No NPU device found, falling back to CPU");
        self.state = RuntimeState::Unavailable;
        Ok(OpenOutcome::Unavailable)
    }

    fn require_open(&self) -> Result<&DeviceHandle, RuntimeError> {
        match self.state {
            RuntimeState::Open => self.handle.as_ref().ok_or(RuntimeError::NotOpen),
            RuntimeState::Released => Err(RuntimeError::Released),
            RuntimeState::Unavailable => Err(RuntimeError::Unavailable),
            RuntimeState::Closed | RuntimeState::Opening => Err(RuntimeError::NotOpen),
        }
    }

    /// Allocate a device buffer for `payload` and bind it as the model.
    ///
    /// A previously loaded model is released first. On allocation failure
    /// the runtime stays open with no model bound.
    pub fn load_model(&mut self, payload: Vec<u8>) -> Result<(), RuntimeError> {
        self.require_open()?;
        if let Some(previous) = self.model.take() {
            if let Err(e) = previous.buffer.release() {
                warn!(error = %e, "Failed to free previous model buffer");
            }
        }

        let handle = self.require_open()?;
        let execution = handle.supports_execution();
        let size = payload.len();
        let buffer = handle.allocate(payload)?;

        let executor: Box<dyn InferenceExecutor> = if execution {
            Box::new(DeviceExecutor)
        } else {
            Box::new(SoftwareFallbackExecutor)
        };

        info!(size, handle = buffer.handle(), executor = %executor.kind(), "Model bound to NPU buffer");
        self.model = Some(LoadedModel { buffer, executor });
        Ok(())
    }

    /// Free the bound model buffer on the device. No-op without a model.
    pub fn unload_model(&mut self) -> Result<(), RuntimeError> {
        self.require_open()?;
        match self.model.take() {
            Some(model) => {
                let handle = model.buffer.handle();
                model.buffer.release()?;
                info!(handle, "Model unloaded");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Read a model file and load it
    pub fn load_model_file(&mut self, path: &Path) -> Result<(), RuntimeError> {
        self.require_open()?;
        let payload = std::fs::read(path)?;
        self.load_model(payload)
    }

    /// Run synthesis with the loaded model
    pub fn run_inference(
        &mut self,
        inputs: &SynthesisInputs,
    ) -> Result<InferenceOutput, RuntimeError> {
        self.require_open()?;
        let model = self.model.as_mut().ok_or(RuntimeError::NoModel)?;
        inputs.validate()?;
        model.executor.run(&model.buffer, inputs)
    }

    /// Release the device. Idempotent.
    pub fn close(&mut self) {
        self.model = None;
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        if matches!(self.state, RuntimeState::Open | RuntimeState::Opening) {
            self.state = RuntimeState::Released;
        }
    }
}

impl Drop for NpuRuntime {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for NpuRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NpuRuntime")
            .field("state", &self.state)
            .field("device", &self.device_path())
            .field("model_loaded", &self.model_loaded())
            .finish()
    }
}
