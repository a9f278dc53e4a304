//! Synthesis executors
//!
//! Two implementations of the same capability: [`DeviceExecutor`] submits to
//! the NPU and never invents output, [`SoftwareFallbackExecutor`] produces a
//! shape-correct silent result when no hardware path is wired. Every output
//! records which executor produced it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DeviceBuffer, RuntimeError};

/// Width of the style/conditioning vector
pub const STYLE_DIM: usize = 256;

/// Audio samples produced per input token
pub const SAMPLES_PER_TOKEN: usize = 256;

/// Named input tensors of the TTS model
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisInputs {
    /// Token ids, shape `[1, n]`
    pub tokens: Vec<i64>,
    /// Style vector, shape `[1, 256]`
    pub style: Vec<f32>,
    /// Speaking rate multiplier
    pub speed: f32,
}

impl SynthesisInputs {
    pub fn new(tokens: Vec<i64>, style: Vec<f32>, speed: f32) -> Self {
        Self {
            tokens,
            style,
            speed,
        }
    }

    /// Check the tensor contract
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.tokens.is_empty() {
            return Err(RuntimeError::InvalidInput("tokens must not be empty".into()));
        }
        if self.style.len() != STYLE_DIM {
            return Err(RuntimeError::InvalidInput(format!(
                "style must have {} values, got {}",
                STYLE_DIM,
                self.style.len()
            )));
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(RuntimeError::InvalidInput(format!(
                "speed must be positive, got {}",
                self.speed
            )));
        }
        Ok(())
    }

    /// Number of output samples the contract expects
    pub fn expected_samples(&self) -> usize {
        self.tokens.len() * SAMPLES_PER_TOKEN
    }
}

/// Which executor produced an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// NPU command submission
    Device,
    /// Host-side placeholder
    SoftwareFallback,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Device => write!(f, "device"),
            ExecutorKind::SoftwareFallback => write!(f, "software_fallback"),
        }
    }
}

/// 1-D audio output
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub audio: Vec<f32>,
    pub executed_by: ExecutorKind,
}

/// Runs a bound model
pub trait InferenceExecutor: Send {
    fn kind(&self) -> ExecutorKind;

    /// Run the model in `model` on validated `inputs`
    fn run(
        &mut self,
        model: &DeviceBuffer,
        inputs: &SynthesisInputs,
    ) -> Result<InferenceOutput, RuntimeError>;
}

/// Submits work to the device node
#[derive(Debug, Default)]
pub struct DeviceExecutor;

impl InferenceExecutor for DeviceExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Device
    }

    fn run(
        &mut self,
        model: &DeviceBuffer,
        inputs: &SynthesisInputs,
    ) -> Result<InferenceOutput, RuntimeError> {
        let audio = model
            .with_node(|node, buffer| node.execute(buffer, inputs))?
            .map_err(|e| RuntimeError::Execution(e.to_string()))?;

        let expected = inputs.expected_samples();
        if audio.len() != expected {
            return Err(RuntimeError::Execution(format!(
                "device returned {} samples, expected {}",
                audio.len(),
                expected
            )));
        }

        Ok(InferenceOutput {
            audio,
            executed_by: ExecutorKind::Device,
        })
    }
}

/// Placeholder executor: silence of the expected length
#[derive(Debug, Default)]
pub struct SoftwareFallbackExecutor;

impl InferenceExecutor for SoftwareFallbackExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::SoftwareFallback
    }

    fn run(
        &mut self,
        model: &DeviceBuffer,
        inputs: &SynthesisInputs,
    ) -> Result<InferenceOutput, RuntimeError> {
        // Still requires a live model binding
        model.payload()?;

        let samples = inputs.expected_samples();
        debug!(tokens = inputs.tokens.len(), samples, "Software fallback synthesis");

        Ok(InferenceOutput {
            audio: vec![0.0; samples],
            executed_by: ExecutorKind::SoftwareFallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_contract() {
        let ok = SynthesisInputs::new(vec![1, 2, 3], vec![0.0; STYLE_DIM], 1.0);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.expected_samples(), 768);

        let no_tokens = SynthesisInputs::new(vec![], vec![0.0; STYLE_DIM], 1.0);
        assert!(matches!(no_tokens.validate(), Err(RuntimeError::InvalidInput(_))));

        let short_style = SynthesisInputs::new(vec![1], vec![0.0; 128], 1.0);
        assert!(matches!(short_style.validate(), Err(RuntimeError::InvalidInput(_))));

        let bad_speed = SynthesisInputs::new(vec![1], vec![0.0; STYLE_DIM], 0.0);
        assert!(bad_speed.validate().is_err());
    }

    #[test]
    fn test_executor_kind_labels() {
        assert_eq!(ExecutorKind::SoftwareFallback.to_string(), "software_fallback");
        assert_eq!(
            serde_json::to_value(ExecutorKind::Device).unwrap(),
            serde_json::json!("device")
        );
    }
}
