//! Configuration surfaces for model loading and generation. Plain,
//! `Default`-able structs rather than a builder macro, so callers can
//! construct one with `..Default::default()` and round-trip it through a
//! manifest file if they want one.

use serde::{Deserialize, Serialize};
use steering_core::{DeviceSpec, Dtype};

use crate::error::SteeringModelError;

/// Options accepted by [`crate::SteeringModel::from_pretrained`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromPretrainedOptions {
    /// Activation/parameter precision to load weights at.
    pub dtype: Dtype,
    /// Compute device placement strategy.
    pub device: DeviceSpec,
    /// Load weights quantized to 8 bits. Mutually exclusive with `load_in_4bit`.
    pub load_in_8bit: bool,
    /// Load weights quantized to 4 bits. Mutually exclusive with `load_in_8bit`.
    pub load_in_4bit: bool,
    /// Allow loading a repo that ships custom (non-builtin) model code.
    pub trust_remote_code: bool,
    /// Override the tokenizer to load instead of the one bundled with the model repo.
    pub tokenizer_override: Option<String>,
}

impl Default for FromPretrainedOptions {
    fn default() -> Self {
        Self {
            dtype: Dtype::Float32,
            device: DeviceSpec::Cpu,
            load_in_8bit: false,
            load_in_4bit: false,
            trust_remote_code: false,
            tokenizer_override: None,
        }
    }
}

impl FromPretrainedOptions {
    pub fn validate(&self) -> Result<(), SteeringModelError> {
        if self.load_in_8bit && self.load_in_4bit {
            return Err(SteeringModelError::Validation(
                "load_in_8bit and load_in_4bit are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options accepted by [`crate::SteeringModel::generate`] and
/// [`crate::SteeringModel::generate_with_steering`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_new_tokens: usize,
    pub max_length: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub do_sample: bool,
    pub num_beams: usize,
    pub repetition_penalty: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 32,
            max_length: 512,
            temperature: 1.0,
            top_p: 1.0,
            top_k: 0,
            do_sample: false,
            num_beams: 1,
            repetition_penalty: 1.0,
        }
    }
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<(), SteeringModelError> {
        if self.max_new_tokens == 0 {
            return Err(SteeringModelError::Validation(
                "max_new_tokens must be >= 1".to_string(),
            ));
        }
        if self.num_beams == 0 {
            return Err(SteeringModelError::Validation("num_beams must be >= 1".to_string()));
        }
        if self.num_beams > 1 {
            return Err(SteeringModelError::Validation(
                "beam search is not supported; num_beams must be 1".to_string(),
            ));
        }
        Ok(())
    }
}
