//! The `SteeringVector` artifact: a captured direction bound to a layer,
//! plus everything needed to re-bind it safely to a model.

use crate::device::DeviceSpec;
use crate::dtype::Dtype;
use crate::error::SteeringCoreError;
use crate::metadata::{Metadata, MetadataValue};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Current persistence schema version this build writes and can read.
pub const SCHEMA_VERSION: u32 = 1;

/// An immutable-after-construction direction in a model's residual-stream
/// space, bound to a specific layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SteeringVector {
    tensor: Vec<f32>,
    layer_index: usize,
    layer_name: String,
    model_fingerprint: String,
    hidden_dim: usize,
    magnitude: f32,
    dtype: Dtype,
    device: DeviceSpec,
    metadata: Metadata,
}

/// On-disk descriptor (`<base>.json`) — everything except the raw tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Descriptor {
    layer_index: usize,
    layer_name: String,
    model_fingerprint: String,
    hidden_dim: usize,
    dtype: String,
    metadata: Metadata,
    schema_version: u32,
}

const PAYLOAD_TENSOR_KEY: &str = "steering_vector";

impl SteeringVector {
    /// Construct and validate a new steering vector.
    ///
    /// Validates the tensor is non-empty and finite, computes and caches
    /// its L2 norm, and freezes the supplied metadata. `dtype` defaults to
    /// `Float32`; use [`SteeringVector::with_dtype`] to record a different
    /// originating activation dtype.
    pub fn construct(
        tensor: Vec<f32>,
        layer_index: usize,
        layer_name: impl Into<String>,
        model_fingerprint: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Self, SteeringCoreError> {
        if tensor.is_empty() {
            return Err(SteeringCoreError::Validation(
                "tensor must be non-empty".to_string(),
            ));
        }
        if let Some(bad) = tensor.iter().find(|v| !v.is_finite()) {
            return Err(SteeringCoreError::Validation(format!(
                "tensor contains a non-finite value: {bad}"
            )));
        }

        let hidden_dim = tensor.len();
        let magnitude = l2_norm(&tensor);

        debug!(
            layer_index,
            hidden_dim, magnitude, "constructed steering vector"
        );

        Ok(Self {
            tensor,
            layer_index,
            layer_name: layer_name.into(),
            model_fingerprint: model_fingerprint.into(),
            hidden_dim,
            magnitude,
            dtype: Dtype::Float32,
            device: DeviceSpec::Cpu,
            metadata,
        })
    }

    /// Record the activation dtype this vector was captured at. Metadata-only;
    /// does not touch the underlying `f32` storage.
    pub fn with_dtype(mut self, dtype: Dtype) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn tensor(&self) -> &[f32] {
        &self.tensor
    }

    pub fn layer_index(&self) -> usize {
        self.layer_index
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn model_fingerprint(&self) -> &str {
        &self.model_fingerprint
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn magnitude(&self) -> f32 {
        self.magnitude
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn device(&self) -> &DeviceSpec {
        &self.device
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the same logical vector, cheaply rebound to a new device.
    /// The tensor data itself only moves when materialized (see
    /// [`SteeringVector::to_tensor`]).
    pub fn to_device(&self, device: DeviceSpec) -> Self {
        let mut clone = self.clone();
        clone.device = device;
        clone
    }

    /// Materialize this vector as a live `candle_core::Tensor` on the given
    /// device, cast to the requested activation dtype.
    pub fn to_tensor(&self, device: &Device, dtype: candle_core::DType) -> candle_core::Result<Tensor> {
        Tensor::from_vec(self.tensor.clone(), self.hidden_dim, device)?.to_dtype(dtype)
    }

    /// Validate this vector can be applied to a model with the given
    /// hidden dimension. Does not hard-reject on `model_fingerprint`
    /// mismatch — only `validate_with_fingerprint` surfaces that as a
    /// warning via the caller-supplied callback.
    pub fn validate(&self, expected_hidden_dim: usize) -> Result<(), SteeringCoreError> {
        if self.hidden_dim != expected_hidden_dim {
            return Err(SteeringCoreError::Compatibility(format!(
                "vector hidden_dim {} does not match expected {}",
                self.hidden_dim, expected_hidden_dim
            )));
        }
        if (l2_norm(&self.tensor) - self.magnitude).abs() > 1e-5 {
            return Err(SteeringCoreError::Validation(
                "cached magnitude no longer matches tensor contents".to_string(),
            ));
        }
        Ok(())
    }

    /// Like `validate`, but also checks `model_fingerprint` against the
    /// target model's fingerprint, logging a warning (not an error) on
    /// mismatch — applying a "foreign" vector is the caller's choice.
    pub fn validate_against(
        &self,
        expected_hidden_dim: usize,
        target_fingerprint: &str,
    ) -> Result<(), SteeringCoreError> {
        self.validate(expected_hidden_dim)?;
        if self.model_fingerprint != target_fingerprint {
            warn!(
                vector_fingerprint = %self.model_fingerprint,
                target_fingerprint,
                "applying a steering vector captured from a different model fingerprint"
            );
        }
        Ok(())
    }

    /// Write the two-file artifact (`<base>.json` + `<base>.pt`). Writes to
    /// a temp file in the same directory then atomically renames, for both
    /// files, so a reader never observes a half-written pair.
    pub fn save(&self, base_path: impl AsRef<Path>) -> Result<(), SteeringCoreError> {
        let base_path = base_path.as_ref();
        let descriptor_path = base_path.with_extension("json");
        let payload_path = base_path.with_extension("pt");

        let descriptor = Descriptor {
            layer_index: self.layer_index,
            layer_name: self.layer_name.clone(),
            model_fingerprint: self.model_fingerprint.clone(),
            hidden_dim: self.hidden_dim,
            dtype: self.dtype.as_str().to_string(),
            metadata: self.metadata.clone(),
            schema_version: SCHEMA_VERSION,
        };

        let descriptor_json = serde_json::to_string_pretty(&descriptor)?;
        atomic_write(&descriptor_path, descriptor_json.as_bytes())
            .map_err(|source| SteeringCoreError::Io {
                path: descriptor_path.display().to_string(),
                source,
            })?;

        let tensor = Tensor::from_vec(self.tensor.clone(), self.hidden_dim, &Device::Cpu)
            .and_then(|t| t.to_dtype(self.dtype.to_candle()))
            .map_err(|e| SteeringCoreError::External(e.into()))?;
        let mut tensors = std::collections::HashMap::with_capacity(1);
        tensors.insert(PAYLOAD_TENSOR_KEY.to_string(), tensor);

        let tmp_payload = payload_path.with_extension("pt.tmp");
        candle_core::safetensors::save(&tensors, &tmp_payload)
            .map_err(|e| SteeringCoreError::External(e.into()))?;
        std::fs::rename(&tmp_payload, &payload_path).map_err(|source| SteeringCoreError::Io {
            path: payload_path.display().to_string(),
            source,
        })?;

        info!(path = %base_path.display(), "saved steering vector");
        Ok(())
    }

    /// Load a two-file artifact back into a validated `SteeringVector`.
    pub fn load(base_path: impl AsRef<Path>) -> Result<Self, SteeringCoreError> {
        let base_path = base_path.as_ref();
        let descriptor_path = base_path.with_extension("json");
        let payload_path = base_path.with_extension("pt");

        if !descriptor_path.exists() {
            return Err(SteeringCoreError::Io {
                path: descriptor_path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "descriptor missing"),
            });
        }
        if !payload_path.exists() {
            return Err(SteeringCoreError::Io {
                path: payload_path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "payload missing"),
            });
        }

        let descriptor_text =
            std::fs::read_to_string(&descriptor_path).map_err(|source| SteeringCoreError::Io {
                path: descriptor_path.display().to_string(),
                source,
            })?;
        let descriptor: Descriptor = serde_json::from_str(&descriptor_text)?;

        if descriptor.schema_version > SCHEMA_VERSION {
            return Err(SteeringCoreError::UnsupportedSchema {
                found: descriptor.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        // schema_version < SCHEMA_VERSION: no upgrades defined yet at v1,
        // loaded as-is (documented upgrade path: none needed until v2 exists).

        let dtype = Dtype::parse(&descriptor.dtype).ok_or_else(|| {
            SteeringCoreError::Payload(format!("unknown dtype in descriptor: {}", descriptor.dtype))
        })?;

        let tensors = candle_core::safetensors::load(&payload_path, &Device::Cpu)
            .map_err(|e| SteeringCoreError::External(e.into()))?;
        let tensor = tensors.get(PAYLOAD_TENSOR_KEY).ok_or_else(|| {
            SteeringCoreError::Payload(format!(
                "payload does not contain a tensor named '{PAYLOAD_TENSOR_KEY}'"
            ))
        })?;

        if tensor.dims().len() != 1 {
            return Err(SteeringCoreError::Payload(format!(
                "payload tensor must be 1-D, got shape {:?}",
                tensor.dims()
            )));
        }
        if tensor.dtype() != dtype.to_candle() {
            return Err(SteeringCoreError::Payload(format!(
                "payload tensor dtype {:?} disagrees with descriptor dtype '{}'",
                tensor.dtype(),
                descriptor.dtype
            )));
        }
        let tensor_f32 = tensor
            .to_dtype(candle_core::DType::F32)
            .map_err(|e| SteeringCoreError::External(e.into()))?;
        let data: Vec<f32> = tensor_f32
            .to_vec1()
            .map_err(|e| SteeringCoreError::External(e.into()))?;

        if data.len() != descriptor.hidden_dim {
            return Err(SteeringCoreError::Payload(format!(
                "payload tensor length {} disagrees with descriptor hidden_dim {}",
                data.len(),
                descriptor.hidden_dim
            )));
        }

        let vector = Self::construct(
            data,
            descriptor.layer_index,
            descriptor.layer_name,
            descriptor.model_fingerprint,
            descriptor.metadata,
        )?
        .with_dtype(dtype);

        info!(path = %base_path.display(), "loaded steering vector");
        Ok(vector)
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

/// Convenience constructor for a single string metadata entry, used widely
/// by Discovery when recording `metadata["method"]`.
pub fn metadata_with(pairs: impl IntoIterator<Item = (&'static str, MetadataValue)>) -> Metadata {
    let mut map: BTreeMap<String, MetadataValue> = BTreeMap::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v);
    }
    map
}
