//! The shared activation-capture primitive. Every discovery method begins
//! by turning a list of strings into a `(len(texts), hidden_dim)` matrix
//! of mean-pooled residual-stream activations at a target layer; the
//! three methods differ only in what they do with that matrix.

use crate::error::DiscoveryError;
use ndarray::Array2;

/// A model capable of producing per-text, mean-pooled activations at a
/// given block. Implemented by `steering-model::SteeringModel`; kept as a
/// trait here so discovery algorithms stay independent of any concrete
/// model-loading stack.
///
/// Implementations are responsible for the "one-shot interceptor,
/// released even on error" contract: `capture_mean_pooled` must not leave
/// any hook installed on the model once it returns, success or failure.
pub trait ActivationSource {
    fn num_layers(&self) -> usize;
    fn hidden_dim(&self) -> usize;
    fn model_fingerprint(&self) -> &str;

    /// Run `texts` through the model (batched by `batch_size`, truncated
    /// to `max_length` tokens), and for each one return the mean of its
    /// per-token output residual-stream activations at `layer_index`
    /// over non-padding positions. Row order matches `texts`.
    fn capture_mean_pooled(
        &self,
        texts: &[String],
        layer_index: usize,
        batch_size: usize,
        max_length: usize,
    ) -> Result<Array2<f32>, DiscoveryError>;
}

/// Shared precondition checks every discovery method opens with.
pub fn validate_preconditions(
    positive: &[String],
    negative: &[String],
    num_layers: usize,
    layer_index: usize,
    batch_size: usize,
    max_length: usize,
) -> Result<(), DiscoveryError> {
    if positive.is_empty() || negative.is_empty() {
        return Err(DiscoveryError::EmptyInput);
    }
    if layer_index >= num_layers {
        return Err(DiscoveryError::LayerOutOfRange {
            layer: layer_index,
            num_layers,
        });
    }
    if batch_size < 1 {
        return Err(DiscoveryError::InvalidBatchSize(batch_size));
    }
    if max_length < 1 {
        return Err(DiscoveryError::InvalidMaxLength(max_length));
    }
    Ok(())
}

pub(crate) fn column_means(matrix: &Array2<f32>) -> Vec<f32> {
    matrix
        .mean_axis(ndarray::Axis(0))
        .expect("matrix has at least one row")
        .to_vec()
}
