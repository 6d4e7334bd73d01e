//! Implements Discovery's `ActivationSource` contract directly on
//! `SteeringModel`, so a caller can pass a loaded model straight to
//! `steering_discovery::mean_difference`/`caa`/`linear_probe` without an
//! adapter. Each call here is its own forward pass through blocks
//! `0..=layer_index`; nothing is left installed on the model afterward,
//! satisfying the "one-shot interceptor, released even on error"
//! contract with no interceptor bookkeeping at all (this path never
//! touches `self.interceptors`).

use candle_core::Tensor;
use ndarray::Array2;
use steering_discovery::{ActivationSource, DiscoveryError};

use crate::blocks::TransformerBlock;
use crate::model::SteeringModel;

impl ActivationSource for SteeringModel {
    fn num_layers(&self) -> usize {
        self.num_layers()
    }

    fn hidden_dim(&self) -> usize {
        self.hidden_dim()
    }

    fn model_fingerprint(&self) -> &str {
        self.model_fingerprint()
    }

    fn capture_mean_pooled(
        &self,
        texts: &[String],
        layer_index: usize,
        _batch_size: usize,
        max_length: usize,
    ) -> Result<Array2<f32>, DiscoveryError> {
        let hidden_dim = self.hidden_dim();
        let mut rows: Vec<f32> = Vec::with_capacity(texts.len() * hidden_dim);

        for text in texts {
            let ids = self
                .tokenizer_encode(text, max_length)
                .map_err(|e| DiscoveryError::Capture(anyhow::anyhow!(e)))?;
            if ids.is_empty() {
                return Err(DiscoveryError::Capture(anyhow::anyhow!(
                    "tokenization of '{text}' produced no tokens"
                )));
            }

            let input = Tensor::from_vec(ids.clone(), (1, ids.len()), self.device())
                .map_err(|e| DiscoveryError::Capture(e.into()))?;

            let mut xs = self
                .embed_forward(&input)
                .map_err(|e| DiscoveryError::Capture(e.into()))?;
            for block in self.blocks_up_to(layer_index) {
                xs = block.forward(&xs).map_err(|e| DiscoveryError::Capture(e.into()))?;
            }

            // One text == one unpadded sequence, so "mean over non-padding
            // positions" reduces to "mean over the sequence axis".
            let pooled = xs
                .mean(1)
                .and_then(|t| t.squeeze(0))
                .map_err(|e| DiscoveryError::Capture(e.into()))?;
            let row: Vec<f32> = pooled.to_vec1().map_err(|e| DiscoveryError::Capture(e.into()))?;
            rows.extend(row);
        }

        Array2::from_shape_vec((texts.len(), hidden_dim), rows)
            .map_err(|e| DiscoveryError::Capture(anyhow::anyhow!(e)))
    }
}
