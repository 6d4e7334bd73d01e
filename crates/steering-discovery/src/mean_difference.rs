use crate::capture::{column_means, validate_preconditions, ActivationSource};
use crate::error::DiscoveryError;
use crate::DiscoveryResult;
use steering_core::{metadata_with, MetadataValue, SteeringVector};

/// `mean(positive activations) - mean(negative activations)`, the
/// simplest contrast direction.
pub fn mean_difference(
    source: &dyn ActivationSource,
    positive: &[String],
    negative: &[String],
    layer_index: usize,
    batch_size: usize,
    max_length: usize,
) -> Result<DiscoveryResult, DiscoveryError> {
    validate_preconditions(
        positive,
        negative,
        source.num_layers(),
        layer_index,
        batch_size,
        max_length,
    )?;

    let pos_matrix = source.capture_mean_pooled(positive, layer_index, batch_size, max_length)?;
    let neg_matrix = source.capture_mean_pooled(negative, layer_index, batch_size, max_length)?;

    let mu_pos = column_means(&pos_matrix);
    let mu_neg = column_means(&neg_matrix);
    let direction: Vec<f32> = mu_pos.iter().zip(&mu_neg).map(|(p, n)| p - n).collect();

    let magnitude_pos = l2_norm(&mu_pos);
    let magnitude_neg = l2_norm(&mu_neg);
    let magnitude_result = l2_norm(&direction);

    let vector = SteeringVector::construct(
        direction,
        layer_index,
        format!("block.{layer_index}"),
        source.model_fingerprint(),
        metadata_with([("method", MetadataValue::String("mean_difference".to_string()))]),
    )?;

    let metrics = metadata_with([
        ("positive_magnitude", MetadataValue::Number(magnitude_pos as f64)),
        ("negative_magnitude", MetadataValue::Number(magnitude_neg as f64)),
        ("result_magnitude", MetadataValue::Number(magnitude_result as f64)),
        ("positive_count", MetadataValue::Number(positive.len() as f64)),
        ("negative_count", MetadataValue::Number(negative.len() as f64)),
    ]);

    Ok((vector, metrics))
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ActivationSource;
    use ndarray::Array2;

    struct FixedSource {
        hidden_dim: usize,
        num_layers: usize,
        fingerprint: String,
    }

    impl ActivationSource for FixedSource {
        fn num_layers(&self) -> usize {
            self.num_layers
        }
        fn hidden_dim(&self) -> usize {
            self.hidden_dim
        }
        fn model_fingerprint(&self) -> &str {
            &self.fingerprint
        }
        fn capture_mean_pooled(
            &self,
            texts: &[String],
            _layer_index: usize,
            _batch_size: usize,
            _max_length: usize,
        ) -> Result<Array2<f32>, DiscoveryError> {
            // Each text's "activation" is just its length, broadcast across dims,
            // so positive/negative sets are trivially distinguishable.
            let mut data = Vec::with_capacity(texts.len() * self.hidden_dim);
            for t in texts {
                for _ in 0..self.hidden_dim {
                    data.push(t.len() as f32);
                }
            }
            Ok(Array2::from_shape_vec((texts.len(), self.hidden_dim), data).unwrap())
        }
    }

    #[test]
    fn invariant_9_identical_lists_near_zero_magnitude() {
        let source = FixedSource {
            hidden_dim: 4,
            num_layers: 12,
            fingerprint: "m".to_string(),
        };
        let same = vec!["abc".to_string(), "de".to_string()];
        let (vector, _) = mean_difference(&source, &same, &same, 3, 1, 16).unwrap();
        assert!(vector.magnitude() < 1e-5);
    }

    #[test]
    fn scenario_8_single_pair_succeeds_and_is_finite() {
        let source = FixedSource {
            hidden_dim: 4,
            num_layers: 12,
            fingerprint: "m".to_string(),
        };
        let positive = vec!["happy".to_string()];
        let negative = vec!["sad!".to_string()];
        let (vector, metrics) = mean_difference(&source, &positive, &negative, 2, 1, 16).unwrap();
        assert!(vector.tensor().iter().all(|v| v.is_finite()));
        assert!(metrics.contains_key("result_magnitude"));
    }

    #[test]
    fn rejects_out_of_range_layer() {
        let source = FixedSource {
            hidden_dim: 4,
            num_layers: 2,
            fingerprint: "m".to_string(),
        };
        let positive = vec!["a".to_string()];
        let negative = vec!["b".to_string()];
        let err = mean_difference(&source, &positive, &negative, 5, 1, 16).unwrap_err();
        assert!(matches!(err, DiscoveryError::LayerOutOfRange { .. }));
    }

    #[test]
    fn rejects_empty_input() {
        let source = FixedSource {
            hidden_dim: 4,
            num_layers: 2,
            fingerprint: "m".to_string(),
        };
        let negative = vec!["b".to_string()];
        let err = mean_difference(&source, &[], &negative, 0, 1, 16).unwrap_err();
        assert!(matches!(err, DiscoveryError::EmptyInput));
    }
}
