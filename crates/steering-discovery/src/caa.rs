use crate::capture::{validate_preconditions, ActivationSource};
use crate::error::DiscoveryError;
use crate::DiscoveryResult;
use steering_core::{metadata_with, MetadataValue, SteeringVector};

/// Contrastive activation addition: pairs positives to negatives by
/// position (shortest-of-the-two-lists) and averages the per-pair
/// differences, rather than differencing the two marginal means.
pub fn caa(
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

    let paired = positive.len().min(negative.len());
    let dropped = positive.len().max(negative.len()) - paired;
    let hidden_dim = source.hidden_dim();

    let mut sum = vec![0.0f32; hidden_dim];
    for i in 0..paired {
        let pos_row = pos_matrix.row(i);
        let neg_row = neg_matrix.row(i);
        for d in 0..hidden_dim {
            sum[d] += pos_row[d] - neg_row[d];
        }
    }
    for x in &mut sum {
        *x /= paired as f32;
    }

    let magnitude_result = l2_norm(&sum);

    let mut vector_metadata = metadata_with([("method", MetadataValue::String("caa".to_string()))]);
    if dropped > 0 {
        vector_metadata.insert(
            "dropped_unpaired".to_string(),
            MetadataValue::Number(dropped as f64),
        );
    }

    let vector = SteeringVector::construct(
        sum,
        layer_index,
        format!("block.{layer_index}"),
        source.model_fingerprint(),
        vector_metadata,
    )?;

    let metrics = metadata_with([
        ("result_magnitude", MetadataValue::Number(magnitude_result as f64)),
        ("paired_count", MetadataValue::Number(paired as f64)),
        ("dropped_count", MetadataValue::Number(dropped as f64)),
    ]);

    Ok((vector, metrics))
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}
