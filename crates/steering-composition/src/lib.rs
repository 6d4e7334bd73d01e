//! Stateless math over one or more [`SteeringVector`]s: weighted
//! combination, pairwise similarity, conflict detection, and Gram-Schmidt
//! orthogonalization. No operation here mutates its inputs; every
//! operation either returns a new `SteeringVector` or a plain report.

pub mod error;

pub use error::CompositionError;

use steering_core::{metadata_with, Metadata, MetadataValue, SteeringVector};
use tracing::warn;

/// Default similarity threshold for [`detect_conflicts`], per spec.
pub const DEFAULT_CONFLICT_THRESHOLD: f32 = 0.7;

/// Combine several vectors into one via a weighted sum. All inputs must
/// share `hidden_dim` and `layer_index`. Zero weights are permitted
/// (their vector contributes nothing, but must still be shape-compatible).
pub fn weighted_sum(
    vectors: &[SteeringVector],
    weights: &[f32],
    normalize: bool,
) -> Result<SteeringVector, CompositionError> {
    if vectors.is_empty() {
        return Err(CompositionError::EmptyInput);
    }
    if weights.len() != vectors.len() {
        return Err(CompositionError::WeightCountMismatch {
            weights: weights.len(),
            vectors: vectors.len(),
        });
    }

    let first = &vectors[0];
    for v in &vectors[1..] {
        if v.layer_index() != first.layer_index() {
            return Err(CompositionError::LayerMismatch {
                a: first.layer_index(),
                b: v.layer_index(),
            });
        }
        if v.hidden_dim() != first.hidden_dim() {
            return Err(CompositionError::HiddenDimMismatch {
                a: first.hidden_dim(),
                b: v.hidden_dim(),
            });
        }
    }

    let hidden_dim = first.hidden_dim();
    let mut sum = vec![0.0f32; hidden_dim];
    for (v, &w) in vectors.iter().zip(weights) {
        for (acc, x) in sum.iter_mut().zip(v.tensor()) {
            *acc += w * x;
        }
    }

    if normalize {
        let norm = l2_norm(&sum);
        if norm > 1e-12 {
            for x in &mut sum {
                *x /= norm;
            }
        }
    }

    let metadata = recipe_metadata("weighted_sum", vectors.len(), normalize);
    SteeringVector::construct(
        sum,
        first.layer_index(),
        format!("weighted_sum({})", first.layer_name()),
        first.model_fingerprint().to_string(),
        metadata,
    )
    .map_err(|_| CompositionError::EmptyInput) // construct cannot actually fail here: hidden_dim > 0 and finite by construction
}

/// `n x n` symmetric matrix of pairwise cosine similarities. Diagonal
/// entries are exactly `1.0`. A zero-magnitude vector makes every
/// similarity involving it undefined; those entries are `0.0` and a
/// warning is logged (per spec, this is a reported anomaly, not an error).
pub fn cosine_similarity_matrix(vectors: &[SteeringVector]) -> Result<Vec<Vec<f32>>, CompositionError> {
    if vectors.is_empty() {
        return Err(CompositionError::EmptyInput);
    }

    let n = vectors.len();
    let mut matrix = vec![vec![0.0f32; n]; n];
    let norms: Vec<f32> = vectors.iter().map(|v| l2_norm(v.tensor())).collect();

    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let cosine = if norms[i] <= 1e-12 || norms[j] <= 1e-12 {
                warn!(i, j, "cosine similarity undefined for a zero-magnitude vector");
                0.0
            } else {
                dot(vectors[i].tensor(), vectors[j].tensor()) / (norms[i] * norms[j])
            };
            matrix[i][j] = cosine;
            matrix[j][i] = cosine;
        }
    }

    Ok(matrix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Aligned,
    Opposing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conflict {
    pub i: usize,
    pub j: usize,
    pub cosine: f32,
    pub kind: ConflictKind,
}

/// Scan the off-diagonal pairwise similarities and report pairs whose
/// absolute cosine meets or exceeds `threshold`.
pub fn detect_conflicts(
    vectors: &[SteeringVector],
    threshold: f32,
) -> Result<Vec<Conflict>, CompositionError> {
    let matrix = cosine_similarity_matrix(vectors)?;
    let n = vectors.len();
    let mut conflicts = Vec::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let cosine = matrix[i][j];
            if cosine.abs() >= threshold {
                let kind = if cosine > 0.0 {
                    ConflictKind::Aligned
                } else {
                    ConflictKind::Opposing
                };
                conflicts.push(Conflict { i, j, cosine, kind });
            }
        }
    }

    Ok(conflicts)
}

#[derive(Debug, Clone)]
pub enum OrthogonalizedEntry {
    Kept(SteeringVector),
    /// The vector's projection onto prior vectors left a residual with
    /// norm below `1e-8`; it is dropped but its original position is
    /// preserved so callers can still line the result up with the input.
    Zeroed { original_index: usize },
}

/// Gram-Schmidt over the input in order, preserving the first vector's
/// direction. A vector that becomes numerically zero (`norm < 1e-8`)
/// after projecting out the prior directions is flagged, not silently
/// dropped.
pub fn orthogonalize(vectors: &[SteeringVector]) -> Result<Vec<OrthogonalizedEntry>, CompositionError> {
    if vectors.is_empty() {
        return Err(CompositionError::EmptyInput);
    }

    let first = &vectors[0];
    for v in &vectors[1..] {
        if v.hidden_dim() != first.hidden_dim() {
            return Err(CompositionError::HiddenDimMismatch {
                a: first.hidden_dim(),
                b: v.hidden_dim(),
            });
        }
    }

    let mut basis: Vec<Vec<f32>> = Vec::with_capacity(vectors.len());
    let mut out = Vec::with_capacity(vectors.len());

    for (idx, v) in vectors.iter().enumerate() {
        let mut residual = v.tensor().to_vec();
        for b in &basis {
            let proj = dot(&residual, b); // b is already unit-norm
            for (r, bx) in residual.iter_mut().zip(b) {
                *r -= proj * bx;
            }
        }

        let norm = l2_norm(&residual);
        if norm < 1e-8 {
            warn!(index = idx, "orthogonalize: vector became numerically zero, dropping");
            out.push(OrthogonalizedEntry::Zeroed { original_index: idx });
            continue;
        }

        for r in &mut residual {
            *r /= norm;
        }
        basis.push(residual.clone());

        // The orthogonalized *direction* is unit norm; rescale back to the
        // original vector's magnitude so composition downstream still
        // reflects relative vector strengths.
        let rescaled: Vec<f32> = residual.iter().map(|x| x * v.magnitude()).collect();

        let metadata = recipe_metadata("orthogonalize", vectors.len(), false);
        let orthogonalized = SteeringVector::construct(
            rescaled,
            v.layer_index(),
            format!("orthogonalize({})", v.layer_name()),
            v.model_fingerprint().to_string(),
            metadata,
        )
        .map_err(|_| CompositionError::EmptyInput)?; // cannot fail: finite, non-empty by construction
        out.push(OrthogonalizedEntry::Kept(orthogonalized));
    }

    Ok(out)
}

fn recipe_metadata(method: &'static str, input_count: usize, normalized: bool) -> Metadata {
    metadata_with([
        ("composition_method", MetadataValue::String(method.to_string())),
        ("input_count", MetadataValue::Number(input_count as f64)),
        ("normalized", MetadataValue::Bool(normalized)),
    ])
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use steering_core::Metadata;

    fn vec_at(data: Vec<f32>, layer: usize) -> SteeringVector {
        SteeringVector::construct(data, layer, "layer", "m", Metadata::new()).unwrap()
    }

    #[test]
    fn s2_weighted_sum_identity() {
        let v1 = vec_at(vec![1.0, 0.0], 3);
        let v2 = vec_at(vec![0.0, 1.0], 3);
        let result = weighted_sum(&[v1, v2], &[1.0, 0.0], false).unwrap();
        assert_eq!(result.tensor(), &[1.0, 0.0]);
    }

    #[test]
    fn weighted_sum_rejects_layer_mismatch() {
        let v1 = vec_at(vec![1.0, 0.0], 3);
        let v2 = vec_at(vec![0.0, 1.0], 4);
        let err = weighted_sum(&[v1, v2], &[1.0, 1.0], false).unwrap_err();
        assert!(matches!(err, CompositionError::LayerMismatch { .. }));
    }

    #[test]
    fn weighted_sum_rejects_weight_count_mismatch() {
        let v1 = vec_at(vec![1.0, 0.0], 3);
        let err = weighted_sum(&[v1], &[1.0, 2.0], false).unwrap_err();
        assert!(matches!(err, CompositionError::WeightCountMismatch { .. }));
    }

    #[test]
    fn cosine_of_self_is_exactly_one() {
        let v = vec_at(vec![3.0, 4.0], 0);
        let matrix = cosine_similarity_matrix(std::slice::from_ref(&v)).unwrap();
        assert_eq!(matrix[0][0], 1.0);
    }

    #[test]
    fn s3_conflict_detection() {
        let v1 = vec_at(vec![1.0, 0.0], 0);
        let v2 = vec_at(vec![-1.0, 0.0], 0);
        let conflicts = detect_conflicts(&[v1, v2], DEFAULT_CONFLICT_THRESHOLD).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].i, 0);
        assert_eq!(conflicts[0].j, 1);
        assert!((conflicts[0].cosine - (-1.0)).abs() < 1e-6);
        assert_eq!(conflicts[0].kind, ConflictKind::Opposing);
    }

    #[test]
    fn orthogonalize_preserves_first_direction() {
        let v1 = vec_at(vec![1.0, 0.0], 0);
        let v2 = vec_at(vec![1.0, 1.0], 0);
        let result = orthogonalize(&[v1.clone(), v2]).unwrap();

        match &result[0] {
            OrthogonalizedEntry::Kept(v) => {
                let direction: Vec<f32> = v.tensor().iter().map(|x| x / v.magnitude()).collect();
                assert!((direction[0] - 1.0).abs() < 1e-6);
                assert!(direction[1].abs() < 1e-6);
            }
            _ => panic!("first vector should never be zeroed"),
        }

        match &result[1] {
            OrthogonalizedEntry::Kept(v) => {
                assert!(v.tensor()[0].abs() < 1e-5);
                assert!(v.tensor()[1] > 0.0);
            }
            _ => panic!("second vector has a component orthogonal to the first"),
        }
    }

    #[test]
    fn orthogonalize_flags_degenerate_vector() {
        let v1 = vec_at(vec![1.0, 0.0], 0);
        let v2 = vec_at(vec![2.0, 0.0], 0); // parallel to v1
        let result = orthogonalize(&[v1, v2]).unwrap();
        assert!(matches!(result[1], OrthogonalizedEntry::Zeroed { original_index: 1 }));
    }

    #[test]
    fn empty_input_is_domain_error() {
        assert!(matches!(
            weighted_sum(&[], &[], false).unwrap_err(),
            CompositionError::EmptyInput
        ));
        assert!(matches!(
            cosine_similarity_matrix(&[]).unwrap_err(),
            CompositionError::EmptyInput
        ));
        assert!(matches!(
            orthogonalize(&[]).unwrap_err(),
            CompositionError::EmptyInput
        ));
    }

    #[test]
    fn single_vector_orthogonalize_is_identity_direction() {
        let v = vec_at(vec![3.0, 4.0], 0);
        let result = orthogonalize(&[v]).unwrap();
        match &result[0] {
            OrthogonalizedEntry::Kept(out) => {
                assert!((out.magnitude() - 5.0).abs() < 1e-5);
            }
            _ => panic!("single vector must survive"),
        }
    }

    proptest! {
        /// `weighted_sum` is linear in its weights: summing a vector with
        /// weights `a` and `b` separately and adding the results elementwise
        /// must agree with summing it once with weight `a + b`.
        #[test]
        fn weighted_sum_is_additive_in_weights(
            data in prop::collection::vec(-10.0f32..10.0, 4),
            a in -5.0f32..5.0,
            b in -5.0f32..5.0,
        ) {
            let v = vec_at(data, 0);

            let combined = weighted_sum(std::slice::from_ref(&v), &[a + b], false).unwrap();
            let left = weighted_sum(std::slice::from_ref(&v), &[a], false).unwrap();
            let right = weighted_sum(std::slice::from_ref(&v), &[b], false).unwrap();

            for ((c, l), r) in combined.tensor().iter().zip(left.tensor()).zip(right.tensor()) {
                prop_assert!((c - (l + r)).abs() < 1e-3);
            }
        }

        /// Weighted-summing two vectors at once equals summing each alone
        /// (at weight 1.0) and adding the results elementwise.
        #[test]
        fn weighted_sum_distributes_over_vectors(
            data_1 in prop::collection::vec(-10.0f32..10.0, 4),
            data_2 in prop::collection::vec(-10.0f32..10.0, 4),
            w1 in -5.0f32..5.0,
            w2 in -5.0f32..5.0,
        ) {
            let v1 = vec_at(data_1, 2);
            let v2 = vec_at(data_2, 2);

            let combined = weighted_sum(&[v1.clone(), v2.clone()], &[w1, w2], false).unwrap();
            let from_v1 = weighted_sum(std::slice::from_ref(&v1), &[w1], false).unwrap();
            let from_v2 = weighted_sum(std::slice::from_ref(&v2), &[w2], false).unwrap();

            for ((c, l), r) in combined.tensor().iter().zip(from_v1.tensor()).zip(from_v2.tensor()) {
                prop_assert!((c - (l + r)).abs() < 1e-3);
            }
        }
    }
}
