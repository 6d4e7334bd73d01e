use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("composition requires at least one vector")]
    EmptyInput,

    #[error("weighted_sum received {weights} weights for {vectors} vectors")]
    WeightCountMismatch { weights: usize, vectors: usize },

    #[error("vectors target different layers ({a} vs {b}); compose only same-layer vectors")]
    LayerMismatch { a: usize, b: usize },

    #[error("vectors have different hidden_dim ({a} vs {b})")]
    HiddenDimMismatch { a: usize, b: usize },
}
