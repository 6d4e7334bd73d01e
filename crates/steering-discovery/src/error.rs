use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("discovery requires at least one positive and one negative string")]
    EmptyInput,

    #[error("layer_index {layer} is out of range for a model with {num_layers} layers")]
    LayerOutOfRange { layer: usize, num_layers: usize },

    #[error("batch_size must be >= 1, got {0}")]
    InvalidBatchSize(usize),

    #[error("max_length must be >= 1, got {0}")]
    InvalidMaxLength(usize),

    #[error("activation capture failed: {0}")]
    Capture(#[from] anyhow::Error),

    #[error(transparent)]
    Core(#[from] steering_core::SteeringCoreError),
}
