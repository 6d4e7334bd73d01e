use thiserror::Error;

#[derive(Error, Debug)]
pub enum SteeringModelError {
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("invalid model state: {0}")]
    State(String),

    #[error(
        "unknown architecture '{found}'; supported architectures with a block adapter: {supported:?}"
    )]
    UnknownArchitecture { found: String, supported: Vec<String> },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] steering_core::SteeringCoreError),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}
