//! Error taxonomy shared by the steering engine's core artifact.

use thiserror::Error;

/// Errors that can arise while constructing, persisting, or validating a
/// [`crate::SteeringVector`].
#[derive(Error, Debug)]
pub enum SteeringCoreError {
    #[error("invalid steering vector: {0}")]
    Validation(String),

    #[error("steering vector is incompatible with the target model: {0}")]
    Compatibility(String),

    #[error("I/O error reading/writing steering vector at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize steering vector descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error("steering vector payload is corrupt or inconsistent with its descriptor: {0}")]
    Payload(String),

    #[error("unsupported schema_version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("unknown architecture tag: {0}")]
    UnknownArchitecture(String),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}
