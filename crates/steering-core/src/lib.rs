//! Core data artifact for the activation steering engine.
//!
//! Provides [`SteeringVector`] — the typed, persistable artifact produced
//! by discovery algorithms and consumed by the steering runtime — along
//! with its error taxonomy, device/dtype plumbing, and the static
//! architecture registry.

pub mod architecture;
pub mod device;
pub mod dtype;
pub mod error;
pub mod metadata;
pub mod vector;

pub use device::DeviceSpec;
pub use dtype::Dtype;
pub use error::SteeringCoreError;
pub use metadata::{Metadata, MetadataValue};
pub use vector::{metadata_with, SteeringVector, SCHEMA_VERSION};
