//! Algorithms that turn labeled contrast text into a [`SteeringVector`]:
//! mean-difference, contrastive activation addition, and a linear probe.
//! All three share one activation-capture primitive (see [`capture`]) and
//! differ only in how they turn the captured matrices into a direction.

pub mod caa;
pub mod capture;
pub mod error;
pub mod linear_probe;
pub mod mean_difference;

pub use caa::caa;
pub use capture::ActivationSource;
pub use error::DiscoveryError;
pub use linear_probe::linear_probe;
pub use mean_difference::mean_difference;

use steering_core::{Metadata, SteeringVector};

/// The result of any discovery method: the derived vector plus a
/// free-form metrics mapping (magnitudes, counts, convergence info).
/// `vector.metadata()["method"]` records which algorithm produced it.
pub type DiscoveryResult = (SteeringVector, Metadata);
