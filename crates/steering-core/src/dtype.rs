//! Numeric element type carried alongside a steering vector's payload.
//!
//! The tensor itself is always held as `f32` in memory (see
//! [`crate::SteeringVector`]); `Dtype` is provenance — it records what the
//! model's activation dtype was at capture time, per the resolution of the
//! "vector dtype differs from activation dtype" open question: the vector
//! is cast to the activation dtype at registration, not before.

use candle_core::DType;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    Float32,
    Float16,
    BFloat16,
}

impl Dtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::Float32 => "float32",
            Dtype::Float16 => "float16",
            Dtype::BFloat16 => "bfloat16",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "float32" => Some(Dtype::Float32),
            "float16" => Some(Dtype::Float16),
            "bfloat16" => Some(Dtype::BFloat16),
            _ => None,
        }
    }

    /// The corresponding `candle_core::DType` used when casting to a
    /// model's activation dtype at registration.
    pub fn to_candle(self) -> DType {
        match self {
            Dtype::Float32 => DType::F32,
            Dtype::Float16 => DType::F16,
            Dtype::BFloat16 => DType::BF16,
        }
    }

    pub fn from_candle(dtype: DType) -> Self {
        match dtype {
            DType::F16 => Dtype::Float16,
            DType::BF16 => Dtype::BFloat16,
            _ => Dtype::Float32,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Dtype {
    fn default() -> Self {
        Dtype::Float32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string() {
        for d in [Dtype::Float32, Dtype::Float16, Dtype::BFloat16] {
            assert_eq!(Dtype::parse(d.as_str()), Some(d));
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(Dtype::parse("int8"), None);
    }
}
