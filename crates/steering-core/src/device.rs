//! Compute device placement.
//!
//! `DeviceSpec` is the string-based surface callers use in configuration
//! (`from_pretrained`'s `device_map`, a persisted vector's `to_device`
//! request); `resolve` turns it into a real `candle_core::Device`.

use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Metal(usize),
    /// Prefer CUDA, then Metal, then CPU — whatever is actually available.
    Auto,
}

impl DeviceSpec {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cpu" => Some(DeviceSpec::Cpu),
            "auto" => Some(DeviceSpec::Auto),
            other => {
                if let Some(idx) = other.strip_prefix("cuda:") {
                    idx.parse::<usize>().ok().map(DeviceSpec::Cuda)
                } else if other == "cuda" {
                    Some(DeviceSpec::Cuda(0))
                } else if let Some(idx) = other.strip_prefix("metal:") {
                    idx.parse::<usize>().ok().map(DeviceSpec::Metal)
                } else if other == "metal" {
                    Some(DeviceSpec::Metal(0))
                } else {
                    None
                }
            }
        }
    }

    /// Resolve to a concrete `candle_core::Device`, falling back to CPU when
    /// the requested accelerator is unavailable (mirrors
    /// `Device::cuda_if_available` in the host framework).
    pub fn resolve(&self) -> candle_core::Result<Device> {
        match self {
            DeviceSpec::Cpu => Ok(Device::Cpu),
            DeviceSpec::Cuda(ordinal) => Device::cuda_if_available(*ordinal),
            DeviceSpec::Metal(ordinal) => Device::new_metal(*ordinal).or(Ok(Device::Cpu)),
            DeviceSpec::Auto => Device::cuda_if_available(0).or(Ok(Device::Cpu)),
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(i) => write!(f, "cuda:{i}"),
            DeviceSpec::Metal(i) => write!(f, "metal:{i}"),
            DeviceSpec::Auto => write!(f, "auto"),
        }
    }
}

impl Default for DeviceSpec {
    fn default() -> Self {
        DeviceSpec::Cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_specs() {
        assert_eq!(DeviceSpec::parse("cpu"), Some(DeviceSpec::Cpu));
        assert_eq!(DeviceSpec::parse("auto"), Some(DeviceSpec::Auto));
        assert_eq!(DeviceSpec::parse("cuda:1"), Some(DeviceSpec::Cuda(1)));
        assert_eq!(DeviceSpec::parse("metal:0"), Some(DeviceSpec::Metal(0)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(DeviceSpec::parse("tpu:0"), None);
        assert_eq!(DeviceSpec::parse("cuda:x"), None);
    }

    #[test]
    fn cpu_always_resolves() {
        let device = DeviceSpec::Cpu.resolve().unwrap();
        assert!(device.is_cpu());
    }
}
