//! Compute device selection and the run's precision backend.
//!
//! The device is picked once at construction from an explicit configuration
//! value; nothing here mutates process-wide state. The training loop always
//! works with the canonical student handle, whatever device the run targets.

use crate::autograd::{GradScaler, MixedPrecisionConfig};
use crate::error::{DistilarError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compute device for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

impl FromStr for Device {
    type Err = DistilarError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(Device::Cpu),
            other => {
                if let Some(idx) = other.strip_prefix("cuda:") {
                    let idx = idx.parse::<usize>().map_err(|_| {
                        DistilarError::config(
                            "device",
                            format!("invalid device index in '{other}'"),
                            "use \"cpu\" or \"cuda:<index>\"",
                        )
                    })?;
                    Ok(Device::Cuda(idx))
                } else {
                    Err(DistilarError::config(
                        "device",
                        format!("unknown device '{other}'"),
                        "use \"cpu\" or \"cuda:<index>\"",
                    ))
                }
            }
        }
    }
}

/// Device plus precision policy for one run.
pub struct Backend {
    device: Device,
    precision: MixedPrecisionConfig,
}

impl Backend {
    /// Build a backend from explicit configuration.
    pub fn new(device: Device, precision: MixedPrecisionConfig) -> Self {
        Self { device, precision }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn precision(&self) -> &MixedPrecisionConfig {
        &self.precision
    }

    /// Build the loss scaler for this backend's precision policy.
    pub fn grad_scaler(&self) -> GradScaler {
        GradScaler::from_config(&self.precision)
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::new(Device::Cpu, MixedPrecisionConfig::fp32())
    }
}
