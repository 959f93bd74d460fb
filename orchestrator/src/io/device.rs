//! Device surface abstraction.
//!
//! The [`DeviceSurface`] trait decouples the orchestration loop from the
//! application driver. [`crate::io::simulated::SimulatedDevice`] drives an
//! in-memory screen graph and [`crate::io::driver::CommandDevice`] speaks JSON
//! to an external driver process. Tests use scripted devices that return
//! predetermined states.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::types::{GroundedAction, UiState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Simulated,
    Driver,
    Scripted,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Simulated => "simulated",
            DeviceKind::Driver => "driver",
            DeviceKind::Scripted => "scripted",
        }
    }
}

/// Capabilities resolved once when a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub kind: DeviceKind,
    /// Whether the surface enforces the per-call timeout itself.
    pub enforces_timeout: bool,
}

/// Failure of a single device call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    Timeout { after: Duration },
    Transport(String),
    Protocol(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Timeout { after } => {
                write!(f, "device step timed out after {} ms", after.as_millis())
            }
            DeviceError::Transport(detail) => write!(f, "device transport failed: {detail}"),
            DeviceError::Protocol(detail) => write!(f, "device protocol violation: {detail}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Application surface the Executor acts on.
///
/// `step` is the only side-effecting call in a session. Implementations must
/// return within roughly `timeout` or report [`DeviceError::Timeout`].
pub trait DeviceSurface {
    fn capabilities(&self) -> DeviceCapabilities;

    /// Bring the application to its initial state and return it.
    fn reset(&mut self) -> Result<UiState, DeviceError>;

    fn step(&mut self, action: &GroundedAction, timeout: Duration) -> Result<UiState, DeviceError>;
}

impl<D: DeviceSurface + ?Sized> DeviceSurface for Box<D> {
    fn capabilities(&self) -> DeviceCapabilities {
        (**self).capabilities()
    }

    fn reset(&mut self) -> Result<UiState, DeviceError> {
        (**self).reset()
    }

    fn step(&mut self, action: &GroundedAction, timeout: Duration) -> Result<UiState, DeviceError> {
        (**self).step(action, timeout)
    }
}
