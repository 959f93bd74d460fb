//! The four orchestration agents.
//!
//! Planner, Verifier and Supervisor are pure. The Executor is the only agent
//! that touches the [`DeviceSurface`](crate::io::device::DeviceSurface).

pub mod executor;
pub mod planner;
pub mod supervisor;
pub mod verifier;
