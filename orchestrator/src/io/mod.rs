//! Side-effecting adapters: device surfaces, driver processes, config and
//! session artifacts.

pub mod config;
pub mod device;
pub mod driver;
pub mod process;
pub mod session_log;
pub mod simulated;
