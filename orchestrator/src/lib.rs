//! Goal-driven QA sessions against a mobile application surface.
//!
//! A natural-language goal is decomposed into subgoals, each grounded into UI
//! actions, executed on a device surface, verified against the observed state,
//! and adapted when verification fails. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (types, grounding, modal
//!   inference, the bug rule table, plan templates). No I/O.
//! - **[`agents`]**: Planner, Executor, Verifier and Supervisor. Only the
//!   Executor touches the device.
//! - **[`io`]**: Side-effecting adapters (simulated and driver-backed devices,
//!   child processes, config, session artifacts).
//!
//! [`session`] wires the agents into the bounded session loop behind `qa run`.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
