//! Deterministic, pure logic shared by the agents.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod grounding;
pub mod metrics;
pub mod modal;
pub mod predicate;
pub mod rules;
pub mod templates;
pub mod types;
