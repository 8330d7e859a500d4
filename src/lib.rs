//! Capforge — typed capability catalog with provider planning.
//!
//! Units declare typed inputs and outputs. The planner resolves a target's
//! required inputs against a context and the registry, orders providers with
//! Kahn's algorithm, and the executor validates every step before running it.

pub mod cli;
pub mod core;
pub mod journal;
pub mod transport;
pub mod units;
