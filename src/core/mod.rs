//! Core logic — descriptors, registry, resolution, planning, execution.

pub mod context;
pub mod error;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod types;
pub mod unit;
