//! stackplan — declarative infrastructure stacks.
//!
//! Resource nodes reference each other's exported attributes. The graph turns
//! those references into dependency edges, orders them, and emits a
//! deterministic plan with a resolved output table.

pub mod cli;
pub mod core;
pub mod stacks;
