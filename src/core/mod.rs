//! Core stack logic — types, parsing, resolution, ordering, emission, planning.

pub mod config;
pub mod emitter;
pub mod error;
pub mod graph;
pub mod hasher;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod types;
