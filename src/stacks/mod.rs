//! Built-in stack declarations.

pub mod workshop;

use crate::core::config::DeployConfig;
use crate::core::error::{Error, Result};
use crate::core::graph::DependencyGraph;

/// Names accepted by [`builtin`].
pub const BUILTINS: &[&str] = &["workshop"];

/// Declare a built-in stack by name.
pub fn builtin(name: &str, config: &DeployConfig) -> Result<DependencyGraph> {
    match name {
        "workshop" => Ok(workshop::declare(config)?),
        other => Err(Error::Usage(format!(
            "unknown builtin stack '{}' (available: {})",
            other,
            BUILTINS.join(", ")
        ))),
    }
}
