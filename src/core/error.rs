//! SP-000: Error taxonomy.
//!
//! Every graph error is a deterministic function of the declared input, so
//! nothing here is retryable. `GraphError::kind` gives the stable name the CLI
//! reports.

use super::types::GraphPhase;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, ordering, or emitting a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate resource id '{id}'")]
    DuplicateId { id: String },

    #[error("dangling reference '{from}' -> '{to}'")]
    DanglingReference { from: String, to: String },

    #[error("dependency cycle detected involving: {}", nodes.join(", "))]
    CyclicDependency { nodes: Vec<String> },

    #[error("cannot {operation}: graph is {phase}")]
    GraphFrozen {
        phase: GraphPhase,
        operation: String,
    },

    #[error("output '{output}' references unknown resource '{node}'")]
    UnresolvedOutput { output: String, node: String },

    #[error("output '{output}' reads '{node}' before it is materialized")]
    ForwardOutputReference { output: String, node: String },

    #[error("duplicate output name '{name}'")]
    DuplicateOutput { name: String },
}

impl GraphError {
    /// Stable kind name for user-facing reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateId { .. } => "DuplicateIdError",
            Self::DanglingReference { .. } => "DanglingReferenceError",
            Self::CyclicDependency { .. } => "CyclicDependencyError",
            Self::GraphFrozen { .. } => "GraphFrozenError",
            Self::UnresolvedOutput { .. } => "UnresolvedOutputError",
            Self::ForwardOutputReference { .. } => "ForwardOutputReferenceError",
            Self::DuplicateOutput { .. } => "DuplicateOutputError",
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("template error: {0}")]
    Template(String),

    #[error("{0} validation error(s)")]
    Validation(usize),

    #[error("{0}")]
    Usage(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Kind name shown in `error[...]` prefixes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Graph(e) => e.kind(),
            Self::Io { .. } => "IoError",
            Self::Yaml(_) => "ParseError",
            Self::Json(_) => "SerializeError",
            Self::Template(_) => "TemplateError",
            Self::Validation(_) => "ValidationError",
            Self::Usage(_) => "UsageError",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
