//! SP-002: Stack file parsing, validation, and graph construction.
//!
//! Parses a stack YAML file and validates structural constraints:
//! - Version must be "1.0"
//! - Required attributes per resource kind
//! - References must name an attribute the target kind exports
//! - Output expressions must be well formed
//!
//! Unknown ids, cycles, and unresolvable outputs are left to the graph, which
//! reports them with their own error kinds.

use super::config::{is_path_safe, DeployConfig};
use super::emitter::expression_refs;
use super::error::{Error, GraphError, Result};
use super::graph::DependencyGraph;
use super::resolver;
use super::types::*;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// Stack file schema
// ============================================================================

/// Root of a stack file — the declared infrastructure of one deployable unit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackFile {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Deployable unit name (suffixed with the identifier)
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Resource declarations (order-preserving)
    pub resources: IndexMap<String, ResourceDecl>,

    /// Explicit edges not expressed as attribute references
    #[serde(default)]
    pub references: Vec<Reference>,

    /// Output table (order-preserving)
    #[serde(default)]
    pub outputs: IndexMap<String, OutputDecl>,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceDecl {
    #[serde(rename = "type")]
    pub kind: ResourceKind,

    /// Optional node group; disabled groups are dropped before building
    #[serde(default)]
    pub group: Option<String>,

    /// Ordering-only dependencies
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub attributes: IndexMap<String, AttrValue>,
}

/// An output declaration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputDecl {
    /// Node the output is anchored to
    pub source: String,

    /// Exported attribute, or text with `{{attr}}` / `{{node.attr}}` placeholders
    pub value: String,

    #[serde(default)]
    pub description: String,

    /// Optional node group; the output is dropped with its group or source
    #[serde(default)]
    pub group: Option<String>,
}

/// Validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ValidationError {
    fn new(message: String) -> Self {
        Self { message }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a stack file from disk.
pub fn parse_stack_file(path: &Path) -> Result<StackFile> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_stack(&content)
}

/// Parse a stack from a YAML string.
///
/// Repeated resource or output keys are rejected; a YAML map would otherwise
/// keep only the last declaration.
pub fn parse_stack(yaml: &str) -> Result<StackFile> {
    let stack: StackFile = serde_yaml_ng::from_str(yaml)?;
    let keys: DeclaredKeys = serde_yaml_ng::from_str(yaml)?;
    if let Some(id) = first_repeat(&keys.resources) {
        return Err(GraphError::DuplicateId { id }.into());
    }
    if let Some(name) = first_repeat(&keys.outputs) {
        return Err(GraphError::DuplicateOutput { name }.into());
    }
    Ok(stack)
}

/// Keys of the declaration maps in document order, repeats included.
#[derive(Deserialize)]
struct DeclaredKeys {
    #[serde(default, deserialize_with = "map_keys")]
    resources: Vec<String>,
    #[serde(default, deserialize_with = "map_keys")]
    outputs: Vec<String>,
}

fn map_keys<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct KeyVisitor;

    impl<'de> serde::de::Visitor<'de> for KeyVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a map of declarations")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut keys = Vec::new();
            while let Some((key, _)) = map.next_entry::<String, serde::de::IgnoredAny>()? {
                keys.push(key);
            }
            Ok(keys)
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_map(KeyVisitor)
}

fn first_repeat(keys: &[String]) -> Option<String> {
    let mut seen = std::collections::HashSet::new();
    keys.iter().find(|k| !seen.insert(k.as_str())).cloned()
}

/// JSON schema of the stack file format.
pub fn stack_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(StackFile)
}

// ============================================================================
// Validation
// ============================================================================

/// Validate a parsed stack. Returns a list of errors (empty = valid).
pub fn validate_stack(stack: &StackFile) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if stack.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            stack.version
        )));
    }

    if stack.name.is_empty() {
        errors.push(ValidationError::new("name must not be empty".to_string()));
    } else if !is_path_safe(&stack.name) {
        errors.push(ValidationError::new(format!(
            "name '{}' must not contain '/', '\\', or '..'",
            stack.name
        )));
    }

    for (id, resource) in &stack.resources {
        for required in resource.kind.required_attributes() {
            if !resource.attributes.contains_key(*required) {
                errors.push(ValidationError::new(format!(
                    "resource '{}' ({}) has no {}",
                    id, resource.kind, required
                )));
            }
        }

        let mut refs = Vec::new();
        for value in resource.attributes.values() {
            value.collect_refs(&mut refs);
        }
        for r in refs {
            // Unknown targets surface later as dangling references
            if let Some(target) = stack.resources.get(&r.node) {
                if !target.kind.exports(&r.attr) {
                    errors.push(ValidationError::new(format!(
                        "resource '{}' references '{}', but {} does not export '{}'",
                        id, r, target.kind, r.attr
                    )));
                }
            }
        }
    }

    for (name, output) in &stack.outputs {
        if output.value.trim().is_empty() {
            errors.push(ValidationError::new(format!(
                "output '{}' has an empty value",
                name
            )));
            continue;
        }
        if output.value.matches("{{").count() != output.value.matches("}}").count() {
            errors.push(ValidationError::new(format!(
                "output '{}' has an unclosed placeholder",
                name
            )));
            continue;
        }
        let entry = output_entry(name, output);
        for (node, attr) in expression_refs(&entry) {
            // Unknown nodes surface later as unresolved outputs
            let Some(target) = stack.resources.get(node) else {
                continue;
            };
            if !target.kind.exports(attr) {
                errors.push(ValidationError::new(format!(
                    "output '{}' reads '{}.{}', but {} does not export '{}'",
                    name, node, attr, target.kind, attr
                )));
            }
        }
    }

    errors
}

fn output_entry(name: &str, decl: &OutputDecl) -> OutputEntry {
    OutputEntry::new(name, &decl.source, &decl.value, &decl.description)
}

// ============================================================================
// Graph construction
// ============================================================================

/// Build a dependency graph from a validated stack.
///
/// Resources in disabled groups are dropped along with outputs anchored to
/// them. Templates are resolved against the config's parameter table.
pub fn build_graph(stack: &StackFile, config: &DeployConfig) -> Result<DependencyGraph> {
    let params = config.template_params();
    let mut graph = DependencyGraph::new(config.unit_name(&stack.name));
    let mut dropped = Vec::new();

    for (id, decl) in &stack.resources {
        if let Some(group) = &decl.group {
            if !config.group_enabled(group) {
                dropped.push(id.as_str());
                continue;
            }
        }
        let attributes = resolver::resolve_attribute_templates(&decl.attributes, &params)
            .map_err(|e| match e {
                Error::Template(msg) => Error::Template(format!("resource '{}': {}", id, msg)),
                other => other,
            })?;
        let mut node = ResourceNode::new(id.clone(), decl.kind);
        for (key, value) in attributes {
            node = node.with_attr(key, value);
        }
        for dep in &decl.depends_on {
            node = node.with_dependency(dep.clone());
        }
        graph.add_node(node)?;
    }

    for reference in &stack.references {
        if dropped.contains(&reference.from.as_str()) || dropped.contains(&reference.to.as_str()) {
            continue;
        }
        graph.add_reference(reference.clone())?;
    }

    for (name, decl) in &stack.outputs {
        let group_disabled = decl.group.as_deref().is_some_and(|g| !config.group_enabled(g));
        if group_disabled || dropped.contains(&decl.source.as_str()) {
            continue;
        }
        let description = resolver::resolve_template(&decl.description, &params)?;
        graph.add_output(OutputEntry::new(name, &decl.source, &decl.value, description))?;
    }

    if !dropped.is_empty() {
        debug!(unit = %graph.name(), dropped = ?dropped, "disabled node groups");
    }
    info!(unit = %graph.name(), resources = graph.len(), "stack declared");
    Ok(graph)
}
