//! SP-003: Template resolution and reference extraction.
//!
//! Resolves `{{params.key}}` templates in string attributes, then turns the
//! typed references embedded in each node (plus explicit `depends_on` and
//! `Reference` edges) into a per-node dependency set. Edge direction is
//! referrer → referenced.

use super::error::{Error, GraphError, Result};
use super::types::*;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use tracing::trace;

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &HashMap<String, serde_yaml_ng::Value>,
) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| Error::Template(format!("unclosed template at position {}", open)))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = match key.strip_prefix("params.") {
            Some(param_key) => params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| Error::Template(format!("unknown param: {}", param_key)))?,
            None => {
                return Err(Error::Template(format!(
                    "unknown template variable: {}",
                    key
                )))
            }
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in every string leaf of an attribute map.
pub fn resolve_attribute_templates(
    attributes: &IndexMap<String, AttrValue>,
    params: &HashMap<String, serde_yaml_ng::Value>,
) -> Result<IndexMap<String, AttrValue>> {
    attributes
        .iter()
        .map(|(key, value)| {
            let resolved = value.try_map_strings(&mut |s| resolve_template(s, params))?;
            Ok((key.clone(), resolved))
        })
        .collect()
}

/// Convert a YAML parameter to its template string form.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

/// Dependency sets keyed by node id, in node declaration order.
pub type EdgeMap = IndexMap<String, IndexSet<String>>;

/// Reject node sets where two nodes share an id.
pub fn check_unique_ids<'a>(
    nodes: impl IntoIterator<Item = &'a ResourceNode>,
) -> Result<(), GraphError> {
    let mut seen = IndexSet::new();
    for node in nodes {
        if !seen.insert(node.id()) {
            return Err(GraphError::DuplicateId {
                id: node.id().to_string(),
            });
        }
    }
    Ok(())
}

/// Build each node's dependency set.
///
/// A node depends on (first occurrence order): its explicit `depends_on`, each
/// typed reference in its attributes, and each explicit `Reference` it is the
/// `from` side of. Every endpoint must name a node in the set.
pub fn resolve_edges<'a>(
    nodes: impl IntoIterator<Item = &'a ResourceNode>,
    references: &[Reference],
) -> Result<EdgeMap, GraphError> {
    let nodes: Vec<&ResourceNode> = nodes.into_iter().collect();
    check_unique_ids(nodes.iter().copied())?;

    let known: IndexSet<&str> = nodes.iter().map(|n| n.id()).collect();
    let mut edges: EdgeMap = nodes
        .iter()
        .map(|n| (n.id().to_string(), IndexSet::new()))
        .collect();

    let dangling = |from: &str, to: &str| GraphError::DanglingReference {
        from: from.to_string(),
        to: to.to_string(),
    };

    for node in &nodes {
        let deps = node
            .explicit_dependencies()
            .iter()
            .map(String::as_str)
            .chain(node.references().into_iter().map(|r| r.node.as_str()));
        for dep in deps {
            if !known.contains(dep) {
                return Err(dangling(node.id(), dep));
            }
            if let Some(set) = edges.get_mut(node.id()) {
                set.insert(dep.to_string());
            }
        }
    }

    for reference in references {
        if !known.contains(reference.from.as_str()) || !known.contains(reference.to.as_str()) {
            return Err(dangling(&reference.from, &reference.to));
        }
        trace!(from = %reference.from, to = %reference.to, purpose = %reference.purpose, "explicit reference");
        if let Some(set) = edges.get_mut(&reference.from) {
            set.insert(reference.to.clone());
        }
    }

    Ok(edges)
}
