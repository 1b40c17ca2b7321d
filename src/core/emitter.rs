//! SP-005: Plan emission — serialize ordered nodes and resolve outputs.
//!
//! Walks the topological order, materializing one node at a time. An output
//! is resolved when its source node is materialized; every node its value
//! expression reads must already be in the materialized prefix. No I/O here:
//! writing or transmitting the plan is the caller's concern.

use super::error::{GraphError, Result};
use super::hasher;
use super::resolver::EdgeMap;
use super::types::*;
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

/// Build a plan from an ordered graph.
pub fn emit(
    name: &str,
    order: &[String],
    nodes: &IndexMap<String, ResourceNode>,
    edges: &EdgeMap,
    outputs: &IndexMap<String, OutputEntry>,
) -> Result<Plan, GraphError> {
    let mut anchored: FxHashMap<&str, Vec<&OutputEntry>> = FxHashMap::default();
    for output in outputs.values() {
        if !nodes.contains_key(&output.source_node_id) {
            return Err(GraphError::UnresolvedOutput {
                output: output.name.clone(),
                node: output.source_node_id.clone(),
            });
        }
        anchored
            .entry(output.source_node_id.as_str())
            .or_default()
            .push(output);
    }

    let mut resources = Vec::with_capacity(order.len());
    let mut materialized: FxHashSet<&str> = FxHashSet::default();
    let mut resolved: FxHashMap<&str, ResolvedOutput> = FxHashMap::default();

    for (position, id) in order.iter().enumerate() {
        // An order computed from another graph can name ids this one lacks.
        let Some(node) = nodes.get(id) else {
            return Err(GraphError::DanglingReference {
                from: name.to_string(),
                to: id.clone(),
            });
        };
        let depends_on: Vec<String> = edges
            .get(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default();
        let hash = resource_hash(node, &depends_on);
        resources.push(PlannedResource {
            id: id.clone(),
            kind: node.kind(),
            position,
            depends_on,
            attributes: node.attributes().clone(),
            hash,
        });
        materialized.insert(id.as_str());

        for &output in anchored.get(id.as_str()).into_iter().flatten() {
            let value = resolve_output(output, nodes, &materialized)?;
            resolved.insert(
                output.name.as_str(),
                ResolvedOutput {
                    name: output.name.clone(),
                    source: output.source_node_id.clone(),
                    value,
                    description: output.description.clone(),
                },
            );
        }
    }

    let outputs = outputs
        .values()
        .map(|o| {
            resolved
                .remove(o.name.as_str())
                .ok_or_else(|| GraphError::UnresolvedOutput {
                    output: o.name.clone(),
                    node: o.source_node_id.clone(),
                })
        })
        .collect::<Result<Vec<_>, GraphError>>()?;

    let fingerprint = fingerprint(name, &resources, &outputs);
    Ok(Plan {
        name: name.to_string(),
        fingerprint,
        resources,
        outputs,
    })
}

/// A piece of an output value expression.
#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Attr { node: Option<&'a str>, attr: &'a str },
}

/// Split a value expression into literal text and attribute placeholders.
///
/// A bare expression (no `{{`) names one attribute of the source node. An
/// unclosed `{{` is kept as literal text.
fn parse_expression(expr: &str) -> Vec<Segment<'_>> {
    if !expr.contains("{{") {
        return vec![Segment::Attr {
            node: None,
            attr: expr.trim(),
        }];
    }

    let mut segments = Vec::new();
    let mut rest = expr;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open..].find("}}") else {
            break;
        };
        if open > 0 {
            segments.push(Segment::Text(&rest[..open]));
        }
        let inner = rest[open + 2..open + close].trim();
        segments.push(match inner.split_once('.') {
            Some((node, attr)) => Segment::Attr {
                node: Some(node),
                attr,
            },
            None => Segment::Attr {
                node: None,
                attr: inner,
            },
        });
        rest = &rest[open + close + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    segments
}

/// `(node, attr)` pairs read by an output expression.
pub fn expression_refs<'a>(output: &'a OutputEntry) -> Vec<(&'a str, &'a str)> {
    parse_expression(&output.value_expression)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Attr { node, attr } => Some((node.unwrap_or(&output.source_node_id), attr)),
            Segment::Text(_) => None,
        })
        .collect()
}

/// Node ids named by an output expression, the source included.
pub fn expression_nodes<'a>(output: &'a OutputEntry) -> Vec<&'a str> {
    expression_refs(output).into_iter().map(|(node, _)| node).collect()
}

fn resolve_output(
    output: &OutputEntry,
    nodes: &IndexMap<String, ResourceNode>,
    materialized: &FxHashSet<&str>,
) -> Result<String, GraphError> {
    let mut value = String::new();
    for segment in parse_expression(&output.value_expression) {
        match segment {
            Segment::Text(text) => value.push_str(text),
            Segment::Attr { node, attr } => {
                let target = node.unwrap_or(&output.source_node_id);
                if !nodes.contains_key(target) {
                    return Err(GraphError::UnresolvedOutput {
                        output: output.name.clone(),
                        node: target.to_string(),
                    });
                }
                if !materialized.contains(target) {
                    return Err(GraphError::ForwardOutputReference {
                        output: output.name.clone(),
                        node: target.to_string(),
                    });
                }
                let token = AttrRef {
                    node: target.to_string(),
                    attr: attr.to_string(),
                };
                value.push_str(&token.token());
            }
        }
    }
    Ok(value)
}

/// Deterministic text encoding of an attribute value.
fn canonical(value: &AttrValue, out: &mut String) {
    match value {
        AttrValue::Null => out.push_str("null"),
        AttrValue::Bool(b) => out.push_str(&b.to_string()),
        AttrValue::Int(n) => out.push_str(&n.to_string()),
        AttrValue::Float(f) => out.push_str(&format!("{:?}", f)),
        AttrValue::Str(s) => out.push_str(&format!("{:?}", s)),
        AttrValue::Ref(r) => out.push_str(&format!("ref({:?},{:?})", r.node, r.attr)),
        AttrValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical(item, out);
            }
            out.push(']');
        }
        AttrValue::Map(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{:?}:", k));
                canonical(v, out);
            }
            out.push('}');
        }
    }
}

/// Hash of a node's kind, attributes, and resolved dependencies.
pub fn resource_hash(node: &ResourceNode, depends_on: &[String]) -> String {
    let mut attrs = String::new();
    canonical(&AttrValue::Map(node.attributes().clone()), &mut attrs);
    let kind = node.kind().to_string();
    let deps = depends_on.join(",");
    hasher::composite_hash(&[&kind, &attrs, &deps])
}

fn fingerprint(name: &str, resources: &[PlannedResource], outputs: &[ResolvedOutput]) -> String {
    let mut components: Vec<String> = vec![name.to_string()];
    components.extend(resources.iter().map(|r| format!("{}={}", r.id, r.hash)));
    components.extend(outputs.iter().map(|o| format!("{}={}", o.name, o.value)));
    let refs: Vec<&str> = components.iter().map(String::as_str).collect();
    hasher::composite_hash(&refs)
}

impl Plan {
    /// Serialize as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::DependencyGraph;

    fn workshop_fragment() -> DependencyGraph {
        let mut g = DependencyGraph::new("fragment");
        g.add_node(
            ResourceNode::new("vpc", ResourceKind::Network)
                .with_attr("cidr", "10.0.0.0/16")
                .with_attr("max_azs", 2),
        )
        .unwrap();
        g.add_node(
            ResourceNode::new("alb-sg", ResourceKind::SecurityGroup)
                .with_attr("network", AttrValue::reference("vpc", "id")),
        )
        .unwrap();
        g.add_node(
            ResourceNode::new("alb", ResourceKind::LoadBalancer)
                .with_attr("network", AttrValue::reference("vpc", "id"))
                .with_attr("security_group", AttrValue::reference("alb-sg", "id"))
                .with_attr("internet_facing", true),
        )
        .unwrap();
        g
    }

    #[test]
    fn test_sp005_parse_bare_expression() {
        assert_eq!(
            parse_expression("dns_name"),
            vec![Segment::Attr {
                node: None,
                attr: "dns_name"
            }]
        );
    }

    #[test]
    fn test_sp005_parse_template_expression() {
        assert_eq!(
            parse_expression("http://{{dns_name}}/{{ vpc.id }}"),
            vec![
                Segment::Text("http://"),
                Segment::Attr {
                    node: None,
                    attr: "dns_name"
                },
                Segment::Text("/"),
                Segment::Attr {
                    node: Some("vpc"),
                    attr: "id"
                },
            ]
        );
    }

    #[test]
    fn test_sp005_parse_unclosed_is_literal() {
        assert_eq!(
            parse_expression("x-{{dns_name"),
            vec![Segment::Text("x-{{dns_name")]
        );
    }

    #[test]
    fn test_sp005_outputs_resolved_in_declaration_order() {
        let mut g = workshop_fragment();
        g.add_output(OutputEntry::new("AlbUrl", "alb", "http://{{dns_name}}", "Application URL"))
            .unwrap();
        g.add_output(OutputEntry::new("VpcId", "vpc", "id", "VPC ID")).unwrap();
        let plan = g.emit().unwrap();
        let names: Vec<_> = plan.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["AlbUrl", "VpcId"]);
        assert_eq!(plan.outputs[0].value, "http://${alb.dns_name}");
        assert_eq!(plan.outputs[0].description, "Application URL");
        assert_eq!(plan.output("VpcId").unwrap().value, "${vpc.id}");
    }

    #[test]
    fn test_sp005_unknown_output_source() {
        let mut g = workshop_fragment();
        g.add_output(OutputEntry::new("Ghost", "Z", "arn", "")).unwrap();
        assert_eq!(
            g.emit().unwrap_err(),
            GraphError::UnresolvedOutput {
                output: "Ghost".into(),
                node: "Z".into()
            }
        );
    }

    #[test]
    fn test_sp005_order_naming_missing_node() {
        let mut nodes = IndexMap::new();
        nodes.insert(
            "vpc".to_string(),
            ResourceNode::new("vpc", ResourceKind::Network).with_attr("cidr", "10.0.0.0/16"),
        );
        let order = vec!["vpc".to_string(), "ghost".to_string()];
        let err = emit(
            "fragment",
            &order,
            &nodes,
            &EdgeMap::default(),
            &IndexMap::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingReference {
                from: "fragment".into(),
                to: "ghost".into()
            }
        );
    }

    #[test]
    fn test_sp005_unknown_node_in_expression() {
        let mut g = workshop_fragment();
        g.add_output(OutputEntry::new("Mixed", "alb", "{{dns_name}}:{{nat.id}}", ""))
            .unwrap();
        assert_eq!(
            g.emit().unwrap_err(),
            GraphError::UnresolvedOutput {
                output: "Mixed".into(),
                node: "nat".into()
            }
        );
    }

    #[test]
    fn test_sp005_forward_reference() {
        let mut g = workshop_fragment();
        // Anchored at the network, but reads the load balancer placed later
        g.add_output(OutputEntry::new("Early", "vpc", "{{id}}/{{alb.dns_name}}", ""))
            .unwrap();
        assert_eq!(
            g.emit().unwrap_err(),
            GraphError::ForwardOutputReference {
                output: "Early".into(),
                node: "alb".into()
            }
        );
    }

    #[test]
    fn test_sp005_backward_reference_ok() {
        let mut g = workshop_fragment();
        g.add_output(OutputEntry::new("Pair", "alb", "{{vpc.id}}:{{arn}}", ""))
            .unwrap();
        assert_eq!(g.emit().unwrap().outputs[0].value, "${vpc.id}:${alb.arn}");
    }

    #[test]
    fn test_sp005_resources_carry_positions_and_deps() {
        let mut g = workshop_fragment();
        let plan = g.emit().unwrap();
        assert_eq!(plan.order(), vec!["vpc", "alb-sg", "alb"]);
        let alb = plan.resource("alb").unwrap();
        assert_eq!(alb.position, 2);
        assert_eq!(alb.depends_on, vec!["vpc", "alb-sg"]);
        assert_eq!(alb.attributes["internet_facing"], AttrValue::Bool(true));
        assert!(alb.hash.starts_with("blake3:"));
    }

    #[test]
    fn test_sp005_fingerprint_tracks_attributes() {
        let mut a = workshop_fragment();
        let mut b = DependencyGraph::new("fragment");
        b.add_node(
            ResourceNode::new("vpc", ResourceKind::Network)
                .with_attr("cidr", "10.1.0.0/16")
                .with_attr("max_azs", 2),
        )
        .unwrap();
        let fa = a.emit().unwrap().fingerprint.clone();
        let fb = b.emit().unwrap().fingerprint.clone();
        assert_ne!(fa, fb);
    }

    #[test]
    fn test_sp005_hash_distinguishes_float_and_int() {
        let a = ResourceNode::new("x", ResourceKind::Cluster).with_attr("n", 1);
        let b = ResourceNode::new("x", ResourceKind::Cluster).with_attr("n", AttrValue::Float(1.0));
        assert_ne!(resource_hash(&a, &[]), resource_hash(&b, &[]));
    }

    #[test]
    fn test_sp005_serialization_deterministic() {
        let mut g1 = workshop_fragment();
        let mut g2 = workshop_fragment();
        let y1 = g1.emit().unwrap().to_yaml().unwrap();
        let y2 = g2.emit().unwrap().to_yaml().unwrap();
        assert_eq!(y1, y2);
        let j = g1.emit().unwrap().to_json().unwrap();
        let back: Plan = serde_json::from_str(&j).unwrap();
        assert_eq!(&back, g1.emit().unwrap());
    }

    #[test]
    fn test_sp005_yaml_keeps_refs_symbolic() {
        let mut g = workshop_fragment();
        let yaml = g.emit().unwrap().to_yaml().unwrap();
        assert!(yaml.contains("ref: alb-sg"));
        assert!(yaml.contains("type: load_balancer"));
    }

    #[test]
    fn test_sp005_expression_nodes() {
        let o = OutputEntry::new("Url", "alb", "{{dns_name}}-{{vpc.id}}", "");
        assert_eq!(expression_nodes(&o), vec!["alb", "vpc"]);
    }
}
