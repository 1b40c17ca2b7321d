//! SP-001: Declaration, plan, and lock types.
//!
//! Resource nodes, typed references, output entries, and the plan they are
//! emitted into. Plan and lock types derive Serialize/Deserialize for YAML
//! and JSON roundtripping.

use indexmap::{IndexMap, IndexSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Resource kinds
// ============================================================================

/// Kind of infrastructure object a node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    SecurityGroup,
    LoadBalancer,
    Listener,
    TargetGroup,
    Repository,
    Cluster,
    Role,
    TaskDefinition,
    Service,
}

impl ResourceKind {
    /// Attributes a declaration of this kind must carry.
    pub fn required_attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Network => &["cidr"],
            Self::SecurityGroup => &["network"],
            Self::LoadBalancer => &["network", "security_group"],
            Self::Listener => &["load_balancer", "port"],
            Self::TargetGroup => &["network", "port", "protocol"],
            Self::Repository => &["repository_name"],
            Self::Cluster => &["cluster_name"],
            Self::Role => &["assumed_by"],
            Self::TaskDefinition => &["family", "cpu", "memory"],
            Self::Service => &["cluster", "task_definition"],
        }
    }

    /// Identifiers the applier produces for this kind once it exists.
    pub fn exported_attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Network => &["id", "public_subnet_ids", "private_subnet_ids"],
            Self::SecurityGroup => &["id"],
            Self::LoadBalancer => &["arn", "dns_name"],
            Self::Listener => &["arn"],
            Self::TargetGroup => &["arn"],
            Self::Repository => &["arn", "uri", "name"],
            Self::Cluster => &["name", "arn"],
            Self::Role => &["arn", "name"],
            Self::TaskDefinition => &["arn", "family"],
            Self::Service => &["name", "arn"],
        }
    }

    pub fn exports(&self, attr: &str) -> bool {
        self.exported_attributes().contains(&attr)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::SecurityGroup => write!(f, "security_group"),
            Self::LoadBalancer => write!(f, "load_balancer"),
            Self::Listener => write!(f, "listener"),
            Self::TargetGroup => write!(f, "target_group"),
            Self::Repository => write!(f, "repository"),
            Self::Cluster => write!(f, "cluster"),
            Self::Role => write!(f, "role"),
            Self::TaskDefinition => write!(f, "task_definition"),
            Self::Service => write!(f, "service"),
        }
    }
}

// ============================================================================
// Attribute values
// ============================================================================

/// Symbolic reference to an identifier another node exports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AttrRef {
    /// Referenced node id
    #[serde(rename = "ref")]
    pub node: String,

    /// Exported attribute of the referenced node
    pub attr: String,
}

impl AttrRef {
    /// Late-bound token the applier substitutes: `${node.attr}`.
    pub fn token(&self) -> String {
        format!("${{{}.{}}}", self.node, self.attr)
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.attr)
    }
}

/// A resource attribute: scalar, nested, or a typed reference.
///
/// Variant order matters for untagged deserialization: a map is only a
/// reference when it has exactly the `ref` and `attr` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<AttrValue>),
    Ref(AttrRef),
    Map(IndexMap<String, AttrValue>),
}

impl AttrValue {
    /// Build a reference value.
    pub fn reference(node: impl Into<String>, attr: impl Into<String>) -> Self {
        Self::Ref(AttrRef {
            node: node.into(),
            attr: attr.into(),
        })
    }

    /// Build a map value from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AttrValue)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Collect every reference in this value, depth-first, in declaration order.
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a AttrRef>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
            Self::Map(entries) => entries.values().for_each(|v| v.collect_refs(out)),
            _ => {}
        }
    }

    /// Apply `f` to every string leaf, rebuilding the value.
    pub fn try_map_strings<E>(
        &self,
        f: &mut impl FnMut(&str) -> Result<String, E>,
    ) -> Result<AttrValue, E> {
        Ok(match self {
            Self::Str(s) => Self::Str(f(s)?),
            Self::List(items) => Self::List(
                items
                    .iter()
                    .map(|v| v.try_map_strings(f))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.try_map_strings(f)?)))
                    .collect::<Result<_, E>>()?,
            ),
            other => other.clone(),
        })
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for AttrValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<AttrRef> for AttrValue {
    fn from(r: AttrRef) -> Self {
        Self::Ref(r)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Nodes, references, outputs
// ============================================================================

/// One infrastructure object. Immutable once built; identity is the id.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    id: String,
    kind: ResourceKind,
    attributes: IndexMap<String, AttrValue>,
    depends_on: IndexSet<String>,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: IndexMap::new(),
            depends_on: IndexSet::new(),
        }
    }

    /// Set an attribute (builder).
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add an explicit ordering dependency (builder).
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn attributes(&self) -> &IndexMap<String, AttrValue> {
        &self.attributes
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    /// Dependencies declared without an attribute reference.
    pub fn explicit_dependencies(&self) -> &IndexSet<String> {
        &self.depends_on
    }

    /// Typed references embedded in the attributes, in declaration order.
    pub fn references(&self) -> Vec<&AttrRef> {
        let mut refs = Vec::new();
        for value in self.attributes.values() {
            value.collect_refs(&mut refs);
        }
        refs
    }
}

/// Explicit directed edge: `from` is materialized after `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Reference {
    pub from: String,
    pub to: String,

    /// Documentation only
    #[serde(default)]
    pub purpose: String,
}

impl Reference {
    pub fn new(from: impl Into<String>, to: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            purpose: purpose.into(),
        }
    }
}

/// A named value surfaced to humans after apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub name: String,
    pub source_node_id: String,

    /// Bare exported attribute of the source, or text with `{{attr}}` /
    /// `{{node.attr}}` placeholders.
    pub value_expression: String,

    #[serde(default)]
    pub description: String,
}

impl OutputEntry {
    pub fn new(
        name: impl Into<String>,
        source_node_id: impl Into<String>,
        value_expression: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_node_id: source_node_id.into(),
            value_expression: value_expression.into(),
            description: description.into(),
        }
    }
}

// ============================================================================
// Graph lifecycle
// ============================================================================

/// Lifecycle of a dependency graph. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphPhase {
    Building,
    Resolved,
    Ordered,
    Emitted,
}

impl fmt::Display for GraphPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Resolved => write!(f, "resolved"),
            Self::Ordered => write!(f, "ordered"),
            Self::Emitted => write!(f, "emitted"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// A node as it appears in the emitted plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedResource {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ResourceKind,

    /// Index in topological order
    pub position: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub attributes: IndexMap<String, AttrValue>,

    /// BLAKE3 of the canonical resource description
    pub hash: String,
}

/// An output with its late-bound value expression resolved to tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOutput {
    pub name: String,
    pub source: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
}

/// The finalized, ordered, serializable description handed to an applier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Deployable unit name
    pub name: String,

    /// BLAKE3 composite over resources and outputs
    pub fingerprint: String,

    /// Resources in topological order
    pub resources: Vec<PlannedResource>,

    pub outputs: Vec<ResolvedOutput>,
}

impl Plan {
    /// Resource ids in topological order.
    pub fn order(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn resource(&self, id: &str) -> Option<&PlannedResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn output(&self, name: &str) -> Option<&ResolvedOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

// ============================================================================
// Lock file / diff
// ============================================================================

/// Record of the last emitted plan for a deployable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLock {
    pub schema: String,
    pub unit: String,
    pub generated_at: String,
    pub generator: String,
    pub fingerprint: String,
    pub resources: IndexMap<String, ResourceLock>,
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub position: usize,
    pub hash: String,
}

/// Action the applier would take on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
    pub description: String,
}

/// Changes between the last emitted plan and the current one.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub unit: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_create + self.to_update + self.to_destroy == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sp001_kind_display() {
        assert_eq!(ResourceKind::SecurityGroup.to_string(), "security_group");
        assert_eq!(ResourceKind::TaskDefinition.to_string(), "task_definition");
        assert_eq!(ResourceKind::Network.to_string(), "network");
    }

    #[test]
    fn test_sp001_kind_serde_matches_display() {
        let yaml = serde_yaml_ng::to_string(&ResourceKind::LoadBalancer).unwrap();
        assert_eq!(yaml.trim(), "load_balancer");
        let kind: ResourceKind = serde_yaml_ng::from_str("target_group").unwrap();
        assert_eq!(kind, ResourceKind::TargetGroup);
    }

    #[test]
    fn test_sp001_kind_exports() {
        assert!(ResourceKind::LoadBalancer.exports("dns_name"));
        assert!(!ResourceKind::LoadBalancer.exports("uri"));
        assert!(ResourceKind::Repository.exports("uri"));
    }

    #[test]
    fn test_sp001_attr_ref_parse() {
        let yaml = r#"
network: { ref: vpc, attr: id }
ports: [80, 443]
label: web
ratio: 0.5
nested:
  source: { ref: alb-sg, attr: id }
  note: ~
"#;
        let attrs: IndexMap<String, AttrValue> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(attrs["network"], AttrValue::reference("vpc", "id"));
        assert_eq!(attrs["ports"], AttrValue::List(vec![AttrValue::Int(80), AttrValue::Int(443)]));
        assert_eq!(attrs["label"], AttrValue::from("web"));
        assert_eq!(attrs["ratio"], AttrValue::Float(0.5));
        match &attrs["nested"] {
            AttrValue::Map(m) => {
                assert_eq!(m["source"], AttrValue::reference("alb-sg", "id"));
                assert_eq!(m["note"], AttrValue::Null);
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_sp001_map_with_extra_keys_is_not_ref() {
        let yaml = "{ ref: vpc, attr: id, extra: 1 }";
        let v: AttrValue = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(matches!(v, AttrValue::Map(_)));
    }

    #[test]
    fn test_sp001_node_references_in_order() {
        let node = ResourceNode::new("svc", ResourceKind::Service)
            .with_attr("cluster", AttrValue::reference("cluster", "arn"))
            .with_attr(
                "security_groups",
                vec![
                    AttrValue::reference("ecs-sg", "id"),
                    AttrValue::reference("extra-sg", "id"),
                ],
            )
            .with_attr("task_definition", AttrValue::reference("task", "arn"));
        let targets: Vec<_> = node.references().iter().map(|r| r.node.as_str()).collect();
        assert_eq!(targets, vec!["cluster", "ecs-sg", "extra-sg", "task"]);
    }

    #[test]
    fn test_sp001_explicit_dependencies_dedupe() {
        let node = ResourceNode::new("a", ResourceKind::Role)
            .with_dependency("b")
            .with_dependency("b");
        assert_eq!(node.explicit_dependencies().len(), 1);
    }

    #[test]
    fn test_sp001_ref_token() {
        let r = AttrRef {
            node: "alb".into(),
            attr: "dns_name".into(),
        };
        assert_eq!(r.token(), "${alb.dns_name}");
        assert_eq!(r.to_string(), "alb.dns_name");
    }

    #[test]
    fn test_sp001_try_map_strings() {
        let v = AttrValue::map([
            ("name", AttrValue::from("app-{{x}}")),
            ("port", AttrValue::from(80i64)),
        ]);
        let mapped = v
            .try_map_strings(&mut |s| Ok::<_, ()>(s.replace("{{x}}", "dev")))
            .unwrap();
        assert_eq!(
            mapped,
            AttrValue::map([
                ("name", AttrValue::from("app-dev")),
                ("port", AttrValue::from(80i64)),
            ])
        );
    }

    #[test]
    fn test_sp001_phase_ordering() {
        assert!(GraphPhase::Building < GraphPhase::Resolved);
        assert!(GraphPhase::Ordered < GraphPhase::Emitted);
        assert_eq!(GraphPhase::Ordered.to_string(), "ordered");
    }

    #[test]
    fn test_sp001_plan_action_display() {
        assert_eq!(PlanAction::Create.to_string(), "CREATE");
        assert_eq!(PlanAction::NoOp.to_string(), "NO-OP");
    }
}
