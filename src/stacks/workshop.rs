//! SP-007: Built-in workshop stack — a load-balanced container service.
//!
//! Network and load balancer are always declared. The `registry`, `compute`,
//! and `service` groups add the image repository, the Fargate cluster with its
//! task definition, and the running service. The service needs the compute
//! group, so disabling `compute` drops it too.

use crate::core::config::DeployConfig;
use crate::core::error::GraphError;
use crate::core::graph::DependencyGraph;
use crate::core::types::{AttrValue, OutputEntry, Reference, ResourceKind, ResourceNode};
use tracing::debug;

pub const NAME: &str = "aws-workshop";

pub const GROUP_REGISTRY: &str = "registry";
pub const GROUP_COMPUTE: &str = "compute";
pub const GROUP_SERVICE: &str = "service";

const CONTAINER_NAME: &str = "app";

/// Optional container settings: (container key, parameter name).
const CONTAINER_PARAMS: [(&str, &str); 6] = [
    ("environment", "container_environment"),
    ("command", "container_command"),
    ("health_check", "container_health_check"),
    ("memory_reservation", "container_memory_reservation"),
    ("memory_limit", "container_memory_limit"),
    ("essential", "container_essential"),
];

fn r(node: &str, attr: &str) -> AttrValue {
    AttrValue::reference(node, attr)
}

fn ingress(port: i64, source: AttrValue, description: &str) -> AttrValue {
    AttrValue::map([
        ("protocol", AttrValue::from("tcp")),
        ("port", AttrValue::Int(port)),
        ("source", source),
        ("description", AttrValue::from(description)),
    ])
}

/// Declare the workshop stack for one deployment request.
pub fn declare(config: &DeployConfig) -> Result<DependencyGraph, GraphError> {
    let id = config.identifier();
    let registry = config.group_enabled(GROUP_REGISTRY);
    let compute = config.group_enabled(GROUP_COMPUTE);
    let service = compute && config.group_enabled(GROUP_SERVICE);
    debug!(registry, compute, service, "workshop node groups");

    let container_port = config.param_i64("container_port", 80);
    let mut g = DependencyGraph::new(config.unit_name(NAME));

    // ========================================================================
    // Network
    // ========================================================================

    g.add_node(
        ResourceNode::new("vpc", ResourceKind::Network)
            .with_attr("cidr", "10.0.0.0/16")
            .with_attr("max_azs", 2)
            .with_attr("enable_dns_hostnames", true)
            .with_attr("enable_dns_support", true)
            .with_attr(
                "subnets",
                vec![
                    AttrValue::map([
                        ("name", AttrValue::from("PublicSubnet")),
                        ("type", AttrValue::from("public")),
                        ("cidr_mask", AttrValue::Int(24)),
                    ]),
                    AttrValue::map([
                        ("name", AttrValue::from("PrivateSubnet")),
                        ("type", AttrValue::from("private_with_egress")),
                        ("cidr_mask", AttrValue::Int(24)),
                    ]),
                ],
            ),
    )?;

    g.add_node(
        ResourceNode::new("alb-security-group", ResourceKind::SecurityGroup)
            .with_attr("network", r("vpc", "id"))
            .with_attr("description", "Security group for Application Load Balancer")
            .with_attr("allow_all_outbound", true)
            .with_attr(
                "ingress",
                vec![
                    ingress(80, "0.0.0.0/0".into(), "Allow HTTP traffic"),
                    ingress(443, "0.0.0.0/0".into(), "Allow HTTPS traffic"),
                ],
            ),
    )?;

    g.add_node(
        ResourceNode::new("ecs-security-group", ResourceKind::SecurityGroup)
            .with_attr("network", r("vpc", "id"))
            .with_attr("description", "Security group for ECS containers")
            .with_attr("allow_all_outbound", true)
            .with_attr(
                "ingress",
                vec![ingress(
                    container_port,
                    r("alb-security-group", "id"),
                    "Allow traffic from ALB",
                )],
            ),
    )?;

    // ========================================================================
    // Load balancer
    // ========================================================================

    g.add_node(
        ResourceNode::new("alb", ResourceKind::LoadBalancer)
            .with_attr("network", r("vpc", "id"))
            .with_attr("security_group", r("alb-security-group", "id"))
            .with_attr("subnets", r("vpc", "public_subnet_ids"))
            .with_attr("internet_facing", true)
            .with_attr("deletion_protection", false),
    )?;

    g.add_node(
        ResourceNode::new("target-group", ResourceKind::TargetGroup)
            .with_attr("network", r("vpc", "id"))
            .with_attr("port", container_port)
            .with_attr("protocol", "HTTP")
            .with_attr("target_type", "ip")
            .with_attr(
                "health_check",
                AttrValue::map([
                    ("path", AttrValue::from("/")),
                    ("interval_seconds", AttrValue::Int(30)),
                    ("timeout_seconds", AttrValue::Int(5)),
                    ("healthy_threshold", AttrValue::Int(2)),
                    ("unhealthy_threshold", AttrValue::Int(3)),
                    ("healthy_http_codes", AttrValue::from("200")),
                ]),
            ),
    )?;

    g.add_node(
        ResourceNode::new("listener", ResourceKind::Listener)
            .with_attr("load_balancer", r("alb", "arn"))
            .with_attr("port", 80)
            .with_attr("protocol", "HTTP")
            .with_attr(
                "default_action",
                AttrValue::map([
                    ("type", AttrValue::from("forward")),
                    ("target_group", r("target-group", "arn")),
                ]),
            ),
    )?;

    // ========================================================================
    // Registry
    // ========================================================================

    if registry {
        g.add_node(
            ResourceNode::new("repository", ResourceKind::Repository)
                .with_attr("repository_name", format!("aws-workshop-app-{}", id))
                .with_attr("image_tag_mutability", "MUTABLE")
                .with_attr(
                    "encryption",
                    config.param_str("repository_encryption", "KMS"),
                )
                .with_attr("removal_policy", "DESTROY")
                .with_attr("empty_on_delete", true),
        )?;
    }

    // ========================================================================
    // Compute
    // ========================================================================

    if compute {
        g.add_node(
            ResourceNode::new("cluster", ResourceKind::Cluster)
                .with_attr("cluster_name", format!("aws-workshop-cluster-{}", id))
                .with_attr("network", r("vpc", "id"))
                .with_attr("capacity_providers", vec!["FARGATE", "FARGATE_SPOT"])
                .with_attr("container_insights", true),
        )?;

        let mut execution_role = ResourceNode::new("execution-role", ResourceKind::Role)
            .with_attr("assumed_by", "ecs-tasks.amazonaws.com")
            .with_attr(
                "managed_policies",
                vec!["service-role/AmazonECSTaskExecutionRolePolicy"],
            );
        if registry {
            execution_role = execution_role.with_attr("pull_from", r("repository", "arn"));
        }
        g.add_node(execution_role)?;

        g.add_node(
            ResourceNode::new("task-role", ResourceKind::Role)
                .with_attr("assumed_by", "ecs-tasks.amazonaws.com"),
        )?;

        let mut container = vec![
            ("name", AttrValue::from(CONTAINER_NAME)),
            (
                "image",
                AttrValue::from(config.param_str("image", "nginx:latest")),
            ),
            (
                "port_mappings",
                AttrValue::from(vec![AttrValue::map([
                    ("container_port", AttrValue::Int(container_port)),
                    ("protocol", AttrValue::from("tcp")),
                ])]),
            ),
            (
                "logging",
                AttrValue::map([
                    ("driver", AttrValue::from("awslogs")),
                    (
                        "stream_prefix",
                        AttrValue::from(config.param_str("log_stream_prefix", "ecs-placeholder")),
                    ),
                    ("retention_days", AttrValue::Int(30)),
                ]),
            ),
        ];
        // Unset container settings stay out of the definition.
        for (key, param) in CONTAINER_PARAMS {
            if let Some(value) = config.param_attr(param) {
                container.push((key, value));
            }
        }

        g.add_node(
            ResourceNode::new("task-definition", ResourceKind::TaskDefinition)
                .with_attr("family", format!("aws-workshop-app-family-{}", id))
                .with_attr("cpu", config.param_i64("cpu", 512))
                .with_attr("memory", config.param_i64("memory", 1024))
                .with_attr(
                    "runtime_platform",
                    AttrValue::map([
                        ("operating_system_family", AttrValue::from("LINUX")),
                        ("cpu_architecture", AttrValue::from("ARM64")),
                    ]),
                )
                .with_attr("execution_role", r("execution-role", "arn"))
                .with_attr("task_role", r("task-role", "arn"))
                .with_attr("containers", vec![AttrValue::map(container)]),
        )?;
    }

    // ========================================================================
    // Service
    // ========================================================================

    if service {
        g.add_node(
            ResourceNode::new("service", ResourceKind::Service)
                .with_attr("cluster", r("cluster", "arn"))
                .with_attr("task_definition", r("task-definition", "arn"))
                .with_attr("desired_count", config.param_i64("desired_count", 2))
                .with_attr("assign_public_ip", false)
                .with_attr("subnets", r("vpc", "private_subnet_ids"))
                .with_attr("security_groups", vec![r("ecs-security-group", "id")])
                .with_attr("health_check_grace_period_seconds", 60)
                .with_attr(
                    "load_balancers",
                    vec![AttrValue::map([
                        ("target_group", r("target-group", "arn")),
                        ("container_name", AttrValue::from(CONTAINER_NAME)),
                        ("container_port", AttrValue::Int(container_port)),
                    ])],
                ),
        )?;
        g.add_reference(Reference::new(
            "service",
            "listener",
            "targets register only once the listener forwards to the target group",
        ))?;
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    let mut outputs = vec![
        ("VpcId", "vpc", "id", "VPC ID"),
        ("PublicSubnets", "vpc", "public_subnet_ids", "Public Subnet IDs"),
        ("PrivateSubnets", "vpc", "private_subnet_ids", "Private Subnet IDs"),
        ("AlbSecurityGroupId", "alb-security-group", "id", "ALB Security Group ID"),
        ("EcsSecurityGroupId", "ecs-security-group", "id", "ECS Security Group ID"),
        ("AlbArn", "alb", "arn", "ALB ARN"),
        ("AlbDnsName", "alb", "dns_name", "ALB DNS Name (Access URL)"),
        ("TargetGroupArn", "target-group", "arn", "Target Group ARN"),
        ("AlbUrl", "alb", "http://{{dns_name}}", "Application URL (HTTP)"),
    ];
    if registry {
        outputs.extend([
            ("EcrRepositoryArn", "repository", "arn", "ECR Repository ARN"),
            ("EcrRepositoryUri", "repository", "uri", "ECR Repository URI (for docker push)"),
            ("EcrRepositoryName", "repository", "name", "ECR Repository Name"),
        ]);
    }
    if compute {
        outputs.extend([
            ("EcsClusterName", "cluster", "name", "ECS Cluster Name"),
            ("EcsClusterArn", "cluster", "arn", "ECS Cluster ARN"),
            ("TaskDefinitionArn", "task-definition", "arn", "Task Definition ARN"),
            ("TaskDefinitionFamily", "task-definition", "family", "Task Definition Family"),
        ]);
    }
    if service {
        outputs.push(("EcsServiceName", "service", "name", "ECS Service Name"));
    }
    for (name, source, value, description) in outputs {
        g.add_output(OutputEntry::new(name, source, value, description))?;
    }

    Ok(g)
}
