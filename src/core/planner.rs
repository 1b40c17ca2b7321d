//! SP-008: Change planning — diff an emitted plan against the last lock.

use super::types::*;

/// Compare a freshly emitted plan against the lock of the previous emit.
///
/// Resources are listed in plan order; resources only present in the lock
/// follow as destroys, in reverse lock order.
pub fn diff(plan: &Plan, lock: Option<&PlanLock>) -> ChangeSet {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for resource in &plan.resources {
        let action = determine_action(resource, lock);
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }
        changes.push(PlannedChange {
            resource_id: resource.id.clone(),
            kind: resource.kind,
            action,
            description: describe_action(resource, action),
        });
    }

    if let Some(lock) = lock {
        for (id, rl) in lock.resources.iter().rev() {
            if plan.resource(id).is_some() {
                continue;
            }
            to_destroy += 1;
            changes.push(PlannedChange {
                resource_id: id.clone(),
                kind: rl.kind,
                action: PlanAction::Destroy,
                description: format!("{}: destroy {}", id, rl.kind),
            });
        }
    }

    ChangeSet {
        unit: plan.name.clone(),
        changes,
        to_create,
        to_update,
        to_destroy,
        unchanged,
    }
}

fn determine_action(resource: &PlannedResource, lock: Option<&PlanLock>) -> PlanAction {
    match lock.and_then(|l| l.resources.get(&resource.id)) {
        None => PlanAction::Create,
        Some(rl) if rl.hash == resource.hash => PlanAction::NoOp,
        Some(_) => PlanAction::Update,
    }
}

/// Generate a human-readable description of a planned action.
fn describe_action(resource: &PlannedResource, action: PlanAction) -> String {
    let id = &resource.id;
    let attr = |key: &str| {
        resource
            .attributes
            .get(key)
            .and_then(AttrValue::as_str)
            .unwrap_or("?")
            .to_string()
    };
    match action {
        PlanAction::Create => match resource.kind {
            ResourceKind::Network => format!("{}: create network {}", id, attr("cidr")),
            ResourceKind::Repository => {
                format!("{}: create repository {}", id, attr("repository_name"))
            }
            ResourceKind::Cluster => format!("{}: create cluster {}", id, attr("cluster_name")),
            ResourceKind::TaskDefinition => {
                format!("{}: register task family {}", id, attr("family"))
            }
            ResourceKind::Role => format!("{}: create role for {}", id, attr("assumed_by")),
            kind => format!("{}: create {}", id, kind),
        },
        PlanAction::Update => format!("{}: update (definition changed)", id),
        PlanAction::Destroy => format!("{}: destroy {}", id, resource.kind),
        PlanAction::NoOp => format!("{}: no changes", id),
    }
}
