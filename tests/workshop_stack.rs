//! The demo stack file declares exactly the built-in workshop stack.

use stackplan::core::config::DeployConfig;
use stackplan::core::parser;
use stackplan::core::planner;
use stackplan::core::state;
use stackplan::core::types::{Plan, PlanAction};
use stackplan::stacks::workshop;
use std::path::Path;

fn demo(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

fn plan_from_file(config: &DeployConfig) -> Plan {
    let stack = parser::parse_stack_file(&demo("workshop.stack.yaml")).unwrap();
    let errors = parser::validate_stack(&stack);
    assert!(errors.is_empty(), "demo stack invalid: {:?}", errors);
    parser::build_graph(&stack, config).unwrap().emit().unwrap().clone()
}

#[test]
fn test_demo_matches_builtin() {
    let config = DeployConfig::load(&demo("deploy.yaml")).unwrap();
    let from_file = plan_from_file(&config);
    let builtin = workshop::declare(&config).unwrap().emit().unwrap().clone();

    assert_eq!(from_file.name, "aws-workshop-dev");
    assert_eq!(from_file.order(), builtin.order());
    assert_eq!(from_file.outputs, builtin.outputs);
    assert_eq!(from_file.fingerprint, builtin.fingerprint);
}

#[test]
fn test_demo_emit_then_plan_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let config = DeployConfig::default().with_identifier(Some("ci".into()));
    let plan = plan_from_file(&config);

    let first = planner::diff(&plan, None);
    assert_eq!(first.to_create, 12);
    assert!(first.changes.iter().all(|c| c.action == PlanAction::Create));

    state::save_lock(dir.path(), &state::lock_from_plan(&plan)).unwrap();
    let lock = state::load_lock(dir.path(), "aws-workshop-ci").unwrap();
    let second = planner::diff(&plan, lock.as_ref());
    assert!(second.is_empty());
    assert_eq!(second.unchanged, 12);
}

#[test]
fn test_demo_identifier_change_updates_named_resources() {
    let dev = plan_from_file(&DeployConfig::default().with_identifier(Some("dev".into())));
    let prod = plan_from_file(&DeployConfig::default().with_identifier(Some("prod".into())));

    let changes = planner::diff(&prod, Some(&state::lock_from_plan(&dev)));
    let updated: Vec<&str> = changes
        .changes
        .iter()
        .filter(|c| c.action == PlanAction::Update)
        .map(|c| c.resource_id.as_str())
        .collect();
    assert!(updated.contains(&"repository"));
    assert!(updated.contains(&"cluster"));
    assert!(updated.contains(&"task-definition"));
    assert!(!updated.contains(&"vpc"));
}
