//! SP-013: Lock file management — load, save (atomic), path derivation.

use super::config::is_path_safe;
use super::error::{Error, Result};
use super::types::{Plan, PlanLock, ResourceLock};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Derive the lock file path for a deployable unit within the state directory.
pub fn lock_file_path(state_dir: &Path, unit: &str) -> PathBuf {
    state_dir.join(unit).join("plan.lock.yaml")
}

/// Lock path for a unit, refusing names that would leave the state directory.
fn checked_lock_path(state_dir: &Path, unit: &str) -> Result<PathBuf> {
    if !is_path_safe(unit) {
        return Err(Error::Usage(format!(
            "unit name '{}' cannot be used as a state directory",
            unit
        )));
    }
    Ok(lock_file_path(state_dir, unit))
}

/// Load the lock file for a unit. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, unit: &str) -> Result<Option<PlanLock>> {
    let path = checked_lock_path(state_dir, unit)?;
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    let lock: PlanLock = serde_yaml_ng::from_str(&content)?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &PlanLock) -> Result<PathBuf> {
    let path = checked_lock_path(state_dir, &lock.unit)?;
    let yaml = serde_yaml_ng::to_string(lock)?;
    write_atomic(&path, &yaml)?;
    debug!(path = %path.display(), "lock saved");
    Ok(path)
}

/// Write a file via a sibling temp file and rename, creating parents.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, content).map_err(|e| Error::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Record an emitted plan as the unit's lock.
pub fn lock_from_plan(plan: &Plan) -> PlanLock {
    PlanLock {
        schema: "1.0".to_string(),
        unit: plan.name.clone(),
        generated_at: now_iso8601(),
        generator: format!("stackplan {}", env!("CARGO_PKG_VERSION")),
        fingerprint: plan.fingerprint.clone(),
        resources: plan
            .resources
            .iter()
            .map(|r| {
                (
                    r.id.clone(),
                    ResourceLock {
                        kind: r.kind,
                        position: r.position,
                        hash: r.hash.clone(),
                    },
                )
            })
            .collect(),
        outputs: plan
            .outputs
            .iter()
            .map(|o| (o.name.clone(), o.value.clone()))
            .collect(),
    }
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_utc(secs)
}

fn format_utc(secs: u64) -> String {
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let (hours, minutes, seconds) = (time_secs / 3600, (time_secs % 3600) / 60, time_secs % 60);

    let mut year = 1970u64;
    let mut remaining = days;
    loop {
        let year_days = if is_leap(year) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        year += 1;
    }
    let feb = if is_leap(year) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 1;
    for md in month_days {
        if remaining < md {
            break;
        }
        remaining -= md;
        month += 1;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        remaining + 1,
        hours,
        minutes,
        seconds
    )
}

fn is_leap(y: u64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceKind;

    fn make_lock() -> PlanLock {
        let mut resources = indexmap::IndexMap::new();
        resources.insert(
            "vpc".to_string(),
            ResourceLock {
                kind: ResourceKind::Network,
                position: 0,
                hash: "blake3:abc123".to_string(),
            },
        );
        PlanLock {
            schema: "1.0".to_string(),
            unit: "workshop-dev".to_string(),
            generated_at: "2026-02-16T14:00:00Z".to_string(),
            generator: "stackplan 0.3.0".to_string(),
            fingerprint: "blake3:fff".to_string(),
            resources,
            outputs: indexmap::IndexMap::new(),
        }
    }

    #[test]
    fn test_sp013_lock_file_path() {
        let p = lock_file_path(Path::new("/state"), "workshop-dev");
        assert_eq!(p, PathBuf::from("/state/workshop-dev/plan.lock.yaml"));
    }

    #[test]
    fn test_sp013_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_lock(dir.path(), &make_lock()).unwrap();
        assert_eq!(path, lock_file_path(dir.path(), "workshop-dev"));

        let loaded = load_lock(dir.path(), "workshop-dev").unwrap().unwrap();
        assert_eq!(loaded.unit, "workshop-dev");
        assert_eq!(loaded.resources["vpc"].kind, ResourceKind::Network);
        assert_eq!(loaded.fingerprint, "blake3:fff");
    }

    #[test]
    fn test_sp013_load_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_lock(dir.path(), "ghost").unwrap().is_none());
    }

    #[test]
    fn test_sp013_load_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_file_path(dir.path(), "bad");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "resources: [not, a, map").unwrap();
        assert_eq!(load_lock(dir.path(), "bad").unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn test_sp013_unit_cannot_escape_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let mut lock = make_lock();
        lock.unit = "web-x/../../escaped".to_string();
        let err = save_lock(&state, &lock).unwrap_err();
        assert_eq!(err.kind(), "UsageError");
        assert!(!dir.path().join("escaped").exists());
        assert!(load_lock(&state, "../escaped").is_err());
    }

    #[test]
    fn test_sp013_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();

        let tmp = dir.path().join("workshop-dev").join("plan.lock.yaml.tmp");
        assert!(!tmp.exists());
        assert!(lock_file_path(dir.path(), "workshop-dev").exists());
    }

    #[test]
    fn test_sp013_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("plan.yaml");
        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.path().join("out").join("plan.yaml.tmp").exists());
    }

    #[test]
    fn test_sp013_lock_from_plan() {
        let mut g = crate::core::graph::DependencyGraph::new("web");
        g.add_node(
            crate::core::types::ResourceNode::new("vpc", ResourceKind::Network)
                .with_attr("cidr", "10.0.0.0/16"),
        )
        .unwrap();
        g.add_output(crate::core::types::OutputEntry::new("VpcId", "vpc", "id", ""))
            .unwrap();
        let plan = g.emit().unwrap();
        let lock = lock_from_plan(plan);
        assert_eq!(lock.unit, "web");
        assert_eq!(lock.fingerprint, plan.fingerprint);
        assert_eq!(lock.resources["vpc"].hash, plan.resources[0].hash);
        assert_eq!(lock.outputs["VpcId"], "${vpc.id}");
        assert!(lock.generator.starts_with("stackplan "));
    }

    #[test]
    fn test_sp013_format_utc() {
        assert_eq!(format_utc(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_utc(951_782_400), "2000-02-29T00:00:00Z");
        assert_eq!(format_utc(1_771_250_400), "2026-02-16T14:00:00Z");
        assert!(now_iso8601().ends_with('Z'));
    }
}
