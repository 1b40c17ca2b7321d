//! SP-006: Deployment configuration.
//!
//! The one place environment-specific values come from: identifier, account,
//! region, node-group toggles, and free-form template parameters. It is passed
//! explicitly to every graph builder.

use super::error::{Error, Result};
use super::types::AttrValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

const DEFAULT_IDENTIFIER: &str = "default";

/// Configuration for one deployment request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Environment identifier, suffixed onto unit and resource names
    #[serde(default)]
    pub identifier: Option<String>,

    /// Target account selector
    #[serde(default)]
    pub account: Option<String>,

    /// Target region selector
    #[serde(default)]
    pub region: Option<String>,

    /// Node groups; a group is enabled unless set to `false`
    #[serde(default)]
    pub groups: IndexMap<String, bool>,

    /// Template parameters (`{{params.key}}`)
    #[serde(default)]
    pub params: HashMap<String, serde_yaml_ng::Value>,
}

impl DeployConfig {
    /// Load a config file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&content)
    }

    /// Parse a config from a YAML string. An empty document is the default config.
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the identifier can name a state directory.
    pub fn validate(&self) -> Result<()> {
        match &self.identifier {
            Some(id) if !is_path_safe(id) => Err(Error::Usage(format!(
                "identifier '{}' must not be empty or contain '/', '\\', or '..'",
                id
            ))),
            _ => Ok(()),
        }
    }

    /// Override the identifier (e.g. from the command line).
    pub fn with_identifier(mut self, identifier: Option<String>) -> Self {
        if identifier.is_some() {
            self.identifier = identifier;
        }
        self
    }

    /// Identifier used in resource names.
    pub fn identifier(&self) -> &str {
        self.identifier.as_deref().unwrap_or(DEFAULT_IDENTIFIER)
    }

    /// Deployable unit name, suffixed with the identifier when one is set.
    pub fn unit_name(&self, base: &str) -> String {
        match &self.identifier {
            Some(id) => format!("{}-{}", base, id),
            None => base.to_string(),
        }
    }

    pub fn group_enabled(&self, group: &str) -> bool {
        self.groups.get(group).copied().unwrap_or(true)
    }

    /// Parameter table for template resolution.
    ///
    /// `identifier`, `account`, and `region` are always present; explicit
    /// params of the same name win.
    pub fn template_params(&self) -> HashMap<String, serde_yaml_ng::Value> {
        let mut params = HashMap::new();
        params.insert(
            "identifier".to_string(),
            serde_yaml_ng::Value::String(self.identifier().to_string()),
        );
        for (key, value) in [("account", &self.account), ("region", &self.region)] {
            if let Some(v) = value {
                params.insert(key.to_string(), serde_yaml_ng::Value::String(v.clone()));
            }
        }
        params.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }

    /// String parameter with a fallback.
    pub fn param_str(&self, key: &str, default: &str) -> String {
        self.params
            .get(key)
            .map(super::resolver::yaml_value_to_string)
            .unwrap_or_else(|| default.to_string())
    }

    /// Structured parameter as an attribute value, if set.
    pub fn param_attr(&self, key: &str) -> Option<AttrValue> {
        let value = self.params.get(key)?;
        match serde_yaml_ng::from_value(value.clone()) {
            Ok(attr) => Some(attr),
            Err(e) => {
                warn!(param = key, error = %e, "parameter is not an attribute value, ignoring");
                None
            }
        }
    }

    /// Integer parameter with a fallback.
    pub fn param_i64(&self, key: &str, default: i64) -> i64 {
        self.params
            .get(key)
            .and_then(serde_yaml_ng::Value::as_i64)
            .unwrap_or(default)
    }
}

/// Whether `name` is usable as a single path component.
pub fn is_path_safe(name: &str) -> bool {
    !name.is_empty() && name != "." && !name.contains(['/', '\\']) && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sp006_defaults() {
        let c = DeployConfig::default();
        assert_eq!(c.identifier(), "default");
        assert_eq!(c.unit_name("workshop"), "workshop");
        assert!(c.group_enabled("compute"));
    }

    #[test]
    fn test_sp006_parse() {
        let c = DeployConfig::parse(
            r#"
identifier: dev
region: ap-northeast-1
groups:
  service: false
params:
  cpu: 1024
  image: busybox:latest
"#,
        )
        .unwrap();
        assert_eq!(c.unit_name("workshop"), "workshop-dev");
        assert!(!c.group_enabled("service"));
        assert!(c.group_enabled("registry"));
        assert_eq!(c.param_i64("cpu", 512), 1024);
        assert_eq!(c.param_str("image", "nginx:latest"), "busybox:latest");
        assert_eq!(c.param_str("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_sp006_empty_document() {
        assert_eq!(DeployConfig::parse("  \n").unwrap(), DeployConfig::default());
    }

    #[test]
    fn test_sp006_unknown_key_rejected() {
        assert!(DeployConfig::parse("identifer: typo\n").is_err());
    }

    #[test]
    fn test_sp006_identifier_override() {
        let c = DeployConfig::parse("identifier: dev\n")
            .unwrap()
            .with_identifier(Some("prod".into()));
        assert_eq!(c.identifier(), "prod");
        let c = c.with_identifier(None);
        assert_eq!(c.identifier(), "prod");
    }

    #[test]
    fn test_sp006_template_params() {
        let mut c = DeployConfig::default();
        c.account = Some("123456789012".into());
        let p = c.template_params();
        assert_eq!(p["identifier"], serde_yaml_ng::Value::String("default".into()));
        assert_eq!(p["account"], serde_yaml_ng::Value::String("123456789012".into()));
        assert!(!p.contains_key("region"));
    }

    #[test]
    fn test_sp006_explicit_param_wins() {
        let mut c = DeployConfig::default();
        c.params.insert(
            "identifier".into(),
            serde_yaml_ng::Value::String("custom".into()),
        );
        assert_eq!(
            c.template_params()["identifier"],
            serde_yaml_ng::Value::String("custom".into())
        );
    }

    #[test]
    fn test_sp006_param_attr() {
        let c = DeployConfig::parse(
            "params:\n  env: { NODE_ENV: production, PORT: \"3000\" }\n  cmd: [sh, -c, sleep 30]\n",
        )
        .unwrap();
        assert_eq!(
            c.param_attr("env"),
            Some(AttrValue::map([
                ("NODE_ENV", AttrValue::from("production")),
                ("PORT", AttrValue::from("3000")),
            ]))
        );
        assert_eq!(
            c.param_attr("cmd"),
            Some(AttrValue::List(vec![
                AttrValue::from("sh"),
                AttrValue::from("-c"),
                AttrValue::from("sleep 30"),
            ]))
        );
        assert_eq!(c.param_attr("missing"), None);
    }

    #[test]
    fn test_sp006_path_safe_names() {
        assert!(is_path_safe("dev"));
        assert!(is_path_safe("aws-workshop-dev.1"));
        assert!(!is_path_safe(""));
        assert!(!is_path_safe("."));
        assert!(!is_path_safe("x/../../escaped"));
        assert!(!is_path_safe("a\\b"));
        assert!(!is_path_safe(".."));
    }

    #[test]
    fn test_sp006_identifier_with_separator_rejected() {
        let err = DeployConfig::parse("identifier: x/../../escaped\n").unwrap_err();
        assert_eq!(err.kind(), "UsageError");
        let c = DeployConfig::default().with_identifier(Some("../up".into()));
        assert!(c.validate().is_err());
        assert!(DeployConfig::default().validate().is_ok());
    }

    #[test]
    fn test_sp006_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        std::fs::write(&path, "identifier: stg\n").unwrap();
        assert_eq!(DeployConfig::load(&path).unwrap().identifier(), "stg");
        assert!(DeployConfig::load(&dir.path().join("missing.yaml")).is_err());
    }
}
