//! Optional `config.yaml` overrides.

use super::PasswordPattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Values read from `<config_dir>/config.yaml`; every field is optional.
///
/// ```yaml
/// grant_types:
///   query: [SELECT]
///   crud: [SELECT, UPDATE, INSERT, DELETE]
/// master_password_patterns:
///   - pattern: "([a-z][a-z0-9-]+)"
///     template: "ssm:\\1.master_password"
/// schedule_timezone: Europe/Dublin
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub grant_types: Option<BTreeMap<String, Vec<String>>>,
    pub master_password_patterns: Option<Vec<PasswordPattern>>,
    pub default_grant_type: Option<String>,
    pub engine: Option<String>,
    pub schedule_timezone: Option<chrono_tz::Tz>,
    pub max_workers: Option<usize>,
    pub auto_enable_undeclared: Option<bool>,
}

impl Settings {
    /// Loads settings from `path`, or defaults when the file does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load_optional(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        crate::declarations::load_yaml(path)
    }
}
