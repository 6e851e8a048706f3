//! Run-wide pipeline configuration.

use super::Settings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Grant type applied when a user entry does not name one.
pub const DEFAULT_GRANT_TYPE: &str = "query";

/// Grant type meaning "no access".
pub const NO_GRANT: &str = "none";

/// One row of the master password pattern table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPattern {
    /// Regular expression matched against the whole raw value
    pub pattern: String,
    /// Replacement template; `\1` or `$1` refer to capture groups
    pub template: String,
}

impl PasswordPattern {
    pub fn new(pattern: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            template: template.into(),
        }
    }
}

/// Configuration for one pipeline run.
///
/// # Example
/// ```rust
/// use accessmap_core::config::PipelineConfig;
///
/// let config = PipelineConfig::new(vec!["eu-west-2".to_string()], "acme")
///     .with_max_workers(4);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.single_region(), Some("eu-west-2"));
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Regions holding declared databases
    pub regions: Vec<String>,
    /// Identity provider organization name
    pub okta_organization: String,
    /// Upper bound on concurrent identity provider lookups and access probes
    pub max_workers: usize,
    /// Ordered master password pattern table
    pub password_patterns: Vec<PasswordPattern>,
    /// Known grant types and the privileges they stand for
    pub grant_types: BTreeMap<String, Vec<String>>,
    /// Grant type used when a user declares none
    pub default_grant_type: String,
    /// Database engine listed from the inventory
    pub engine: String,
    /// Timezone recurring schedule rules are written in
    pub schedule_timezone: chrono_tz::Tz,
    /// The run's notion of "now"
    pub reference_time: DateTime<Utc>,
    /// Resolve passwords for live but undeclared instances instead of only
    /// warning about them
    pub auto_enable_undeclared: bool,
    /// Run the database access probe stage
    pub probe_enabled: bool,
    /// Per-probe timeout
    pub probe_timeout: Duration,
    /// Timeout for every identity provider HTTP request
    pub http_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            okta_organization: String::new(),
            max_workers: 8,
            password_patterns: vec![PasswordPattern::new(
                r"([a-z][a-z0-9-]+)",
                r"ssm:\1.master_password",
            )],
            grant_types: BTreeMap::from([
                ("query".to_string(), vec!["SELECT".to_string()]),
                (
                    "crud".to_string(),
                    vec![
                        "SELECT".to_string(),
                        "UPDATE".to_string(),
                        "INSERT".to_string(),
                        "DELETE".to_string(),
                    ],
                ),
            ]),
            default_grant_type: DEFAULT_GRANT_TYPE.to_string(),
            engine: "mysql".to_string(),
            schedule_timezone: chrono_tz::UTC,
            reference_time: Utc::now(),
            auto_enable_undeclared: false,
            probe_enabled: false,
            probe_timeout: Duration::from_secs(10),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults for the given regions and organization.
    pub fn new(regions: Vec<String>, okta_organization: impl Into<String>) -> Self {
        Self {
            regions,
            okta_organization: okta_organization.into(),
            ..Default::default()
        }
    }

    /// The only configured region, if there is exactly one.
    pub fn single_region(&self) -> Option<&str> {
        match self.regions.as_slice() {
            [region] => Some(region.as_str()),
            _ => None,
        }
    }

    /// Returns true when `grant_type` is known or means "no access".
    pub fn is_known_grant_type(&self, grant_type: &str) -> bool {
        grant_type == NO_GRANT || self.grant_types.contains_key(grant_type)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid
    pub fn validate(&self) -> crate::Result<()> {
        if self.okta_organization.is_empty() {
            return Err(crate::error::AccessMapError::configuration(
                "okta organization cannot be empty",
            ));
        }

        if self.max_workers == 0 {
            return Err(crate::error::AccessMapError::configuration(
                "max_workers must be greater than 0",
            ));
        }

        if self.max_workers > 64 {
            return Err(crate::error::AccessMapError::configuration(
                "max_workers should not exceed 64",
            ));
        }

        if !self.grant_types.contains_key(&self.default_grant_type) {
            return Err(crate::error::AccessMapError::configuration(format!(
                "default grant type '{}' is not a known grant type",
                self.default_grant_type
            )));
        }

        if let Some(region) = self.regions.iter().find(|r| r.is_empty() || r.contains('/')) {
            return Err(crate::error::AccessMapError::configuration(format!(
                "invalid region name '{}'",
                region
            )));
        }

        if self.probe_timeout.is_zero() || self.http_timeout.is_zero() {
            return Err(crate::error::AccessMapError::configuration(
                "timeouts must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Applies the values present in a `config.yaml` document.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        if let Some(grant_types) = settings.grant_types {
            self.grant_types = grant_types;
        }
        if let Some(patterns) = settings.master_password_patterns {
            self.password_patterns = patterns;
        }
        if let Some(default_grant_type) = settings.default_grant_type {
            self.default_grant_type = default_grant_type;
        }
        if let Some(engine) = settings.engine {
            self.engine = engine;
        }
        if let Some(timezone) = settings.schedule_timezone {
            self.schedule_timezone = timezone;
        }
        if let Some(max_workers) = settings.max_workers {
            self.max_workers = max_workers;
        }
        if let Some(auto_enable) = settings.auto_enable_undeclared {
            self.auto_enable_undeclared = auto_enable;
        }
        self
    }

    /// Sets the maximum number of concurrent lookups.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Replaces the master password pattern table.
    pub fn with_password_patterns(mut self, patterns: Vec<PasswordPattern>) -> Self {
        self.password_patterns = patterns;
        self
    }

    /// Sets the reference instant used for schedules and password age.
    pub fn with_reference_time(mut self, reference_time: DateTime<Utc>) -> Self {
        self.reference_time = reference_time;
        self
    }

    /// Sets the timezone recurring schedule rules are evaluated in.
    pub fn with_schedule_timezone(mut self, timezone: chrono_tz::Tz) -> Self {
        self.schedule_timezone = timezone;
        self
    }

    /// Sets whether undeclared live instances are auto-enabled.
    pub fn with_auto_enable_undeclared(mut self, auto_enable: bool) -> Self {
        self.auto_enable_undeclared = auto_enable;
        self
    }

    /// Enables the database access probe stage.
    pub fn with_probe(mut self, timeout: Duration) -> Self {
        self.probe_enabled = true;
        self.probe_timeout = timeout;
        self
    }
}
