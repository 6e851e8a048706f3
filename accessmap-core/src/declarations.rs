//! Declarative input records and their YAML loading.
//!
//! Layout of a configuration directory:
//!
//! ```text
//! <config_dir>/
//!   config.yaml            optional settings
//!   <region>/databases.yaml
//!   users.yaml
//!   services.yaml          optional
//!   applications.yaml      optional
//! ```
//!
//! Reading or parsing failures here are fatal for the run.

use crate::error::AccessMapError;
use crate::schedule::ScheduleRule;
use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

pub const DATABASES_FILE: &str = "databases.yaml";
pub const USERS_FILE: &str = "users.yaml";
pub const SERVICES_FILE: &str = "services.yaml";
pub const APPLICATIONS_FILE: &str = "applications.yaml";
pub const SETTINGS_FILE: &str = "config.yaml";

/// A database intended to exist in one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDeclaration {
    pub id: String,
    #[serde(default = "enabled_by_default", deserialize_with = "flexible_bool")]
    pub enabled: bool,
    /// Inline value, `ssm:` reference, or a value matched by the pattern table
    #[serde(default)]
    pub master_password: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

/// A user and the access they are declared to have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDeclaration {
    pub login: String,
    #[serde(default)]
    pub default_grant_type: Option<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionDeclaration>,
    #[serde(default)]
    pub schedule: Vec<ScheduleRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDeclaration {
    /// `region/id`, bare id, or glob pattern such as `*`
    pub db: String,
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub db_names: Option<Vec<String>>,
    #[serde(default)]
    pub not_valid_before: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub not_valid_after: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesDeclaration {
    #[serde(default)]
    pub glue_connections: Vec<GlueConnectionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlueConnectionDeclaration {
    pub db: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub db_names: Option<Vec<String>>,
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub physical_connection_requirements: Option<PlacementDeclaration>,
}

/// Partially specified placement; missing fields default to the database's.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementDeclaration {
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub security_group_id_list: Option<Vec<String>>,
    #[serde(default)]
    pub subnet_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDeclaration {
    pub name: String,
    #[serde(default)]
    pub databases: Vec<String>,
}

/// Every declaration file of a configuration directory.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    /// Per-region database declarations, in region order
    pub databases: Vec<(String, Vec<DatabaseDeclaration>)>,
    pub users: Vec<UserDeclaration>,
    pub services: Option<ServicesDeclaration>,
    pub applications: Option<Vec<ApplicationDeclaration>>,
}

impl Declarations {
    /// Loads all declarations below `config_dir`.
    ///
    /// # Errors
    /// Returns error if a required file is missing or any file is malformed
    pub fn load(config_dir: &Path) -> crate::Result<Self> {
        let regions = discover_regions(config_dir)?;
        tracing::debug!("Discovered regions: {:?}", regions);

        let mut databases = Vec::with_capacity(regions.len());
        for region in regions {
            let path = config_dir.join(&region).join(DATABASES_FILE);
            databases.push((region, load_yaml(&path)?));
        }

        let users = load_yaml(&config_dir.join(USERS_FILE))?;
        let services = load_optional_yaml(&config_dir.join(SERVICES_FILE))?;
        let applications = load_optional_yaml(&config_dir.join(APPLICATIONS_FILE))?;

        Ok(Self {
            databases,
            users,
            services,
            applications,
        })
    }

    pub fn regions(&self) -> Vec<String> {
        self.databases.iter().map(|(region, _)| region.clone()).collect()
    }
}

/// Finds every region directory that holds a `databases.yaml`, sorted by name.
///
/// # Errors
/// Returns error if the directory cannot be listed
pub fn discover_regions(config_dir: &Path) -> crate::Result<Vec<String>> {
    let entries = std::fs::read_dir(config_dir).map_err(|e| {
        AccessMapError::io(format!("listing {}", config_dir.display()), e)
    })?;

    let mut regions = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| AccessMapError::io(format!("listing {}", config_dir.display()), e))?;
        let path: PathBuf = entry.path();
        if path.is_dir()
            && path.join(DATABASES_FILE).is_file()
            && let Some(name) = path.file_name().and_then(|n| n.to_str())
        {
            regions.push(name.to_string());
        }
    }
    regions.sort();
    Ok(regions)
}

/// Reads and parses one YAML document. An empty document yields `T::default()`.
///
/// # Errors
/// Returns error if the file cannot be read or does not match `T`
pub fn load_yaml<T>(path: &Path) -> crate::Result<T>
where
    T: DeserializeOwned + Default,
{
    let text = std::fs::read_to_string(path)
        .map_err(|e| AccessMapError::io(format!("reading {}", path.display()), e))?;
    parse_yaml(&text, &path.display().to_string())
}

fn load_optional_yaml<T>(path: &Path) -> crate::Result<Option<T>>
where
    T: DeserializeOwned + Default,
{
    if path.exists() {
        load_yaml(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Parses a YAML document; `origin` names it in error messages.
///
/// # Errors
/// Returns error if the text does not match `T`
pub fn parse_yaml<T>(text: &str, origin: &str) -> crate::Result<T>
where
    T: DeserializeOwned + Default,
{
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str::<Option<T>>(text)
        .map(Option::unwrap_or_default)
        .map_err(|e| AccessMapError::declaration(origin.to_string(), e))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    String(String),
}

/// Accepts YAML booleans as well as `yes`/`no`, `on`/`off`, `1`/`0` strings.
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(value) => Ok(value),
        BoolOrString::String(value) => match value.to_ascii_lowercase().as_str() {
            "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
            "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid truth value '{}'",
                other
            ))),
        },
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Accepts a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<OneOrMany>::deserialize(deserializer)?.map(|value| match value {
            OneOrMany::One(name) => vec![name],
            OneOrMany::Many(names) => names,
        }),
    )
}
