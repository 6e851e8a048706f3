//! Typed desired-state model.
//!
//! The model is a namespaced tree (`aws`, `okta`, `applications`, `job`) of
//! records whose fields are all optional, so the same types describe both the
//! accumulated model and the delta a gatherer returns. Deltas are folded in
//! with [`Merge`](crate::merge::Merge).
//!
//! The model is rebuilt from scratch on every run and never persisted here.

use crate::merge::{Merge, merge_fields, merge_leaf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Maximum length of a MySQL account name.
pub const MAX_DB_USERNAME_LENGTH: usize = 32;

/// Lifecycle state of a database, ordered so it doubles as an access threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbStatus {
    Absent,
    Disabled,
    Enabled,
    Accessible,
}

impl DbStatus {
    /// Minimum status for an IAM database role to be granted.
    pub const IAM_ROLE_THRESHOLD: Self = Self::Enabled;
    /// Minimum status for MySQL accounts to be created.
    pub const ACCOUNT_THRESHOLD: Self = Self::Accessible;
}

impl std::fmt::Display for DbStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Absent => "ABSENT",
            Self::Disabled => "DISABLED",
            Self::Enabled => "ENABLED",
            Self::Accessible => "ACCESSIBLE",
        };
        f.write_str(name)
    }
}

/// Identity provider verdict for a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Deprovisioned,
    Absent,
    MissingSshPubkey,
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Deprovisioned => "DEPROVISIONED",
            Self::Absent => "ABSENT",
            Self::MissingSshPubkey => "MISSING_SSH_PUBKEY",
        };
        f.write_str(name)
    }
}

/// Resolved master password.
///
/// # Security
/// The value is zeroed on drop and never shown by `Debug`. It is serialized
/// as plain text because the provisioning layer consumes it.
#[derive(Clone)]
pub struct MasterPassword(Zeroizing<String>);

impl MasterPassword {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for MasterPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterPassword(****)")
    }
}

impl PartialEq for MasterPassword {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for MasterPassword {}

impl Serialize for MasterPassword {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for MasterPassword {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

/// Access granted to one login on one database (or one database to one login).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Target schema names, ordered and de-duplicated
    pub db_names: Vec<String>,
    pub grant_type: String,
}

/// Network placement of a service connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalConnectionRequirements {
    pub availability_zone: String,
    pub security_group_id_list: Vec<String>,
    pub subnet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlueConnection {
    pub db_names: Vec<String>,
    pub grant_type: String,
    pub physical_connection_requirements: PhysicalConnectionRequirements,
}

merge_leaf!(
    DbStatus,
    UserStatus,
    MasterPassword,
    Endpoint,
    Permission,
    PhysicalConnectionRequirements,
    GlueConnection,
);

/// A database instance, keyed by `region/db_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DbStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_password: Option<MasterPassword>,
    /// Days since the master password was last rotated, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_age: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    /// Reverse index of [`User::permissions`], keyed by login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeMap<String, Permission>>,
}

merge_fields!(Database {
    status,
    master_password,
    password_age,
    db_name,
    master_username,
    resource_id,
    endpoint,
    availability_zone,
    security_group_ids,
    subnet_id,
    permissions,
});

impl Database {
    /// Status used for threshold checks; a record without status counts as absent.
    pub fn effective_status(&self) -> DbStatus {
        self.status.unwrap_or(DbStatus::Absent)
    }

    /// Placement of the instance, when the inventory supplied all of it.
    pub fn placement(&self) -> Option<PhysicalConnectionRequirements> {
        Some(PhysicalConnectionRequirements {
            availability_zone: self.availability_zone.clone()?,
            security_group_id_list: self.security_group_ids.clone()?,
            subnet_id: self.subnet_id.clone()?,
        })
    }
}

/// A user, keyed by login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeMap<String, Permission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_pubkey: Option<String>,
}

merge_fields!(User {
    db_username,
    permissions,
    status,
    user_id,
    ssh_pubkey,
});

impl User {
    pub fn has_permissions(&self) -> bool {
        self.permissions.as_ref().is_some_and(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<String>>,
    /// Set when exactly one region is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub databases: Option<BTreeMap<String, Database>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glue_connections: Option<BTreeMap<String, GlueConnection>>,
}

merge_fields!(AwsModel {
    regions,
    single_region,
    account,
    databases,
    glue_connections,
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OktaModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<BTreeMap<String, User>>,
    /// Logins in declaration order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_logins: Option<Vec<String>>,
}

merge_fields!(OktaModel {
    organization,
    users,
    declared_logins,
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobModel {
    /// Nearest future instant a scheduled access change becomes due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_transition: Option<DateTime<Utc>>,
}

merge_fields!(JobModel { next_transition });

/// The desired-state model, also used as the delta type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub aws: AwsModel,
    #[serde(default)]
    pub okta: OktaModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applications: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub job: JobModel,
}

merge_fields!(Model {
    aws,
    okta,
    applications,
    job,
});

impl Model {
    /// Builds a delta that only carries databases.
    pub fn with_databases(databases: BTreeMap<String, Database>) -> Self {
        Self {
            aws: AwsModel {
                databases: Some(databases),
                ..AwsModel::default()
            },
            ..Self::default()
        }
    }

    /// Iterates over all known databases in uid order.
    pub fn databases(&self) -> impl Iterator<Item = (&String, &Database)> {
        self.aws.databases.iter().flatten()
    }

    pub fn database(&self, uid: &str) -> Option<&Database> {
        self.aws.databases.as_ref()?.get(uid)
    }

    /// Uids of databases at or above `threshold`.
    pub fn database_uids_at_least(&self, threshold: DbStatus) -> Vec<String> {
        self.databases()
            .filter(|(_, db)| db.effective_status() >= threshold)
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    pub fn user(&self, login: &str) -> Option<&User> {
        self.okta.users.as_ref()?.get(login)
    }

    /// Logins in declaration order, falling back to key order for users that
    /// were never declared.
    pub fn logins_in_declaration_order(&self) -> Vec<String> {
        let Some(users) = self.okta.users.as_ref() else {
            return Vec::new();
        };
        let mut logins: Vec<String> = self
            .okta
            .declared_logins
            .iter()
            .flatten()
            .filter(|login| users.contains_key(*login))
            .cloned()
            .collect();
        for login in users.keys() {
            if !logins.contains(login) {
                logins.push(login.clone());
            }
        }
        logins
    }

    /// Folds a gatherer delta into this model.
    pub fn apply(&mut self, delta: Self) {
        self.merge(delta);
    }
}

/// Builds a database uid from its region and instance identifier.
pub fn db_uid(region: &str, db_id: &str) -> String {
    format!("{}/{}", region, db_id)
}

/// Splits a database uid into `(region, db_id)`.
pub fn split_db_uid(uid: &str) -> Option<(&str, &str)> {
    uid.split_once('/')
}

/// Derives the MySQL account name from a login (hard prefix cut).
pub fn db_username_for(login: &str) -> String {
    login.chars().take(MAX_DB_USERNAME_LENGTH).collect()
}
