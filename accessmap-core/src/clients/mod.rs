//! Interfaces to the external systems the gatherers read from.
//!
//! Each collaborator sits behind an object-safe trait so gatherers can be
//! driven by real backends or by in-memory fakes:
//! - [`SecretStore`]: indirect master password storage
//! - [`AccountIdentity`]: the cloud account the run is scoped to
//! - [`InventoryClient`]: live database instances per region
//! - [`IdentityProvider`]: user directory lookups
//! - [`AccessProbe`]: direct database connectivity check
//!
//! # Module Structure
//! - `okta`: Okta-compatible identity provider over HTTP
//! - `aws`: STS, RDS, SSM and S3 backends (feature `aws`)
//! - `mysql`: MySQL access probe (feature `mysql`)
//!
//! All implementations own their timeouts. A returned `Err` is a transport
//! failure; "does not exist" is always expressed through `Ok(None)` or an
//! empty list.

use crate::Result;
use crate::error::AccessMapError;
use crate::models::{Endpoint, MasterPassword};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

pub mod okta;

#[cfg(feature = "aws")]
pub mod aws;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use okta::OktaClient;

/// A value read from the secret store.
#[derive(Clone)]
pub struct SecretValue {
    pub value: Zeroizing<String>,
    /// When the value was last written, if the store tracks it
    pub last_modified: Option<DateTime<Utc>>,
}

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretValue")
            .field("value", &"****")
            .field("last_modified", &self.last_modified)
            .finish()
    }
}

/// Read-only access to the secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetches and decrypts the value stored at `path`.
    ///
    /// # Errors
    /// Returns error only on transport failure; a missing entry is `Ok(None)`
    async fn get(&self, path: &str) -> Result<Option<SecretValue>>;

    /// Reads `property` from the properties document stored at `bucket/key`.
    ///
    /// The value carries the document's last-modified time.
    ///
    /// # Errors
    /// Returns error on transport failure, or if this store holds no
    /// documents; a missing document or property is `Ok(None)`
    async fn get_property(
        &self,
        bucket: &str,
        _key: &str,
        _property: &str,
    ) -> Result<Option<SecretValue>> {
        Err(AccessMapError::unsupported_feature(
            format!("property documents (bucket '{}')", bucket),
            "use an ssm: reference or a store with document support",
        ))
    }
}

/// Looks up a top-level `name = value` entry in a properties document.
///
/// Blank lines and `#` comments are skipped and lookup stops at the first
/// `[section]` header. Quoted values are taken verbatim; unquoted values end
/// at an inline `#` comment.
pub fn property_value(document: &str, name: &str) -> Option<String> {
    for line in document.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            return None;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != name {
            continue;
        }

        let value = value.trim();
        let quoted = ['"', '\'']
            .iter()
            .find_map(|quote| value.strip_prefix(*quote)?.strip_suffix(*quote));
        return Some(match quoted {
            Some(inner) => inner.to_string(),
            None => value.split_once('#').map_or(value, |(v, _)| v).trim_end().to_string(),
        });
    }
    None
}

/// Identity of the cloud account the credentials belong to.
#[async_trait]
pub trait AccountIdentity: Send + Sync {
    /// # Errors
    /// Returns error if the identity service cannot be reached
    async fn account_id(&self) -> Result<String>;
}

/// A live database instance as reported by the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub engine: String,
    /// Initial schema name
    pub db_name: Option<String>,
    pub master_username: Option<String>,
    pub resource_id: Option<String>,
    pub endpoint: Option<Endpoint>,
    pub availability_zone: Option<String>,
    /// Active security groups only
    pub security_group_ids: Vec<String>,
    /// First active subnet in the instance's availability zone
    pub subnet_id: Option<String>,
}

/// Lists live database instances.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Lists every instance in `region`, whatever its engine.
    ///
    /// # Errors
    /// Returns error if the inventory cannot be reached
    async fn list_instances(&self, region: &str) -> Result<Vec<Instance>>;
}

/// A user record found in the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpUser {
    pub id: String,
    /// Raw provider status, `ACTIVE` for usable accounts
    pub status: String,
    pub ssh_pubkey: Option<String>,
}

impl IdpUser {
    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }
}

/// Looks users up by login.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// # Errors
    /// Returns error on transport failure; an unknown login is `Ok(None)`
    async fn find_user(&self, login: &str) -> Result<Option<IdpUser>>;
}

/// Connection target for an access probe.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub endpoint: Endpoint,
    pub username: String,
    pub password: MasterPassword,
    pub db_name: Option<String>,
}

/// Checks that a database accepts its master credentials.
#[async_trait]
pub trait AccessProbe: Send + Sync {
    /// Connects and returns the server version.
    ///
    /// # Errors
    /// Returns error if the connection or the version query fails
    async fn probe(&self, target: &ProbeTarget) -> Result<String>;
}
