//! In-memory backends shared by the integration tests.

#![allow(dead_code)]

use accessmap_core::clients::{
    AccessProbe, AccountIdentity, IdentityProvider, IdpUser, Instance, InventoryClient,
    ProbeTarget, SecretStore, SecretValue,
};
use accessmap_core::error::AccessMapError;
use accessmap_core::models::Endpoint;
use accessmap_core::{Backends, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ACCOUNT_ID: &str = "123456789012";

pub struct FakeAccount;

#[async_trait]
impl AccountIdentity for FakeAccount {
    async fn account_id(&self) -> Result<String> {
        Ok(ACCOUNT_ID.to_string())
    }
}

/// Inventory keyed by region; regions listed in `failing` error out.
#[derive(Default)]
pub struct FakeInventory {
    pub instances: HashMap<String, Vec<Instance>>,
    pub failing: Vec<String>,
}

impl FakeInventory {
    pub fn with_instances(mut self, region: &str, ids: &[&str]) -> Self {
        self.instances
            .entry(region.to_string())
            .or_default()
            .extend(ids.iter().map(|id| mysql_instance(id)));
        self
    }

    pub fn failing(mut self, region: &str) -> Self {
        self.failing.push(region.to_string());
        self
    }
}

#[async_trait]
impl InventoryClient for FakeInventory {
    async fn list_instances(&self, region: &str) -> Result<Vec<Instance>> {
        if self.failing.iter().any(|r| r == region) {
            return Err(AccessMapError::inventory_failed(
                format!("listing instances in {}", region),
                std::io::Error::other("connection reset"),
            ));
        }
        Ok(self.instances.get(region).cloned().unwrap_or_default())
    }
}

pub fn mysql_instance(id: &str) -> Instance {
    Instance {
        id: id.to_string(),
        engine: "mysql".to_string(),
        db_name: Some(format!("db_{}", id)),
        master_username: Some("root".to_string()),
        resource_id: Some(format!("db-{}", id.to_uppercase())),
        endpoint: Some(Endpoint {
            address: format!("{}.example.internal", id),
            port: 3306,
        }),
        availability_zone: Some("eu-west-2a".to_string()),
        security_group_ids: vec!["sg-1".to_string()],
        subnet_id: Some("subnet-a".to_string()),
    }
}

/// Secret store that counts every fetch per path.
#[derive(Default)]
pub struct CountingSecretStore {
    values: HashMap<String, SecretValue>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl CountingSecretStore {
    pub fn with_value(mut self, path: &str, value: &str, modified: DateTime<Utc>) -> Self {
        self.values.insert(
            path.to_string(),
            SecretValue::new(value).with_last_modified(modified),
        );
        self
    }

    pub fn fetches(&self, path: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SecretStore for CountingSecretStore {
    async fn get(&self, path: &str) -> Result<Option<SecretValue>> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;
        Ok(self.values.get(path).cloned())
    }
}

/// Identity provider answering from a fixed directory.
#[derive(Default)]
pub struct FakeDirectory {
    users: HashMap<String, IdpUser>,
    failing: Vec<String>,
    pub lookups: AtomicUsize,
}

impl FakeDirectory {
    pub fn with_user(mut self, login: &str, status: &str, ssh_pubkey: Option<&str>) -> Self {
        self.users.insert(
            login.to_string(),
            IdpUser {
                id: format!("00u-{}", login.split('@').next().unwrap_or(login)),
                status: status.to_string(),
                ssh_pubkey: ssh_pubkey.map(str::to_string),
            },
        );
        self
    }

    pub fn failing(mut self, login: &str) -> Self {
        self.failing.push(login.to_string());
        self
    }
}

#[async_trait]
impl IdentityProvider for FakeDirectory {
    async fn find_user(&self, login: &str) -> Result<Option<IdpUser>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|l| l == login) {
            return Err(AccessMapError::IdentityProviderStatus {
                status: 500,
                context: format!("searching for {}", login),
            });
        }
        Ok(self.users.get(login).cloned())
    }
}

/// Probe that accepts every endpoint except the listed addresses.
#[derive(Default)]
pub struct FakeProbe {
    pub refusing: Vec<String>,
}

#[async_trait]
impl AccessProbe for FakeProbe {
    async fn probe(&self, target: &ProbeTarget) -> Result<String> {
        if self.refusing.contains(&target.endpoint.address) {
            return Err(AccessMapError::probe_failed(
                target.endpoint.address.clone(),
                std::io::Error::other("Access denied"),
            ));
        }
        Ok("8.0.35".to_string())
    }
}

pub fn backends(
    inventory: FakeInventory,
    store: Arc<CountingSecretStore>,
    directory: Arc<FakeDirectory>,
) -> Backends {
    Backends::new(Arc::new(FakeAccount), Arc::new(inventory), directory)
        .with_shared_secret_store(store)
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .unwrap()
        .with_timezone(&Utc)
}
