//! AWS backends: STS caller identity, RDS inventory, SSM parameters and S3
//! properties documents.
//!
//! Credentials come from the default provider chain. Inventory and secret
//! lookups are region scoped; each call builds a client for its region from
//! the shared SDK configuration.

use super::{
    AccountIdentity, Instance, InventoryClient, SecretStore, SecretValue, property_value,
};
use crate::Result;
use crate::error::AccessMapError;
use crate::models::Endpoint;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Shared AWS configuration for one run.
#[derive(Debug, Clone)]
pub struct AwsBackend {
    sdk_config: SdkConfig,
}

impl AwsBackend {
    /// Loads configuration from the environment and default credential chain.
    pub async fn load() -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        tracing::debug!(
            region = ?sdk_config.region(),
            "AWS configuration loaded"
        );
        Self { sdk_config }
    }

    pub fn account_identity(&self) -> StsAccountIdentity {
        StsAccountIdentity {
            client: aws_sdk_sts::Client::new(&self.sdk_config),
        }
    }

    pub fn inventory(&self) -> RdsInventory {
        RdsInventory {
            sdk_config: self.sdk_config.clone(),
        }
    }

    /// Parameter store and document bucket clients for one region.
    pub fn secret_store(&self, region: &str) -> AwsSecretStore {
        let ssm = aws_sdk_ssm::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        let s3 = aws_sdk_s3::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        AwsSecretStore {
            ssm: aws_sdk_ssm::Client::from_conf(ssm),
            s3: aws_sdk_s3::Client::from_conf(s3),
            region: region.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StsAccountIdentity {
    client: aws_sdk_sts::Client,
}

#[async_trait]
impl AccountIdentity for StsAccountIdentity {
    async fn account_id(&self) -> Result<String> {
        let output = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| AccessMapError::account_failed("caller identity", e))?;

        output
            .account()
            .map(str::to_string)
            .ok_or_else(|| {
                AccessMapError::account_failed("caller identity", "response carries no account")
            })
    }
}

#[derive(Debug, Clone)]
pub struct RdsInventory {
    sdk_config: SdkConfig,
}

#[async_trait]
impl InventoryClient for RdsInventory {
    async fn list_instances(&self, region: &str) -> Result<Vec<Instance>> {
        let config = aws_sdk_rds::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        let client = aws_sdk_rds::Client::from_conf(config);

        let mut instances = Vec::new();
        let mut pages = client.describe_db_instances().into_paginator().items().send();
        while let Some(item) = pages.next().await {
            let db = item.map_err(|e| {
                AccessMapError::inventory_failed(format!("listing instances in {}", region), e)
            })?;
            if let Some(instance) = convert_instance(&db) {
                instances.push(instance);
            }
        }

        tracing::debug!("Listed {} instances in {}", instances.len(), region);
        Ok(instances)
    }
}

fn convert_instance(db: &aws_sdk_rds::types::DbInstance) -> Option<Instance> {
    let id = db.db_instance_identifier()?.to_string();

    let mut subnets_by_az: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(group) = db.db_subnet_group() {
        for subnet in group.subnets() {
            if subnet.subnet_status() != Some("Active") {
                continue;
            }
            if let (Some(az), Some(subnet_id)) = (
                subnet.subnet_availability_zone().and_then(|az| az.name()),
                subnet.subnet_identifier(),
            ) {
                subnets_by_az
                    .entry(az.to_string())
                    .or_default()
                    .push(subnet_id.to_string());
            }
        }
    }

    // Single-AZ placement can be unreported; fall back to the first active subnet's zone
    let availability_zone = db
        .availability_zone()
        .map(str::to_string)
        .or_else(|| subnets_by_az.keys().next().cloned());
    let subnet_id = availability_zone
        .as_ref()
        .and_then(|az| subnets_by_az.get(az))
        .and_then(|ids| ids.first())
        .cloned();

    let endpoint = db.endpoint().and_then(|endpoint| {
        Some(Endpoint {
            address: endpoint.address()?.to_string(),
            port: u16::try_from(endpoint.port()?).ok()?,
        })
    });

    Some(Instance {
        id,
        engine: db.engine().unwrap_or_default().to_string(),
        db_name: db.db_name().map(str::to_string),
        master_username: db.master_username().map(str::to_string),
        resource_id: db.dbi_resource_id().map(str::to_string),
        endpoint,
        availability_zone,
        security_group_ids: db
            .vpc_security_groups()
            .iter()
            .filter(|sg| sg.status() == Some("active"))
            .filter_map(|sg| sg.vpc_security_group_id().map(str::to_string))
            .collect(),
        subnet_id,
    })
}

#[derive(Debug, Clone)]
pub struct AwsSecretStore {
    ssm: aws_sdk_ssm::Client,
    s3: aws_sdk_s3::Client,
    region: String,
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn get(&self, path: &str) -> Result<Option<SecretValue>> {
        let result = self
            .ssm
            .get_parameter()
            .name(path)
            .with_decryption(true)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|e| e.is_parameter_not_found()) =>
            {
                return Ok(None);
            }
            Err(e) => {
                return Err(AccessMapError::secret_store_failed(
                    format!("reading parameter {} in {}", path, self.region),
                    e,
                ));
            }
        };

        let Some(parameter) = output.parameter() else {
            return Ok(None);
        };
        let Some(value) = parameter.value() else {
            return Ok(None);
        };

        let mut secret = SecretValue::new(value);
        if let Some(modified) = parameter
            .last_modified_date()
            .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))
        {
            secret = secret.with_last_modified(modified);
        }
        Ok(Some(secret))
    }

    async fn get_property(
        &self,
        bucket: &str,
        key: &str,
        property: &str,
    ) -> Result<Option<SecretValue>> {
        let context = || format!("reading s3://{}/{} in {}", bucket, key, self.region);

        let result = self.s3.get_object().bucket(bucket).key(key).send().await;
        let output = match result {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None);
            }
            Err(e) => return Err(AccessMapError::secret_store_failed(context(), e)),
        };

        let last_modified = output
            .last_modified()
            .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()));
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| AccessMapError::secret_store_failed(context(), e))?
            .into_bytes();
        let document = Zeroizing::new(
            String::from_utf8(bytes.to_vec())
                .map_err(|e| AccessMapError::secret_store_failed(context(), e))?,
        );

        let Some(value) = property_value(&document, property) else {
            return Ok(None);
        };
        let mut secret = SecretValue::new(value);
        if let Some(modified) = last_modified {
            secret = secret.with_last_modified(modified);
        }
        Ok(Some(secret))
    }
}
