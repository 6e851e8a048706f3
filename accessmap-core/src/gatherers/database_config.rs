//! Declared databases of one region.

use super::{Gatherer, Gathered};
use crate::Result;
use crate::declarations::DatabaseDeclaration;
use crate::issue::{Issue, IssueType};
use crate::models::{Database, DbStatus, Model, db_uid};
use crate::resolver::MasterPasswordResolver;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct DatabaseConfigGatherer {
    region: String,
    declarations: Vec<DatabaseDeclaration>,
    resolver: Arc<MasterPasswordResolver>,
}

impl DatabaseConfigGatherer {
    pub fn new(
        region: impl Into<String>,
        declarations: Vec<DatabaseDeclaration>,
        resolver: Arc<MasterPasswordResolver>,
    ) -> Self {
        Self {
            region: region.into(),
            declarations,
            resolver,
        }
    }
}

#[async_trait]
impl Gatherer for DatabaseConfigGatherer {
    fn name(&self) -> &'static str {
        "database-config"
    }

    async fn gather(&self, _model: &Model) -> Result<Gathered> {
        let mut issues = Vec::new();
        let mut databases = BTreeMap::new();

        for declared in &self.declarations {
            let uid = db_uid(&self.region, &declared.id);

            if !declared.enabled {
                databases.insert(
                    uid,
                    Database {
                        status: Some(DbStatus::Disabled),
                        ..Database::default()
                    },
                );
                continue;
            }

            match self
                .resolver
                .resolve(&declared.id, declared.master_password.as_deref())
                .await
            {
                Ok(resolved) => {
                    databases.insert(
                        uid,
                        Database {
                            status: Some(DbStatus::Enabled),
                            master_password: Some(resolved.value),
                            password_age: resolved.age_days,
                            permissions: Some(BTreeMap::new()),
                            ..Database::default()
                        },
                    );
                }
                Err(e) => {
                    tracing::debug!("Cannot resolve master password of {}: {}", uid, e);
                    issues.push(Issue::error(IssueType::Db, uid, e.to_string()));
                }
            }
        }

        tracing::debug!(
            "Declared {} databases in {}",
            databases.len(),
            self.region
        );
        Ok(Gathered::new(Model::with_databases(databases), issues))
    }
}
