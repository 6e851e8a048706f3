//! Direct connectivity check of enabled databases.
//!
//! Every database at or above `ENABLED` that has an endpoint and a master
//! password is probed with its master credentials. A successful probe raises
//! the status to `ACCESSIBLE`.

use super::{Gatherer, Gathered, bounded_map};
use crate::Result;
use crate::clients::{AccessProbe, ProbeTarget};
use crate::error::AccessMapError;
use crate::issue::{Issue, IssueType};
use crate::models::{Database, DbStatus, Model};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct AccessProbeGatherer {
    probe: Arc<dyn AccessProbe>,
    max_workers: usize,
    timeout: Duration,
}

impl AccessProbeGatherer {
    pub fn new(probe: Arc<dyn AccessProbe>, max_workers: usize, timeout: Duration) -> Self {
        Self {
            probe,
            max_workers,
            timeout,
        }
    }

    async fn check(&self, target: ProbeTarget) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.probe.probe(&target)).await {
            Ok(result) => result,
            Err(_) => Err(AccessMapError::ProbeTimeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn probe_target(db: &Database) -> Option<ProbeTarget> {
    Some(ProbeTarget {
        endpoint: db.endpoint.clone()?,
        username: db.master_username.clone()?,
        password: db.master_password.clone()?,
        db_name: db.db_name.clone(),
    })
}

#[async_trait]
impl Gatherer for AccessProbeGatherer {
    fn name(&self) -> &'static str {
        "access-probe"
    }

    async fn gather(&self, model: &Model) -> Result<Gathered> {
        let targets: Vec<(String, ProbeTarget)> = model
            .databases()
            .filter(|(_, db)| db.effective_status() >= DbStatus::Enabled)
            .filter_map(|(uid, db)| probe_target(db).map(|target| (uid.clone(), target)))
            .collect();

        tracing::info!("Checking access to {} databases", targets.len());

        let outcomes = bounded_map(targets, self.max_workers, |(uid, target)| async move {
            let outcome = self.check(target).await;
            (uid, outcome)
        })
        .await;

        let mut databases = BTreeMap::new();
        let mut issues = Vec::new();
        for (uid, outcome) in outcomes {
            match outcome {
                Ok(version) => {
                    tracing::info!("  {} .. ACCESSIBLE ({})", uid, version);
                    databases.insert(
                        uid,
                        Database {
                            status: Some(DbStatus::Accessible),
                            ..Database::default()
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!("  {} .. {}", uid, e);
                    issues.push(Issue::error(IssueType::Db, uid, e.to_string()));
                }
            }
        }

        Ok(Gathered::new(Model::with_databases(databases), issues))
    }
}
