//! Declared applications and the databases they use.

use super::{Gatherer, Gathered};
use crate::Result;
use crate::declarations::ApplicationDeclaration;
use crate::issue::{Issue, IssueType};
use crate::models::{DbStatus, Model};
use crate::wildcard;
use async_trait::async_trait;
use std::collections::BTreeMap;

pub struct ApplicationsGatherer {
    declarations: Vec<ApplicationDeclaration>,
}

impl ApplicationsGatherer {
    pub fn new(declarations: Vec<ApplicationDeclaration>) -> Self {
        Self { declarations }
    }
}

#[async_trait]
impl Gatherer for ApplicationsGatherer {
    fn name(&self) -> &'static str {
        "applications"
    }

    async fn gather(&self, model: &Model) -> Result<Gathered> {
        let candidates = model.database_uids_at_least(DbStatus::IAM_ROLE_THRESHOLD);
        let single_region = model.aws.single_region.as_deref();

        let mut applications = BTreeMap::new();
        let mut issues = Vec::new();

        'apps: for app in &self.declarations {
            let mut uids: Vec<String> = Vec::new();
            for reference in &app.databases {
                let reference = wildcard::qualify(reference, single_region);
                let matched = wildcard::expand(&reference, &candidates);
                if matched.is_empty() {
                    issues.push(Issue::error(
                        IssueType::App,
                        app.name.as_str(),
                        format!("Not existing and enabled DB instance reference '{}'", reference),
                    ));
                    continue 'apps;
                }
                for uid in matched {
                    if !uids.contains(&uid) {
                        uids.push(uid);
                    }
                }
            }
            applications.insert(app.name.clone(), uids);
        }

        let delta = Model {
            applications: Some(applications),
            ..Model::default()
        };
        Ok(Gathered::new(delta, issues))
    }
}
