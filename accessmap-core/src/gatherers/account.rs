//! Run scope: cloud account, regions and identity provider organization.

use super::{Gatherer, Gathered};
use crate::Result;
use crate::clients::AccountIdentity;
use crate::config::PipelineConfig;
use crate::issue::{Issue, IssueType};
use crate::models::{AwsModel, Model, OktaModel};
use async_trait::async_trait;
use std::sync::Arc;

/// Issue id used for account lookup failures.
pub const ACCOUNT_ISSUE_ID: &str = "caller-identity";

pub struct AccountGatherer {
    identity: Arc<dyn AccountIdentity>,
    regions: Vec<String>,
    single_region: Option<String>,
    organization: String,
}

impl AccountGatherer {
    pub fn new(identity: Arc<dyn AccountIdentity>, config: &PipelineConfig) -> Self {
        Self {
            identity,
            regions: config.regions.clone(),
            single_region: config.single_region().map(str::to_string),
            organization: config.okta_organization.clone(),
        }
    }
}

#[async_trait]
impl Gatherer for AccountGatherer {
    fn name(&self) -> &'static str {
        "account"
    }

    async fn gather(&self, _model: &Model) -> Result<Gathered> {
        let mut issues = Vec::new();

        let account = match self.identity.account_id().await {
            Ok(account) => {
                tracing::info!("Running against account {}", account);
                Some(account)
            }
            Err(e) if e.is_transport() => {
                issues.push(Issue::error(
                    IssueType::Account,
                    ACCOUNT_ISSUE_ID,
                    e.to_string(),
                ));
                None
            }
            Err(e) => return Err(e),
        };

        let delta = Model {
            aws: AwsModel {
                regions: Some(self.regions.clone()),
                single_region: self.single_region.clone(),
                account,
                ..AwsModel::default()
            },
            okta: OktaModel {
                organization: Some(self.organization.clone()),
                ..OktaModel::default()
            },
            ..Model::default()
        };

        Ok(Gathered::new(delta, issues))
    }
}
