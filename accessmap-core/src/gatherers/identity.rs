//! Identity provider enrichment of users holding permissions.
//!
//! One lookup per login, at most `max_workers` in flight. Results are
//! restored to declaration order before issues are emitted.

use super::{Gatherer, Gathered, bounded_map};
use crate::Result;
use crate::clients::{IdentityProvider, IdpUser};
use crate::issue::{Issue, IssueType};
use crate::models::{Model, OktaModel, User, UserStatus};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const MISSING_SSH_PUBKEY: &str = "Missing SSH PubKey";
pub const NOT_FOUND: &str = "Not found in identity provider";

pub struct IdentityGatherer {
    provider: Arc<dyn IdentityProvider>,
    max_workers: usize,
}

impl IdentityGatherer {
    pub fn new(provider: Arc<dyn IdentityProvider>, max_workers: usize) -> Self {
        Self {
            provider,
            max_workers,
        }
    }
}

/// Maps a lookup result to the user fields to merge and the issue to raise.
fn classify(found: Option<IdpUser>) -> (User, Option<String>) {
    match found {
        Some(idp) if !idp.is_active() => (
            User {
                status: Some(UserStatus::Deprovisioned),
                ..User::default()
            },
            Some(format!("status={}", idp.status)),
        ),
        Some(IdpUser {
            id,
            ssh_pubkey: Some(ssh_pubkey),
            ..
        }) => (
            User {
                status: Some(UserStatus::Active),
                user_id: Some(id),
                ssh_pubkey: Some(ssh_pubkey),
                ..User::default()
            },
            None,
        ),
        Some(_) => (
            User {
                status: Some(UserStatus::MissingSshPubkey),
                ..User::default()
            },
            Some(MISSING_SSH_PUBKEY.to_string()),
        ),
        None => (
            User {
                status: Some(UserStatus::Absent),
                ..User::default()
            },
            Some(NOT_FOUND.to_string()),
        ),
    }
}

#[async_trait]
impl Gatherer for IdentityGatherer {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn gather(&self, model: &Model) -> Result<Gathered> {
        let logins: Vec<String> = model
            .logins_in_declaration_order()
            .into_iter()
            .filter(|login| model.user(login).is_some_and(User::has_permissions))
            .collect();

        tracing::info!(
            "Checking {} users against {}",
            logins.len(),
            model.okta.organization.as_deref().unwrap_or("identity provider")
        );

        let outcomes = bounded_map(logins, self.max_workers, |login| async move {
            let outcome = self.provider.find_user(&login).await;
            (login, outcome)
        })
        .await;

        let mut users = BTreeMap::new();
        let mut issues = Vec::new();
        for (login, outcome) in outcomes {
            match outcome {
                Ok(found) => {
                    let (user, problem) = classify(found);
                    let status = user.status.map(|s| s.to_string()).unwrap_or_default();
                    match problem {
                        Some(message) => {
                            tracing::warn!("  {} .. {}", login, status);
                            issues.push(Issue::error(IssueType::User, login.as_str(), message));
                        }
                        None => tracing::info!("  {} .. {}", login, status),
                    }
                    users.insert(login, user);
                }
                Err(e) => {
                    tracing::warn!("  {} .. lookup failed: {}", login, e);
                    issues.push(Issue::error(IssueType::Idp, login, e.to_string()));
                }
            }
        }

        let delta = Model {
            okta: OktaModel {
                users: Some(users),
                ..OktaModel::default()
            },
            ..Model::default()
        };
        Ok(Gathered::new(delta, issues))
    }
}
