//! Declared users: permissions, validity windows and access schedules.
//!
//! Permission references resolve against databases at or above `ENABLED`.
//! A user whose declaration cannot be fully resolved is reported and left out
//! of the model entirely.
//!
//! `job.next_transition` is the earliest instant strictly after the reference
//! time at which some user's access changes: a recurring schedule rule firing
//! or a validity window opening or closing.

use super::{Gatherer, Gathered};
use crate::Result;
use crate::config::{NO_GRANT, PipelineConfig};
use crate::declarations::{PermissionDeclaration, UserDeclaration};
use crate::issue::{Issue, IssueType};
use crate::models::{
    AwsModel, Database, DbStatus, JobModel, Model, OktaModel, Permission, User, db_username_for,
};
use crate::wildcard;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub struct UsersGatherer {
    declarations: Vec<UserDeclaration>,
    config: PipelineConfig,
}

/// A successfully resolved user declaration.
struct ResolvedUser {
    permissions: BTreeMap<String, Permission>,
    transitions: Vec<DateTime<Utc>>,
}

impl UsersGatherer {
    pub fn new(declarations: Vec<UserDeclaration>, config: &PipelineConfig) -> Self {
        Self {
            declarations,
            config: config.clone(),
        }
    }

    fn check_grant_type(&self, grant_type: &str) -> std::result::Result<(), String> {
        if self.config.is_known_grant_type(grant_type) {
            Ok(())
        } else {
            Err(format!("Unknown grant type '{}'", grant_type))
        }
    }

    fn resolve_user(
        &self,
        user: &UserDeclaration,
        model: &Model,
        candidates: &[String],
    ) -> std::result::Result<ResolvedUser, String> {
        let default_grant_type = user
            .default_grant_type
            .as_deref()
            .unwrap_or(&self.config.default_grant_type);
        self.check_grant_type(default_grant_type)?;

        let mut permissions: BTreeMap<String, Permission> = BTreeMap::new();
        let mut transitions = Vec::new();

        for entry in &user.permissions {
            let reference = wildcard::qualify(&entry.db, model.aws.single_region.as_deref());
            let uids = wildcard::expand(&reference, candidates);
            if uids.is_empty() {
                return Err(format!(
                    "Not existing and enabled DB instance reference '{}'",
                    reference
                ));
            }

            let grant_type = self.effective_grant_type(entry, default_grant_type, &mut transitions)?;
            self.check_grant_type(&grant_type)?;
            if grant_type == NO_GRANT {
                continue;
            }

            for uid in uids {
                let names = entry.db_names.clone().unwrap_or_else(|| {
                    model
                        .database(&uid)
                        .and_then(|db| db.db_name.clone())
                        .into_iter()
                        .collect()
                });

                let permission = permissions.entry(uid).or_insert_with(|| Permission {
                    db_names: Vec::new(),
                    grant_type: grant_type.clone(),
                });
                for name in names {
                    if !permission.db_names.contains(&name) {
                        permission.db_names.push(name);
                    }
                }
                permission.grant_type.clone_from(&grant_type);
            }
        }

        for rule in &user.schedule {
            if !rule.is_valid() {
                return Err(format!(
                    "Invalid schedule rule {:02}:{:02}",
                    rule.hour, rule.minute
                ));
            }
        }
        transitions.extend(crate::schedule::next_occurrence(
            &user.schedule,
            self.config.reference_time,
            &self.config.schedule_timezone,
        ));

        Ok(ResolvedUser {
            permissions,
            transitions,
        })
    }

    /// Applies the entry's validity window to its grant type and records the
    /// window bounds still ahead of the reference time.
    fn effective_grant_type(
        &self,
        entry: &PermissionDeclaration,
        default_grant_type: &str,
        transitions: &mut Vec<DateTime<Utc>>,
    ) -> std::result::Result<String, String> {
        let not_before = entry.not_valid_before.map(|dt| dt.with_timezone(&Utc));
        let not_after = entry.not_valid_after.map(|dt| dt.with_timezone(&Utc));
        let granted = entry
            .grant_type
            .clone()
            .unwrap_or_else(|| default_grant_type.to_string());

        if let (Some(before), Some(after)) = (not_before, not_after)
            && after < before
        {
            return Err(format!("'{}' should precede '{}'", before, after));
        }

        let now = self.config.reference_time;
        transitions.extend(
            [not_before, not_after]
                .into_iter()
                .flatten()
                .filter(|bound| *bound > now),
        );

        let in_window = not_before.is_none_or(|before| now >= before)
            && not_after.is_none_or(|after| now <= after);
        Ok(if in_window {
            granted
        } else {
            default_grant_type.to_string()
        })
    }
}

#[async_trait]
impl Gatherer for UsersGatherer {
    fn name(&self) -> &'static str {
        "users"
    }

    async fn gather(&self, model: &Model) -> Result<Gathered> {
        let candidates = model.database_uids_at_least(DbStatus::IAM_ROLE_THRESHOLD);

        let mut users = BTreeMap::new();
        let mut databases: BTreeMap<String, Database> = BTreeMap::new();
        let mut declared_logins: Vec<String> = Vec::new();
        let mut issues = Vec::new();
        let mut next_transition = model
            .job
            .next_transition
            .filter(|existing| *existing > self.config.reference_time);

        for user in &self.declarations {
            let resolved = match self.resolve_user(user, model, &candidates) {
                Ok(resolved) => resolved,
                Err(message) => {
                    issues.push(Issue::error(IssueType::User, user.login.as_str(), message));
                    continue;
                }
            };

            for (uid, permission) in &resolved.permissions {
                databases
                    .entry(uid.clone())
                    .or_default()
                    .permissions
                    .get_or_insert_with(BTreeMap::new)
                    .insert(user.login.clone(), permission.clone());
            }

            next_transition = resolved
                .transitions
                .into_iter()
                .chain(next_transition)
                .min();

            if !declared_logins.contains(&user.login) {
                declared_logins.push(user.login.clone());
            }
            users.insert(
                user.login.clone(),
                User {
                    db_username: Some(db_username_for(&user.login)),
                    permissions: Some(resolved.permissions),
                    ..User::default()
                },
            );
        }

        if let Some(next) = next_transition {
            tracing::info!("Next access transition at {}", next);
        }

        let delta = Model {
            aws: AwsModel {
                databases: Some(databases),
                ..AwsModel::default()
            },
            okta: OktaModel {
                users: Some(users),
                declared_logins: Some(declared_logins),
                ..OktaModel::default()
            },
            job: JobModel { next_transition },
            ..Model::default()
        };
        Ok(Gathered::new(delta, issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleRule;
    use chrono::{FixedOffset, TimeZone, Weekday};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn model(single_region: Option<&str>) -> Model {
        let enabled = |name: &str| Database {
            status: Some(DbStatus::Enabled),
            db_name: Some(format!("db_{}", name)),
            permissions: Some(BTreeMap::new()),
            ..Database::default()
        };
        let mut model = Model::with_databases(BTreeMap::from([
            ("eu-west-2/blackwells".to_string(), enabled("blackwells")),
            ("eu-west-2/whsmith".to_string(), enabled("whsmith")),
            (
                "eu-west-2/foyles".to_string(),
                Database {
                    status: Some(DbStatus::Disabled),
                    ..Database::default()
                },
            ),
        ]));
        model.aws.single_region = single_region.map(str::to_string);
        model
    }

    fn user(login: &str, permissions: Vec<PermissionDeclaration>) -> UserDeclaration {
        UserDeclaration {
            login: login.to_string(),
            default_grant_type: None,
            permissions,
            schedule: Vec::new(),
        }
    }

    fn permission(db: &str) -> PermissionDeclaration {
        PermissionDeclaration {
            db: db.to_string(),
            grant_type: None,
            db_names: None,
            not_valid_before: None,
            not_valid_after: None,
        }
    }

    fn gatherer(declarations: Vec<UserDeclaration>, now: DateTime<Utc>) -> UsersGatherer {
        let config = PipelineConfig::new(vec!["eu-west-2".to_string()], "acme")
            .with_reference_time(now);
        UsersGatherer::new(declarations, &config)
    }

    #[tokio::test]
    async fn test_wildcard_grants_every_enabled_database() {
        let gathered = gatherer(vec![user("leroy.trent@acme.com", vec![permission("*")])], Utc::now())
            .gather(&model(Some("eu-west-2")))
            .await
            .unwrap();

        assert!(gathered.issues.is_empty());
        let leroy = gathered.delta.user("leroy.trent@acme.com").unwrap();
        let permissions = leroy.permissions.as_ref().unwrap();
        assert_eq!(permissions.len(), 2);
        assert_eq!(
            permissions["eu-west-2/blackwells"],
            Permission {
                db_names: vec!["db_blackwells".to_string()],
                grant_type: "query".to_string(),
            }
        );
        assert_eq!(permissions["eu-west-2/whsmith"].db_names, vec!["db_whsmith"]);

        let reverse = gathered.delta.database("eu-west-2/whsmith").unwrap();
        assert!(reverse.permissions.as_ref().unwrap().contains_key("leroy.trent@acme.com"));
    }

    #[tokio::test]
    async fn test_unresolvable_reference_drops_user() {
        let gathered = gatherer(
            vec![
                user("valerie.tennant@acme.com", vec![permission("foyles")]),
                user("leroy.trent@acme.com", vec![permission("whsmith")]),
            ],
            Utc::now(),
        )
        .gather(&model(Some("eu-west-2")))
        .await
        .unwrap();

        assert_eq!(gathered.issues.len(), 1);
        assert_eq!(gathered.issues[0].id, "valerie.tennant@acme.com");
        assert_eq!(gathered.issues[0].issue_type, IssueType::User);
        assert!(gathered.delta.user("valerie.tennant@acme.com").is_none());
        assert!(gathered.delta.user("leroy.trent@acme.com").is_some());
        assert_eq!(
            gathered.delta.okta.declared_logins,
            Some(vec!["leroy.trent@acme.com".to_string()])
        );
    }

    #[tokio::test]
    async fn test_bare_id_needs_single_region() {
        let gathered = gatherer(vec![user("a@acme.com", vec![permission("whsmith")])], Utc::now())
            .gather(&model(None))
            .await
            .unwrap();
        assert_eq!(gathered.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_accumulate_db_names_and_later_grant_wins() {
        let gathered = gatherer(
            vec![user(
                "a@acme.com",
                vec![
                    PermissionDeclaration {
                        db_names: Some(vec!["sales".to_string()]),
                        ..permission("eu-west-2/whsmith")
                    },
                    PermissionDeclaration {
                        db_names: Some(vec!["stock".to_string(), "sales".to_string()]),
                        grant_type: Some("crud".to_string()),
                        ..permission("eu-west-2/whsmith")
                    },
                ],
            )],
            Utc::now(),
        )
        .gather(&model(None))
        .await
        .unwrap();

        let user = gathered.delta.user("a@acme.com").unwrap();
        let permission = &user.permissions.as_ref().unwrap()["eu-west-2/whsmith"];
        assert_eq!(permission.db_names, vec!["sales", "stock"]);
        assert_eq!(permission.grant_type, "crud");
    }

    #[tokio::test]
    async fn test_none_and_unknown_grant_types() {
        let gathered = gatherer(
            vec![
                user(
                    "a@acme.com",
                    vec![PermissionDeclaration {
                        grant_type: Some("none".to_string()),
                        ..permission("eu-west-2/whsmith")
                    }],
                ),
                user(
                    "b@acme.com",
                    vec![PermissionDeclaration {
                        grant_type: Some("admin".to_string()),
                        ..permission("eu-west-2/whsmith")
                    }],
                ),
            ],
            Utc::now(),
        )
        .gather(&model(None))
        .await
        .unwrap();

        let a = gathered.delta.user("a@acme.com").unwrap();
        assert!(!a.has_permissions());
        assert_eq!(gathered.issues.len(), 1);
        assert_eq!(gathered.issues[0].id, "b@acme.com");
    }

    #[tokio::test]
    async fn test_validity_window() {
        let now = utc("2020-05-26T09:00:00Z");
        let tz = FixedOffset::east_opt(3600).unwrap();
        let window = |before: Option<&str>, after: Option<&str>| PermissionDeclaration {
            grant_type: Some("crud".to_string()),
            not_valid_before: before.map(|s| DateTime::parse_from_rfc3339(s).unwrap()),
            not_valid_after: after.map(|s| DateTime::parse_from_rfc3339(s).unwrap()),
            ..permission("eu-west-2/whsmith")
        };

        let gathered = gatherer(
            vec![
                user("open@acme.com", vec![window(Some("2020-05-26T09:00:00+01:00"), Some("2020-05-26T12:22:00+01:00"))]),
                user("early@acme.com", vec![window(Some("2020-05-27T09:00:00+01:00"), None)]),
                user("late@acme.com", vec![window(None, Some("2020-05-25T09:00:00+01:00"))]),
                user("inverted@acme.com", vec![window(Some("2020-05-27T09:00:00+01:00"), Some("2020-05-26T09:00:00+01:00"))]),
            ],
            now,
        )
        .gather(&model(None))
        .await
        .unwrap();

        let grant = |login: &str| {
            gathered.delta.user(login).unwrap().permissions.as_ref().unwrap()["eu-west-2/whsmith"]
                .grant_type
                .clone()
        };
        assert_eq!(grant("open@acme.com"), "crud");
        assert_eq!(grant("early@acme.com"), "query");
        assert_eq!(grant("late@acme.com"), "query");

        assert_eq!(gathered.issues.len(), 1);
        assert_eq!(gathered.issues[0].id, "inverted@acme.com");

        assert_eq!(
            gathered.delta.job.next_transition,
            Some(tz.with_ymd_and_hms(2020, 5, 26, 12, 22, 0).unwrap().with_timezone(&Utc))
        );
    }

    #[tokio::test]
    async fn test_schedule_next_transition() {
        // 2020-05-25 is a Monday
        let now = utc("2020-05-25T10:00:00Z");
        let mut declaration = user("a@acme.com", vec![permission("eu-west-2/whsmith")]);
        declaration.schedule = vec![
            ScheduleRule::weekly(Weekday::Fri, 18, 0),
            ScheduleRule::weekly(Weekday::Tue, 8, 0),
        ];

        let mut model = model(None);
        model.job.next_transition = Some(utc("2020-05-28T00:00:00Z"));

        let gathered = gatherer(vec![declaration], now).gather(&model).await.unwrap();
        assert_eq!(
            gathered.delta.job.next_transition,
            Some(utc("2020-05-26T08:00:00Z"))
        );
    }

    #[tokio::test]
    async fn test_no_schedule_no_transition() {
        let gathered = gatherer(vec![user("a@acme.com", vec![])], Utc::now())
            .gather(&model(None))
            .await
            .unwrap();
        assert_eq!(gathered.delta.job.next_transition, None);
    }

    #[tokio::test]
    async fn test_db_username_truncated() {
        let login = "bridget.huntington-whiteley@acme.com";
        let gathered = gatherer(vec![user(login, vec![])], Utc::now())
            .gather(&model(None))
            .await
            .unwrap();
        assert_eq!(
            gathered.delta.user(login).unwrap().db_username.as_deref(),
            Some(&login[..32])
        );
    }
}
