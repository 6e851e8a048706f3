//! Declared service (Glue) connections.

use super::{Gatherer, Gathered};
use crate::Result;
use crate::config::PipelineConfig;
use crate::declarations::{GlueConnectionDeclaration, PlacementDeclaration, ServicesDeclaration};
use crate::issue::{Issue, IssueType};
use crate::models::{
    AwsModel, Database, DbStatus, GlueConnection, Model, PhysicalConnectionRequirements,
};
use crate::wildcard;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

pub struct ServicesGatherer {
    declaration: ServicesDeclaration,
    default_grant_type: String,
    grant_types: BTreeSet<String>,
}

impl ServicesGatherer {
    pub fn new(declaration: ServicesDeclaration, config: &PipelineConfig) -> Self {
        Self {
            declaration,
            default_grant_type: config.default_grant_type.clone(),
            grant_types: config.grant_types.keys().cloned().collect(),
        }
    }

    fn connection(
        &self,
        declared: &GlueConnectionDeclaration,
        db: &Database,
    ) -> std::result::Result<GlueConnection, String> {
        let grant_type = declared
            .grant_type
            .clone()
            .unwrap_or_else(|| self.default_grant_type.clone());
        if !self.grant_types.contains(&grant_type) {
            return Err(format!("Unknown grant type '{}'", grant_type));
        }

        let placement = resolve_placement(
            declared.physical_connection_requirements.as_ref(),
            db,
        )?;

        let db_names = declared
            .db_names
            .clone()
            .unwrap_or_else(|| db.db_name.iter().cloned().collect());

        Ok(GlueConnection {
            db_names: dedup(db_names),
            grant_type,
            physical_connection_requirements: placement,
        })
    }
}

/// Fills a partial placement from the database's own and rejects conflicts.
fn resolve_placement(
    supplied: Option<&PlacementDeclaration>,
    db: &Database,
) -> std::result::Result<PhysicalConnectionRequirements, String> {
    let supplied = supplied.cloned().unwrap_or_default();

    let availability_zone = pick(
        "availability_zone",
        supplied.availability_zone,
        db.availability_zone.clone(),
    )?;
    let security_group_id_list = pick(
        "security_group_id_list",
        supplied.security_group_id_list,
        db.security_group_ids.clone(),
    )?;
    let subnet_id = pick("subnet_id", supplied.subnet_id, db.subnet_id.clone())?;

    Ok(PhysicalConnectionRequirements {
        availability_zone,
        security_group_id_list,
        subnet_id,
    })
}

fn pick<T: PartialEq + std::fmt::Debug>(
    field: &str,
    supplied: Option<T>,
    actual: Option<T>,
) -> std::result::Result<T, String> {
    match (supplied, actual) {
        (Some(supplied), Some(actual)) if supplied != actual => Err(format!(
            "{} {:?} differs from the database's {:?}",
            field, supplied, actual
        )),
        (Some(value), _) | (None, Some(value)) => Ok(value),
        (None, None) => Err(format!("Unknown {} of the database", field)),
    }
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

#[async_trait]
impl Gatherer for ServicesGatherer {
    fn name(&self) -> &'static str {
        "services"
    }

    async fn gather(&self, model: &Model) -> Result<Gathered> {
        let candidates = model.database_uids_at_least(DbStatus::IAM_ROLE_THRESHOLD);
        let single_region = model.aws.single_region.as_deref();

        let mut connections = BTreeMap::new();
        let mut issues = Vec::new();

        for declared in &self.declaration.glue_connections {
            let reference = wildcard::qualify(&declared.db, single_region);
            let uids = wildcard::expand(&reference, &candidates);
            if uids.is_empty() {
                let message =
                    format!("Not existing and enabled DB instance reference '{}'", reference);
                issues.push(Issue::error(IssueType::Glue, reference, message));
                continue;
            }

            for uid in uids {
                let Some(db) = model.database(&uid) else {
                    continue;
                };
                match self.connection(declared, db) {
                    Ok(connection) => {
                        connections.insert(uid, connection);
                    }
                    Err(message) => issues.push(Issue::error(IssueType::Glue, uid, message)),
                }
            }
        }

        let delta = Model {
            aws: AwsModel {
                glue_connections: Some(connections),
                ..AwsModel::default()
            },
            ..Model::default()
        };
        Ok(Gathered::new(delta, issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        let live = |name: &str, az: &str| Database {
            status: Some(DbStatus::Enabled),
            db_name: Some(format!("db_{}", name)),
            availability_zone: Some(az.to_string()),
            security_group_ids: Some(vec!["sg-1".to_string()]),
            subnet_id: Some("subnet-a".to_string()),
            ..Database::default()
        };
        let mut model = Model::with_databases(BTreeMap::from([
            ("eu-west-2/blackwells".to_string(), live("blackwells", "eu-west-2a")),
            ("eu-west-2/whsmith".to_string(), live("whsmith", "eu-west-2b")),
            (
                "eu-west-2/foyles".to_string(),
                Database {
                    status: Some(DbStatus::Disabled),
                    ..Database::default()
                },
            ),
        ]));
        model.aws.single_region = Some("eu-west-2".to_string());
        model
    }

    fn connection(db: &str) -> GlueConnectionDeclaration {
        GlueConnectionDeclaration {
            db: db.to_string(),
            db_names: None,
            grant_type: None,
            physical_connection_requirements: None,
        }
    }

    async fn gather(connections: Vec<GlueConnectionDeclaration>) -> Gathered {
        let config = PipelineConfig::new(vec!["eu-west-2".to_string()], "acme");
        let gatherer = ServicesGatherer::new(
            ServicesDeclaration {
                glue_connections: connections,
            },
            &config,
        );
        gatherer.gather(&model()).await.unwrap()
    }

    #[tokio::test]
    async fn test_placement_defaults_to_database() {
        let gathered = gather(vec![connection("blackwells")]).await;
        assert!(gathered.issues.is_empty());

        let connections = gathered.delta.aws.glue_connections.unwrap();
        let glue = &connections["eu-west-2/blackwells"];
        assert_eq!(glue.db_names, vec!["db_blackwells"]);
        assert_eq!(glue.grant_type, "query");
        assert_eq!(glue.physical_connection_requirements.availability_zone, "eu-west-2a");
        assert_eq!(glue.physical_connection_requirements.subnet_id, "subnet-a");
    }

    #[tokio::test]
    async fn test_wildcard_and_disabled_reference() {
        let gathered = gather(vec![connection("*"), connection("foyles")]).await;

        let glue = gathered.delta.aws.glue_connections.unwrap();
        assert_eq!(glue.len(), 2);
        assert_eq!(gathered.issues.len(), 1);
        assert_eq!(gathered.issues[0].issue_type, IssueType::Glue);
        assert_eq!(gathered.issues[0].id, "eu-west-2/foyles");
        assert!(gathered.issues[0].message.contains("'eu-west-2/foyles'"));
    }

    #[tokio::test]
    async fn test_conflicting_placement_is_rejected() {
        let gathered = gather(vec![GlueConnectionDeclaration {
            physical_connection_requirements: Some(PlacementDeclaration {
                availability_zone: Some("eu-west-2c".to_string()),
                ..PlacementDeclaration::default()
            }),
            ..connection("whsmith")
        }])
        .await;

        assert!(gathered.delta.aws.glue_connections.unwrap().is_empty());
        assert_eq!(gathered.issues.len(), 1);
        assert_eq!(gathered.issues[0].id, "eu-west-2/whsmith");
        assert!(gathered.issues[0].message.contains("availability_zone"));
    }

    #[tokio::test]
    async fn test_explicit_db_names_and_grant() {
        let gathered = gather(vec![GlueConnectionDeclaration {
            db_names: Some(vec!["a".to_string(), "b".to_string(), "a".to_string()]),
            grant_type: Some("crud".to_string()),
            ..connection("eu-west-2/whsmith")
        }])
        .await;

        let connections = gathered.delta.aws.glue_connections.unwrap();
        let glue = &connections["eu-west-2/whsmith"];
        assert_eq!(glue.db_names, vec!["a", "b"]);
        assert_eq!(glue.grant_type, "crud");
    }
}
