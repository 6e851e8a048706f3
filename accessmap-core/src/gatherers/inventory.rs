//! Live database instances of one region, reconciled against declarations.

use super::{Gatherer, Gathered};
use crate::Result;
use crate::clients::{Instance, InventoryClient};
use crate::issue::{Issue, IssueType};
use crate::models::{Database, DbStatus, Model, db_uid, split_db_uid};
use crate::resolver::MasterPasswordResolver;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NOT_CONFIGURED: &str = "Present in inventory but NOT configured";
pub const NOT_FOUND: &str = "Not found in inventory";

pub struct InventoryGatherer {
    region: String,
    engine: String,
    inventory: Arc<dyn InventoryClient>,
    resolver: Arc<MasterPasswordResolver>,
    declared_ids: Vec<String>,
    auto_enable_undeclared: bool,
}

impl InventoryGatherer {
    pub fn new(
        region: impl Into<String>,
        engine: impl Into<String>,
        inventory: Arc<dyn InventoryClient>,
        resolver: Arc<MasterPasswordResolver>,
    ) -> Self {
        Self {
            region: region.into(),
            engine: engine.into(),
            inventory,
            resolver,
            declared_ids: Vec::new(),
            auto_enable_undeclared: false,
        }
    }

    /// Declared database ids of the region, in declaration order. Issues for
    /// declared databases follow this order.
    pub fn with_declared_order(mut self, ids: Vec<String>) -> Self {
        self.declared_ids = ids;
        self
    }

    /// Resolves passwords for live but undeclared instances instead of only
    /// warning about them.
    pub fn with_auto_enable_undeclared(mut self, auto_enable: bool) -> Self {
        self.auto_enable_undeclared = auto_enable;
        self
    }

    /// Uids of the region's databases, declared ids first.
    fn in_declaration_order<'a>(
        &self,
        declared: &BTreeMap<&'a String, &'a Database>,
    ) -> Vec<&'a String> {
        let mut ordered: Vec<&'a String> = Vec::with_capacity(declared.len());
        for id in &self.declared_ids {
            if let Some((uid, _)) = declared.get_key_value(&db_uid(&self.region, id))
                && !ordered.contains(uid)
            {
                ordered.push(*uid);
            }
        }
        for uid in declared.keys() {
            if !ordered.contains(uid) {
                ordered.push(*uid);
            }
        }
        ordered
    }

    async fn undeclared(&self, uid: &str, instance: &Instance) -> (Option<Database>, Issue) {
        if !self.auto_enable_undeclared {
            return (
                Some(Database::default()),
                Issue::warning(IssueType::Db, uid, NOT_CONFIGURED),
            );
        }

        match self.resolver.resolve(&instance.id, None).await {
            Ok(resolved) => {
                let mut db = live_fields(instance);
                db.status = Some(DbStatus::Enabled);
                db.master_password = Some(resolved.value);
                db.password_age = resolved.age_days;
                db.permissions = Some(BTreeMap::new());
                (
                    Some(db),
                    Issue::warning(IssueType::Db, uid, format!("{}, auto-enabled", NOT_CONFIGURED)),
                )
            }
            Err(e) => (
                None,
                Issue::warning(
                    IssueType::Db,
                    uid,
                    format!("Failed to auto-configure: {}", e),
                ),
            ),
        }
    }
}

#[async_trait]
impl Gatherer for InventoryGatherer {
    fn name(&self) -> &'static str {
        "inventory"
    }

    async fn gather(&self, model: &Model) -> Result<Gathered> {
        let declared: BTreeMap<&String, &Database> = model
            .databases()
            .filter(|(uid, _)| split_db_uid(uid).is_some_and(|(region, _)| region == self.region))
            .collect();
        let expected: Vec<&String> = self
            .in_declaration_order(&declared)
            .into_iter()
            .filter(|uid| {
                declared
                    .get(uid)
                    .is_some_and(|db| db.effective_status() >= DbStatus::Enabled)
            })
            .collect();

        let mut databases = BTreeMap::new();
        let mut issues = Vec::new();

        let instances = match self.inventory.list_instances(&self.region).await {
            Ok(instances) => instances,
            Err(e) if e.is_transport() => {
                // Unverified databases drop to ABSENT so later stages skip them
                tracing::warn!("Inventory unavailable for {}: {}", self.region, e);
                for uid in expected {
                    issues.push(Issue::error(IssueType::Db, uid.as_str(), e.to_string()));
                    databases.insert(uid.clone(), absent());
                }
                return Ok(Gathered::new(Model::with_databases(databases), issues));
            }
            Err(e) => return Err(e),
        };

        for instance in instances.iter().filter(|i| i.engine == self.engine) {
            let uid = db_uid(&self.region, &instance.id);
            match declared.get(&uid) {
                None => {
                    let (db, issue) = self.undeclared(&uid, instance).await;
                    issues.push(issue);
                    if let Some(db) = db {
                        databases.insert(uid, db);
                    }
                }
                Some(db) if db.effective_status() >= DbStatus::Enabled => {
                    databases.insert(uid, live_fields(instance));
                }
                Some(_) => {}
            }
        }

        for uid in expected {
            if !databases.contains_key(uid) {
                issues.push(Issue::error(IssueType::Db, uid.as_str(), NOT_FOUND));
                databases.insert(uid.clone(), absent());
            }
        }

        tracing::debug!(
            "Reconciled {} instances in {}",
            databases.len(),
            self.region
        );
        Ok(Gathered::new(Model::with_databases(databases), issues))
    }
}

fn absent() -> Database {
    Database {
        status: Some(DbStatus::Absent),
        ..Database::default()
    }
}

/// Inventory-owned fields of a live instance.
fn live_fields(instance: &Instance) -> Database {
    Database {
        db_name: instance.db_name.clone(),
        master_username: instance.master_username.clone(),
        resource_id: instance.resource_id.clone(),
        endpoint: instance.endpoint.clone(),
        availability_zone: instance.availability_zone.clone(),
        security_group_ids: Some(instance.security_group_ids.clone()),
        subnet_id: instance.subnet_id.clone(),
        ..Database::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{SecretStore, SecretValue};
    use crate::config::PasswordPattern;
    use crate::error::AccessMapError;
    use crate::models::Endpoint;
    use chrono::Utc;

    struct FixedInventory(Option<Vec<Instance>>);

    #[async_trait]
    impl InventoryClient for FixedInventory {
        async fn list_instances(&self, region: &str) -> Result<Vec<Instance>> {
            self.0.clone().ok_or_else(|| {
                AccessMapError::inventory_failed(
                    region.to_string(),
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"),
                )
            })
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl SecretStore for EmptyStore {
        async fn get(&self, path: &str) -> Result<Option<SecretValue>> {
            Ok((path == "borders.master_password").then(|| SecretValue::new("vigilant_swirles")))
        }
    }

    fn instance(id: &str) -> Instance {
        Instance {
            id: id.to_string(),
            engine: "mysql".to_string(),
            db_name: Some(format!("db_{}", id)),
            master_username: Some("root".to_string()),
            resource_id: Some(format!("db-{}", id.to_uppercase())),
            endpoint: Some(Endpoint {
                address: format!("{}.example", id),
                port: 3306,
            }),
            availability_zone: Some("eu-west-2a".to_string()),
            security_group_ids: vec!["sg-1".to_string()],
            subnet_id: Some("subnet-a".to_string()),
        }
    }

    fn declared(entries: &[(&str, DbStatus)]) -> Model {
        Model::with_databases(
            entries
                .iter()
                .map(|(uid, status)| {
                    (
                        (*uid).to_string(),
                        Database {
                            status: Some(*status),
                            ..Database::default()
                        },
                    )
                })
                .collect(),
        )
    }

    fn gatherer(instances: Option<Vec<Instance>>) -> InventoryGatherer {
        let resolver = MasterPasswordResolver::new(
            Arc::new(EmptyStore),
            &[PasswordPattern::new(r"([a-z][a-z0-9-]+)", r"ssm:\1.master_password")],
            Utc::now(),
        )
        .unwrap();
        InventoryGatherer::new(
            "eu-west-2",
            "mysql",
            Arc::new(FixedInventory(instances)),
            Arc::new(resolver),
        )
    }

    #[tokio::test]
    async fn test_declared_and_live() {
        let model = declared(&[("eu-west-2/whsmith", DbStatus::Enabled)]);
        let gathered = gatherer(Some(vec![instance("whsmith")]))
            .gather(&model)
            .await
            .unwrap();

        assert!(gathered.issues.is_empty());
        let db = gathered.delta.database("eu-west-2/whsmith").unwrap();
        assert_eq!(db.db_name.as_deref(), Some("db_whsmith"));
        assert_eq!(db.subnet_id.as_deref(), Some("subnet-a"));
        assert_eq!(db.status, None);
    }

    #[tokio::test]
    async fn test_declared_but_missing_is_absent() {
        let model = declared(&[("eu-west-2/whsmith", DbStatus::Enabled)]);
        let gathered = gatherer(Some(vec![])).gather(&model).await.unwrap();

        assert_eq!(gathered.issues.len(), 1);
        assert_eq!(gathered.issues[0].message, NOT_FOUND);
        assert_eq!(
            gathered.delta.database("eu-west-2/whsmith").unwrap().status,
            Some(DbStatus::Absent)
        );
    }

    #[tokio::test]
    async fn test_undeclared_live_instance_warns_only() {
        let gathered = gatherer(Some(vec![instance("foyles")]))
            .gather(&Model::default())
            .await
            .unwrap();

        assert_eq!(gathered.issues.len(), 1);
        assert!(!gathered.issues[0].is_error());
        assert_eq!(gathered.issues[0].id, "eu-west-2/foyles");
        assert_eq!(
            gathered.delta.database("eu-west-2/foyles"),
            Some(&Database::default())
        );
    }

    #[tokio::test]
    async fn test_auto_enable_undeclared() {
        let gathered = gatherer(Some(vec![instance("borders"), instance("foyles")]))
            .with_auto_enable_undeclared(true)
            .gather(&Model::default())
            .await
            .unwrap();

        let borders = gathered.delta.database("eu-west-2/borders").unwrap();
        assert_eq!(borders.status, Some(DbStatus::Enabled));
        assert_eq!(borders.db_name.as_deref(), Some("db_borders"));

        assert!(gathered.delta.database("eu-west-2/foyles").is_none());
        assert_eq!(gathered.issues.len(), 2);
        assert!(gathered.issues[1].message.starts_with("Failed to auto-configure"));
    }

    #[tokio::test]
    async fn test_disabled_and_other_regions_untouched() {
        let model = declared(&[
            ("eu-west-2/foyles", DbStatus::Disabled),
            ("us-east-1/borders", DbStatus::Enabled),
        ]);
        let gathered = gatherer(Some(vec![instance("foyles")]))
            .gather(&model)
            .await
            .unwrap();

        assert!(gathered.issues.is_empty());
        assert_eq!(gathered.delta, Model::with_databases(BTreeMap::new()));
    }

    #[tokio::test]
    async fn test_other_engines_ignored() {
        let postgres = Instance {
            engine: "postgres".to_string(),
            ..instance("waterstones")
        };
        let gathered = gatherer(Some(vec![postgres]))
            .gather(&Model::default())
            .await
            .unwrap();
        assert!(gathered.issues.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_marks_enabled_databases_absent() {
        let model = declared(&[
            ("eu-west-2/blackwells", DbStatus::Enabled),
            ("eu-west-2/foyles", DbStatus::Disabled),
            ("eu-west-2/whsmith", DbStatus::Enabled),
        ]);
        let gathered = gatherer(None).gather(&model).await.unwrap();

        let ids: Vec<&str> = gathered.issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["eu-west-2/blackwells", "eu-west-2/whsmith"]);
        assert!(gathered.issues.iter().all(Issue::is_error));

        let statuses: Vec<(&String, Option<DbStatus>)> = gathered
            .delta
            .databases()
            .map(|(uid, db)| (uid, db.status))
            .collect();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|(_, status)| *status == Some(DbStatus::Absent)));
        assert!(gathered.delta.database("eu-west-2/foyles").is_none());
    }

    #[tokio::test]
    async fn test_non_transport_failure_is_fatal() {
        struct Misconfigured;

        #[async_trait]
        impl InventoryClient for Misconfigured {
            async fn list_instances(&self, _region: &str) -> Result<Vec<Instance>> {
                Err(AccessMapError::unsupported_feature("inventory", "enable aws"))
            }
        }

        let resolver = MasterPasswordResolver::new(Arc::new(EmptyStore), &[], Utc::now()).unwrap();
        let gatherer =
            InventoryGatherer::new("eu-west-2", "mysql", Arc::new(Misconfigured), Arc::new(resolver));
        let result = gatherer
            .gather(&declared(&[("eu-west-2/whsmith", DbStatus::Enabled)]))
            .await;
        assert!(matches!(result, Err(AccessMapError::UnsupportedFeature { .. })));
    }

    #[tokio::test]
    async fn test_issues_follow_instance_then_declaration_order() {
        let model = declared(&[
            ("eu-west-2/blackwells", DbStatus::Enabled),
            ("eu-west-2/foyles", DbStatus::Enabled),
            ("eu-west-2/whsmith", DbStatus::Enabled),
        ]);
        let gathered = gatherer(Some(vec![instance("waterstones"), instance("daunt")]))
            .with_declared_order(vec![
                "whsmith".to_string(),
                "blackwells".to_string(),
                "foyles".to_string(),
            ])
            .gather(&model)
            .await
            .unwrap();

        let ids: Vec<&str> = gathered.issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "eu-west-2/waterstones",
                "eu-west-2/daunt",
                "eu-west-2/whsmith",
                "eu-west-2/blackwells",
                "eu-west-2/foyles",
            ]
        );
    }
}
