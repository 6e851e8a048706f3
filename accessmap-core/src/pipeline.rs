//! Stage orchestration.
//!
//! Stages run sequentially in a fixed order, each seeing the model merged
//! from every stage before it:
//!
//! 1. account identity
//! 2. declared database config, per region
//! 3. live database inventory, per region
//! 4. database access probe (optional)
//! 5. declared services (when declared)
//! 6. declared applications (when declared)
//! 7. declared users
//! 8. identity provider enrichment
//!
//! Issues are concatenated in stage order, entity order within a stage.

use crate::Result;
use crate::clients::{
    AccessProbe, AccountIdentity, IdentityProvider, InventoryClient, SecretStore,
};
use crate::config::PipelineConfig;
use crate::declarations::Declarations;
use crate::error::AccessMapError;
use crate::gatherers::{
    AccessProbeGatherer, AccountGatherer, ApplicationsGatherer, DatabaseConfigGatherer, Gatherer,
    IdentityGatherer, InventoryGatherer, ServicesGatherer, UsersGatherer,
};
use crate::issue::Issue;
use crate::models::{DbStatus, Model};
use crate::resolver::MasterPasswordResolver;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// External systems a run talks to.
pub struct Backends {
    pub account: Arc<dyn AccountIdentity>,
    pub inventory: Arc<dyn InventoryClient>,
    pub identity: Arc<dyn IdentityProvider>,
    secret_stores: BTreeMap<String, Arc<dyn SecretStore>>,
    shared_secret_store: Option<Arc<dyn SecretStore>>,
    probe: Option<Arc<dyn AccessProbe>>,
}

impl Backends {
    pub fn new(
        account: Arc<dyn AccountIdentity>,
        inventory: Arc<dyn InventoryClient>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            account,
            inventory,
            identity,
            secret_stores: BTreeMap::new(),
            shared_secret_store: None,
            probe: None,
        }
    }

    /// Uses `store` for master passwords of databases in `region`.
    pub fn with_secret_store(
        mut self,
        region: impl Into<String>,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        self.secret_stores.insert(region.into(), store);
        self
    }

    /// Uses `store` for every region without a dedicated store.
    pub fn with_shared_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.shared_secret_store = Some(store);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn AccessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn secret_store(&self, region: &str) -> Result<Arc<dyn SecretStore>> {
        self.secret_stores
            .get(region)
            .or(self.shared_secret_store.as_ref())
            .cloned()
            .ok_or_else(|| {
                AccessMapError::configuration(format!("no secret store for region '{}'", region))
            })
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub model: Model,
    pub issues: Vec<Issue>,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Gatherer>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Builds the stage list for one run.
    ///
    /// When `config.regions` is empty it is taken from the declarations.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid, disagrees with the
    /// declared regions, or a backend needed by a stage is missing
    pub fn new(
        mut config: PipelineConfig,
        declarations: Declarations,
        backends: Backends,
    ) -> Result<Self> {
        let declared_regions = declarations.regions();
        if config.regions.is_empty() {
            config.regions = declared_regions;
        } else if config.regions != declared_regions {
            return Err(AccessMapError::configuration(format!(
                "configured regions {:?} do not match declared regions {:?}",
                config.regions, declared_regions
            )));
        }
        config.validate()?;

        let mut stages: Vec<Box<dyn Gatherer>> = Vec::new();
        stages.push(Box::new(AccountGatherer::new(
            Arc::clone(&backends.account),
            &config,
        )));

        let mut resolvers = Vec::with_capacity(declarations.databases.len());
        for (region, _) in &declarations.databases {
            let resolver = MasterPasswordResolver::new(
                backends.secret_store(region)?,
                &config.password_patterns,
                config.reference_time,
            )?;
            resolvers.push((region.clone(), Arc::new(resolver)));
        }

        let mut inventory_stages: Vec<Box<dyn Gatherer>> = Vec::with_capacity(resolvers.len());
        for ((region, databases), (_, resolver)) in
            declarations.databases.into_iter().zip(&resolvers)
        {
            let declared_ids = databases.iter().map(|db| db.id.clone()).collect();
            inventory_stages.push(Box::new(
                InventoryGatherer::new(
                    region.as_str(),
                    config.engine.as_str(),
                    Arc::clone(&backends.inventory),
                    Arc::clone(resolver),
                )
                .with_declared_order(declared_ids)
                .with_auto_enable_undeclared(config.auto_enable_undeclared),
            ));
            stages.push(Box::new(DatabaseConfigGatherer::new(
                region,
                databases,
                Arc::clone(resolver),
            )));
        }
        stages.append(&mut inventory_stages);

        if config.probe_enabled {
            let probe = backends.probe.clone().ok_or_else(|| {
                AccessMapError::configuration("access probe enabled but no probe backend given")
            })?;
            stages.push(Box::new(AccessProbeGatherer::new(
                probe,
                config.max_workers,
                config.probe_timeout,
            )));
        }

        if let Some(services) = declarations.services {
            stages.push(Box::new(ServicesGatherer::new(services, &config)));
        }

        if let Some(applications) = declarations.applications {
            stages.push(Box::new(ApplicationsGatherer::new(applications)));
        }

        stages.push(Box::new(UsersGatherer::new(declarations.users, &config)));
        stages.push(Box::new(IdentityGatherer::new(
            Arc::clone(&backends.identity),
            config.max_workers,
        )));

        Ok(Self { stages })
    }

    /// Names of the stages in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs every stage and returns the merged model with all issues.
    ///
    /// # Errors
    /// Returns error only if a stage fails fatally
    pub async fn run(&self) -> Result<PipelineOutput> {
        let mut model = Model::default();
        let mut issues = Vec::new();

        for stage in &self.stages {
            let start = Instant::now();
            tracing::debug!("Running stage '{}'", stage.name());

            let gathered = stage.gather(&model).await?;
            tracing::info!(
                "Stage '{}' finished in {}ms with {} issues",
                stage.name(),
                start.elapsed().as_millis(),
                gathered.issues.len()
            );

            model.apply(gathered.delta);
            issues.extend(gathered.issues);
        }

        tracing::info!(
            "{} databases eligible for IAM roles, {} for MySQL accounts",
            model.database_uids_at_least(DbStatus::IAM_ROLE_THRESHOLD).len(),
            model.database_uids_at_least(DbStatus::ACCOUNT_THRESHOLD).len()
        );
        Ok(PipelineOutput { model, issues })
    }
}
