//! Desired-state access model builder.
//!
//! Loads the declaration files, runs the gathering pipeline against the
//! cloud inventory, secret store and identity provider, and writes the model
//! for the provisioning step.
//!
//! # Security Guarantees
//! - Master passwords and the API token are never logged
//! - All backend calls are read-only

use accessmap::output::{save_issues, save_model};
use accessmap::{Cli, Command};
use accessmap_core::clients::{IdentityProvider, OktaClient};
use accessmap_core::logging::init_logging;
use accessmap_core::{Backends, Declarations, Pipeline, PipelineConfig, Settings};
use anyhow::{Context, bail};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    let settings = Settings::load_optional(&cli.settings_path())
        .with_context(|| format!("loading {}", cli.settings_path().display()))?;
    let declarations = Declarations::load(&cli.config_dir)
        .with_context(|| format!("loading declarations from {}", cli.config_dir.display()))?;
    let config = cli.pipeline_config(settings, &declarations);

    match cli.command {
        Some(Command::Check) => check(&config, &declarations),
        Some(Command::Run) | None => run(&cli, config, declarations).await,
    }
}

/// Validates configuration and reports what a run would cover.
fn check(config: &PipelineConfig, declarations: &Declarations) -> anyhow::Result<()> {
    config.validate()?;

    for (region, databases) in &declarations.databases {
        info!("{}: {} databases declared", region, databases.len());
    }
    info!("{} users declared", declarations.users.len());
    if let Some(services) = &declarations.services {
        info!("{} glue connections declared", services.glue_connections.len());
    }
    if let Some(applications) = &declarations.applications {
        info!("{} applications declared", applications.len());
    }

    println!("Configuration in {} is valid", config.regions.join(", "));
    Ok(())
}

async fn run(cli: &Cli, config: PipelineConfig, declarations: Declarations) -> anyhow::Result<()> {
    config.validate()?;
    let token = cli
        .run
        .okta_api_token
        .as_deref()
        .context("OKTA_API_TOKEN is required")?;
    let identity: Arc<dyn IdentityProvider> = Arc::new(OktaClient::new(
        &config.okta_organization,
        token,
        config.http_timeout,
    )?);

    let backends = build_backends(&config, identity).await?;
    let pipeline = Pipeline::new(config, declarations, backends)?;
    info!("Running stages: {}", pipeline.stage_names().join(", "));

    let output = pipeline.run().await?;
    accessmap_core::log_issues(&output.issues);

    save_model(&output.model, &cli.run.output).await?;
    if let Some(path) = &cli.run.issues_output {
        save_issues(&output.issues, path).await?;
    }
    info!("Model saved to {}", cli.run.output.display());

    let errors = output.issues.iter().filter(|i| i.is_error()).count();
    if cli.run.strict && errors > 0 {
        error!("{} errors reported", errors);
        bail!("{} errors reported in strict mode", errors);
    }
    Ok(())
}

#[cfg(feature = "aws")]
async fn build_backends(
    config: &PipelineConfig,
    identity: Arc<dyn IdentityProvider>,
) -> accessmap_core::Result<Backends> {
    use accessmap_core::clients::aws::AwsBackend;

    let aws = AwsBackend::load().await;
    let mut backends = Backends::new(
        Arc::new(aws.account_identity()),
        Arc::new(aws.inventory()),
        identity,
    );
    for region in &config.regions {
        backends = backends.with_secret_store(region.as_str(), Arc::new(aws.secret_store(region)));
    }
    if config.probe_enabled {
        backends = backends.with_probe(probe_backend()?);
    }
    Ok(backends)
}

#[cfg(not(feature = "aws"))]
async fn build_backends(
    _config: &PipelineConfig,
    _identity: Arc<dyn IdentityProvider>,
) -> accessmap_core::Result<Backends> {
    Err(accessmap_core::AccessMapError::unsupported_feature(
        "cloud inventory and secret store",
        "rebuild with --features aws",
    ))
}

#[cfg(all(feature = "aws", feature = "mysql"))]
fn probe_backend() -> accessmap_core::Result<Arc<dyn accessmap_core::clients::AccessProbe>> {
    Ok(Arc::new(accessmap_core::clients::mysql::MySqlProbe::new()))
}

#[cfg(all(feature = "aws", not(feature = "mysql")))]
fn probe_backend() -> accessmap_core::Result<Arc<dyn accessmap_core::clients::AccessProbe>> {
    Err(accessmap_core::AccessMapError::unsupported_feature(
        "database access probe",
        "rebuild with --features mysql",
    ))
}
