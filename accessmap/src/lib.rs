//! Library module for the accessmap binary.
//!
//! Exposes argument parsing and output handling so they can be tested
//! without running a pipeline. The entry point is in main.rs.

pub mod output;

use accessmap_core::{Declarations, PipelineConfig, Settings};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// CLI argument structure
#[derive(Debug, Parser)]
#[command(name = "accessmap")]
#[command(about = "Desired-state access model builder")]
#[command(version)]
#[command(long_about = "
accessmap - Build the desired-state access model

Reads declarative database, user, service and application files, reconciles
them against the live database inventory and the identity provider, and
writes the resulting model as JSON for the provisioning step.

CONFIGURATION DIRECTORY:
  <dir>/config.yaml              optional settings
  <dir>/<region>/databases.yaml  one directory per region
  <dir>/users.yaml
  <dir>/services.yaml            optional
  <dir>/applications.yaml        optional

EXAMPLES:
  accessmap --config-dir ./access --output model.json
  accessmap --strict --probe --output -
  accessmap check --config-dir ./access
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration directory
    #[arg(
        short,
        long,
        env = "ACCESSMAP_CONFIG",
        default_value = ".",
        global = true,
        help = "Directory holding the declaration files"
    )]
    pub config_dir: PathBuf,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the model (default)
    Run,
    /// Load and validate declarations without contacting any backend
    Check,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Identity provider organization
    #[arg(long, env = "OKTA_ORG_NAME", help = "Okta organization name")]
    pub okta_org: Option<String>,

    /// Identity provider API token
    #[arg(
        long,
        env = "OKTA_API_TOKEN",
        hide_env_values = true,
        help = "Okta API token (never logged)"
    )]
    pub okta_api_token: Option<String>,

    /// Output file path
    #[arg(
        short,
        long,
        default_value = "accessmap.json",
        help = "Model output path, '-' for stdout"
    )]
    pub output: PathBuf,

    /// Issues output path
    #[arg(long, help = "Also write the issues as JSON to this path")]
    pub issues_output: Option<PathBuf>,

    /// Fail on errors
    #[arg(long, help = "Exit non-zero when any ERROR issue is reported")]
    pub strict: bool,

    /// Enable the access probe
    #[arg(long, help = "Connect to every enabled database with its master credentials")]
    pub probe: bool,

    /// Probe timeout (seconds)
    #[arg(long, default_value = "10", help = "Per-database probe timeout in seconds")]
    pub probe_timeout: u64,

    /// Concurrency limit
    #[arg(long, help = "Maximum concurrent identity lookups and probes")]
    pub max_workers: Option<usize>,

    /// Auto-enable undeclared instances
    #[arg(
        long,
        help = "Resolve passwords for live instances that are not declared"
    )]
    pub auto_enable_undeclared: bool,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(
        short,
        long,
        global = true,
        help = "Suppress all output except errors"
    )]
    pub quiet: bool,
}

impl Cli {
    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(accessmap_core::declarations::SETTINGS_FILE)
    }

    /// Builds the run configuration: defaults, then `config.yaml`, then flags.
    pub fn pipeline_config(&self, settings: Settings, declarations: &Declarations) -> PipelineConfig {
        let mut config = PipelineConfig::new(
            declarations.regions(),
            self.run.okta_org.clone().unwrap_or_default(),
        )
        .with_settings(settings);

        if let Some(max_workers) = self.run.max_workers {
            config = config.with_max_workers(max_workers);
        }
        if self.run.auto_enable_undeclared {
            config = config.with_auto_enable_undeclared(true);
        }
        if self.run.probe {
            config = config.with_probe(Duration::from_secs(self.run.probe_timeout));
        }
        config
    }
}
