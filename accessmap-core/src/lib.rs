//! Gathering and reconciliation pipeline for accessmap.
//!
//! This crate turns declarative descriptions of databases, users, services
//! and applications into a single desired-state [`Model`], reconciled against
//! what actually exists in the cloud inventory and the identity provider.
//! Provisioning consumes the model; it is not part of this crate.
//!
//! # Guarantees
//! - Master passwords and API tokens live in zeroizing containers and are
//!   redacted from `Debug` output, logs and error messages
//! - A failure concerning one database, user or connection becomes an
//!   [`Issue`]; only malformed declarations and configuration abort a run
//! - Stages run in a fixed order over a model that only ever grows
//!
//! # Architecture
//! - [`declarations`]: YAML input records
//! - [`gatherers`]: one stage per concern, each returning a model delta
//! - [`clients`]: traits over the external systems, with HTTP and AWS backends
//! - [`pipeline`]: stage ordering and delta merging

pub mod clients;
pub mod config;
pub mod declarations;
pub mod error;
pub mod gatherers;
pub mod issue;
pub mod logging;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod schedule;
pub mod wildcard;

// Re-export commonly used types
pub use config::{PasswordPattern, PipelineConfig, Settings};
pub use declarations::Declarations;
pub use error::{AccessMapError, Result};
pub use issue::{Issue, IssueLevel, IssueType, has_errors, log_issues};
pub use models::{Database, DbStatus, Model, User, UserStatus};
pub use pipeline::{Backends, Pipeline, PipelineOutput};
