//! Configuration types for the gathering pipeline.
//!
//! - `PipelineConfig`: run-wide settings built once and passed by reference
//!   to the pipeline and every gatherer
//! - `Settings`: the optional `config.yaml` document overriding defaults
//!
//! # Security
//! API tokens are not part of these structs; the identity provider client
//! holds its own credential.

mod pipeline;
mod settings;

pub use pipeline::{DEFAULT_GRANT_TYPE, NO_GRANT, PasswordPattern, PipelineConfig};
pub use settings::Settings;
