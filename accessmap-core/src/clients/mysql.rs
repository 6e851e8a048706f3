//! MySQL access probe.
//!
//! Opens a single connection with the master credentials, reads the server
//! version and closes it. No pool is kept between probes.
//!
//! # Security
//! Credentials are passed through [`MySqlConnectOptions`] rather than a
//! connection URL so they cannot end up in error messages.

use super::{AccessProbe, ProbeTarget};
use crate::Result;
use crate::error::AccessMapError;
use async_trait::async_trait;
use sqlx::Connection;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};

/// Probes with TLS when the server offers it.
#[derive(Debug, Clone, Default)]
pub struct MySqlProbe;

impl MySqlProbe {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(&self, target: &ProbeTarget) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&target.endpoint.address)
            .port(target.endpoint.port)
            .username(&target.username)
            .password(target.password.expose())
            .ssl_mode(MySqlSslMode::Preferred);
        if let Some(db_name) = &target.db_name {
            options = options.database(db_name);
        }
        options
    }
}

#[async_trait]
impl AccessProbe for MySqlProbe {
    async fn probe(&self, target: &ProbeTarget) -> Result<String> {
        let context = format!(
            "connecting to {}:{}",
            target.endpoint.address, target.endpoint.port
        );

        let mut connection = MySqlConnection::connect_with(&self.connect_options(target))
            .await
            .map_err(|e| AccessMapError::probe_failed(context.clone(), e))?;

        let version: String = sqlx::query_scalar("SELECT VERSION()")
            .fetch_one(&mut connection)
            .await
            .map_err(|e| AccessMapError::probe_failed(context.clone(), e))?;

        if let Err(e) = connection.close().await {
            tracing::debug!("Failed to close probe connection cleanly: {}", e);
        }

        Ok(version)
    }
}
