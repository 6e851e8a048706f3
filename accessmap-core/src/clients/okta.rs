//! Okta-compatible identity provider client.
//!
//! Users are looked up one login at a time with
//! `GET /api/v1/users?limit=1&search=profile.login eq "<login>"`. HTTP 429
//! responses are retried with exponential backoff, honouring `Retry-After`
//! when the server sends one.
//!
//! # Security
//! The API token is held in a zeroizing buffer and never logged.

use super::{IdentityProvider, IdpUser};
use crate::Result;
use crate::error::AccessMapError;
use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use std::time::Duration;
use url::Url;
use zeroize::Zeroizing;

/// Retries after the first attempt on HTTP 429.
const MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct OktaUser {
    id: String,
    status: String,
    #[serde(default)]
    profile: OktaProfile,
}

#[derive(Debug, Default, Deserialize)]
struct OktaProfile {
    #[serde(default, rename = "sshPubKey")]
    ssh_pub_key: Option<String>,
}

pub struct OktaClient {
    http: reqwest::Client,
    base_url: Url,
    api_token: Zeroizing<String>,
    backoff: Duration,
}

impl std::fmt::Debug for OktaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OktaClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_token", &"****")
            .finish()
    }
}

impl OktaClient {
    /// Creates a client for `https://<organization>.okta.com`.
    ///
    /// # Errors
    /// Returns error if the organization does not form a valid URL or the
    /// HTTP client cannot be built
    pub fn new(
        organization: &str,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(&format!("https://{}.okta.com", organization)).map_err(|e| {
            AccessMapError::configuration(format!(
                "invalid okta organization '{}': {}",
                organization, e
            ))
        })?;
        Self::with_base_url(base_url, api_token, timeout)
    }

    /// Creates a client for an explicit base URL.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn with_base_url(
        base_url: Url,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccessMapError::identity_provider_failed("building HTTP client", e))?;

        Ok(Self {
            http,
            base_url,
            api_token: Zeroizing::new(api_token.into()),
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Sets the initial backoff between rate-limited attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn search_url(&self, login: &str) -> Result<Url> {
        let mut url = self.base_url.join("/api/v1/users").map_err(|e| {
            AccessMapError::configuration(format!("invalid identity provider URL: {}", e))
        })?;
        url.query_pairs_mut()
            .append_pair("limit", "1")
            .append_pair("search", &format!("profile.login eq \"{}\"", login));
        Ok(url)
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[async_trait]
impl IdentityProvider for OktaClient {
    async fn find_user(&self, login: &str) -> Result<Option<IdpUser>> {
        let url = self.search_url(login)?;
        let mut attempt = 0;

        let response = loop {
            attempt += 1;
            tracing::debug!(login = %login, attempt = attempt, "Searching identity provider");

            let response = self
                .http
                .get(url.clone())
                .header(header::ACCEPT, "application/json")
                .header(header::AUTHORIZATION, format!("SSWS {}", self.api_token.as_str()))
                .send()
                .await
                .map_err(|e| {
                    AccessMapError::identity_provider_failed(format!("user search for {}", login), e)
                })?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt <= MAX_RETRIES {
                let wait = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map_or_else(|| self.backoff_for(attempt), Duration::from_secs);

                tracing::warn!(
                    login = %login,
                    attempt = attempt,
                    wait_ms = wait.as_millis(),
                    "Rate limited (429), waiting before retry"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            break response;
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AccessMapError::IdentityProviderStatus {
                status: status.as_u16(),
                context: format!("user search for {}", login),
            });
        }

        let users: Vec<OktaUser> = response.json().await.map_err(|e| {
            AccessMapError::identity_provider_failed(format!("decoding user search for {}", login), e)
        })?;

        Ok(users.into_iter().next().map(|user| IdpUser {
            id: user.id,
            status: user.status,
            ssh_pubkey: user.profile.ssh_pub_key.filter(|key| !key.is_empty()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OktaClient {
        OktaClient::new("acme", "00secret", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_search_url() {
        let url = client().search_url("leroy.trent@acme.com").unwrap();
        assert_eq!(url.host_str(), Some("acme.okta.com"));
        assert_eq!(url.path(), "/api/v1/users");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("limit".to_string(), "1".to_string()),
                (
                    "search".to_string(),
                    "profile.login eq \"leroy.trent@acme.com\"".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let debug = format!("{:?}", client());
        assert!(!debug.contains("00secret"));
    }

    #[test]
    fn test_backoff_doubles() {
        let client = client();
        assert_eq!(client.backoff_for(1), Duration::from_millis(500));
        assert_eq!(client.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(client.backoff_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_invalid_organization() {
        let result = OktaClient::new("not a host", "token", Duration::from_secs(5));
        assert!(matches!(result, Err(AccessMapError::Configuration { .. })));
    }
}
