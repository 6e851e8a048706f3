//! Master password resolution through the secret store.
//!
//! A configured value is interpreted as follows:
//! 1. `ssm:<path>` is fetched from the secret store
//! 2. `s3-prop:<bucket>/<key>[<property>]` is read from a properties document
//! 3. otherwise it is matched (whole string) against the pattern table, top
//!    to bottom; the first matching template is expanded and handled like a
//!    configured value, without further pattern matching
//! 4. a value no pattern matches is used as plaintext
//!
//! Without a configured value the database id is matched against the table;
//! an id no pattern matches cannot be resolved.
//!
//! Store lookups are cached per reference for the lifetime of the resolver,
//! found and missing entries alike. Transport failures are not cached.

use crate::clients::{SecretStore, SecretValue};
use crate::config::PasswordPattern;
use crate::error::AccessMapError;
use crate::models::MasterPassword;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Prefix marking a secret store reference.
pub const SECRET_STORE_PREFIX: &str = "ssm:";

/// Prefix marking a property of a stored properties document.
pub const PROPERTY_DOCUMENT_PREFIX: &str = "s3-prop:";

const PROPERTY_REFERENCE: &str = r"^([^\s/]+)/(\S+)\[(\S+)\]$";

/// Why a master password could not be resolved.
///
/// These end up in per-database issues, never in fatal errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Undefined master_password")]
    Undefined,

    #[error("Secret '{path}' not found")]
    NotFound { path: String },

    #[error("Invalid s3-prop reference: {reference}")]
    InvalidReference { reference: String },

    #[error(transparent)]
    Store(#[from] AccessMapError),
}

/// A resolved password and, when the store reports it, its age in days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPassword {
    pub value: MasterPassword,
    pub age_days: Option<i64>,
}

struct CompiledPattern {
    regex: Regex,
    template: String,
}

/// Where a store reference points.
enum Lookup<'a> {
    Parameter(&'a str),
    Property {
        bucket: &'a str,
        key: &'a str,
        property: &'a str,
    },
}

pub struct MasterPasswordResolver {
    store: Arc<dyn SecretStore>,
    patterns: Vec<CompiledPattern>,
    property_reference: Regex,
    reference_time: DateTime<Utc>,
    cache: Mutex<HashMap<String, Option<SecretValue>>>,
}

impl std::fmt::Debug for MasterPasswordResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterPasswordResolver")
            .field("patterns", &self.patterns.len())
            .field("reference_time", &self.reference_time)
            .finish_non_exhaustive()
    }
}

impl MasterPasswordResolver {
    /// Compiles the pattern table.
    ///
    /// # Errors
    /// Returns a configuration error if a pattern is not a valid regex
    pub fn new(
        store: Arc<dyn SecretStore>,
        patterns: &[PasswordPattern],
        reference_time: DateTime<Utc>,
    ) -> crate::Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let regex = Regex::new(&format!("^(?:{})$", p.pattern)).map_err(|e| {
                    AccessMapError::configuration(format!(
                        "invalid master password pattern '{}': {}",
                        p.pattern, e
                    ))
                })?;
                Ok(CompiledPattern {
                    regex,
                    template: normalize_template(&p.template),
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;
        let property_reference = Regex::new(PROPERTY_REFERENCE).map_err(|e| {
            AccessMapError::configuration(format!("invalid property reference pattern: {}", e))
        })?;

        Ok(Self {
            store,
            patterns,
            property_reference,
            reference_time,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves the password of database `db_id` from its configured value.
    ///
    /// # Errors
    /// Returns the reason the password is unavailable
    pub async fn resolve(
        &self,
        db_id: &str,
        configured: Option<&str>,
    ) -> Result<ResolvedPassword, ResolveError> {
        let value = match configured.filter(|v| !v.is_empty()) {
            Some(raw) if is_store_reference(raw) => raw.to_string(),
            Some(raw) => self.expand(raw).unwrap_or_else(|| raw.to_string()),
            None => self.expand(db_id).ok_or(ResolveError::Undefined)?,
        };

        if let Some(path) = value.strip_prefix(SECRET_STORE_PREFIX) {
            self.fetch(&value, path, Lookup::Parameter(path)).await
        } else if let Some(location) = value.strip_prefix(PROPERTY_DOCUMENT_PREFIX) {
            let lookup = self.property_lookup(location)?;
            self.fetch(&value, location, lookup).await
        } else {
            Ok(ResolvedPassword {
                value: MasterPassword::new(value),
                age_days: None,
            })
        }
    }

    /// Expands the first template whose pattern matches `raw` in full.
    fn expand(&self, raw: &str) -> Option<String> {
        self.patterns.iter().find_map(|p| {
            let captures = p.regex.captures(raw)?;
            let mut expanded = String::new();
            captures.expand(&p.template, &mut expanded);
            Some(expanded)
        })
    }

    fn property_lookup<'a>(&self, location: &'a str) -> Result<Lookup<'a>, ResolveError> {
        let invalid = || ResolveError::InvalidReference {
            reference: location.to_string(),
        };
        let captures = self.property_reference.captures(location).ok_or_else(invalid)?;
        match (captures.get(1), captures.get(2), captures.get(3)) {
            (Some(bucket), Some(key), Some(property)) => Ok(Lookup::Property {
                bucket: bucket.as_str(),
                key: key.as_str(),
                property: property.as_str(),
            }),
            _ => Err(invalid()),
        }
    }

    async fn fetch(
        &self,
        reference: &str,
        path: &str,
        lookup: Lookup<'_>,
    ) -> Result<ResolvedPassword, ResolveError> {
        let secret = match self.cache_get(reference) {
            Some(secret) => secret,
            None => {
                let secret = match lookup {
                    Lookup::Parameter(path) => {
                        tracing::debug!("Fetching master password from secret store: {}", path);
                        self.store.get(path).await?
                    }
                    Lookup::Property {
                        bucket,
                        key,
                        property,
                    } => {
                        tracing::debug!(
                            "Reading master password property {} from {}/{}",
                            property,
                            bucket,
                            key
                        );
                        self.store.get_property(bucket, key, property).await?
                    }
                };
                self.cache_put(reference, secret.clone());
                secret
            }
        };

        let secret = secret.ok_or_else(|| ResolveError::NotFound {
            path: path.to_string(),
        })?;

        Ok(ResolvedPassword {
            value: MasterPassword::new(secret.value.as_str()),
            age_days: secret
                .last_modified
                .map(|modified| (self.reference_time - modified).num_days()),
        })
    }

    fn cache_get(&self, path: &str) -> Option<Option<SecretValue>> {
        match self.cache.lock() {
            Ok(cache) => cache.get(path).cloned(),
            Err(poisoned) => poisoned.into_inner().get(path).cloned(),
        }
    }

    fn cache_put(&self, path: &str, secret: Option<SecretValue>) {
        match self.cache.lock() {
            Ok(mut cache) => cache.insert(path.to_string(), secret),
            Err(poisoned) => poisoned.into_inner().insert(path.to_string(), secret),
        };
    }
}

fn is_store_reference(value: &str) -> bool {
    value.starts_with(SECRET_STORE_PREFIX) || value.starts_with(PROPERTY_DOCUMENT_PREFIX)
}

/// Rewrites `\N` group references to the `${N}` form the regex crate expands.
fn normalize_template(template: &str) -> String {
    let mut normalized = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(char::is_ascii_digit) {
            normalized.push_str("${");
            while let Some(digit) = chars.next_if(char::is_ascii_digit) {
                normalized.push(digit);
            }
            normalized.push('}');
        } else {
            normalized.push(c);
        }
    }
    normalized
}
