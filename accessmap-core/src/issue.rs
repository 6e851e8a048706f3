//! Non-fatal, entity-scoped findings.
//!
//! A gatherer processing many entities isolates each entity's failure into an
//! [`Issue`] and carries on with the rest. Issues are collected, never thrown;
//! callers decide whether any [`IssueLevel::Error`] blocks provisioning.

use serde::{Deserialize, Serialize};

/// Severity of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueLevel {
    /// Informational; the entity is still acted upon
    Warning,
    /// The entity is excluded from downstream action
    Error,
}

/// Short domain code naming the kind of entity an issue is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueType {
    /// A database instance
    Db,
    /// A service (Glue) connection
    Glue,
    /// An application entry
    App,
    /// A user entry
    User,
    /// The identity provider integration itself failed for a login
    Idp,
    /// The cloud account identity lookup
    Account,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::Db => "DB",
            Self::Glue => "GLUE",
            Self::App => "APP",
            Self::User => "USER",
            Self::Idp => "IDP",
            Self::Account => "ACCOUNT",
        };
        f.write_str(code)
    }
}

/// A structured finding with a severity, scoped to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub level: IssueLevel,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    /// Entity key (`region/db_id`, login, application name...)
    pub id: String,
    pub message: String,
}

impl Issue {
    /// Creates a warning issue.
    pub fn warning(issue_type: IssueType, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            issue_type,
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates an error issue.
    pub fn error(issue_type: IssueType, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            issue_type,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == IssueLevel::Error
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={} :: {}", self.issue_type, self.id, self.message)
    }
}

/// Logs every issue at its own level.
pub fn log_issues(issues: &[Issue]) {
    if issues.is_empty() {
        return;
    }
    tracing::info!("Issues:");
    for issue in issues {
        match issue.level {
            IssueLevel::Warning => tracing::warn!("  {}", issue),
            IssueLevel::Error => tracing::error!("  {}", issue),
        }
    }
}

/// Returns true when at least one issue is an error.
pub fn has_errors(issues: &[Issue]) -> bool {
    issues.iter().any(Issue::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_display() {
        let issue = Issue::error(IssueType::Db, "eu-west-2/whsmith", "Not found in inventory");
        assert_eq!(
            issue.to_string(),
            "DB=eu-west-2/whsmith :: Not found in inventory"
        );
    }

    #[test]
    fn test_issue_serialization() {
        let issue = Issue::warning(IssueType::Glue, "eu-west-2/foyles", "mismatch");
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("\"level\":\"WARNING\""));
        assert!(json.contains("\"type\":\"GLUE\""));
    }

    #[test]
    fn test_has_errors() {
        let warning = Issue::warning(IssueType::Db, "a", "w");
        assert!(!has_errors(std::slice::from_ref(&warning)));
        assert!(has_errors(&[warning, Issue::error(IssueType::User, "b", "e")]));
    }

    #[test]
    fn test_level_ordering() {
        assert!(IssueLevel::Error > IssueLevel::Warning);
    }
}
