//! File output for pipeline results.
//!
//! The model is written as pretty-printed JSON, either to a file or to
//! stdout when the path is `-`.

use accessmap_core::error::AccessMapError;
use accessmap_core::{Issue, Model, Result};
use serde::Serialize;
use std::path::Path;

/// Serializes `value` as pretty JSON.
pub fn to_json<T: Serialize>(value: &T, context: &str) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| AccessMapError::Serialization {
        context: context.to_string(),
        source: e,
    })
}

/// Saves the model to `output_path`, or prints it for `-`.
pub async fn save_model(model: &Model, output_path: &Path) -> Result<()> {
    let json_data = to_json(model, "model serialization")?;
    save_json(&json_data, output_path).await
}

/// Saves the issues list as a JSON array.
pub async fn save_issues(issues: &[Issue], output_path: &Path) -> Result<()> {
    let json_data = to_json(&issues, "issue serialization")?;
    save_json(&json_data, output_path).await
}

async fn save_json(json_data: &str, output_path: &Path) -> Result<()> {
    if output_path == Path::new("-") {
        println!("{}", json_data);
        return Ok(());
    }

    tokio::fs::write(output_path, json_data)
        .await
        .map_err(|e| AccessMapError::io(format!("Failed to write to {}", output_path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessmap_core::{Database, DbStatus, IssueType};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_save_model_and_issues() {
        let dir = tempfile::tempdir().unwrap();
        let model = Model::with_databases(BTreeMap::from([(
            "eu-west-2/whsmith".to_string(),
            Database {
                status: Some(DbStatus::Absent),
                ..Database::default()
            },
        )]));
        let issues = vec![Issue::error(
            IssueType::Db,
            "eu-west-2/whsmith",
            "Not found in inventory",
        )];

        let model_path = dir.path().join("model.json");
        let issues_path = dir.path().join("issues.json");
        save_model(&model, &model_path).await.unwrap();
        save_issues(&issues, &issues_path).await.unwrap();

        let written: Model =
            serde_json::from_str(&std::fs::read_to_string(&model_path).unwrap()).unwrap();
        assert_eq!(written, model);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&issues_path).unwrap()).unwrap();
        assert_eq!(written[0]["level"], "ERROR");
        assert_eq!(written[0]["type"], "DB");
        assert_eq!(written[0]["id"], "eu-west-2/whsmith");
    }

    #[tokio::test]
    async fn test_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("model.json");
        let result = save_model(&Model::default(), &path).await;
        assert!(matches!(result, Err(AccessMapError::Io { .. })));
    }
}
