//! Status DTOs published on the results queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::build::{BuildCommand, BuildResult, BuildStatus};

/// Build status event from worker to the system of record
///
/// Consumers must treat repeated events for the same build as
/// last-write-wins: a redelivered command publishes `RUNNING` again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatusUpdate {
    pub build_id: String,
    pub site_id: String,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_snippet: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BuildStatusUpdate {
    /// Progress event sent when a command starts processing
    pub fn running(command: &BuildCommand) -> Self {
        Self {
            build_id: command.id.clone(),
            site_id: command.site_id.clone(),
            status: BuildStatus::Running,
            artifact_location: None,
            error_message: None,
            log_snippet: None,
            timestamp: Utc::now(),
        }
    }

    /// Terminal event for a finished pipeline
    pub fn finished(command: &BuildCommand, result: &BuildResult) -> Self {
        Self {
            build_id: command.id.clone(),
            site_id: command.site_id.clone(),
            status: result.status(),
            artifact_location: result.artifact_location().map(str::to_string),
            error_message: result.error_message().map(str::to_string),
            log_snippet: result.log_snippet().map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> BuildCommand {
        BuildCommand {
            id: "b-1".to_string(),
            site_id: "site-1".to_string(),
            repository_url: "https://example.com/site.git".to_string(),
            branch: "main".to_string(),
            build_command: None,
            output_directory: String::new(),
            commit_sha: None,
            triggered_by: "push".to_string(),
            status: BuildStatus::Queued,
            created_at: Utc::now(),
            artifact_id: Some("art-1".to_string()),
        }
    }

    #[test]
    fn test_running_update() {
        let update = BuildStatusUpdate::running(&command());
        assert_eq!(update.build_id, "b-1");
        assert_eq!(update.site_id, "site-1");
        assert_eq!(update.status, BuildStatus::Running);
        assert!(update.artifact_location.is_none());
        assert!(update.error_message.is_none());
    }

    #[test]
    fn test_failed_update_round_trip() {
        let result = BuildResult::failed_with_log("build failed (exit 2)", "npm ERR!");
        let update = BuildStatusUpdate::finished(&command(), &result);

        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"status\":\"FAILED\""));
        assert!(json.contains("\"buildId\":\"b-1\""));

        let decoded: BuildStatusUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, update);
        assert_eq!(decoded.artifact_location, None);
        assert_eq!(decoded.error_message.as_deref(), Some("build failed (exit 2)"));
        assert_eq!(decoded.log_snippet.as_deref(), Some("npm ERR!"));
    }

    #[test]
    fn test_succeeded_update_round_trip() {
        let result = BuildResult::succeeded("s3://artifacts/art-1/");
        let update = BuildStatusUpdate::finished(&command(), &result);

        let json = serde_json::to_string(&update).unwrap();
        let decoded: BuildStatusUpdate = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, update);
        assert_eq!(decoded.status, BuildStatus::Succeeded);
        assert_eq!(decoded.artifact_location.as_deref(), Some("s3://artifacts/art-1/"));
        assert_eq!(decoded.error_message, None);
        assert_eq!(decoded.log_snippet, None);
    }

    #[test]
    fn test_decodes_explicit_nulls() {
        let json = r#"{
            "buildId": "b-1",
            "siteId": "site-1",
            "status": "SUCCEEDED",
            "artifactLocation": "s3://artifacts/art-1/",
            "errorMessage": null,
            "logSnippet": null,
            "timestamp": "2024-05-01T12:00:00Z"
        }"#;

        let decoded: BuildStatusUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.status, BuildStatus::Succeeded);
        assert_eq!(decoded.error_message, None);
    }
}
