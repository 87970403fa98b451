//! Build domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// Any status name this worker does not know; only ever received
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Queued => write!(f, "QUEUED"),
            BuildStatus::Running => write!(f, "RUNNING"),
            BuildStatus::Succeeded => write!(f, "SUCCEEDED"),
            BuildStatus::Failed => write!(f, "FAILED"),
            BuildStatus::Canceled => write!(f, "CANCELED"),
            BuildStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Build instruction received from the commands queue
///
/// One message carries exactly one command. The `status` field is
/// informational and reflects what the sender believed at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCommand {
    pub id: String,
    pub site_id: String,
    pub repository_url: String,
    pub branch: String,
    /// Shell recipe, or a "no build" sentinel (`none`, `static`, `skip`, blank)
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub output_directory: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    pub triggered_by: String,
    #[serde(default)]
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub artifact_id: Option<String>,
}

impl BuildCommand {
    /// The build recipe, with a missing recipe reading as blank
    pub fn recipe(&self) -> &str {
        self.build_command.as_deref().unwrap_or_default()
    }

    /// Commit to check out after cloning, ignoring blank values
    pub fn commit(&self) -> Option<&str> {
        non_blank(self.commit_sha.as_deref())
    }

    /// Artifact identifier for the upload, ignoring blank values
    pub fn artifact(&self) -> Option<&str> {
        non_blank(self.artifact_id.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Outcome of one pipeline run
///
/// Created once per command, handed to the status reporter and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    Succeeded {
        artifact_location: String,
    },
    Failed {
        error_message: String,
        /// Tail of the captured output, only for command execution failures
        log_snippet: Option<String>,
    },
}

impl BuildResult {
    pub fn succeeded(artifact_location: impl Into<String>) -> Self {
        BuildResult::Succeeded {
            artifact_location: artifact_location.into(),
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        BuildResult::Failed {
            error_message: error_message.into(),
            log_snippet: None,
        }
    }

    pub fn failed_with_log(error_message: impl Into<String>, log_snippet: impl Into<String>) -> Self {
        BuildResult::Failed {
            error_message: error_message.into(),
            log_snippet: Some(log_snippet.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::Succeeded { .. })
    }

    /// Terminal status this result is reported as
    pub fn status(&self) -> BuildStatus {
        match self {
            BuildResult::Succeeded { .. } => BuildStatus::Succeeded,
            BuildResult::Failed { .. } => BuildStatus::Failed,
        }
    }

    pub fn artifact_location(&self) -> Option<&str> {
        match self {
            BuildResult::Succeeded { artifact_location } => Some(artifact_location),
            BuildResult::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            BuildResult::Succeeded { .. } => None,
            BuildResult::Failed { error_message, .. } => Some(error_message),
        }
    }

    pub fn log_snippet(&self) -> Option<&str> {
        match self {
            BuildResult::Succeeded { .. } => None,
            BuildResult::Failed { log_snippet, .. } => log_snippet.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMAND_JSON: &str = r#"{
        "id": "b-1",
        "siteId": "site-9",
        "repositoryUrl": "https://example.com/site.git",
        "branch": "main",
        "buildCommand": "npm run build",
        "outputDirectory": "dist",
        "commitSha": "abc123",
        "triggeredBy": "push",
        "status": "QUEUED",
        "createdAt": "2024-05-01T12:00:00Z",
        "artifactId": "art-1"
    }"#;

    #[test]
    fn test_build_command_from_json() {
        let command: BuildCommand = serde_json::from_str(COMMAND_JSON).unwrap();
        assert_eq!(command.id, "b-1");
        assert_eq!(command.site_id, "site-9");
        assert_eq!(command.recipe(), "npm run build");
        assert_eq!(command.output_directory, "dist");
        assert_eq!(command.commit(), Some("abc123"));
        assert_eq!(command.artifact(), Some("art-1"));
        assert_eq!(command.status, BuildStatus::Queued);
    }

    #[test]
    fn test_build_command_optional_fields() {
        let json = r#"{
            "id": "b-2",
            "siteId": "site-9",
            "repositoryUrl": "https://example.com/site.git",
            "branch": "main",
            "buildCommand": null,
            "outputDirectory": ".",
            "commitSha": "  ",
            "triggeredBy": "manual",
            "status": "QUEUED",
            "createdAt": "2024-05-01T12:00:00Z"
        }"#;

        let command: BuildCommand = serde_json::from_str(json).unwrap();
        assert_eq!(command.recipe(), "");
        assert_eq!(command.commit(), None);
        assert_eq!(command.artifact(), None);
    }

    #[test]
    fn test_build_command_rejects_missing_id() {
        let json = r#"{"siteId": "s", "repositoryUrl": "u", "branch": "main"}"#;
        assert!(serde_json::from_str::<BuildCommand>(json).is_err());
    }

    #[test]
    fn test_build_result_accessors() {
        let ok = BuildResult::succeeded("s3://bucket/art-1/");
        assert!(ok.is_success());
        assert_eq!(ok.status(), BuildStatus::Succeeded);
        assert_eq!(ok.artifact_location(), Some("s3://bucket/art-1/"));
        assert_eq!(ok.error_message(), None);

        let failed = BuildResult::failed_with_log("clone failed (exit 128)", "fatal: nope");
        assert!(!failed.is_success());
        assert_eq!(failed.status(), BuildStatus::Failed);
        assert_eq!(failed.artifact_location(), None);
        assert_eq!(failed.log_snippet(), Some("fatal: nope"));
    }

    #[test]
    fn test_sender_status_is_lenient() {
        let pending = COMMAND_JSON.replace("\"QUEUED\"", "\"PENDING\"");
        let command: BuildCommand = serde_json::from_str(&pending).unwrap();
        assert_eq!(command.status, BuildStatus::Unknown);
        assert_eq!(command.id, "b-1");

        let missing = COMMAND_JSON.replace("\"status\": \"QUEUED\",", "");
        let command: BuildCommand = serde_json::from_str(&missing).unwrap();
        assert_eq!(command.status, BuildStatus::Queued);
    }
}
