//! Status reporting
//!
//! Publishes the RUNNING event when a command is picked up and exactly one
//! terminal event once its pipeline returns. Publish failures are returned
//! to the caller untouched; there is no retry here.

use std::sync::Arc;

use anyhow::Result;
use kiln_core::domain::build::{BuildCommand, BuildResult};
use kiln_core::dto::status::BuildStatusUpdate;
use tracing::debug;

use crate::repository::StatusRepository;

/// Publishes build status events
pub struct StatusReporter {
    repository: Arc<dyn StatusRepository>,
}

impl StatusReporter {
    pub fn new(repository: Arc<dyn StatusRepository>) -> Self {
        Self { repository }
    }

    /// Reports that `command` started processing
    pub async fn running(&self, command: &BuildCommand) -> Result<()> {
        let update = BuildStatusUpdate::running(command);
        self.repository.publish(&update).await?;
        debug!("Published RUNNING for build {}", command.id);
        Ok(())
    }

    /// Reports the terminal outcome of `command`
    pub async fn finished(&self, command: &BuildCommand, result: &BuildResult) -> Result<()> {
        let update = BuildStatusUpdate::finished(command, result);
        self.repository.publish(&update).await?;
        debug!("Published {} for build {}", update.status, command.id);
        Ok(())
    }
}
