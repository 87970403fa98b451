//! Build pipeline
//!
//! Turns one `BuildCommand` into one `BuildResult`:
//! clone → checkout → build → validate output → upload.
//!
//! Stages run strictly in order and any of them can end the run with a
//! failed result. A failed build is still a successfully processed
//! command; only infrastructure problems (e.g. the workspace cannot be
//! created) are returned as errors.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kiln_core::domain::build::{BuildCommand, BuildResult};
use tracing::{debug, info};

use crate::process::{CommandLine, ProcessOutcome, ProcessRunner};
use crate::service::ArtifactService;
use crate::service::ProgressSink;
use crate::workspace::BuildWorkspace;

/// Output lines kept when clone or checkout fails
const GIT_LOG_LINES: usize = 50;

/// Output lines kept when the build recipe fails
const BUILD_LOG_LINES: usize = 100;

/// Recipes (trimmed, lowercased) that mean "nothing to build"
const STATIC_RECIPES: [&str; 4] = ["", "none", "static", "skip"];

/// Service trait for running build pipelines
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Runs the full pipeline for `command`
    ///
    /// # Returns
    /// The build result, successful or not. `Err` is reserved for failures
    /// outside the build itself.
    async fn execute(&self, command: &BuildCommand) -> Result<BuildResult>;
}

/// Standard implementation of BuildService
pub struct StandardBuildService {
    runner: ProcessRunner,
    artifacts: Arc<dyn ArtifactService>,
    progress: Arc<dyn ProgressSink>,
    work_dir: PathBuf,
}

impl StandardBuildService {
    /// # Arguments
    /// * `runner` - Launches git and the build recipe
    /// * `artifacts` - Receives the validated output directory
    /// * `progress` - Observer for stage messages and subprocess output
    /// * `work_dir` - Root for per-build working directories
    pub fn new(
        runner: ProcessRunner,
        artifacts: Arc<dyn ArtifactService>,
        progress: Arc<dyn ProgressSink>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            artifacts,
            progress,
            work_dir,
        }
    }

    async fn run_stages(&self, command: &BuildCommand, repo: &Path) -> BuildResult {
        let id = command.id.as_str();

        // Clone
        self.progress.stage(
            id,
            &format!(
                "Cloning {} (branch {})",
                command.repository_url, command.branch
            ),
        );
        let clone = self
            .run_streaming(
                id,
                &git()
                    .args(["clone", "--depth", "1", "--branch"])
                    .arg(&command.branch)
                    .arg("--")
                    .arg(&command.repository_url)
                    .arg(repo.to_string_lossy()),
            )
            .await;
        if !clone.success() {
            return BuildResult::failed_with_log(
                format!("clone failed (exit {})", clone.exit_code),
                clone.last_lines(GIT_LOG_LINES),
            );
        }

        // Checkout
        if let Some(sha) = command.commit() {
            self.progress.stage(id, &format!("Checking out {}", sha));

            // Shallow clones hold only the branch tip
            let fetch = self
                .runner
                .run(
                    &git()
                        .args(["fetch", "--depth", "1", "origin", sha])
                        .current_dir(repo),
                )
                .await;
            if !fetch.success() {
                self.progress.stage(
                    id,
                    &format!("Fetching {} failed (exit {}), trying checkout", sha, fetch.exit_code),
                );
            }

            let checkout = self
                .run_streaming(
                    id,
                    &git()
                        .args(["checkout", "--quiet", sha])
                        .current_dir(repo),
                )
                .await;
            if !checkout.success() {
                return BuildResult::failed_with_log(
                    format!("checkout failed (exit {})", checkout.exit_code),
                    checkout.last_lines(GIT_LOG_LINES),
                );
            }
        }

        // Build
        let recipe = command.recipe();
        if is_static_recipe(recipe) {
            self.progress
                .stage(id, "No build command, publishing repository contents as-is");
        } else {
            self.progress.stage(id, &format!("Running build: {}", recipe.trim()));
            let build = self
                .run_streaming(id, &CommandLine::shell(recipe).current_dir(repo))
                .await;
            if !build.success() {
                return BuildResult::failed_with_log(
                    format!("build failed (exit {})", build.exit_code),
                    build.last_lines(BUILD_LOG_LINES),
                );
            }
            self.progress.stage(id, "Build finished");
        }

        // Validate output
        let shown = display_output_dir(&command.output_directory);
        let Some(output) = resolve_output_dir(repo, &command.output_directory) else {
            return BuildResult::failed(format!(
                "output directory '{}' is outside the repository",
                shown
            ));
        };
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return BuildResult::failed(format!("output directory '{}' not found", shown));
        }
        // The recipe may have created a symlink pointing elsewhere
        if !contained_in(repo, &output).await {
            return BuildResult::failed(format!(
                "output directory '{}' is outside the repository",
                shown
            ));
        }

        // Upload
        let Some(artifact_id) = command.artifact() else {
            return BuildResult::failed("no artifact id provided");
        };

        self.progress
            .stage(id, &format!("Uploading artifact {}", artifact_id));
        match self.artifacts.upload(&output, artifact_id).await {
            Ok(location) => {
                self.progress.stage(id, &format!("Artifact stored at {}", location));
                BuildResult::succeeded(location)
            }
            Err(e) => BuildResult::failed(format!("upload failed: {:#}", e)),
        }
    }

    /// Runs a command, forwarding each output line to the progress sink
    async fn run_streaming(&self, build_id: &str, command: &CommandLine) -> ProcessOutcome {
        let mut process = match self.runner.spawn(command) {
            Ok(process) => process,
            Err(outcome) => {
                self.progress.output(build_id, outcome.output.trim_end());
                return outcome;
            }
        };

        while let Some(line) = process.next_line().await {
            self.progress.output(build_id, &line);
        }

        process.finish().await
    }
}

#[async_trait]
impl BuildService for StandardBuildService {
    async fn execute(&self, command: &BuildCommand) -> Result<BuildResult> {
        info!(
            "Starting build {} for site {} ({} @ {})",
            command.id, command.site_id, command.repository_url, command.branch
        );

        let workspace = BuildWorkspace::create(&self.work_dir, &command.id).await?;
        debug!("Build {} working in {}", command.id, workspace.path().display());
        let result = self.run_stages(command, &workspace.repo_dir()).await;
        workspace.close().await;

        match &result {
            BuildResult::Succeeded { artifact_location } => {
                info!("Build {} succeeded: {}", command.id, artifact_location)
            }
            BuildResult::Failed { error_message, .. } => {
                info!("Build {} failed: {}", command.id, error_message)
            }
        }

        Ok(result)
    }
}

fn git() -> CommandLine {
    CommandLine::new("git").env("GIT_TERMINAL_PROMPT", "0")
}

/// True when the recipe is one of the "nothing to build" sentinels
pub fn is_static_recipe(recipe: &str) -> bool {
    let normalized = recipe.trim().to_lowercase();
    STATIC_RECIPES.contains(&normalized.as_str())
}

/// Resolves the output directory inside the repository
///
/// Blank or `.` means the repository root and leading slashes are dropped.
/// Returns `None` for paths with a `..` component. Symlinks are not
/// followed here; see `contained_in`.
pub fn resolve_output_dir(repo: &Path, output_directory: &str) -> Option<PathBuf> {
    let dir = output_directory.trim().trim_start_matches('/');
    if dir.is_empty() || dir == "." {
        return Some(repo.to_path_buf());
    }

    let relative = Path::new(dir);
    if relative
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return None;
    }
    Some(repo.join(relative))
}

/// True when `path` still lies inside `repo` once symlinks are resolved
async fn contained_in(repo: &Path, path: &Path) -> bool {
    match (
        tokio::fs::canonicalize(repo).await,
        tokio::fs::canonicalize(path).await,
    ) {
        (Ok(repo), Ok(path)) => path.starts_with(repo),
        _ => false,
    }
}

fn display_output_dir(output_directory: &str) -> &str {
    match output_directory.trim() {
        "" => ".",
        dir => dir,
    }
}
