//! Per-build working directory
//!
//! Every build gets `{work_dir}/{sanitized id}`, created fresh and removed
//! by `close`. A workspace dropped without `close` (a panicking build) is
//! removed on the blocking pool.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Scoped working directory for one build
pub struct BuildWorkspace {
    root: PathBuf,
}

impl BuildWorkspace {
    /// Creates an empty workspace for `build_id` under `work_dir`
    ///
    /// Leftovers from an earlier attempt of the same build are removed.
    pub async fn create(work_dir: &Path, build_id: &str) -> Result<Self> {
        let root = work_dir.join(sanitize_id(build_id));

        if tokio::fs::try_exists(&root).await.unwrap_or(false) {
            debug!("Removing stale workspace {}", root.display());
            tokio::fs::remove_dir_all(&root)
                .await
                .with_context(|| format!("Failed to remove stale workspace {}", root.display()))?;
        }

        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create workspace {}", root.display()))?;

        debug!("Created workspace {}", root.display());
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Where the repository is cloned
    pub fn repo_dir(&self) -> PathBuf {
        self.root.join("repo")
    }

    /// Removes the workspace and everything in it
    pub async fn close(mut self) {
        let root = std::mem::take(&mut self.root);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => debug!("Removed workspace {}", root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", root.display(), e),
        }
    }
}

impl Drop for BuildWorkspace {
    fn drop(&mut self) {
        // Empty after close
        if self.root.as_os_str().is_empty() {
            return;
        }

        let root = std::mem::take(&mut self.root);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_blocking(&root));
            }
            Err(_) => remove_blocking(&root),
        }
    }
}

fn remove_blocking(root: &Path) {
    match std::fs::remove_dir_all(root) {
        Ok(()) => debug!("Removed workspace {}", root.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove workspace {}: {}", root.display(), e),
    }
}

/// Maps a build id onto a single safe path segment
///
/// ASCII letters, digits and `-` are kept. Every other byte, `_` included,
/// becomes `_XX` with its uppercase hex value, so distinct ids never share
/// a directory. The empty id maps to `_`, which no other id can produce.
pub fn sanitize_id(build_id: &str) -> String {
    if build_id.is_empty() {
        return "_".to_string();
    }

    let mut sanitized = String::with_capacity(build_id.len());
    for byte in build_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            sanitized.push(char::from(byte));
        } else {
            sanitized.push_str(&format!("_{:02X}", byte));
        }
    }
    sanitized
}
