//! Artifact service
//!
//! Uploads a built output directory to the object store. Every regular
//! file under the directory becomes one object at
//! `{artifact_id}/{relative path}`.
//!
//! Uploads are not atomic: a failure part way through leaves the files
//! already written in place, and the caller treats the whole artifact as
//! failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::repository::ObjectRepository;

/// Service trait for artifact uploads
#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Uploads every regular file under `root`
    ///
    /// # Returns
    /// The artifact location, e.g. `s3://bucket/art-1/`
    async fn upload(&self, root: &Path, artifact_id: &str) -> Result<String>;
}

/// Standard implementation of ArtifactService
pub struct StandardArtifactService {
    objects: Arc<dyn ObjectRepository>,
}

impl StandardArtifactService {
    pub fn new(objects: Arc<dyn ObjectRepository>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl ArtifactService for StandardArtifactService {
    async fn upload(&self, root: &Path, artifact_id: &str) -> Result<String> {
        // A symlinked root (e.g. /tmp on macOS) would otherwise break prefix stripping
        let root = tokio::fs::canonicalize(root)
            .await
            .with_context(|| format!("Failed to resolve output directory {}", root.display()))?;

        let walk_root = root.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&walk_root))
            .await
            .context("Directory walk task failed")??;

        info!(
            "Uploading {} file(s) from {} as artifact {}",
            files.len(),
            root.display(),
            artifact_id
        );

        for file in &files {
            let key = format!("{}/{}", artifact_id, relative_key(&root, file)?);
            let content_type = content_type_for(file);
            let body = tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            debug!("Uploading {} as {}", file.display(), key);
            self.objects.put(&key, body, content_type).await?;
        }

        Ok(format!("s3://{}/{}/", self.objects.bucket(), artifact_id))
    }
}

/// Lists all regular files below `root`
///
/// Symbolic links are skipped, not followed.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?;

        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
            let file_type = entry
                .file_type()
                .with_context(|| format!("Failed to inspect {}", entry.path().display()))?;

            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            } else {
                debug!("Skipping non-regular file {}", entry.path().display());
            }
        }
    }

    Ok(files)
}

/// Object key suffix for `file`, always `/`-separated
fn relative_key(root: &Path, file: &Path) -> Result<String> {
    let relative = file
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", file.display(), root.display()))?;

    Ok(relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Content type for a file, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryObjectRepository;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("a/b/site.CSS")), "text/css");
        assert_eq!(content_type_for(Path::new("app.js")), "application/javascript");
        assert_eq!(content_type_for(Path::new("logo.svg")), "image/svg+xml");
        assert_eq!(content_type_for(Path::new("blob.bin")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("Makefile")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_upload_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), "<h1>a</h1>").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.css"), "body{}").unwrap();

        let objects = Arc::new(MemoryObjectRepository::new("sites"));
        let service = StandardArtifactService::new(objects.clone());

        let location = service.upload(dir.path(), "art-1").await.unwrap();
        assert!(location.contains("art-1/"));
        assert_eq!(location, "s3://sites/art-1/");

        let stored = objects.objects();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["art-1/a.html"].content_type, "text/html");
        assert_eq!(stored["art-1/a.html"].body, b"<h1>a</h1>".to_vec());
        assert_eq!(stored["art-1/sub/b.css"].content_type, "text/css");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_through_symlinked_root() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir_all(real.join("nested")).unwrap();
        std::fs::write(real.join("nested/page.html"), "x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let objects = Arc::new(MemoryObjectRepository::new("sites"));
        let service = StandardArtifactService::new(objects.clone());
        service.upload(&link, "art-2").await.unwrap();

        assert!(objects.objects().contains_key("art-2/nested/page.html"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_skips_symlinked_files() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("secret.txt")).unwrap();

        let objects = Arc::new(MemoryObjectRepository::new("sites"));
        let service = StandardArtifactService::new(objects.clone());
        service.upload(dir.path(), "art-3").await.unwrap();

        let stored = objects.objects();
        assert_eq!(stored.len(), 1);
        assert!(stored.contains_key("art-3/index.html"));
    }

    #[tokio::test]
    async fn test_upload_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "x").unwrap();

        let objects = Arc::new(MemoryObjectRepository::failing("sites"));
        let service = StandardArtifactService::new(objects);

        let err = service.upload(dir.path(), "art-4").await.unwrap_err();
        assert!(format!("{:#}", err).contains("art-4/index.html"));
    }

    #[tokio::test]
    async fn test_upload_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(MemoryObjectRepository::new("sites"));
        let service = StandardArtifactService::new(objects);

        assert!(service.upload(&dir.path().join("absent"), "art-5").await.is_err());
    }
}
