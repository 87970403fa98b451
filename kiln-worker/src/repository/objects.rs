//! Object repository
//!
//! Stores artifact files in the object store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_client::StorageClient;

/// Repository trait for object store writes
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Bucket the objects land in
    fn bucket(&self) -> &str;

    /// Stores one object under `key`
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;
}

/// S3 implementation of ObjectRepository
pub struct S3ObjectRepository {
    client: StorageClient,
}

impl S3ObjectRepository {
    pub fn new(client: StorageClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectRepository for S3ObjectRepository {
    fn bucket(&self) -> &str {
        self.client.bucket()
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object(key, body, content_type)
            .await
            .with_context(|| format!("Failed to store object '{}'", key))
    }
}
