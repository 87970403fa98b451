//! S3-compatible object store client

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Object store settings
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Custom endpoint (MinIO, R2, ...); path-style addressing when set
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Handle to one bucket
///
/// Stateless and cheap to clone; concurrent puts to disjoint keys need no
/// coordination.
#[derive(Debug, Clone)]
pub struct StorageClient {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl StorageClient {
    /// Builds a client from settings
    ///
    /// Static credentials are used when both key id and secret are given,
    /// otherwise the default AWS provider chain applies.
    pub async fn connect(settings: &StorageSettings) -> Result<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "bucket name cannot be empty".to_string(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(
                    key_id.clone(),
                    secret.clone(),
                    None,
                    None,
                    "kiln-static",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(ClientError::InvalidConfig(
                    "access key id and secret access key must be set together".to_string(),
                ));
            }
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(
            "Object store client ready (bucket '{}', region '{}', endpoint {})",
            settings.bucket,
            settings.region,
            settings.endpoint.as_deref().unwrap_or("default")
        );

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Uploads one object
    pub async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let size = body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                ClientError::storage(format!("put '{}': {}", key, DisplayErrorContext(&e)))
            })?;

        debug!("Stored {} ({} bytes, {})", key, size, content_type);
        Ok(())
    }
}
