use crate::config::S3Config;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Object-store seam for the file processor.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the file at `path` under `key`; returns the permanent
    /// location. Re-uploading an existing key overwrites it, which is how
    /// redelivered events stay idempotent.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String>;
}

/// Derive the object key for a file. Deterministic, so a redelivered event
/// writes to the same key.
pub fn object_key(file_id: &Uuid) -> String {
    file_id.to_string()
}

/// Format the permanent location recorded on the file record.
pub fn object_location(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

/// S3-backed object store with lazy bucket bootstrap
pub struct ObjectStore {
    client: S3Client,
    bucket: String,
    bucket_ready: OnceCell<()>,
}

impl ObjectStore {
    /// Create a new object store client
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Object store client initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            bucket_ready: OnceCell::new(),
        })
    }

    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self) -> Result<()> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        match self
            .client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => {
                info!(bucket = %self.bucket, "Created storage bucket");
                Ok(())
            }
            Err(e) => {
                // Another writer may have created it between the check and
                // the call.
                let already_exists = e
                    .as_service_error()
                    .map(|err| {
                        err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists()
                    })
                    .unwrap_or(false);

                if already_exists {
                    Ok(())
                } else {
                    Err(e).context("Failed to create storage bucket")
                }
            }
        }
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait::async_trait]
impl BlobStore for ObjectStore {
    #[instrument(skip(self, path), fields(key = %key))]
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String> {
        self.bucket_ready
            .get_or_try_init(|| self.ensure_bucket())
            .await?;

        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to read staged file {}", path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload file to object store")?;

        let location = object_location(&self.bucket, key);
        debug!(location = %location, "File uploaded");

        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_is_deterministic() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(object_key(&id), object_key(&id));
        assert_eq!(object_key(&id), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_object_location_format() {
        assert_eq!(
            object_location("uploads", "550e8400-e29b-41d4-a716-446655440000"),
            "s3://uploads/550e8400-e29b-41d4-a716-446655440000"
        );
    }
}
