use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::contracts::{ObjectStore, ObjectStoreInfo, StorageError};
use crate::s3_retry;
use crate::storage::retry::RetryConfig;

/// S3-backed storage for purchase images.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    /// Prefix for public object URLs, without trailing slash
    public_url_base: String,
    /// Retry configuration for S3 operations
    retry_config: RetryConfig,
}

impl S3ObjectStore {
    /// Creates a new S3 store with default AWS configuration and retry settings.
    pub async fn new(bucket: impl Into<String>) -> Result<Self, StorageError> {
        Self::new_with_retry(bucket, RetryConfig::from_env()).await
    }

    /// Creates a new S3 store with custom retry configuration.
    pub async fn new_with_retry(
        bucket: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Result<Self, StorageError> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = Client::new(&config);
        let bucket = bucket.into();
        let region = config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "us-east-1".into());

        Ok(Self {
            client,
            public_url_base: aws_public_url_base(&bucket, &region),
            bucket,
            retry_config,
        })
    }

    /// Creates a new S3 store with a custom endpoint (for MinIO/LocalStack).
    pub async fn with_endpoint(
        bucket: impl Into<String>,
        endpoint: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, StorageError> {
        Self::with_endpoint_and_retry(bucket, endpoint, region, RetryConfig::from_env()).await
    }

    /// Creates a new S3 store with a custom endpoint and retry configuration.
    pub async fn with_endpoint_and_retry(
        bucket: impl Into<String>,
        endpoint: impl Into<String>,
        region: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Result<Self, StorageError> {
        let endpoint = endpoint.into();
        let region = region.into();
        let bucket = bucket.into();

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region))
            .load()
            .await;

        let s3_config = S3ConfigBuilder::from(&config)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(s3_config);

        Ok(Self {
            client,
            public_url_base: endpoint_public_url_base(&endpoint, &bucket),
            bucket,
            retry_config,
        })
    }

    /// Overrides the prefix used to build public URLs (e.g. a CDN host).
    pub fn with_public_url_base(mut self, base: impl Into<String>) -> Self {
        self.public_url_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Public URL for an object key.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url_base, key)
    }
}

fn aws_public_url_base(bucket: &str, region: &str) -> String {
    format!("https://{}.s3.{}.amazonaws.com", bucket, region)
}

fn endpoint_public_url_base(endpoint: &str, bucket: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), bucket)
}

impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if body.is_empty() {
            return Err(StorageError::InvalidInput("Cannot store empty object".into()));
        }
        let size = body.len();

        let client = &self.client;
        let bucket = &self.bucket;
        s3_retry!(
            operation = {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(body.clone())) // Bytes::clone is cheap (ref-counted)
                    .content_type(content_type)
                    .send()
                    .await
            },
            retry_config = self.retry_config,
            context = format!("PUT {}", key),
        )?;

        tracing::debug!(bucket = %self.bucket, key, size, "Stored object");

        Ok(self.public_url(key))
    }

    fn storage_info(&self) -> ObjectStoreInfo {
        ObjectStoreInfo {
            storage_type: "s3".into(),
            bucket: self.bucket.clone(),
            public_url_base: self.public_url_base.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aws_public_url_base() {
        assert_eq!(
            aws_public_url_base("dijes", "sa-east-1"),
            "https://dijes.s3.sa-east-1.amazonaws.com"
        );
    }

    #[test]
    fn test_endpoint_public_url_base_uses_path_style() {
        assert_eq!(
            endpoint_public_url_base("http://localhost:9000/", "dijes"),
            "http://localhost:9000/dijes"
        );
    }
}
