use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream as AwsByteStream, Client};
use bytes::Bytes;

use crate::{BlobStore, PutResult, TransferError, TransferResult};

/// Connection settings for S3-compatible object storage
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Required by MinIO/RustFS-style endpoints
    pub force_path_style: bool,
}

impl S3Config {
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        Self {
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint_url: S) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self.force_path_style = true;
        self
    }

    pub fn with_credentials<A: Into<String>, S: Into<String>>(mut self, access_key_id: A, secret: S) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret.into());
        self
    }
}

/// Blob store backed by S3 or any S3-compatible service
#[derive(Clone)]
pub struct S3CompatibleStore {
    client: Client,
    bucket: String,
}

impl S3CompatibleStore {
    pub async fn new(config: S3Config) -> TransferResult<Self> {
        if config.bucket.trim().is_empty() {
            return Err(TransferError::invalid("S3 bucket name must not be empty"));
        }
        let bucket = config.bucket.clone();
        let client = Self::create_client(config).await;
        Ok(Self { client, bucket })
    }

    async fn create_client(config: S3Config) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region));

        if let (Some(access_key_id), Some(secret)) = (config.access_key_id, config.secret_access_key) {
            let credentials = Credentials::new(access_key_id, secret, None, None, "drive-static");
            loader = loader.credentials_provider(credentials);
        }
        if let Some(endpoint_url) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let aws_config = loader.load().await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        )
    }
}

#[async_trait]
impl BlobStore for S3CompatibleStore {
    async fn put(&self, key: &str, data: Bytes) -> TransferResult<PutResult> {
        let size_bytes = data.len() as u64;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/octet-stream")
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(TransferError::unavailable)?;

        Ok(PutResult {
            etag: result.e_tag,
            size_bytes,
        })
    }

    async fn get(&self, key: &str) -> TransferResult<Bytes> {
        let result = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    return Err(TransferError::not_found(key));
                }
                return Err(TransferError::unavailable(err));
            }
        };

        let body = result.body.collect().await.map_err(TransferError::unavailable)?;
        Ok(body.into_bytes())
    }

    async fn delete(&self, key: &str) -> TransferResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(TransferError::unavailable)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
