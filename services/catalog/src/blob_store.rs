use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use bytes::Bytes;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Where a blob was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Write-only view of the blob store used by the pipeline
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<BlobLocation>;
}

/// Load the shared AWS configuration for a region
pub async fn load_aws_config(region: &str) -> SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = load_aws_config(&config.region).await;
        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self::with_client(client, config))
    }

    /// Wrap an already configured client
    pub fn with_client(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        }
    }

    /// Simple single-part upload for small objects
    async fn simple_upload(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }

    /// Multipart upload for large animations.
    ///
    /// A failed part or completion aborts the upload so no parts are left behind.
    async fn multipart_upload(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let result = self.upload_parts(key, upload_id, &bytes).await;
        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
            {
                warn!(
                    key = %key,
                    upload_id = %upload_id,
                    error = %e,
                    "Failed to abort multipart upload"
                );
            }
        }
        result
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, bytes: &Bytes) -> Result<()> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in bytes.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(bytes.slice_ref(chunk)))
                .send()
                .await
                .context("Failed to upload part")?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<BlobLocation> {
        let size_bytes = bytes.len();

        if size_bytes > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, bytes, content_type).await?;
        } else {
            self.simple_upload(key, bytes, content_type).await?;
        }

        debug!(key = %key, size_bytes, "Object uploaded");

        Ok(BlobLocation {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }
}

/// Content type for a media file extension
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::retry::RetryConfig;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
    use axum::extract::State;
    use axum::http::{Method, StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type CallLog = Arc<Mutex<Vec<Method>>>;

    /// Accepts the multipart create and abort calls, rejects every part
    async fn rejecting_s3(State(calls): State<CallLog>, method: Method, uri: Uri) -> Response {
        calls.lock().push(method.clone());
        let query = uri.query().unwrap_or_default();

        if method == Method::POST && query.contains("uploads") {
            let body = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                <InitiateMultipartUploadResult>\
                <Bucket>lgtm-media</Bucket><Key>lgtm/g1.gif</Key><UploadId>up-1</UploadId>\
                </InitiateMultipartUploadResult>";
            return (StatusCode::OK, body).into_response();
        }
        if method == Method::DELETE && query.contains("uploadId=up-1") {
            return StatusCode::NO_CONTENT.into_response();
        }
        (
            StatusCode::BAD_REQUEST,
            "<Error><Code>InvalidPart</Code><Message>rejected</Message></Error>",
        )
            .into_response()
    }

    #[tokio::test]
    async fn test_failed_part_aborts_multipart_upload() {
        let calls = CallLog::default();
        let app = axum::Router::new()
            .fallback(rejecting_s3)
            .with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let client_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("ap-northeast-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "static"))
            .endpoint_url(format!("http://{addr}"))
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .build();
        let config = S3Config {
            bucket: "lgtm-media".to_string(),
            region: "ap-northeast-1".to_string(),
            endpoint_url: None,
            force_path_style: true,
            namespace: "lgtm".to_string(),
            multipart_threshold_bytes: 4,
            part_size_bytes: 4,
        };
        let store = S3BlobStore::with_client(S3Client::from_conf(client_config), &config);

        let err = store
            .put("lgtm/g1.gif", Bytes::from_static(b"GIF89a-frames"), "image/gif")
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("Failed to upload part"));
        assert_eq!(*calls.lock(), vec![Method::POST, Method::PUT, Method::DELETE]);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("jpeg"), "image/jpeg");
        assert_eq!(content_type_for("JPG"), "image/jpeg");
        assert_eq!(content_type_for("gif"), "image/gif");
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("tiff"), "application/octet-stream");
    }

    #[test]
    fn test_blob_location_display() {
        let location = BlobLocation {
            bucket: "lgtm-images".to_string(),
            key: "lgtm/g1-original.jpg".to_string(),
        };
        assert_eq!(location.to_string(), "s3://lgtm-images/lgtm/g1-original.jpg");
    }
}
