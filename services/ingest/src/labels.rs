//! Label extraction via an image-recognition service.

use crate::error::{IngestError, Stage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_rekognition::types::{Image, S3Object};
use aws_sdk_rekognition::Client as RekognitionClient;
use lgtm_catalog::blob_store::load_aws_config;
use lgtm_catalog::BlobLocation;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Labels are kept only when their confidence is strictly above this value.
pub const CONFIDENCE_THRESHOLD: f32 = 80.0;

/// A label as reported by the recognition service (confidence on 0-100).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f32,
}

impl DetectedLabel {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// Recognition service reading an image stored in the blob store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn detect(&self, image: &BlobLocation) -> Result<Vec<DetectedLabel>>;
}

/// Rekognition `DetectLabels` over an S3 object.
pub struct RekognitionDetector {
    client: RekognitionClient,
}

impl RekognitionDetector {
    pub async fn new(region: &str) -> Self {
        let aws_config = load_aws_config(region).await;
        Self {
            client: RekognitionClient::new(&aws_config),
        }
    }
}

#[async_trait]
impl LabelDetector for RekognitionDetector {
    async fn detect(&self, image: &BlobLocation) -> Result<Vec<DetectedLabel>> {
        let object = S3Object::builder()
            .bucket(&image.bucket)
            .name(&image.key)
            .build();

        let response = self
            .client
            .detect_labels()
            .image(Image::builder().s3_object(object).build())
            .send()
            .await
            .with_context(|| format!("DetectLabels failed for {image}"))?;

        Ok(response
            .labels()
            .iter()
            .filter_map(|label| {
                Some(DetectedLabel::new(label.name()?, label.confidence()?))
            })
            .collect())
    }
}

/// Keep the names of labels above [`CONFIDENCE_THRESHOLD`].
pub fn filter_labels(labels: &[DetectedLabel]) -> BTreeSet<String> {
    labels
        .iter()
        .filter(|label| label.confidence > CONFIDENCE_THRESHOLD)
        .map(|label| label.name.clone())
        .collect()
}

pub struct LabelExtractor {
    detector: Arc<dyn LabelDetector>,
}

impl LabelExtractor {
    pub fn new(detector: Arc<dyn LabelDetector>) -> Self {
        Self { detector }
    }

    /// One recognition call per item; an empty set is a valid result.
    #[instrument(skip(self), fields(image = %image))]
    pub async fn extract(&self, image: &BlobLocation) -> Result<BTreeSet<String>, IngestError> {
        let detected = self
            .detector
            .detect(image)
            .await
            .map_err(|e| IngestError::dependency(Stage::Recognition, e))?;

        let labels = filter_labels(&detected);
        debug!(detected = detected.len(), kept = labels.len(), "Labels extracted");
        Ok(labels)
    }
}
