//! Search index client.
//!
//! The index is a derived projection of the catalog: documents are keyed by
//! catalog id and only ever written by the change-stream synchronizer.
//! Requests go over plain HTTP to an OpenSearch domain; signing is a
//! pluggable [`RequestSigner`] so deployments can choose SigV4 or nothing.

use crate::config::SearchConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, instrument};

/// Document stored in the search index for one catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: String,
    pub source: Option<String>,
    pub keyword: String,
    pub labels: Vec<String>,
    pub blob_key: Option<String>,
    pub created_at: Option<i64>,
}

/// Fields matched by keyword search
pub const SEARCH_FIELDS: [&str; 2] = ["keyword", "labels"];

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or overwrite the document at `document.id`
    async fn upsert_document(&self, document: &SearchDocument) -> Result<()>;

    /// Remove the document at `id`; removing an absent document succeeds
    async fn delete_document(&self, id: &str) -> Result<()>;

    /// Ids of documents whose `fields` fuzzily match `value`
    async fn fuzzy_search(
        &self,
        fields: &[&'static str],
        value: &str,
        max_edit_distance: u8,
        limit: usize,
    ) -> Result<Vec<String>>;
}

/// Signs outgoing search-index requests
#[async_trait]
pub trait RequestSigner: Send + Sync {
    async fn sign(&self, request: &mut reqwest::Request) -> Result<()>;
}

/// Transport for clusters that need no request signing
pub struct UnsignedTransport;

#[async_trait]
impl RequestSigner for UnsignedTransport {
    async fn sign(&self, _request: &mut reqwest::Request) -> Result<()> {
        Ok(())
    }
}

/// AWS SigV4 signing; credentials are resolved from the provider on every request
pub struct SigV4Signer {
    credentials: SharedCredentialsProvider,
    region: String,
    service: &'static str,
}

impl SigV4Signer {
    pub fn new(credentials: SharedCredentialsProvider, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: "es",
        }
    }

    /// Build a signer from the default AWS credential chain
    pub async fn from_env(region: &str) -> Result<Self> {
        let sdk_config = crate::blob_store::load_aws_config(region).await;
        let credentials = sdk_config
            .credentials_provider()
            .context("No AWS credentials provider configured")?;
        Ok(Self::new(credentials, region))
    }
}

#[async_trait]
impl RequestSigner for SigV4Signer {
    async fn sign(&self, request: &mut reqwest::Request) -> Result<()> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .context("Failed to resolve AWS credentials")?;
        let identity = credentials.into();

        let signing_params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(self.service)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .context("Failed to build signing parameters")?
            .into();

        let headers: Vec<(String, String)> = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = request
            .body()
            .and_then(|body| body.as_bytes())
            .unwrap_or_default()
            .to_vec();

        let signable = SignableRequest::new(
            request.method().as_str(),
            request.url().as_str(),
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            SignableBody::Bytes(&body),
        )
        .context("Request cannot be signed")?;

        let (instructions, _signature) = sign(signable, &signing_params)
            .context("Failed to sign request")?
            .into_parts();

        for (name, value) in instructions.headers() {
            request.headers_mut().insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        Ok(())
    }
}

/// OpenSearch document API client
pub struct OpenSearchIndex {
    http: Client,
    endpoint: String,
    index_name: String,
    signer: Arc<dyn RequestSigner>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
}

impl OpenSearchIndex {
    pub fn new(config: &SearchConfig, signer: Arc<dyn RequestSigner>) -> Self {
        info!(
            endpoint = %config.endpoint,
            index = %config.index_name,
            "Search index client initialized"
        );

        Self {
            http: Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
            signer,
        }
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}/_doc/{}", self.endpoint, self.index_name, id)
    }

    fn search_url(&self) -> String {
        format!("{}/{}/_search", self.endpoint, self.index_name)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response> {
        let mut builder = self.http.request(method, url);
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let mut request = builder.build().context("Failed to build search request")?;
        self.signer.sign(&mut request).await?;

        self.http
            .execute(request)
            .await
            .with_context(|| format!("Search index request to {url} failed"))
    }
}

/// Request body for a fuzzy multi-field match
fn fuzzy_query(
    fields: &[&str],
    value: &str,
    max_edit_distance: u8,
    limit: usize,
) -> serde_json::Value {
    json!({
        "size": limit,
        "_source": false,
        "query": {
            "multi_match": {
                "query": value,
                "fields": fields,
                "fuzziness": max_edit_distance,
            }
        }
    })
}

async fn ensure_success(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("Search index {action} failed with status {status}: {body}")
}

#[async_trait]
impl SearchIndex for OpenSearchIndex {
    #[instrument(skip(self, document), fields(id = %document.id))]
    async fn upsert_document(&self, document: &SearchDocument) -> Result<()> {
        let body = serde_json::to_vec(document)?;
        let response = self
            .send(Method::PUT, &self.document_url(&document.id), Some(body))
            .await?;
        ensure_success(response, "upsert").await?;

        debug!("Search document upserted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_document(&self, id: &str) -> Result<()> {
        let response = self.send(Method::DELETE, &self.document_url(id), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Search document already absent");
            return Ok(());
        }
        ensure_success(response, "delete").await?;

        debug!("Search document deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fuzzy_search(
        &self,
        fields: &[&'static str],
        value: &str,
        max_edit_distance: u8,
        limit: usize,
    ) -> Result<Vec<String>> {
        let body = serde_json::to_vec(&fuzzy_query(fields, value, max_edit_distance, limit))?;
        let response = self.send(Method::POST, &self.search_url(), Some(body)).await?;
        let response: SearchResponse = ensure_success(response, "search")
            .await?
            .json()
            .await
            .context("Failed to decode search response")?;

        Ok(response.hits.hits.into_iter().map(|hit| hit.id).collect())
    }
}
