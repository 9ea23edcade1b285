//! Image source adapter for the Unsplash and Giphy search APIs.
//!
//! Each provider's JSON is mapped into [`CandidateItem`]; everything else in
//! the response is dropped. Candidates come out as a lazy stream that issues
//! one HTTP call per provider page.

use crate::config::{GiphyMode, SourcesConfig};
use crate::error::IngestError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use lgtm_catalog::{CandidateItem, Source};
use serde::Deserialize;
use std::future::Future;
use tracing::{debug, instrument, warn};

/// Produces candidate items for a keyword.
#[cfg_attr(test, mockall::automock)]
pub trait ImageSource: Send + Sync {
    /// Lazy, finite sequence of candidates. A provider error ends the
    /// sequence with `SourceUnavailable`.
    fn candidates(
        &self,
        source: Source,
        keyword: &str,
    ) -> BoxStream<'static, Result<CandidateItem, IngestError>>;
}

/// Downloads candidate media.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// One provider page after mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<CandidateItem>,
    /// Whether the provider may have another page
    pub more: bool,
}

#[derive(Debug, Deserialize)]
struct UnsplashSearch {
    #[serde(default)]
    results: Vec<UnsplashPhoto>,
}

#[derive(Debug, Deserialize)]
struct UnsplashPhoto {
    id: Option<String>,
    urls: Option<UnsplashUrls>,
}

#[derive(Debug, Deserialize)]
struct UnsplashUrls {
    full: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GiphySearch {
    #[serde(default)]
    data: Vec<GiphyGif>,
}

#[derive(Debug, Deserialize)]
struct GiphyRandom {
    data: GiphyRandomData,
}

/// The random endpoint answers `"data": []` when nothing matches the tag.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GiphyRandomData {
    Many(Vec<GiphyGif>),
    One(GiphyGif),
}

#[derive(Debug, Deserialize)]
struct GiphyGif {
    id: Option<String>,
    images: Option<GiphyImages>,
}

#[derive(Debug, Deserialize)]
struct GiphyImages {
    original: Option<GiphyRendition>,
}

#[derive(Debug, Deserialize)]
struct GiphyRendition {
    url: Option<String>,
}

fn candidate(
    source: Source,
    keyword: &str,
    id: Option<String>,
    url: Option<String>,
) -> Option<CandidateItem> {
    match (id, url) {
        (Some(identifier), Some(origin_url))
            if !identifier.is_empty() && !origin_url.is_empty() =>
        {
            Some(CandidateItem {
                identifier,
                source,
                origin_url,
                search_keyword: keyword.to_string(),
            })
        }
        _ => {
            warn!(source = %source, keyword = %keyword, "Dropping result without id or URL");
            None
        }
    }
}

fn giphy_candidate(gif: GiphyGif, keyword: &str) -> Option<CandidateItem> {
    let url = gif.images.and_then(|i| i.original).and_then(|o| o.url);
    candidate(Source::Giphy, keyword, gif.id, url)
}

/// Map an Unsplash `search/photos` response.
pub fn parse_unsplash(body: &[u8], keyword: &str, per_page: u32) -> serde_json::Result<Page> {
    let response: UnsplashSearch = serde_json::from_slice(body)?;
    let more = response.results.len() >= per_page as usize;
    let items = response
        .results
        .into_iter()
        .filter_map(|photo| {
            let url = photo.urls.and_then(|u| u.full);
            candidate(Source::Unsplash, keyword, photo.id, url)
        })
        .collect();
    Ok(Page { items, more })
}

/// Map a Giphy `gifs/search` response.
pub fn parse_giphy_search(body: &[u8], keyword: &str, limit: u32) -> serde_json::Result<Page> {
    let response: GiphySearch = serde_json::from_slice(body)?;
    let more = response.data.len() >= limit as usize;
    let items = response
        .data
        .into_iter()
        .filter_map(|gif| giphy_candidate(gif, keyword))
        .collect();
    Ok(Page { items, more })
}

/// Map a Giphy `gifs/random` response; always a single page.
pub fn parse_giphy_random(body: &[u8], keyword: &str) -> serde_json::Result<Page> {
    let response: GiphyRandom = serde_json::from_slice(body)?;
    let gifs = match response.data {
        GiphyRandomData::Many(gifs) => gifs,
        GiphyRandomData::One(gif) => vec![gif],
    };
    let items = gifs
        .into_iter()
        .filter_map(|gif| giphy_candidate(gif, keyword))
        .collect();
    Ok(Page { items, more: false })
}

/// Drive a page fetcher into a candidate stream.
///
/// Stops after `max_pages`, on a page that signals no more results, on an
/// empty page, or on the first error.
pub fn paginate<F, Fut>(
    max_pages: u32,
    fetch_page: F,
) -> BoxStream<'static, Result<CandidateItem, IngestError>>
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Page, IngestError>> + Send + 'static,
{
    stream::try_unfold((0u32, false), move |(page, done)| {
        let next = (!done && page < max_pages).then(|| fetch_page(page));
        async move {
            let Some(next) = next else {
                return Ok(None);
            };
            let fetched = next.await?;
            if fetched.items.is_empty() && !fetched.more {
                return Ok(None);
            }
            Ok(Some((fetched.items, (page + 1, !fetched.more))))
        }
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, IngestError>)))
    .try_flatten()
    .boxed()
}

/// reqwest-backed source and fetcher.
#[derive(Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
    config: SourcesConfig,
}

impl HttpImageSource {
    pub fn new(config: SourcesConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("lgtm-ingest/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    /// Build the provider request for a zero-based page index.
    pub fn page_request(
        &self,
        source: Source,
        keyword: &str,
        page: u32,
    ) -> reqwest::Result<reqwest::Request> {
        match source {
            Source::Unsplash => {
                let unsplash = &self.config.unsplash;
                self.client
                    .get(format!("{}/search/photos", unsplash.base_url.trim_end_matches('/')))
                    .query(&[
                        ("query", keyword.to_string()),
                        ("order_by", "latest".to_string()),
                        ("per_page", unsplash.per_page.to_string()),
                        ("page", (page + 1).to_string()),
                        ("client_id", unsplash.api_key.clone()),
                    ])
                    .build()
            }
            Source::Giphy => {
                let giphy = &self.config.giphy;
                let base = giphy.base_url.trim_end_matches('/');
                match giphy.mode {
                    GiphyMode::Search => self
                        .client
                        .get(format!("{base}/v1/gifs/search"))
                        .query(&[
                            ("api_key", giphy.api_key.clone()),
                            ("q", keyword.to_string()),
                            ("limit", giphy.limit.to_string()),
                            ("offset", (page * giphy.limit).to_string()),
                            ("rating", giphy.rating.clone()),
                            ("lang", "en".to_string()),
                            ("bundle", "messaging_non_clips".to_string()),
                            ("sort", "newest".to_string()),
                        ])
                        .build(),
                    GiphyMode::Random => self
                        .client
                        .get(format!("{base}/v1/gifs/random"))
                        .query(&[("api_key", giphy.api_key.clone()), ("tag", keyword.to_string())])
                        .build(),
                }
            }
        }
    }

    fn parse_page(&self, source: Source, keyword: &str, body: &[u8]) -> serde_json::Result<Page> {
        match source {
            Source::Unsplash => parse_unsplash(body, keyword, self.config.unsplash.per_page),
            Source::Giphy => match self.config.giphy.mode {
                GiphyMode::Search => parse_giphy_search(body, keyword, self.config.giphy.limit),
                GiphyMode::Random => parse_giphy_random(body, keyword),
            },
        }
    }

    #[instrument(skip(self))]
    async fn fetch_page(
        &self,
        source: Source,
        keyword: &str,
        page: u32,
    ) -> Result<Page, IngestError> {
        let unavailable = |message: String| IngestError::SourceUnavailable {
            provider: source,
            message,
        };

        let request = self
            .page_request(source, keyword, page)
            .map_err(|e| unavailable(format!("invalid request: {e}")))?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| unavailable(format!("failed to read response: {e}")))?;
        let parsed = self
            .parse_page(source, keyword, &body)
            .map_err(|e| unavailable(format!("malformed response: {e}")))?;

        debug!(page = page, items = parsed.items.len(), "Fetched provider page");
        Ok(parsed)
    }
}

impl ImageSource for HttpImageSource {
    fn candidates(
        &self,
        source: Source,
        keyword: &str,
    ) -> BoxStream<'static, Result<CandidateItem, IngestError>> {
        let this = self.clone();
        let keyword = keyword.to_string();
        let max_pages = match (source, self.config.giphy.mode) {
            (Source::Giphy, GiphyMode::Random) => 1,
            _ => self.config.max_pages,
        };

        paginate(max_pages, move |page| {
            let this = this.clone();
            let keyword = keyword.clone();
            async move { this.fetch_page(source, &keyword, page).await }
        })
    }
}

#[async_trait]
impl MediaFetcher for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?
            .error_for_status()
            .with_context(|| format!("Download rejected for {url}"))?;

        response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {url}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const UNSPLASH_FIXTURE: &str = r#"{
        "total": 2,
        "results": [
            {"id": "u1", "slug": "a-cat", "urls": {"raw": "https://images.unsplash.com/raw1", "full": "https://images.unsplash.com/full1"}},
            {"id": "u2", "urls": {"thumb": "https://images.unsplash.com/thumb2"}},
            {"id": "u3", "urls": {"full": "https://images.unsplash.com/full3"}, "likes": 10}
        ]
    }"#;

    const GIPHY_SEARCH_FIXTURE: &str = r#"{
        "data": [
            {"id": "g1", "type": "gif", "images": {"original": {"url": "https://media.giphy.com/g1.gif", "width": "480"}}},
            {"id": "g2", "images": {}}
        ],
        "pagination": {"total_count": 2, "count": 2, "offset": 0},
        "meta": {"status": 200}
    }"#;

    fn sources_config() -> SourcesConfig {
        serde_json::from_value(serde_json::json!({
            "unsplash": { "api_key": "u-key", "base_url": "https://api.unsplash.test/" },
            "giphy": { "api_key": "g-key", "base_url": "https://api.giphy.test", "limit": 25 },
            "max_pages": 3
        }))
        .unwrap()
    }

    fn item(id: &str) -> CandidateItem {
        CandidateItem {
            identifier: id.to_string(),
            source: Source::Giphy,
            origin_url: format!("https://example/{id}.gif"),
            search_keyword: "lgtm".to_string(),
        }
    }

    #[test]
    fn test_parse_unsplash_maps_uniform_fields() {
        let page = parse_unsplash(UNSPLASH_FIXTURE.as_bytes(), "cat", 100).unwrap();

        assert!(!page.more);
        assert_eq!(page.items.len(), 2);
        assert_eq!(
            page.items[0],
            CandidateItem {
                identifier: "u1".to_string(),
                source: Source::Unsplash,
                origin_url: "https://images.unsplash.com/full1".to_string(),
                search_keyword: "cat".to_string(),
            }
        );
        assert_eq!(page.items[1].identifier, "u3");
    }

    #[test]
    fn test_parse_unsplash_full_page_has_more() {
        let page = parse_unsplash(UNSPLASH_FIXTURE.as_bytes(), "cat", 3).unwrap();
        assert!(page.more);
    }

    #[test]
    fn test_parse_giphy_search() {
        let page = parse_giphy_search(GIPHY_SEARCH_FIXTURE.as_bytes(), "lgtm", 2).unwrap();

        assert!(page.more);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].identifier, "g1");
        assert_eq!(page.items[0].source, Source::Giphy);
        assert_eq!(page.items[0].origin_url, "https://media.giphy.com/g1.gif");
    }

    #[test]
    fn test_parse_giphy_random() {
        let single = r#"{"data": {"id": "r1", "images": {"original": {"url": "https://media.giphy.com/r1.gif"}}}}"#;
        let page = parse_giphy_random(single.as_bytes(), "lgtm").unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.more);

        let empty = r#"{"data": [], "meta": {"status": 200}}"#;
        assert!(parse_giphy_random(empty.as_bytes(), "lgtm").unwrap().items.is_empty());
    }

    #[test]
    fn test_parse_malformed_body() {
        assert!(parse_giphy_search(b"<html>", "lgtm", 50).is_err());
    }

    #[test]
    fn test_unsplash_request() {
        let source = HttpImageSource::new(sources_config()).unwrap();
        let request = source.page_request(Source::Unsplash, "cat", 1).unwrap();
        let url = request.url();

        assert_eq!(url.host_str(), Some("api.unsplash.test"));
        assert_eq!(url.path(), "/search/photos");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("query".to_string(), "cat".to_string())));
        assert!(query.contains(&("per_page".to_string(), "100".to_string())));
        assert!(query.contains(&("page".to_string(), "2".to_string())));
        assert!(query.contains(&("order_by".to_string(), "latest".to_string())));
        assert!(query.contains(&("client_id".to_string(), "u-key".to_string())));
    }

    #[test]
    fn test_giphy_requests() {
        let mut config = sources_config();
        let source = HttpImageSource::new(config.clone()).unwrap();
        let request = source.page_request(Source::Giphy, "looks good", 2).unwrap();
        assert_eq!(request.url().path(), "/v1/gifs/search");
        let query: Vec<(String, String)> = request.url().query_pairs().into_owned().collect();
        assert!(query.contains(&("q".to_string(), "looks good".to_string())));
        assert!(query.contains(&("offset".to_string(), "50".to_string())));
        assert!(query.contains(&("limit".to_string(), "25".to_string())));
        assert!(query.contains(&("api_key".to_string(), "g-key".to_string())));

        config.giphy.mode = GiphyMode::Random;
        let source = HttpImageSource::new(config).unwrap();
        let request = source.page_request(Source::Giphy, "lgtm", 0).unwrap();
        assert_eq!(request.url().path(), "/v1/gifs/random");
        let query: Vec<(String, String)> = request.url().query_pairs().into_owned().collect();
        assert!(query.contains(&("tag".to_string(), "lgtm".to_string())));
    }

    #[tokio::test]
    async fn test_paginate_stops_on_short_page() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let stream = paginate(5, move |page| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, IngestError>(match page {
                    0 => Page {
                        items: vec![item("a"), item("b")],
                        more: true,
                    },
                    _ => Page {
                        items: vec![item("c")],
                        more: false,
                    },
                })
            }
        });

        let ids: Vec<String> = stream
            .map_ok(|c| c.identifier)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_paginate_respects_max_pages() {
        let stream = paginate(2, |page| async move {
            Ok::<_, IngestError>(Page {
                items: vec![item(&format!("p{page}"))],
                more: true,
            })
        });
        let items: Vec<CandidateItem> = stream.try_collect().await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_paginate_is_lazy() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut stream = paginate(5, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, IngestError>(Page {
                    items: vec![item("x"), item("y")],
                    more: true,
                })
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        stream.next().await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paginate_surfaces_source_unavailable() {
        let stream = paginate(3, |page| async move {
            if page == 0 {
                Ok(Page {
                    items: vec![item("a")],
                    more: true,
                })
            } else {
                Err(IngestError::SourceUnavailable {
                    provider: Source::Giphy,
                    message: "HTTP 500 Internal Server Error".to_string(),
                })
            }
        });

        let results: Vec<Result<CandidateItem, IngestError>> = stream.collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(IngestError::SourceUnavailable { .. })));
    }

    /// Giphy search stub: the first `ok_pages` calls return one GIF, later calls `status`
    async fn giphy_stub(ok_pages: u32, status: StatusCode) -> (String, Arc<AtomicU32>) {
        async fn search(
            State((hits, ok_pages, status)): State<(Arc<AtomicU32>, u32, StatusCode)>,
        ) -> Response {
            let call = hits.fetch_add(1, Ordering::SeqCst);
            if call < ok_pages {
                let url = format!("https://media.giphy.com/g{call}.gif");
                let body = serde_json::json!({
                    "data": [{ "id": format!("g{call}"), "images": { "original": { "url": url } } }]
                });
                axum::Json(body).into_response()
            } else {
                (status, "provider refused").into_response()
            }
        }

        let hits = Arc::new(AtomicU32::new(0));
        let app = axum::Router::new()
            .route("/v1/gifs/search", axum::routing::get(search))
            .with_state((hits.clone(), ok_pages, status));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        (format!("http://{addr}"), hits)
    }

    fn local_giphy(base_url: &str) -> HttpImageSource {
        let mut config = sources_config();
        config.giphy.base_url = base_url.to_string();
        config.giphy.limit = 1;
        HttpImageSource::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_rejected_first_page_is_source_unavailable() {
        let (base_url, hits) = giphy_stub(0, StatusCode::TOO_MANY_REQUESTS).await;
        let source = local_giphy(&base_url);

        let results: Vec<_> = source.candidates(Source::Giphy, "lgtm").collect().await;

        assert_eq!(results.len(), 1);
        let err = tokio_test::assert_err!(&results[0]);
        assert!(matches!(
            err,
            IngestError::SourceUnavailable {
                provider: Source::Giphy,
                ..
            }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_success_page_ends_candidate_sequence() {
        let (base_url, hits) = giphy_stub(1, StatusCode::INTERNAL_SERVER_ERROR).await;
        let source = local_giphy(&base_url);

        let results: Vec<_> = source.candidates(Source::Giphy, "lgtm").collect().await;

        assert_eq!(results.len(), 2);
        let first = tokio_test::assert_ok!(&results[0]);
        assert_eq!(first.identifier, "g0");
        match &results[1] {
            Err(IngestError::SourceUnavailable { message, .. }) => assert!(message.contains("500")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
