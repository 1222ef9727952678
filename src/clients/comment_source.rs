//! HTTP client for the comment source service.
//!
//! Pages through `GET v1/items/{external_id}/comments` until the requested number of
//! comments is collected or the service stops returning a page token.
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::util::retry::{RetryConfig, with_retry};

/// Upper bound the service accepts for a single page.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct CommentDto {
    #[serde(default, alias = "comment_id")]
    pub(crate) id: Option<String>,
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) like_count: u64,
    #[serde(default)]
    pub(crate) author: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentsPage {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    comments: Vec<CommentDto>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Title and comments of one item, in service order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CommentListing {
    pub(crate) title: Option<String>,
    pub(crate) comments: Vec<CommentDto>,
}

#[derive(Debug, Clone)]
pub(crate) struct CommentSourceConfig {
    pub(crate) base_url: String,
    pub(crate) timeout: Duration,
    pub(crate) service_token: Option<String>,
    pub(crate) retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub(crate) struct CommentSourceClient {
    client: Client,
    base_url: Url,
    service_token: Option<String>,
    retry: RetryConfig,
}

impl CommentSourceClient {
    /// # Errors
    /// Returns an error when the base URL does not parse or the HTTP client cannot be built.
    pub(crate) fn new(config: CommentSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build comment source HTTP client")?;
        let base_url = super::parse_base_url(&config.base_url, "comment source")?;

        Ok(Self {
            client,
            base_url,
            service_token: config.service_token,
            retry: config.retry,
        })
    }

    /// Fetches up to `limit` comments for `external_id`.
    ///
    /// # Errors
    /// Returns an error when a page request fails after retries or its body does not decode.
    pub(crate) async fn fetch_comments(
        &self,
        external_id: &str,
        limit: usize,
    ) -> Result<CommentListing> {
        let mut listing = CommentListing::default();
        let mut page_token: Option<String> = None;
        let mut page_count = 0;

        while listing.comments.len() < limit {
            page_count += 1;
            let page_size = (limit - listing.comments.len()).min(MAX_PAGE_SIZE);
            let url = self.page_url(external_id, page_size, page_token.as_deref())?;

            let page = with_retry(self.retry, "comment_source.fetch_page", || {
                self.fetch_page(url.clone())
            })
            .await
            .with_context(|| format!("comment source request failed for item {external_id}"))?;

            if listing.title.is_none() {
                listing.title = page.title.filter(|title| !title.trim().is_empty());
            }
            let received = page.comments.len();
            listing.comments.extend(page.comments);
            debug!(
                external_id,
                page = page_count,
                received,
                total = listing.comments.len(),
                "fetched comment page"
            );

            match page.next_page_token {
                Some(token) if received > 0 => page_token = Some(token),
                _ => break,
            }
        }

        listing.comments.truncate(limit);
        Ok(listing)
    }

    fn page_url(&self, external_id: &str, limit: usize, page_token: Option<&str>) -> Result<Url> {
        let mut url = self
            .base_url
            .join("v1/items/")
            .context("failed to build comments URL")?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("comment source base URL cannot carry a path"))?
            .pop_if_empty()
            .push(external_id)
            .push("comments");
        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("limit", &limit.to_string());
            if let Some(token) = page_token {
                query_pairs.append_pair("page_token", token);
            }
        }
        Ok(url)
    }

    async fn fetch_page(&self, url: Url) -> Result<CommentsPage, reqwest::Error> {
        let mut request = self.client.get(url);
        if let Some(ref token) = self.service_token {
            request = request.header("X-Service-Token", token);
        }
        request
            .send()
            .await?
            .error_for_status()?
            .json::<CommentsPage>()
            .await
    }

    /// # Errors
    /// Returns an error when the health endpoint is unreachable or answers with an error status.
    pub(crate) async fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("v1/health")
            .context("failed to build health URL")?;

        self.client
            .get(url)
            .send()
            .await
            .context("comment source health request failed")?
            .error_for_status()
            .context("comment source health endpoint returned error status")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> CommentSourceConfig {
        CommentSourceConfig {
            base_url,
            timeout: Duration::from_secs(5),
            service_token: Some("test-token".to_string()),
            retry: RetryConfig::new(3, 1, 5),
        }
    }

    #[tokio::test]
    async fn ping_succeeds_for_ok_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = CommentSourceClient::new(test_config(server.uri())).expect("client builds");
        client.ping().await.expect("ping succeeds");
    }

    #[tokio::test]
    async fn fetches_single_page_with_service_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/items/vid-1/comments"))
            .and(header("X-Service-Token", "test-token"))
            .and(query_param("limit", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "Launch video",
                "comments": [
                    {"id": "c1", "text": "great launch", "like_count": 4, "author": "ann"},
                    {"comment_id": "c2", "text": "too expensive"}
                ],
                "next_page_token": null
            })))
            .mount(&server)
            .await;

        let client = CommentSourceClient::new(test_config(server.uri())).expect("client builds");
        let listing = client
            .fetch_comments("vid-1", 10)
            .await
            .expect("fetch succeeds");

        assert_eq!(listing.title.as_deref(), Some("Launch video"));
        assert_eq!(listing.comments.len(), 2);
        assert_eq!(listing.comments[0].id.as_deref(), Some("c1"));
        assert_eq!(listing.comments[0].like_count, 4);
        assert_eq!(listing.comments[1].id.as_deref(), Some("c2"));
        assert_eq!(listing.comments[1].author, None);
    }

    #[tokio::test]
    async fn follows_page_tokens_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/items/vid-2/comments"))
            .and(query_param_is_missing("page_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "comments": [{"id": "c1", "text": "first page"}],
                "next_page_token": "p2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/items/vid-2/comments"))
            .and(query_param("page_token", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "comments": [{"id": "c2", "text": "second page"}],
                "next_page_token": null
            })))
            .mount(&server)
            .await;

        let client = CommentSourceClient::new(test_config(server.uri())).expect("client builds");
        let listing = client
            .fetch_comments("vid-2", 50)
            .await
            .expect("fetch succeeds");

        let ids: Vec<_> = listing
            .comments
            .iter()
            .filter_map(|c| c.id.as_deref())
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(listing.title, None);
    }

    #[tokio::test]
    async fn stops_at_the_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/items/vid-3/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "comments": [
                    {"id": "c1", "text": "one"},
                    {"id": "c2", "text": "two"},
                    {"id": "c3", "text": "three"}
                ],
                "next_page_token": "more"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CommentSourceClient::new(test_config(server.uri())).expect("client builds");
        let listing = client
            .fetch_comments("vid-3", 2)
            .await
            .expect("fetch succeeds");

        assert_eq!(listing.comments.len(), 2);
    }

    #[tokio::test]
    async fn retries_server_errors_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/items/vid-4/comments"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = CommentSourceClient::new(test_config(server.uri())).expect("client builds");
        let error = client
            .fetch_comments("vid-4", 10)
            .await
            .expect_err("fetch fails");

        assert!(format!("{error:#}").contains("vid-4"));
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/items/missing/comments"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = CommentSourceClient::new(test_config(server.uri())).expect("client builds");
        assert!(client.fetch_comments("missing", 10).await.is_err());
    }
}
