use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::clients::comment_source::{CommentDto, CommentSourceClient};

/// Comments without an id are identified by this many leading characters of their text.
const FALLBACK_ID_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawComment {
    pub id: String,
    pub text: String,
    pub like_count: u64,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedItem {
    pub title: Option<String>,
    pub comments: Vec<RawComment>,
}

/// Where the comments of an item come from. Called once per run, so reruns refetch.
#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn fetch(&self, external_id: &str) -> Result<FetchedItem>;
}

/// [`CommentSource`] backed by the comment source HTTP service.
pub(crate) struct HttpCommentSource {
    client: Arc<CommentSourceClient>,
    limit: usize,
}

impl HttpCommentSource {
    pub(crate) fn new(client: Arc<CommentSourceClient>, limit: usize) -> Self {
        Self { client, limit }
    }
}

#[async_trait]
impl CommentSource for HttpCommentSource {
    async fn fetch(&self, external_id: &str) -> Result<FetchedItem> {
        let listing = self
            .client
            .fetch_comments(external_id, self.limit)
            .await?;
        let comments: Vec<RawComment> = listing.comments.into_iter().map(into_raw).collect();

        info!(external_id, count = comments.len(), "fetched comments");
        Ok(FetchedItem {
            title: listing.title,
            comments,
        })
    }
}

fn into_raw(dto: CommentDto) -> RawComment {
    let id = dto
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| dto.text.chars().take(FALLBACK_ID_CHARS).collect());
    RawComment {
        id,
        text: dto.text,
        like_count: dto.like_count,
        author: dto.author.filter(|a| !a.trim().is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::clients::comment_source::CommentSourceConfig;
    use crate::util::retry::RetryConfig;

    #[test]
    fn missing_id_falls_back_to_text_prefix() {
        let text = "a".repeat(80);
        let comment = into_raw(CommentDto {
            id: None,
            text: text.clone(),
            like_count: 0,
            author: Some("  ".into()),
        });

        assert_eq!(comment.id, "a".repeat(50));
        assert_eq!(comment.text, text);
        assert_eq!(comment.author, None);
    }

    #[test]
    fn explicit_id_is_kept() {
        let comment = into_raw(CommentDto {
            id: Some("c-9".into()),
            text: "hello there".into(),
            like_count: 3,
            author: Some("bo".into()),
        });

        assert_eq!(comment.id, "c-9");
        assert_eq!(comment.author.as_deref(), Some("bo"));
    }

    #[tokio::test]
    async fn http_source_maps_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/items/item-7/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "Trailer",
                "comments": [{"text": "short one", "like_count": 2}]
            })))
            .mount(&server)
            .await;

        let client = CommentSourceClient::new(CommentSourceConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            service_token: None,
            retry: RetryConfig::new(1, 1, 1),
        })
        .expect("client builds");
        let source = HttpCommentSource::new(Arc::new(client), 100);

        let item = source.fetch("item-7").await.expect("fetch succeeds");

        assert_eq!(item.title.as_deref(), Some("Trailer"));
        assert_eq!(item.comments[0].id, "short one");
        assert_eq!(item.comments[0].like_count, 2);
    }
}
