//! OpenAI-compatible chat-completions client used to label clusters.
use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::summarizer::{
    ClusterDigest, ClusterOverview, Stance, SummarizationService,
};
use crate::util::retry::{RetryConfig, with_retry};

const TEMPERATURE: f32 = 0.3;
const CLUSTER_MAX_TOKENS: u32 = 300;
const OVERALL_MAX_TOKENS: u32 = 500;
const LABEL_FALLBACK_CHARS: usize = 20;
const SUMMARY_FALLBACK_CHARS: usize = 200;
const DEFAULT_LABEL: &str = "Topic";

const SYSTEM_PROMPT: &str = "You analyze audience comments and describe the opinion they share.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct LlmConfig {
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) model: String,
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub(crate) struct LlmSummarizer {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
    retry: RetryConfig,
}

impl LlmSummarizer {
    /// # Errors
    /// Returns an error when the base URL does not parse or the HTTP client cannot be built.
    pub(crate) fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build LLM HTTP client")?;
        let base_url = super::parse_base_url(&config.base_url, "LLM")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            model: config.model,
            retry: config.retry,
        })
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let url = self
            .base_url
            .join("chat/completions")
            .context("failed to build chat completions URL")?;
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens,
        };

        let response = with_retry(self.retry, "llm.chat_completions", || {
            let mut request = self.client.post(url.clone()).json(&body);
            if let Some(ref key) = self.api_key {
                request = request.bearer_auth(key);
            }
            async move {
                request
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<ChatResponse>()
                    .await
            }
        })
        .await
        .context("chat completions request failed")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completions response carried no content"))?;
        debug!(chars = content.chars().count(), "received completion");
        Ok(content)
    }
}

#[async_trait]
impl SummarizationService for LlmSummarizer {
    async fn summarize_cluster(
        &self,
        representatives: &[String],
        title: Option<&str>,
    ) -> Result<ClusterDigest> {
        let reply = self
            .complete(&cluster_prompt(representatives, title), CLUSTER_MAX_TOKENS)
            .await?;
        Ok(parse_digest(&reply))
    }

    async fn summarize_overall(
        &self,
        clusters: &[ClusterOverview],
        title: Option<&str>,
    ) -> Result<Option<String>> {
        if clusters.is_empty() {
            return Ok(None);
        }
        let reply = self
            .complete(&overall_prompt(clusters, title), OVERALL_MAX_TOKENS)
            .await?;
        let reply = reply.trim();
        Ok((!reply.is_empty()).then(|| reply.to_string()))
    }
}

fn title_line(title: Option<&str>) -> String {
    title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| format!("Item title: {t}\n\n"))
        .unwrap_or_default()
}

fn cluster_prompt(representatives: &[String], title: Option<&str>) -> String {
    let mut prompt = title_line(title);
    prompt.push_str("These comments were grouped together because they express a similar view:\n");
    for (i, text) in representatives.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {}", i + 1, text.trim());
    }
    prompt.push_str(
        "\nAnswer in exactly three lines:\n\
         LABEL: a short name for the shared opinion (at most 20 characters)\n\
         SUMMARY: one or two sentences describing the opinion\n\
         STANCE: one of support, skeptic, neutral\n",
    );
    prompt
}

fn overall_prompt(clusters: &[ClusterOverview], title: Option<&str>) -> String {
    let mut prompt = title_line(title);
    prompt.push_str("Opinion groups found in the comments (label, size, summary):\n");
    for cluster in clusters {
        let _ = writeln!(
            prompt,
            "- {} ({}): {}",
            cluster.label, cluster.size, cluster.summary
        );
    }
    prompt.push_str("\nWrite a short paragraph summarizing the overall audience reaction.\n");
    prompt
}

/// Reads the `LABEL:` / `SUMMARY:` / `STANCE:` line protocol, tolerating missing lines.
pub(crate) fn parse_digest(reply: &str) -> ClusterDigest {
    let mut label = None;
    let mut summary = None;
    let mut stance = None;

    for line in reply.lines().map(str::trim) {
        if let Some(rest) = strip_key(line, "LABEL:") {
            label = Some(rest.to_string());
        } else if let Some(rest) = strip_key(line, "SUMMARY:") {
            summary = Some(rest.to_string());
        } else if let Some(rest) = strip_key(line, "STANCE:") {
            stance = Some(Stance::from_reply(rest));
        }
    }

    let label = label.filter(|l| !l.is_empty()).unwrap_or_else(|| {
        let first = reply
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        let first = strip_key(first, "LABEL:").unwrap_or(first);
        let truncated = truncate_chars(first, LABEL_FALLBACK_CHARS);
        if truncated.is_empty() {
            DEFAULT_LABEL.to_string()
        } else {
            truncated
        }
    });
    let summary = summary
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| truncate_chars(reply.trim(), SUMMARY_FALLBACK_CHARS));

    ClusterDigest {
        label,
        summary,
        stance: stance.unwrap_or_default(),
    }
}

fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let head = line.get(..key.len())?;
    head.eq_ignore_ascii_case(key)
        .then(|| line[key.len()..].trim())
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect::<String>().trim().to_string()
}
