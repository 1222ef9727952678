pub(crate) mod comment_source;
pub(crate) mod llm;

use anyhow::{Context, Result};
use reqwest::Url;

/// Parses a collaborator base URL so that `join` appends to its path instead of replacing
/// the last segment.
pub(crate) fn parse_base_url(raw: &str, service: &str) -> Result<Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).with_context(|| format!("invalid {service} base URL: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = parse_base_url("http://llm.local/v1", "llm").expect("valid url");
        assert_eq!(
            url.join("chat/completions").expect("join").as_str(),
            "http://llm.local/v1/chat/completions"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_base_url("not a url", "comment source").is_err());
    }
}
