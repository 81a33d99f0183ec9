//! Title reconstruction for truncated filenames
//!
//! Filenames exported from paper databases are often cut in the middle
//! (`人物传记资料本体构建与可视...为例_司莉.pdf`). The model sees the leading text of
//! the PDF plus the surviving pieces of the name and fills in the gap.

use crate::ai_client::{ChatBackend, ChatMessage};
use crate::error::{PaperError, Result};
use crate::utils::strip_code_fence;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static TRUNCATED_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)(\.\.\.)(.*?)(_.*)$").unwrap());

/// The four pieces of `<prefix>...<suffix>_<trailing>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleParts {
    pub prefix: String,
    pub ellipsis: String,
    pub suffix: String,
    pub trailing: String,
}

/// Split a truncated title; a title without the pattern comes back whole in `prefix`
pub fn split_title(title: &str) -> TitleParts {
    match TRUNCATED_TITLE.captures(title) {
        Some(caps) => TitleParts {
            prefix: caps[1].to_string(),
            ellipsis: caps[2].to_string(),
            suffix: caps[3].to_string(),
            trailing: caps[4].to_string(),
        },
        None => TitleParts {
            prefix: title.to_string(),
            ellipsis: String::new(),
            suffix: String::new(),
            trailing: String::new(),
        },
    }
}

fn system_prompt(parts: &TitleParts) -> String {
    format!(
        r#"You are a file naming assistant. Complete the title of an academic paper using the text of its first page.

The filename title was truncated: the part marked "{ellipsis}" was omitted.
- Known beginning: [{prefix}]
- Known ending: [{suffix}]

Rules:
- Find the full title in the text. It is similar to the known pieces but the middle is missing.
- If the title continues over several lines (a subtitle), keep it and separate main title and subtitle with a colon.
- Replace "{ellipsis}" with the missing middle. The result must not contain "...".
- Keep the known ending complete; do not drop it when merging.
- Do not include author names, institutions or journal names.
- The final title must not contain spaces.
- Keep the language of the original title.

Return JSON only: {{"title": "<beginning><missing middle><ending>"}}"#,
        ellipsis = parts.ellipsis,
        prefix = parts.prefix,
        suffix = parts.suffix,
    )
}

/// Pull `title` out of the model reply; empty titles count as no answer
pub fn parse_title_response(text: &str) -> Result<Option<String>> {
    let json: serde_json::Value = serde_json::from_str(&strip_code_fence(text))
        .map_err(|e| PaperError::parse("title", e.to_string()))?;
    Ok(json
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Reconstructs titles, remembering answers for identical inputs within one run
pub struct TitleEnricher<'a, B: ChatBackend> {
    backend: &'a B,
    model: String,
    memo: HashMap<(String, String), Option<String>>,
}

impl<'a, B: ChatBackend> TitleEnricher<'a, B> {
    pub fn new(backend: &'a B, model: &str) -> Self {
        Self { backend, model: model.to_string(), memo: HashMap::new() }
    }

    /// Single-shot reconstruction. `Ok(None)` means the model answered without a title.
    pub async fn reconstruct(&mut self, text: &str, original_title: &str) -> Result<Option<String>> {
        let key = (text.to_string(), original_title.to_string());
        if let Some(cached) = self.memo.get(&key) {
            return Ok(cached.clone());
        }

        let parts = split_title(original_title);
        let messages = [
            ChatMessage::system(system_prompt(&parts)),
            ChatMessage::user(format!("Text:\n{}", text)),
        ];

        let reply = self.backend.complete(&self.model, &messages).await?;
        let title = parse_title_response(&reply)?;
        self.memo.insert(key, title.clone());
        Ok(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::testing::ScriptedBackend;

    #[test]
    fn test_split_title() {
        let parts = split_title("人物传记资料本体构建与可视...馆学家彭斐章九十自述》为例_司莉");
        assert_eq!(parts.prefix, "人物传记资料本体构建与可视");
        assert_eq!(parts.ellipsis, "...");
        assert_eq!(parts.suffix, "馆学家彭斐章九十自述》为例");
        assert_eq!(parts.trailing, "_司莉");
    }

    #[test]
    fn test_split_title_without_pattern() {
        let parts = split_title("完整标题");
        assert_eq!(parts.prefix, "完整标题");
        assert!(parts.ellipsis.is_empty() && parts.suffix.is_empty() && parts.trailing.is_empty());
    }

    #[test]
    fn test_parse_title_response() {
        assert_eq!(parse_title_response(r#"{"title": "完整标题"}"#).unwrap(), Some("完整标题".into()));
        assert_eq!(parse_title_response("```json\n{\"title\": \"T\"}\n```").unwrap(), Some("T".into()));
        assert_eq!(parse_title_response(r#"{"title": "  "}"#).unwrap(), None);
        assert_eq!(parse_title_response(r#"{"name": "x"}"#).unwrap(), None);
        assert!(parse_title_response("not json").is_err());
    }

    #[tokio::test]
    async fn test_reconstruct_sends_parts_and_memoizes() {
        let backend = ScriptedBackend::ok(&[r#"{"title": "完整标题"}"#]);
        let mut enricher = TitleEnricher::new(&backend, "deepseek-coder");

        let first = enricher.reconstruct("第一页文本", "完整...标题_作者").await.unwrap();
        let second = enricher.reconstruct("第一页文本", "完整...标题_作者").await.unwrap();

        assert_eq!(first, Some("完整标题".to_string()));
        assert_eq!(second, first);
        assert_eq!(backend.call_count(), 1);

        let requests = backend.requests.lock().unwrap();
        assert!(requests[0][0].content.contains("[完整]"));
        assert!(requests[0][0].content.contains("[标题]"));
        assert!(requests[0][1].content.contains("第一页文本"));
    }

    #[tokio::test]
    async fn test_reconstruct_service_error_propagates() {
        let backend = ScriptedBackend::new(vec![Err(PaperError::service("HTTP 503"))]);
        let mut enricher = TitleEnricher::new(&backend, "m");
        let err = enricher.reconstruct("t", "a...b_c").await.unwrap_err();
        assert!(matches!(err, PaperError::Service { .. }));
    }
}
