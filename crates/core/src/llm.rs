//! LLM-based reply classification using an OpenAI-compatible Responses API
//!
//! Consulted only when the phrase rules cannot tell whether a free-text reply
//! confirms, cancels or edits the pending action.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::ReplyDecision;
use crate::config::LlmConfig;
use crate::ports::ReplyClassifier;

/// Prompt file path (relative to working directory)
const PROMPT_FILE: &str = "prompts/reply_classifier.md";

/// Fallback prompt if the file cannot be loaded
const FALLBACK_PROMPT: &str = r#"You classify a user's reply to a yes/no confirmation question from an assistant.
Output ONLY a single JSON object. No markdown. No explanation.

Schema:
{ "decision": "confirm|cancel|edit|unknown" }

Rules:
- confirm: the user agrees to proceed as asked
- cancel: the user refuses or wants to stop
- edit: the user wants the same action with different details
- unknown: the reply is about something else
"#;

fn load_prompt() -> String {
    if Path::new(PROMPT_FILE).exists() {
        match fs::read_to_string(PROMPT_FILE) {
            Ok(content) => {
                debug!("loaded prompt from {}", PROMPT_FILE);
                return content;
            }
            Err(e) => tracing::warn!("failed to read {}: {}, using fallback", PROMPT_FILE, e),
        }
    }
    FALLBACK_PROMPT.to_string()
}

/// Request body for the Responses API
#[derive(Serialize)]
struct ResponsesApiRequest {
    model: String,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponsesApiResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    output_text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Deserialize, Debug)]
struct ContentItem {
    #[serde(default)]
    text: Option<String>,
}

/// Raw classifier output (more permissive than [`ReplyDecision`])
#[derive(Deserialize, Debug)]
struct RawDecision {
    #[serde(alias = "intent", alias = "label")]
    decision: Option<String>,
}

pub struct LlmReplyClassifier {
    client: Client,
    config: LlmConfig,
    instructions: String,
}

impl LlmReplyClassifier {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            config,
            instructions: load_prompt(),
        })
    }

    async fn call(&self, input: String) -> Result<String> {
        let url = format!("{}/responses", self.config.base_url.trim_end_matches('/'));
        debug!("calling LLM at {}", url);

        let response = self
            .client
            .post(&url)
            .json(&ResponsesApiRequest {
                model: self.config.model.clone(),
                input,
                instructions: Some(self.instructions.clone()),
            })
            .send()
            .await
            .map_err(|e| anyhow!("LLM request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM error {}: {}", status, body));
        }

        let resp: ResponsesApiResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse LLM response: {}", e))?;
        extract_text_from_response(&resp)
    }
}

#[async_trait]
impl ReplyClassifier for LlmReplyClassifier {
    async fn classify(&self, prompt: &str, reply: &str) -> Result<ReplyDecision> {
        let input = format!("ASSISTANT ASKED:\n{}\n\nUSER REPLIED:\n{}", prompt, reply);
        let text = self.call(input).await?;
        debug!("LLM raw response: {}", text);
        let raw = parse_json_from_text(&text)?;
        Ok(normalize_decision(raw.decision.as_deref()))
    }
}

fn extract_text_from_response(resp: &ResponsesApiResponse) -> Result<String> {
    let mut chunks: Vec<String> = resp
        .output
        .iter()
        .flat_map(|item| item.content.iter())
        .filter_map(|content| content.text.clone())
        .collect();

    if chunks.is_empty() {
        if let Some(ref text) = resp.output_text {
            chunks.push(text.clone());
        }
    }
    if chunks.is_empty() {
        return Err(anyhow!("No text found in LLM response"));
    }
    Ok(chunks.join("\n").trim().to_string())
}

/// Extract the first JSON object from text using brace balancing
fn parse_json_from_text(text: &str) -> Result<RawDecision> {
    let s = text.trim();
    if s.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str(s) {
            return Ok(parsed);
        }
    }

    let start = s.find('{').ok_or_else(|| anyhow!("No '{{' found in LLM output"))?;
    let mut in_str = false;
    let mut escape = false;
    let mut depth = 0;
    let mut end = None;

    for (i, ch) in s[start..].char_indices() {
        if in_str {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }
        match ch {
            '"' => in_str = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or_else(|| anyhow!("No matching '}}' found in LLM output"))?;
    serde_json::from_str(&s[start..end]).map_err(|e| anyhow!("Failed to parse JSON: {}", e))
}

fn normalize_decision(raw: Option<&str>) -> ReplyDecision {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("confirm" | "yes" | "affirm" | "accept" | "proceed") => ReplyDecision::Confirm,
        Some("cancel" | "no" | "deny" | "reject" | "abort") => ReplyDecision::Cancel,
        Some("edit" | "modify" | "change" | "amend") => ReplyDecision::Edit,
        _ => ReplyDecision::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_from_chatty_output() {
        let raw = parse_json_from_text("Sure! Here you go: {\"decision\": \"confirm\"} hope that helps").unwrap();
        assert_eq!(normalize_decision(raw.decision.as_deref()), ReplyDecision::Confirm);
    }

    #[test]
    fn test_parse_json_with_braces_in_strings() {
        let raw = parse_json_from_text(r#"{"decision": "edit", "why": "wants {tomorrow}"}"#).unwrap();
        assert_eq!(raw.decision.as_deref(), Some("edit"));
        assert!(parse_json_from_text("no json here").is_err());
    }

    #[test]
    fn test_normalize_decision_aliases() {
        assert_eq!(normalize_decision(Some("YES")), ReplyDecision::Confirm);
        assert_eq!(normalize_decision(Some("reject")), ReplyDecision::Cancel);
        assert_eq!(normalize_decision(Some("amend")), ReplyDecision::Edit);
        assert_eq!(normalize_decision(Some("weather")), ReplyDecision::Unknown);
        assert_eq!(normalize_decision(None), ReplyDecision::Unknown);
    }

    #[test]
    fn test_extract_text_prefers_content_items() {
        let resp: ResponsesApiResponse = serde_json::from_str(
            r#"{"output": [{"content": [{"text": " {\"decision\": \"cancel\"} "}]}], "output_text": "ignored"}"#,
        )
        .unwrap();
        assert_eq!(extract_text_from_response(&resp).unwrap(), "{\"decision\": \"cancel\"}");

        let resp: ResponsesApiResponse = serde_json::from_str(r#"{"output": []}"#).unwrap();
        assert!(extract_text_from_response(&resp).is_err());
    }
}
