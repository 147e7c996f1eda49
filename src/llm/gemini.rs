//! Search-grounded provider speaking the Gemini `generateContent` REST API.
//!
//! With `use_search` set the request enables the built-in Google Search tool
//! and the returned grounding chunks are surfaced as citations. A failed
//! search call (other than a quota rejection) is retried once without the
//! tool.

use super::{retry_after_header, GenerationRequest, GenerationResult, LlmError};
use crate::db::models::{GroundingChunk, GroundingMetadata};
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const NO_TEXT: &str = "No response text.";
const PROVIDER: &str = "Gemini";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl GeminiConfig {
    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<RawGroundingMetadata>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<RawGroundingChunk>,
    #[serde(default)]
    web_search_queries: Vec<String>,
}

#[derive(Deserialize)]
struct RawGroundingChunk {
    web: Option<WebSource>,
}

#[derive(Deserialize)]
struct WebSource {
    uri: Option<String>,
    title: Option<String>,
}

pub async fn generate(
    config: &GeminiConfig,
    request: &GenerationRequest,
) -> Result<GenerationResult, LlmError> {
    if request.use_search {
        match generate_once(config, request, true).await {
            Ok(result) => return Ok(result),
            Err(err @ LlmError::RateLimited { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "search-grounded request failed, retrying without search");
            }
        }
    }
    generate_once(config, request, false).await
}

async fn generate_once(
    config: &GeminiConfig,
    request: &GenerationRequest,
    with_search: bool,
) -> Result<GenerationResult, LlmError> {
    let prompt = request.user_prompt();
    let body = GenerateContentRequest {
        contents: vec![Content {
            role: Some("user"),
            parts: vec![Part { text: &prompt }],
        }],
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: request.system_prompt(),
            }],
        },
        tools: with_search.then(|| {
            vec![Tool {
                google_search: GoogleSearch {},
            }]
        }),
    };

    let resp = Client::new()
        .post(config.endpoint())
        .header("x-goog-api-key", &config.api_key)
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let headers = resp.headers().clone();
        let text = resp.text().await.unwrap_or_default();
        return Err(classify_failure(status, &headers, text));
    }

    let data: GenerateContentResponse = resp.json().await?;
    Ok(into_result(data))
}

fn into_result(data: GenerateContentResponse) -> GenerationResult {
    let candidate = data.candidates.into_iter().next();
    let (content, grounding) = match candidate {
        Some(c) => (c.content, c.grounding_metadata),
        None => (None, None),
    };

    let text: String = content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = if text.is_empty() {
        NO_TEXT.to_string()
    } else {
        text
    };

    let grounding = grounding
        .filter(|g| !g.grounding_chunks.is_empty() || !g.web_search_queries.is_empty())
        .map(|g| GroundingMetadata {
            chunks: g
                .grounding_chunks
                .into_iter()
                .map(|chunk| match chunk.web {
                    Some(web) => GroundingChunk {
                        uri: web.uri,
                        title: web.title,
                    },
                    None => GroundingChunk::default(),
                })
                .collect(),
            web_search_queries: g.web_search_queries,
        });

    GenerationResult {
        text,
        grounding,
        demo: false,
    }
}

/// Turn a non-2xx response into a rate-limit error when the provider signals
/// quota exhaustion, otherwise into a plain API error.
fn classify_failure(status: StatusCode, headers: &HeaderMap, body: String) -> LlmError {
    let lower = body.to_lowercase();
    let quota_signal = body.contains("RESOURCE_EXHAUSTED")
        || lower.contains("quota exceeded")
        || lower.contains("exceeded your current quota");
    if status == StatusCode::TOO_MANY_REQUESTS || quota_signal {
        let retry_after = retry_after_header(headers).or_else(|| retry_delay_from_body(&body));
        return LlmError::RateLimited {
            provider: PROVIDER,
            retry_after,
        };
    }
    LlmError::Api {
        status: status.as_u16(),
        message: body,
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

/// Retry delay from a `google.rpc.RetryInfo` detail, or from a
/// "Please retry in 12.3s" phrase in the message.
fn retry_delay_from_body(body: &str) -> Option<Duration> {
    let envelope: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
    if let Some(envelope) = &envelope {
        let from_detail = envelope
            .error
            .details
            .iter()
            .filter_map(|d| d.get("retryDelay").and_then(|v| v.as_str()))
            .find_map(parse_seconds);
        if from_detail.is_some() {
            return from_detail;
        }
    }

    let message = envelope.map(|e| e.error.message).unwrap_or_else(|| body.to_string());
    static RETRY_IN: OnceLock<Regex> = OnceLock::new();
    let re = RETRY_IN.get_or_init(|| {
        Regex::new(r"(?i)retry in\s+([0-9]+(?:\.[0-9]+)?)\s*s").expect("retry pattern is valid")
    });
    re.captures(&message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value
        .trim()
        .trim_end_matches('s')
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
