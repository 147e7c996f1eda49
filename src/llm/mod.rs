pub mod demo;
pub mod gemini;
pub mod openai;

use crate::db::models::GroundingMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an academic study assistant.

Analyze questions from an academic policy perspective, focusing on:
- Environmental, Social, and Governance (ESG) frameworks
- Public policy analysis
- Institutional perspectives
- Evidence-based recommendations

Use the provided notes context to ground your answers. Maintain an academic tone while being helpful and clear.";

const NO_NOTES_PLACEHOLDER: &str = "[No notes available]";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

/// The providers a user can pick from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::OpenAi, ProviderKind::DeepSeek, ProviderKind::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::DeepSeek => "DeepSeek",
            ProviderKind::Gemini => "Gemini",
        }
    }

    pub fn default_config(&self) -> ProviderConfig {
        let (base_url, model) = match self {
            ProviderKind::OpenAi => ("https://api.openai.com/v1", "gpt-4o-mini"),
            ProviderKind::DeepSeek => ("https://api.deepseek.com", "deepseek-chat"),
            ProviderKind::Gemini => (gemini::DEFAULT_BASE_URL, gemini::DEFAULT_MODEL),
        };
        ProviderConfig {
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key: String::new(),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(LlmError::Config(format!("Unknown provider: {}", other))),
        }
    }
}

/// Per-provider connection settings as the user entered them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub question: String,
    pub context: String,
    pub use_search: bool,
    /// Custom system prompt; [`DEFAULT_SYSTEM_PROMPT`] is used when absent or blank.
    pub system_prompt: Option<String>,
}

impl GenerationRequest {
    pub fn system_prompt(&self) -> &str {
        match self.system_prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => prompt,
            _ => DEFAULT_SYSTEM_PROMPT,
        }
    }

    pub fn user_prompt(&self) -> String {
        let context = if self.context.is_empty() {
            NO_NOTES_PLACEHOLDER
        } else {
            &self.context
        };
        format!(
            "User question:\n{}\n\nNotes context:\n{}",
            self.question, context
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub grounding: Option<GroundingMetadata>,
    /// Set when the answer was produced locally because no credential was configured.
    pub demo: bool,
}

/// Unified LLM provider enum — dispatches to the OpenAI-compatible or
/// search-grounded backend.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAiCompatible {
        kind: ProviderKind,
        config: openai::OpenAiConfig,
        model: String,
    },
    SearchGrounded(gemini::GeminiConfig),
}

impl Provider {
    /// Validate `config` for `kind`. `Ok(None)` means no API key is set and
    /// the caller should answer in demo mode.
    pub fn from_config(kind: ProviderKind, config: &ProviderConfig) -> Result<Option<Self>, LlmError> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Ok(None);
        }

        match kind {
            ProviderKind::OpenAi | ProviderKind::DeepSeek => {
                let base_url = config.base_url.trim();
                if base_url.is_empty() {
                    return Err(LlmError::Config(format!(
                        "{} base URL is not configured",
                        kind.label()
                    )));
                }
                let model = config.model.trim();
                if model.is_empty() {
                    return Err(LlmError::Config(format!(
                        "{} model is not configured",
                        kind.label()
                    )));
                }
                Ok(Some(Provider::OpenAiCompatible {
                    kind,
                    config: openai::OpenAiConfig {
                        api_key: api_key.to_string(),
                        base_url: base_url.to_string(),
                    },
                    model: model.to_string(),
                }))
            }
            ProviderKind::Gemini => {
                let base_url = match config.base_url.trim() {
                    "" => gemini::DEFAULT_BASE_URL,
                    url => url,
                };
                let model = match config.model.trim() {
                    "" => gemini::DEFAULT_MODEL,
                    model => model,
                };
                Ok(Some(Provider::SearchGrounded(gemini::GeminiConfig {
                    api_key: api_key.to_string(),
                    base_url: base_url.to_string(),
                    model: model.to_string(),
                })))
            }
        }
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
        match self {
            Provider::OpenAiCompatible {
                kind,
                config,
                model,
            } => {
                let chat = ChatRequest {
                    messages: vec![
                        ChatMessage {
                            role: "system".into(),
                            content: request.system_prompt().to_string(),
                        },
                        ChatMessage {
                            role: "user".into(),
                            content: request.user_prompt(),
                        },
                    ],
                    model: model.clone(),
                };
                tracing::debug!(provider = %kind, model = %model, "dispatching chat completion");
                let response = openai::chat(config, &chat).await?;
                Ok(GenerationResult {
                    text: response.content,
                    grounding: None,
                    demo: false,
                })
            }
            Provider::SearchGrounded(config) => {
                tracing::debug!(model = %config.model, search = request.use_search, "dispatching generateContent");
                gemini::generate(config, request).await
            }
        }
    }
}

/// Answer `request` with the provider selected by `kind`.
///
/// A missing API key never reaches the network; the answer comes from
/// [`demo::respond`] instead. Other missing fields fail with
/// [`LlmError::Config`] before any request is made.
pub async fn generate(
    kind: ProviderKind,
    config: &ProviderConfig,
    request: &GenerationRequest,
) -> Result<GenerationResult, LlmError> {
    match Provider::from_config(kind, config)? {
        Some(provider) => provider.generate(request).await,
        None => {
            tracing::info!(provider = %kind, "no API key configured, answering in demo mode");
            Ok(demo::respond(&request.context))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("{provider} rate limit or quota exceeded{}; wait a moment or switch providers", retry_hint(.retry_after))]
    RateLimited {
        provider: &'static str,
        retry_after: Option<Duration>,
    },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Seconds from a `Retry-After` header, when the server sent one.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry in about {}s)", delay.as_secs().max(1)),
        None => String::new(),
    }
}

impl Serialize for LlmError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str, model: &str, api_key: &str) -> ProviderConfig {
        ProviderConfig {
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    #[test]
    fn test_user_prompt_marks_missing_notes() {
        let request = GenerationRequest {
            question: "What is ESG?".into(),
            ..Default::default()
        };
        assert_eq!(
            request.user_prompt(),
            "User question:\nWhat is ESG?\n\nNotes context:\n[No notes available]"
        );
    }

    #[test]
    fn test_blank_custom_prompt_falls_back_to_default() {
        let request = GenerationRequest {
            system_prompt: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(request.system_prompt(), DEFAULT_SYSTEM_PROMPT);

        let request = GenerationRequest {
            system_prompt: Some("Be brief.".into()),
            ..Default::default()
        };
        assert_eq!(request.system_prompt(), "Be brief.");
    }

    #[test]
    fn test_missing_key_resolves_to_demo() {
        for kind in ProviderKind::ALL {
            let provider = Provider::from_config(kind, &config("", "", "  ")).unwrap();
            assert!(provider.is_none(), "{kind} should fall back to demo mode");
        }
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let err = Provider::from_config(ProviderKind::DeepSeek, &config("", "deepseek-chat", "sk-1"))
            .unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
        assert!(err.to_string().contains("DeepSeek base URL"));
    }

    #[test]
    fn test_missing_model_is_config_error() {
        let err = Provider::from_config(ProviderKind::OpenAi, &config("https://api.openai.com/v1", "", "sk-1"))
            .unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }

    #[test]
    fn test_gemini_fills_defaults() {
        let provider = Provider::from_config(ProviderKind::Gemini, &config("", "", "key"))
            .unwrap()
            .unwrap();
        match provider {
            Provider::SearchGrounded(cfg) => {
                assert_eq!(cfg.base_url, gemini::DEFAULT_BASE_URL);
                assert_eq!(cfg.model, gemini::DEFAULT_MODEL);
            }
            other => panic!("unexpected provider: {other:?}"),
        }
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("DeepSeek".parse::<ProviderKind>().unwrap(), ProviderKind::DeepSeek);
        assert!("claude".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_rate_limit_message_mentions_delay() {
        let err = LlmError::RateLimited {
            provider: "Gemini",
            retry_after: Some(Duration::from_secs(37)),
        };
        let text = err.to_string();
        assert!(text.contains("retry in about 37s"));
        assert!(text.contains("switch providers"));
    }

    #[tokio::test]
    async fn test_demo_mode_never_calls_network() {
        // An unroutable base URL would fail if anything were sent.
        let cfg = config("http://127.0.0.1:1", "gpt-4o-mini", "");
        let request = GenerationRequest {
            question: "Explain carbon pricing".into(),
            context: "【Econ / notes.txt】\ncarbon".into(),
            ..Default::default()
        };
        for kind in ProviderKind::ALL {
            let result = generate(kind, &cfg, &request).await.unwrap();
            assert!(result.demo);
            assert!(result.text.contains(demo::DEMO_MODE_MARKER));
        }
    }
}
