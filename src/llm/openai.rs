use super::{ChatRequest, ChatResponse, LlmError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const NO_CONTENT: &str = "No response content.";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    /// Chat-completions endpoint. A base URL that already names the endpoint
    /// is used as-is.
    pub fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiResponseMessage>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

pub async fn chat(config: &OpenAiConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let client = Client::new();
    let messages: Vec<OpenAiMessage> = request
        .messages
        .iter()
        .map(|m| OpenAiMessage {
            role: &m.role,
            content: &m.content,
        })
        .collect();

    let body = OpenAiRequest {
        model: &request.model,
        messages,
    };

    let resp = client
        .post(config.completions_url())
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = super::retry_after_header(resp.headers());
        return Err(LlmError::RateLimited {
            provider: "OpenAI-compatible provider",
            retry_after,
        });
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let data: OpenAiResponse = resp.json().await?;
    let content = data
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| NO_CONTENT.to_string());

    Ok(ChatResponse {
        content,
        model: request.model.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: "sys".into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: "hi".into(),
                },
            ],
            model: "deepseek-chat".into(),
        }
    }

    fn config(base_url: String) -> OpenAiConfig {
        OpenAiConfig {
            api_key: "sk-test".into(),
            base_url,
        }
    }

    #[test]
    fn test_completions_url_variants() {
        assert_eq!(
            config("https://api.deepseek.com/".into()).completions_url(),
            "https://api.deepseek.com/chat/completions"
        );
        assert_eq!(
            config("https://api.openai.com/v1/chat/completions".into()).completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_chat_sends_bearer_and_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-chat",
                "messages": [
                    { "role": "system", "content": "sys" },
                    { "role": "user", "content": "hi" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "first" } },
                    { "message": { "role": "assistant", "content": "second" } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = chat(&config(server.uri()), &request()).await.unwrap();
        assert_eq!(resp.content, "first");
        assert_eq!(resp.model, "deepseek-chat");
    }

    #[tokio::test]
    async fn test_missing_content_yields_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": []
            })))
            .mount(&server)
            .await;

        let resp = chat(&config(server.uri()), &request()).await.unwrap();
        assert_eq!(resp.content, NO_CONTENT);
    }

    #[tokio::test]
    async fn test_non_success_embeds_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = chat(&config(server.uri()), &request()).await.unwrap_err();
        assert_eq!(err.to_string(), "API error: 502 - upstream down");
    }

    #[tokio::test]
    async fn test_too_many_requests_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        match chat(&config(server.uri()), &request()).await {
            Err(LlmError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(12)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
