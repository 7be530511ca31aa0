//! Prayer generation through an OpenAI-compatible chat-completion API.
//!
//! Sends the prompt built from a `PrayerRequest` as a single user message.
//! Transport failures, 429 and 5xx responses are retried with exponential
//! backoff; anything else fails immediately.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::prayer::PrayerRequest;

/// Returned in place of a prayer when the model answers with no content.
pub const EMPTY_RESPONSE_TEXT: &str = "기도문 생성에 실패했습니다.";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no API key configured")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "API Key를 입력해주세요.",
            _ => "기도문 생성 중 오류가 발생했습니다.",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::MissingApiKey | Self::Malformed(_) => false,
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct PrayerGenerator {
    base_url: String,
    max_retries: u32,
    retry_backoff: Duration,
    client: Client,
}

impl PrayerGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            client,
        })
    }

    /// Generate a prayer. Returns the generated text.
    pub async fn generate(
        &self,
        api_key: &str,
        request: &PrayerRequest,
    ) -> Result<String, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let t_start = Instant::now();
        let prompt = request.prompt();
        let mut attempt = 0;

        loop {
            match self.complete(api_key, &request.model, &prompt).await {
                Ok(text) => {
                    info!(
                        "Generated {} chars with {} ({:.0}ms, {} attempt(s))",
                        text.chars().count(),
                        request.model,
                        t_start.elapsed().as_secs_f64() * 1000.0,
                        attempt + 1
                    );
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!("Generation attempt {attempt} failed: {e}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("Generation failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    async fn complete(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<String, GenerationError> {
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {url} (model {model})");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let data: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            warn!("Completion returned empty content");
            Ok(EMPTY_RESPONSE_TEXT.to_string())
        } else {
            Ok(content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prayer::{Audience, ServiceType, Style};
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Mock {
        hits: Arc<AtomicUsize>,
        /// Status codes to answer with before succeeding.
        failures: Arc<Mutex<Vec<u16>>>,
        content: Option<&'static str>,
        /// Delay before answering the first request.
        stall_first: Option<std::time::Duration>,
        seen_auth: Arc<Mutex<Option<String>>>,
        seen_body: Arc<Mutex<Option<serde_json::Value>>>,
    }

    async fn completions(
        State(mock): State<Mock>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (axum::http::StatusCode, Json<serde_json::Value>) {
        let hit = mock.hits.fetch_add(1, Ordering::SeqCst);
        if let (0, Some(delay)) = (hit, mock.stall_first) {
            tokio::time::sleep(delay).await;
        }
        *mock.seen_auth.lock().unwrap() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *mock.seen_body.lock().unwrap() = Some(body);

        let failure = {
            let mut failures = mock.failures.lock().unwrap();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some(code) = failure {
            let status = axum::http::StatusCode::from_u16(code).unwrap();
            return (status, Json(json!({ "error": { "message": "nope" } })));
        }

        (
            axum::http::StatusCode::OK,
            Json(json!({
                "choices": [{ "message": { "role": "assistant", "content": mock.content } }]
            })),
        )
    }

    async fn serve(mock: Mock) -> String {
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/")
    }

    fn generator(base_url: String) -> PrayerGenerator {
        PrayerGenerator::new(&GenerationConfig {
            base_url,
            timeout_secs: 5,
            max_retries: 2,
            retry_backoff_ms: 1,
            ..Default::default()
        })
        .unwrap()
    }

    fn request() -> PrayerRequest {
        PrayerRequest::new(ServiceType::Easter, Style::Literary, Audience::Children, 2, "gpt-test")
            .unwrap()
    }

    #[tokio::test]
    async fn test_generate_sends_prompt_and_parses_content() {
        let mock = Mock {
            content: Some("  \"주는 나의 목자시니\"\n\n아멘.  "),
            ..Default::default()
        };
        let url = serve(mock.clone()).await;

        let text = generator(url).generate("sk-abc", &request()).await.unwrap();
        assert_eq!(text, "\"주는 나의 목자시니\"\n\n아멘.");
        assert_eq!(mock.seen_auth.lock().unwrap().as_deref(), Some("Bearer sk-abc"));

        let body = mock.seen_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["messages"][0]["role"], "user");
        let prompt = body["messages"][0]["content"].as_str().unwrap();
        assert!(prompt.contains("부활절"));
        assert!(prompt.contains("어린이"));
    }

    #[tokio::test]
    async fn test_empty_content_falls_back() {
        let mock = Mock::default();
        let url = serve(mock).await;
        let text = generator(url).generate("sk-abc", &request()).await.unwrap();
        assert_eq!(text, EMPTY_RESPONSE_TEXT);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mock = Mock {
            content: Some("아멘."),
            failures: Arc::new(Mutex::new(vec![500, 503])),
            ..Default::default()
        };
        let url = serve(mock.clone()).await;
        let text = generator(url).generate("sk-abc", &request()).await.unwrap();
        assert_eq!(text, "아멘.");
        assert_eq!(mock.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let mock = Mock {
            content: Some("아멘."),
            failures: Arc::new(Mutex::new(vec![401])),
            ..Default::default()
        };
        let url = serve(mock.clone()).await;
        let err = generator(url).generate("bad", &request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Status { status, .. } if status == StatusCode::UNAUTHORIZED));
        assert_eq!(err.user_message(), "기도문 생성 중 오류가 발생했습니다.");
        assert_eq!(mock.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let mock = Mock {
            content: Some("아멘."),
            failures: Arc::new(Mutex::new(vec![500, 500, 500, 500])),
            ..Default::default()
        };
        let url = serve(mock.clone()).await;
        let err = generator(url).generate("sk-abc", &request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Status { .. }));
        assert_eq!(mock.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let err = generator("http://127.0.0.1:9".into())
            .generate("  ", &request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey));
        assert_eq!(err.user_message(), "API Key를 입력해주세요.");
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let mock = Mock {
            content: Some("아멘."),
            stall_first: Some(std::time::Duration::from_secs(3)),
            ..Default::default()
        };
        let url = serve(mock.clone()).await;
        let generator = PrayerGenerator::new(&GenerationConfig {
            base_url: url,
            timeout_secs: 1,
            max_retries: 2,
            retry_backoff_ms: 1,
            ..Default::default()
        })
        .unwrap();

        let text = generator.generate("sk-abc", &request()).await.unwrap();
        assert_eq!(text, "아멘.");
        assert_eq!(mock.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_transport_error() {
        let err = generator("http://127.0.0.1:9".into())
            .generate("sk-abc", &request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
        assert!(err.is_retryable());
        assert_eq!(err.user_message(), "기도문 생성 중 오류가 발생했습니다.");
    }
}
