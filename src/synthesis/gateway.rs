//! GatewaySynthesizer - OpenAI 호환 chat completions 클라이언트
//!
//! source: https://platform.openai.com/docs/api-reference/chat/create
//!
//! 상태 코드 분류:
//! - 429 -> RateLimited (호출자가 재시도 판단)
//! - 402 -> Billing
//! - 그 외 실패 -> Upstream (본문은 error 로그에만 남김)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, SynthesisError, SynthesisRequest, Synthesizer};
use crate::config::LlmConfig;

/// OpenAI 호환 게이트웨이 합성기
pub struct GatewaySynthesizer {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GatewaySynthesizer {
    /// 설정으로 생성
    ///
    /// API 키가 없어도 생성은 성공합니다. 합성 시점에 `NotConfigured`를 반환합니다.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// 요청 본문
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// 응답 본문 (필요한 필드만)
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Synthesizer for GatewaySynthesizer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, SynthesisError> {
        let api_key = self.api_key.as_deref().ok_or(SynthesisError::NotConfigured)?;

        let body = CompletionRequest {
            model: &self.model,
            messages: request.to_chat_messages(),
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), text));
        }

        parse_completion(&text)
    }
}

/// 실패 상태 코드 분류
fn classify_status(status: u16, body: String) -> SynthesisError {
    match status {
        429 => {
            tracing::warn!("AI gateway rate limited (429)");
            SynthesisError::RateLimited
        }
        402 => {
            tracing::error!("AI gateway credits exhausted (402)");
            SynthesisError::Billing
        }
        _ => {
            tracing::error!("AI gateway error ({}): {}", status, body);
            SynthesisError::Upstream { status, body }
        }
    }
}

/// 첫 번째 choice의 content 추출
fn parse_completion(body: &str) -> Result<String, SynthesisError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| SynthesisError::Transport(format!("invalid completion response: {}", e)))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(SynthesisError::EmptyResponse)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::ChatRole;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    /// 지정한 상태/본문을 돌려주는 로컬 게이트웨이
    async fn spawn_gateway(status: StatusCode, body: Value) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(req): Json<Value>| async move {
                // 인증 헤더와 system 메시지가 맨 앞에 있는지 확인
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer test-key");
                let system_first = req["messages"][0]["role"] == "system";
                if !authorized || !system_first {
                    return (StatusCode::BAD_REQUEST, Json(json!({"error": "bad request"})));
                }
                (status, Json(body.clone()))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    fn synthesizer(endpoint: String, api_key: Option<&str>) -> GatewaySynthesizer {
        GatewaySynthesizer::new(&LlmConfig {
            endpoint,
            model: "test-model".to_string(),
            api_key: api_key.map(str::to_string),
            request_timeout_ms: 5_000,
        })
        .unwrap()
    }

    fn request() -> SynthesisRequest {
        SynthesisRequest::new(
            "SYS".to_string(),
            &[ChatMessage::new(ChatRole::User, "earlier")],
            "cold hands",
        )
    }

    #[tokio::test]
    async fn test_synthesize_success() {
        let endpoint = spawn_gateway(
            StatusCode::OK,
            json!({"choices": [{"message": {"role": "assistant", "content": "  Warm the Yang.  "}}]}),
        )
        .await;

        let answer = synthesizer(endpoint, Some("test-key"))
            .synthesize(&request())
            .await
            .unwrap();
        assert_eq!(answer, "Warm the Yang.");
    }

    #[tokio::test]
    async fn test_synthesize_rate_limited() {
        let endpoint = spawn_gateway(StatusCode::TOO_MANY_REQUESTS, json!({"error": "slow down"})).await;
        let err = synthesizer(endpoint, Some("test-key"))
            .synthesize(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::RateLimited));
    }

    #[tokio::test]
    async fn test_synthesize_billing() {
        let endpoint = spawn_gateway(StatusCode::PAYMENT_REQUIRED, json!({"error": "pay"})).await;
        let err = synthesizer(endpoint, Some("test-key"))
            .synthesize(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Billing));
    }

    #[tokio::test]
    async fn test_synthesize_upstream_error() {
        let endpoint = spawn_gateway(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "down"})).await;
        let err = synthesizer(endpoint, Some("test-key"))
            .synthesize(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_synthesize_without_key_is_not_configured() {
        let err = synthesizer("http://127.0.0.1:9/unused".to_string(), None)
            .synthesize(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::NotConfigured));
    }

    #[test]
    fn test_parse_completion_empty() {
        assert!(matches!(
            parse_completion(r#"{"choices": []}"#),
            Err(SynthesisError::EmptyResponse)
        ));
        assert!(matches!(
            parse_completion(r#"{"choices": [{"message": {"content": "   "}}]}"#),
            Err(SynthesisError::EmptyResponse)
        ));
        assert!(matches!(
            parse_completion("not json"),
            Err(SynthesisError::Transport(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, String::new()), SynthesisError::RateLimited));
        assert!(matches!(classify_status(402, String::new()), SynthesisError::Billing));
        assert!(matches!(
            classify_status(500, "boom".to_string()),
            SynthesisError::Upstream { status: 500, .. }
        ));
    }
}
