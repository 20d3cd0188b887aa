//! 에러 타입 - 질의 파이프라인 에러 분류
//!
//! 호출자에게 노출되는 에러만 정의합니다.
//! 개별 검색 전략 실패나 감사 로그 실패는 여기에 오지 않습니다 (로그 후 계속 진행).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::synthesis::SynthesisError;

/// 파이프라인 결과 타입
pub type RagResult<T> = std::result::Result<T, RagError>;

/// 질의 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 빈 질의, 잘못된 요청 형식
    #[error("{0}")]
    InvalidInput(String),

    /// 호출자 인증 실패
    #[error("Unauthorized")]
    Unauthorized,

    /// 합성기 rate limit (재시도 가능)
    #[error("Rate limit exceeded. Please try again later.")]
    Quota,

    /// 합성기 크레딧 소진 (운영자 조치 필요)
    #[error("AI service unavailable: credits exhausted. Please add funds.")]
    Billing,

    /// 합성 실패 (상세 내용은 로그에만 남김)
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// 전체 질의 시간 초과
    #[error("Query timed out after {0} ms")]
    Timeout(u128),

    /// 내부 에러
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP 상태 코드
    pub fn status_code(&self) -> StatusCode {
        match self {
            RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RagError::Unauthorized => StatusCode::UNAUTHORIZED,
            RagError::Quota => StatusCode::TOO_MANY_REQUESTS,
            RagError::Billing => StatusCode::PAYMENT_REQUIRED,
            RagError::Synthesis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 호출자가 같은 요청을 다시 보내도 되는지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::Quota | RagError::Timeout(_))
    }
}

impl From<SynthesisError> for RagError {
    fn from(err: SynthesisError) -> Self {
        match err {
            SynthesisError::RateLimited => RagError::Quota,
            SynthesisError::Billing => RagError::Billing,
            SynthesisError::NotConfigured => RagError::Synthesis("AI service not configured".to_string()),
            SynthesisError::EmptyResponse => RagError::Synthesis("empty response".to_string()),
            SynthesisError::Upstream { .. } | SynthesisError::Transport(_) => {
                RagError::Synthesis("AI service error".to_string())
            }
        }
    }
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================
