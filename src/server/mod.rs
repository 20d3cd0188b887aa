//! HTTP 서버 - axum 기반 질의 API
//!
//! - `POST /api/v1/rag/query`: bearer 토큰 인증 후 질의 실행
//! - `GET /health`: 인증 없음, 저장소 통계
//!
//! 인증은 라우트 미들웨어에서 처리하므로 토큰이 없으면 검색 전에 401을 반환합니다.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::RagConfig;
use crate::engine::{QueryRequest, QueryResponse, RagEngine};
use crate::error::RagError;
use crate::knowledge::KnowledgeStore;

/// 서버 공유 상태
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RagEngine>,
    /// bearer 토큰 -> 호출자 ID
    pub tokens: Arc<HashMap<String, String>>,
    /// health 응답용 (없으면 통계 생략)
    pub store: Option<KnowledgeStore>,
}

impl AppState {
    pub fn new(
        engine: Arc<RagEngine>,
        tokens: impl IntoIterator<Item = (String, String)>,
        store: Option<KnowledgeStore>,
    ) -> Self {
        Self {
            engine,
            tokens: Arc::new(tokens.into_iter().collect()),
            store,
        }
    }
}

/// 인증된 호출자 ID
#[derive(Debug, Clone)]
pub struct Caller(pub String);

// ============================================================================
// Router
// ============================================================================

/// 라우터 구성
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let protected = Router::new()
        .route("/api/v1/rag/query", post(query_handler))
        .route_layer(middleware::from_fn_with_state(shared.clone(), require_caller));

    let public = Router::new().route("/health", get(health_handler));

    protected
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// 서버 실행
pub async fn serve(config: &RagConfig) -> Result<()> {
    if config.server.api_tokens.is_empty() {
        tracing::warn!("No API tokens configured (TCM_RAG_API_TOKENS); every query will be rejected");
    }

    let store = KnowledgeStore::open(&config.db_path())?;
    let engine = RagEngine::with_store(config, store.clone())?;
    let state = AppState::new(
        Arc::new(engine),
        config.server.api_tokens.iter().cloned(),
        Some(store),
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    tracing::info!("TCM RAG server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Middleware & Handlers
// ============================================================================

/// bearer 토큰 인증
async fn require_caller(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let caller = token.and_then(|t| state.tokens.get(t)).cloned();
    match caller {
        Some(user_id) => {
            req.extensions_mut().insert(Caller(user_id));
            next.run(req).await
        }
        None => {
            tracing::debug!("Rejected request without valid bearer token");
            RagError::Unauthorized.into_response()
        }
    }
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Extension(Caller(caller)): Extension<Caller>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, RagError> {
    let Json(request) = body.map_err(|e| RagError::invalid_input(e.body_text()))?;
    let response = state.engine.query(&caller, request).await?;
    Ok(Json(response))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(store) = state.store.clone() else {
        return Json(json!({ "status": "ok" })).into_response();
    };

    match tokio::task::spawn_blocking(move || store.stats()).await {
        Ok(Ok(stats)) => Json(json!({
            "status": "ok",
            "documents": stats.document_count,
            "chunks": stats.chunk_count,
            "points": stats.point_count,
            "conditions": stats.condition_count,
        }))
        .into_response(),
        Ok(Err(e)) => {
            tracing::warn!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!("Health check task failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditDispatcher;
    use crate::engine::tests::{FakeReply, FakeSource, FakeSynthesizer, MemorySink};
    use crate::knowledge::{KnowledgeCategory, KnowledgeChunk};
    use crate::retrieval::ChunkHit;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use serde_json::Value;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn chunk_hit(file: &str, index: i64) -> ChunkHit {
        ChunkHit::new(
            KnowledgeChunk {
                id: index,
                document_id: 1,
                file_name: file.to_string(),
                chunk_index: index,
                content: format!("Cold limbs {}", "and Yang deficiency signs. ".repeat(5)),
                qa: None,
                category: KnowledgeCategory::Patterns,
            },
            0,
        )
    }

    fn app(reply: FakeReply) -> (Router, Arc<FakeSource>) {
        let source = Arc::new(FakeSource {
            fulltext: vec![chunk_hit("a.csv", 5)],
            ..Default::default()
        });
        let engine = RagEngine::new(
            &RagConfig::default(),
            source.clone(),
            Arc::new(FakeSynthesizer::new(reply)),
            AuditDispatcher::spawn(Arc::new(MemorySink::default())),
        );
        let state = AppState::new(
            Arc::new(engine),
            vec![("secret".to_string(), "user-1".to_string())],
            None,
        );
        (build_router(state), source)
    }

    fn query_request(token: Option<&str>, body: &str) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri("/api/v1/rag/query")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized_before_retrieval() {
        let (app, source) = app(FakeReply::Answer("ok"));
        let response = app
            .oneshot(query_request(None, r#"{"query": "cold hands"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_is_unauthorized() {
        let (app, _) = app(FakeReply::Answer("ok"));
        let response = app
            .oneshot(query_request(Some("wrong"), r#"{"query": "cold hands"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_request() {
        let (app, source) = app(FakeReply::Answer("ok"));
        let response = app
            .oneshot(query_request(Some("secret"), r#"{"query": "   "}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["retryable"], false);
        assert!(body["error"].is_string());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (app, _) = app(FakeReply::Answer("ok"));
        let response = app
            .oneshot(query_request(Some("secret"), "{ not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_successful_query_contract() {
        let (app, _) = app(FakeReply::Answer("Warm the Yang."));
        let response = app
            .oneshot(query_request(Some("secret"), r#"{"query": "cold limbs"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["response"], "Warm the Yang.");
        assert_eq!(body["chunksFound"], 1);
        assert_eq!(body["documentsSearched"], 1);
        assert_eq!(body["searchTermsUsed"], "cold | limbs");
        assert_eq!(body["auditLogged"], true);
        assert!(body["auditLoggedAt"].is_string());
        assert_eq!(body["documentsMatched"], 1);
        assert_eq!(body["sources"][0]["fileName"], "a.csv");
        assert_eq!(body["sources"][0]["chunkIndex"], 5);
        assert_eq!(body["sources"][0]["category"], "patterns");
        assert_eq!(body["confidenceTier"], "high");
        assert_eq!(body["isExternal"], false);
    }

    #[tokio::test]
    async fn test_rate_limit_is_429_and_retryable() {
        let (app, _) = app(FakeReply::RateLimited);
        let response = app
            .oneshot(query_request(Some("secret"), r#"{"query": "cold hands"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(response).await;
        assert_eq!(body["retryable"], true);
        assert!(body.get("response").is_none());
    }

    #[tokio::test]
    async fn test_billing_is_402() {
        let (app, _) = app(FakeReply::Billing);
        let response = app
            .oneshot(query_request(Some("secret"), r#"{"query": "cold hands"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(json_body(response).await["retryable"], false);
    }

    #[tokio::test]
    async fn test_upstream_error_is_500_without_details() {
        let (app, _) = app(FakeReply::Upstream);
        let response = app
            .oneshot(query_request(Some("secret"), r#"{"query": "cold hands"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(!body["error"].as_str().unwrap().contains("internal trace"));
    }

    #[tokio::test]
    async fn test_health_without_auth() {
        let dir = TempDir::new().unwrap();
        let store = KnowledgeStore::open(&dir.path().join("test.db")).unwrap();
        let engine = RagEngine::new(
            &RagConfig::default(),
            Arc::new(FakeSource::default()),
            Arc::new(FakeSynthesizer::new(FakeReply::Answer("ok"))),
            AuditDispatcher::spawn(Arc::new(MemorySink::default())),
        );
        let app = build_router(AppState::new(Arc::new(engine), Vec::new(), Some(store)));

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["documents"], 0);
    }
}
