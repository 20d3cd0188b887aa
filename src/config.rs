//! 설정 모듈
//!
//! 기본값 + 환경변수 오버라이드로 `RagConfig`를 구성합니다.
//! API 키는 직렬화되지 않습니다 (status 출력에 노출 방지).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::get_data_dir;

// ============================================================================
// Defaults
// ============================================================================

/// 합성기 기본 엔드포인트 (OpenAI 호환 chat completions)
pub const DEFAULT_LLM_ENDPOINT: &str = "https://ai.gateway.lovable.dev/v1/chat/completions";

/// 합성기 기본 모델
pub const DEFAULT_LLM_MODEL: &str = "google/gemini-2.5-flash";

/// 하이브리드 스코어 기본 임계값
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// "지식베이스 커버리지 부족" 판정 기준 (컨텍스트 문자 수)
pub const DEFAULT_MIN_CONTEXT_CHARS: usize = 100;

// ============================================================================
// Config Types
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// 데이터 디렉토리 (knowledge.db 위치)
    pub data_dir: PathBuf,
    pub retrieval: RetrievalConfig,
    pub scoring: ScoringConfig,
    pub context: ContextConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    /// 검색 + 합성 전체 제한 시간 (ms)
    pub query_timeout_ms: u64,
    /// 감사 로그 기록 확인 대기 시간 (ms)
    pub audit_ack_timeout_ms: u64,
}

/// 검색 전략별 행 제한 및 타임아웃
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub fulltext_limit: usize,
    pub pattern_limit: usize,
    pub point_limit: usize,
    pub condition_limit: usize,
    pub strategy_timeout_ms: u64,
}

/// 하이브리드 스코어 설정
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// meets_threshold 판정 기준 (0.0 ~ 1.0)
    pub threshold: f32,
    /// 시맨틱 가중치
    pub semantic_weight: f32,
    /// 키워드 가중치
    pub keyword_weight: f32,
}

/// 컨텍스트 조립 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// 이 길이 미만이면 합성기에 커버리지 부족을 명시
    pub min_context_chars: usize,
    /// 응답에 표시할 최대 출처 수
    pub max_display_sources: usize,
}

/// 합성기 (LLM 게이트웨이) 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

/// HTTP 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// bearer 토큰 -> 사용자 ID
    #[serde(skip)]
    pub api_tokens: Vec<(String, String)>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            retrieval: RetrievalConfig::default(),
            scoring: ScoringConfig::default(),
            context: ContextConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
            query_timeout_ms: 60_000,
            audit_ack_timeout_ms: 2_000,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fulltext_limit: 15,
            pattern_limit: 10,
            point_limit: 20,
            condition_limit: 10,
            strategy_timeout_ms: 5_000,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SCORE_THRESHOLD,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            min_context_chars: DEFAULT_MIN_CONTEXT_CHARS,
            max_display_sources: 10,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            request_timeout_ms: 45_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            api_tokens: Vec::new(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl RagConfig {
    /// 기본값에 환경변수 오버라이드 적용
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_var("TCM_RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env_parse::<u64>("TCM_RAG_STRATEGY_TIMEOUT_MS")? {
            config.retrieval.strategy_timeout_ms = ms;
        }
        if let Some(threshold) = env_parse::<f32>("TCM_RAG_SCORE_THRESHOLD")? {
            config.scoring.threshold = threshold;
        }
        if let Some(chars) = env_parse::<usize>("TCM_RAG_MIN_CONTEXT_CHARS")? {
            config.context.min_context_chars = chars;
        }
        if let Some(ms) = env_parse::<u64>("TCM_RAG_QUERY_TIMEOUT_MS")? {
            config.query_timeout_ms = ms;
        }
        if let Some(endpoint) = env_var("TCM_RAG_LLM_ENDPOINT") {
            config.llm.endpoint = endpoint;
        }
        if let Some(model) = env_var("TCM_RAG_LLM_MODEL") {
            config.llm.model = model;
        }
        config.llm.api_key = env_var("TCM_RAG_LLM_API_KEY").or_else(|| env_var("LOVABLE_API_KEY"));
        if let Some(bind) = env_var("TCM_RAG_BIND") {
            config.server.bind = bind;
        }
        if let Some(tokens) = env_var("TCM_RAG_API_TOKENS") {
            config.server.api_tokens = parse_api_tokens(&tokens)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        let scoring = &self.scoring;

        if !unit.contains(&scoring.threshold) {
            bail!("score threshold must be within [0, 1], got {}", scoring.threshold);
        }
        if !unit.contains(&scoring.semantic_weight) || !unit.contains(&scoring.keyword_weight) {
            bail!("score weights must be within [0, 1]");
        }
        if scoring.semantic_weight + scoring.keyword_weight <= 0.0 {
            bail!("at least one score weight must be positive");
        }

        let r = &self.retrieval;
        if r.fulltext_limit == 0 || r.pattern_limit == 0 || r.point_limit == 0 || r.condition_limit == 0 {
            bail!("retrieval limits must be at least 1");
        }
        if self.context.max_display_sources == 0 {
            bail!("max_display_sources must be at least 1");
        }

        Ok(())
    }

    /// SQLite DB 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn audit_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_ack_timeout_ms)
    }
}

impl RetrievalConfig {
    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_millis(self.strategy_timeout_ms)
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(key) {
        Some(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {}", key, raw))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// `token=user,token2=user2` 형식 파싱
pub fn parse_api_tokens(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, user) = entry
                .split_once('=')
                .with_context(|| format!("Invalid token entry (expected token=user): {}", entry))?;
            let (token, user) = (token.trim(), user.trim());
            if token.is_empty() || user.is_empty() {
                bail!("Invalid token entry (empty token or user): {}", entry);
            }
            Ok((token.to_string(), user.to_string()))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
