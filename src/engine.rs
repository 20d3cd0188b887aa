//! RAG Engine - 질의 파이프라인
//!
//! 검증 -> 다중 전략 검색 -> 컨텍스트 조립 -> 스코어 -> 합성 -> 감사 로그
//!
//! 검색과 합성은 전체 타임아웃(`query_timeout`) 안에서 실행됩니다.
//! 감사 로그는 응답 계산 후 백그라운드로 기록되고, 확인은 `audit_ack_timeout`까지만 기다립니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{response_preview, AuditDispatcher, AuditRecord, SqliteAuditSink};
use crate::config::RagConfig;
use crate::error::{RagError, RagResult};
use crate::knowledge::KnowledgeStore;
use crate::retrieval::{
    extract_terms, join_terms, AssembledContext, Citation, ConfidenceTier, ContextAssembler,
    HybridScore, HybridScorer, KnowledgeSource, MultiStrategyRetriever, SqliteKnowledgeSource,
};
use crate::synthesis::{
    build_system_instruction, ChatMessage, GatewaySynthesizer, InstructionInput,
    SynthesisRequest, Synthesizer,
};

// ============================================================================
// Request / Response
// ============================================================================

/// 질의 요청 (HTTP JSON 본문)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// 누락되면 빈 문자열 -> InvalidInput
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub patient_context: Option<String>,
    #[serde(default)]
    pub age_group: Option<String>,
    /// 내부 지식베이스 대신 일반 지식으로 답변
    #[serde(default, rename = "useExternalAI")]
    pub use_external_ai: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// 질의 응답
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub response: String,
    /// 표시용 인용 (최대 10개, 전체 수는 chunks_found)
    pub sources: Vec<Citation>,
    pub chunks_found: usize,
    pub documents_searched: usize,
    /// 인용된 고유 문서 수 (외부 모드에서는 0)
    pub documents_matched: usize,
    pub search_terms_used: String,
    pub audit_logged: bool,
    pub audit_log_id: Option<i64>,
    pub audit_logged_at: Option<DateTime<Utc>>,
    pub confidence: u8,
    pub confidence_tier: ConfidenceTier,
    pub hybrid_score: HybridScore,
    pub is_external: bool,
    pub query_id: String,
}

impl QueryResponse {
    /// 표시되지 않은 인용 수
    pub fn hidden_sources(&self) -> usize {
        self.chunks_found.saturating_sub(self.sources.len())
    }

    /// "+N more" 표시 (숨겨진 인용이 있을 때만)
    pub fn more_label(&self) -> Option<String> {
        match self.hidden_sources() {
            0 => None,
            n => Some(format!("+{} more", n)),
        }
    }
}

/// 합성 전까지의 질의 결과
struct Answer {
    response: String,
    context: AssembledContext,
    terms: Vec<String>,
    score: HybridScore,
    tier: ConfidenceTier,
}

// ============================================================================
// RagEngine
// ============================================================================

/// RAG 질의 엔진
///
/// 질의 간 공유 가변 상태가 없습니다. 검색 결과와 스코어는 질의 범위 안에서만 존재합니다.
pub struct RagEngine {
    source: Arc<dyn KnowledgeSource>,
    synthesizer: Arc<dyn Synthesizer>,
    audit: AuditDispatcher,
    retriever: MultiStrategyRetriever,
    assembler: ContextAssembler,
    scorer: HybridScorer,
    min_context_chars: usize,
    query_timeout: Duration,
    audit_ack_timeout: Duration,
}

impl RagEngine {
    /// 구성 요소를 직접 주입하여 생성
    pub fn new(
        config: &RagConfig,
        source: Arc<dyn KnowledgeSource>,
        synthesizer: Arc<dyn Synthesizer>,
        audit: AuditDispatcher,
    ) -> Self {
        Self {
            source,
            synthesizer,
            audit,
            retriever: MultiStrategyRetriever::new(config.retrieval.clone()),
            assembler: ContextAssembler::new(config.context.max_display_sources),
            scorer: HybridScorer::new(config.scoring),
            min_context_chars: config.context.min_context_chars,
            query_timeout: config.query_timeout(),
            audit_ack_timeout: config.audit_ack_timeout(),
        }
    }

    /// 설정으로 SQLite 저장소 + 게이트웨이 합성기 구성 (tokio 런타임 안에서 호출)
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let store = KnowledgeStore::open(&config.db_path())?;
        Self::with_store(config, store)
    }

    /// 열린 저장소로 구성
    pub fn with_store(config: &RagConfig, store: KnowledgeStore) -> Result<Self> {
        let synthesizer = GatewaySynthesizer::new(&config.llm)?;
        if !synthesizer.has_api_key() {
            tracing::warn!("No AI gateway API key configured; queries will fail at synthesis");
        }

        let audit = AuditDispatcher::spawn(Arc::new(SqliteAuditSink::new(store.clone())));
        Ok(Self::new(
            config,
            Arc::new(SqliteKnowledgeSource::new(store)),
            Arc::new(synthesizer),
            audit,
        ))
    }

    /// 질의 실행
    ///
    /// # Arguments
    /// * `caller` - 인증된 호출자 ID (감사 로그용)
    /// * `request` - 질의 요청
    pub async fn query(&self, caller: &str, request: QueryRequest) -> RagResult<QueryResponse> {
        if request.query.trim().is_empty() {
            return Err(RagError::invalid_input("Query is required"));
        }

        let query_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        tracing::debug!("Query {} from {}: {}", query_id, caller, request.query.trim());

        let answer = tokio::time::timeout(self.query_timeout, self.answer(&request))
            .await
            .map_err(|_| {
                tracing::warn!("Query {} timed out after {:?}", query_id, self.query_timeout);
                RagError::Timeout(self.query_timeout.as_millis())
            })??;

        let is_external = request.use_external_ai;
        let ticket = self.audit.dispatch(self.audit_record(&query_id, caller, &request, &answer));

        let confidence = answer.score.confidence();
        let mut response = QueryResponse {
            response: answer.response,
            sources: answer.context.display_citations().to_vec(),
            chunks_found: answer.context.chunks_found(),
            documents_searched: answer.context.documents_searched(),
            documents_matched: answer.context.documents_searched(),
            search_terms_used: join_terms(&answer.terms),
            audit_logged: false,
            audit_log_id: None,
            audit_logged_at: None,
            confidence,
            confidence_tier: answer.tier,
            hybrid_score: answer.score,
            is_external,
            query_id,
        };

        if let Some(receipt) = ticket.wait(self.audit_ack_timeout).await {
            response.audit_logged = true;
            response.audit_log_id = Some(receipt.id);
            response.audit_logged_at = Some(receipt.created_at);
        }

        tracing::info!(
            "Query {} answered: tier={}, confidence={}, chunks={}, documents={}, audit={} ({:?})",
            response.query_id,
            response.confidence_tier.as_str(),
            response.confidence,
            response.chunks_found,
            response.documents_searched,
            response.audit_logged,
            start.elapsed()
        );

        Ok(response)
    }

    /// 검색 -> 조립 -> 스코어 -> 합성
    async fn answer(&self, request: &QueryRequest) -> RagResult<Answer> {
        let external_mode = request.use_external_ai;

        let (terms, context, score) = if external_mode {
            // 외부 모드: 내부 지식베이스를 사용하지 않음
            let terms = extract_terms(&request.query);
            (terms, AssembledContext::default(), self.scorer.combine(None, None))
        } else {
            let outcome = self.retriever.retrieve(self.source.as_ref(), &request.query).await?;
            if outcome.all_failed() {
                tracing::warn!("All retrieval strategies failed; answering with limited coverage");
            }
            let context = self.assembler.assemble(&outcome.results);
            let score = self.scorer.score(&outcome.terms, &outcome.results);
            (outcome.terms, context, score)
        };

        let input = InstructionInput {
            context: &context.text,
            query: &request.query,
            patient_context: request.patient_context.as_deref(),
            age_group: request.age_group.as_deref(),
            external_mode,
            min_context_chars: self.min_context_chars,
        };
        let internal_sourced =
            !external_mode && !context.text.is_empty() && input.has_sufficient_context();
        let tier = ConfidenceTier::derive(internal_sourced, score.confidence());

        let synthesis = SynthesisRequest::new(
            build_system_instruction(&input),
            &request.messages,
            &request.query,
        );
        let response = self.synthesizer.synthesize(&synthesis).await?;

        Ok(Answer {
            response,
            context,
            terms,
            score,
            tier,
        })
    }

    fn audit_record(
        &self,
        query_id: &str,
        caller: &str,
        request: &QueryRequest,
        answer: &Answer,
    ) -> AuditRecord {
        let model = self.synthesizer.model_name();
        let (sources_used, ai_model) = if request.use_external_ai {
            (
                json!([{ "type": "external_ai", "liability_waived": true }]),
                format!("{} (external)", model),
            )
        } else {
            let sources: Vec<_> = answer
                .context
                .citations
                .iter()
                .map(|c| {
                    json!({
                        "fileName": c.file_name,
                        "category": c.category,
                        "chunkIndex": c.chunk_index,
                    })
                })
                .collect();
            (json!(sources), model.to_string())
        };

        AuditRecord {
            query_id: query_id.to_string(),
            user_id: caller.to_string(),
            query_text: request.query.trim().to_string(),
            search_terms: join_terms(&answer.terms),
            chunks_found: answer.context.chunks_found(),
            sources_used,
            response_preview: response_preview(&answer.response),
            ai_model,
            is_external: request.use_external_ai,
            confidence: answer.score.confidence(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
