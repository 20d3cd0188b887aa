//! tcm-rag - TCM 지식베이스 RAG 질의 엔진
//!
//! SQLite FTS5 전문 검색 + 구조화 참조 테이블(경혈, 질환)을 병렬로 검색하고,
//! 조립된 컨텍스트로 LLM 게이트웨이에 답변을 요청합니다.
//! 모든 질의는 감사 로그에 기록됩니다.

pub mod audit;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod retrieval;
pub mod server;
pub mod synthesis;

// Re-exports
pub use audit::{AuditDispatcher, AuditRecord, AuditSink, SqliteAuditSink};
pub use config::RagConfig;
pub use engine::{QueryRequest, QueryResponse, RagEngine};
pub use error::{RagError, RagResult};
pub use knowledge::{
    get_data_dir, import_pack, import_pack_file, KnowledgeCategory, KnowledgePack, KnowledgeStore,
    StoreStats,
};
pub use retrieval::{
    Citation, ConfidenceTier, ContextAssembler, HybridScore, HybridScorer, KnowledgeSource,
    MultiStrategyRetriever, SqliteKnowledgeSource,
};
pub use synthesis::{GatewaySynthesizer, SynthesisError, Synthesizer};
