//! Knowledge 모듈 - TCM 지식베이스 저장소
//!
//! - types: 문서/청크/경혈/질환 데이터 모델
//! - store: SQLite 저장 + FTS5 키워드 검색 + 감사 로그 테이블
//! - import: JSON 지식 팩 수집 (SHA-256 중복 방지)

mod import;
mod store;
mod types;

// Re-exports
pub use import::{
    import_pack, import_pack_file, DocumentOutcome, ImportReport, KnowledgePack, PackDocument,
};
pub use store::{
    get_data_dir, KnowledgeReader, KnowledgeStore, NewChunk, NewKnowledgeDocument, QueryLogEntry,
    QueryLogReceipt, StoreStats,
};
pub use types::{
    KnowledgeCategory, KnowledgeChunk, KnowledgeDocument, QaPair, ReferenceCondition,
    ReferencePoint,
};
