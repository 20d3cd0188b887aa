//! Retrieval 모듈 - 다중 전략 검색 + 컨텍스트 조립 + 신뢰도 스코어
//!
//! 질의 1건의 흐름:
//! 1. terms: 질의 -> 검색 용어 (순수 함수)
//! 2. retriever: 4개 전략 동시 실행 (전문 검색, 패턴 필터, 경혈, 질환)
//! 3. context: 고정 섹션 순서로 컨텍스트 + 인용 목록 생성
//! 4. scoring: 하이브리드 스코어 + 신뢰도 등급
//!
//! 검색 결과(`RetrievalResult`)는 질의 범위 안에서만 존재하며 저장되지 않습니다.

mod context;
mod retriever;
mod scoring;
mod source;
mod terms;

use serde::Serialize;

use crate::knowledge::{KnowledgeCategory, KnowledgeChunk, ReferenceCondition, ReferencePoint};

// Re-exports
pub use context::{AssembledContext, Citation, ContextAssembler};
pub use retriever::{MultiStrategyRetriever, RetrievalOutcome, Strategy};
pub use scoring::{keyword_coverage, ConfidenceTier, HybridScore, HybridScorer};
pub use source::{KnowledgeSource, SqliteKnowledgeSource, PATTERN_KEYWORDS};
pub use terms::{extract_terms, join_terms, MAX_TERMS, MIN_TERM_CHARS};

// ============================================================================
// RetrievalResult
// ============================================================================

/// 검색 결과 출처 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Chunk,
    PatternChunk,
    Point,
    Condition,
}

/// 청크 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk: KnowledgeChunk,
    /// 전략 결과 내 순위 (0 = 가장 관련성 높음)
    pub rank: usize,
    /// 키워드(BM25 등) 정규화 점수 (0.0 ~ 1.0), 제공하는 소스만
    pub keyword_score: Option<f32>,
    /// 시맨틱 유사도 (0.0 ~ 1.0), 제공하는 소스만
    pub semantic_score: Option<f32>,
}

impl ChunkHit {
    pub fn new(chunk: KnowledgeChunk, rank: usize) -> Self {
        Self {
            chunk,
            rank,
            keyword_score: None,
            semantic_score: None,
        }
    }

    /// 인용 키 (file name, chunk index)
    pub fn provenance(&self) -> (&str, i64) {
        (&self.chunk.file_name, self.chunk.chunk_index)
    }
}

/// 검색 결과 (출처 종류별 태그)
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalResult {
    /// 전문 검색 청크
    Chunk(ChunkHit),
    /// 패턴/카테고리 필터 청크
    PatternChunk(ChunkHit),
    /// 경혈 참조
    Point(ReferencePoint),
    /// 질환 참조
    Condition(ReferenceCondition),
}

impl RetrievalResult {
    pub fn kind(&self) -> SourceKind {
        match self {
            RetrievalResult::Chunk(_) => SourceKind::Chunk,
            RetrievalResult::PatternChunk(_) => SourceKind::PatternChunk,
            RetrievalResult::Point(_) => SourceKind::Point,
            RetrievalResult::Condition(_) => SourceKind::Condition,
        }
    }

    /// 카테고리 (참조 테이블은 고정)
    pub fn category(&self) -> KnowledgeCategory {
        match self {
            RetrievalResult::Chunk(hit) | RetrievalResult::PatternChunk(hit) => hit.chunk.category,
            RetrievalResult::Point(_) => KnowledgeCategory::Acupuncture,
            RetrievalResult::Condition(_) => KnowledgeCategory::Patterns,
        }
    }

    /// 키워드 커버리지 계산용 텍스트 (소문자, 저장소 포함 필터와 같은 필드)
    pub fn search_text(&self) -> String {
        match self {
            RetrievalResult::Chunk(hit) | RetrievalResult::PatternChunk(hit) => {
                hit.chunk.search_text()
            }
            RetrievalResult::Point(p) => p.search_text(),
            RetrievalResult::Condition(c) => c.search_text(),
        }
    }

    fn chunk_hit(&self) -> Option<&ChunkHit> {
        match self {
            RetrievalResult::Chunk(hit) | RetrievalResult::PatternChunk(hit) => Some(hit),
            _ => None,
        }
    }
}

// ============================================================================
// Test Fixtures
// ============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::knowledge::QaPair;

    pub fn chunk(file: &str, index: i64, content: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            id: index,
            document_id: 1,
            file_name: file.to_string(),
            chunk_index: index,
            content: content.to_string(),
            qa: None,
            category: KnowledgeCategory::Patterns,
        }
    }

    pub fn qa_chunk(file: &str, index: i64, question: &str, answer: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            qa: Some(QaPair {
                question: question.to_string(),
                answer: answer.to_string(),
            }),
            category: KnowledgeCategory::ClinicalQa,
            ..chunk(file, index, &format!("Q: {}\nA: {}", question, answer))
        }
    }

    pub fn point(code: &str, name: &str) -> ReferencePoint {
        ReferencePoint {
            code: code.to_string(),
            name: name.to_string(),
            alt_name: None,
            group: Some("Stomach".to_string()),
            location: Some("Below the knee".to_string()),
            indications: vec!["fatigue".to_string(), "cold limbs".to_string()],
            actions: vec!["tonifies qi".to_string()],
        }
    }

    pub fn condition(name: &str) -> ReferenceCondition {
        ReferenceCondition {
            name: name.to_string(),
            alt_name: None,
            symptoms: vec!["cold hands".to_string()],
            patterns: vec!["Yang Deficiency".to_string()],
            recommended_points: vec!["ST36".to_string()],
            treatment_principles: vec!["warm yang".to_string()],
            lifestyle_advice: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_result_kind_and_provenance() {
        let hit = RetrievalResult::PatternChunk(ChunkHit::new(chunk("a.csv", 5, "x"), 0));
        assert_eq!(hit.kind(), SourceKind::PatternChunk);
        if let RetrievalResult::PatternChunk(inner) = &hit {
            assert_eq!(inner.provenance(), ("a.csv", 5));
        }

        let p = RetrievalResult::Point(point("ST36", "Zusanli"));
        assert_eq!(p.kind(), SourceKind::Point);
        assert_eq!(p.category(), KnowledgeCategory::Acupuncture);
    }

    #[test]
    fn test_search_text_includes_qa_and_lists() {
        let qa = RetrievalResult::Chunk(ChunkHit::new(qa_chunk("qa.csv", 0, "Cold Hands?", "Warm Yang"), 0));
        assert!(qa.search_text().contains("cold hands?"));

        let p = RetrievalResult::Point(point("ST36", "Zusanli"));
        let text = p.search_text();
        assert!(text.contains("st36"));
        assert!(text.contains("cold limbs"));
        assert!(text.contains("below the knee"));
    }
}
