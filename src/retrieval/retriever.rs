//! Multi-Strategy Retriever
//!
//! 4개 전략을 `tokio::join!`으로 동시에 실행합니다.
//! 전략별 타임아웃이 있으며, 실패하거나 시간 초과된 전략은 로그 후 빈 결과로 취급합니다.

use std::future::Future;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;

use super::source::KnowledgeSource;
use super::terms::extract_terms;
use super::RetrievalResult;
use crate::config::RetrievalConfig;
use crate::error::{RagError, RagResult};

/// 검색 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    FullText,
    Pattern,
    Points,
    Conditions,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FullText => "fulltext",
            Strategy::Pattern => "pattern",
            Strategy::Points => "points",
            Strategy::Conditions => "conditions",
        }
    }
}

/// 검색 결과 묶음
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// 실제 검색에 사용한 용어
    pub terms: Vec<String>,
    /// 결과 (출처 종류별로 묶여 있지만 순서 보장 없음)
    pub results: Vec<RetrievalResult>,
    /// 실패하거나 시간 초과된 전략
    pub failed: Vec<Strategy>,
}

impl RetrievalOutcome {
    /// "no matching knowledge" 신호
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// 4개 전략 모두 실패 (결과 없음과 달리 저장소 장애)
    pub fn all_failed(&self) -> bool {
        self.failed.len() == 4
    }
}

/// 다중 전략 검색기
pub struct MultiStrategyRetriever {
    config: RetrievalConfig,
}

impl MultiStrategyRetriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// 질의 검색
    ///
    /// # Arguments
    /// * `source` - 주입된 저장소 클라이언트
    /// * `query` - 원본 질의 (trim 후 비어있으면 InvalidInput, 소스 호출 없음)
    pub async fn retrieve(
        &self,
        source: &dyn KnowledgeSource,
        query: &str,
    ) -> RagResult<RetrievalOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::invalid_input("Query is required"));
        }

        let terms = extract_terms(query);
        let start = Instant::now();
        let cfg = &self.config;

        let fulltext = async {
            // 용어가 없으면 MATCH 할 것이 없음
            if terms.is_empty() {
                return Some(Vec::new());
            }
            self.run(Strategy::FullText, source.fulltext_chunks(&terms, cfg.fulltext_limit))
                .await
        };
        let pattern = self.run(Strategy::Pattern, source.pattern_chunks(cfg.pattern_limit));
        let points = self.run(Strategy::Points, source.points(&terms, cfg.point_limit));
        let conditions = self.run(
            Strategy::Conditions,
            source.conditions(&terms, cfg.condition_limit),
        );

        let (fulltext, pattern, points, conditions) =
            tokio::join!(fulltext, pattern, points, conditions);

        let mut failed = Vec::new();
        let mut results = Vec::new();

        match fulltext {
            Some(hits) => results.extend(hits.into_iter().map(RetrievalResult::Chunk)),
            None => failed.push(Strategy::FullText),
        }
        match pattern {
            Some(hits) => results.extend(hits.into_iter().map(RetrievalResult::PatternChunk)),
            None => failed.push(Strategy::Pattern),
        }
        match points {
            Some(rows) => results.extend(rows.into_iter().map(RetrievalResult::Point)),
            None => failed.push(Strategy::Points),
        }
        match conditions {
            Some(rows) => results.extend(rows.into_iter().map(RetrievalResult::Condition)),
            None => failed.push(Strategy::Conditions),
        }

        if results.is_empty() {
            tracing::warn!(
                "No matching knowledge ({} of 4 strategies failed)",
                failed.len()
            );
        }
        tracing::debug!(
            "Retrieved {} results for {} terms in {:?}",
            results.len(),
            terms.len(),
            start.elapsed()
        );

        Ok(RetrievalOutcome {
            terms,
            results,
            failed,
        })
    }

    /// 전략 1개 실행 (타임아웃 = 실패와 동일 취급)
    async fn run<T, F>(&self, strategy: Strategy, fut: F) -> Option<Vec<T>>
    where
        F: Future<Output = Result<Vec<T>>>,
    {
        match tokio::time::timeout(self.config.strategy_timeout(), fut).await {
            Ok(Ok(rows)) => {
                tracing::debug!("Strategy {}: {} rows", strategy.as_str(), rows.len());
                Some(rows)
            }
            Ok(Err(e)) => {
                tracing::warn!("Strategy {} failed: {:#}", strategy.as_str(), e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Strategy {} timed out after {:?}",
                    strategy.as_str(),
                    self.config.strategy_timeout()
                );
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
