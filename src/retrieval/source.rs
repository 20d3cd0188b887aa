//! KnowledgeSource - 검색기에 주입되는 저장소 클라이언트
//!
//! 검색기는 전역 클라이언트를 쓰지 않고 호출 시점에 소스를 받습니다.
//! 테스트에서는 fake 구현으로 교체합니다.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::ChunkHit;
use crate::knowledge::{KnowledgeStore, ReferenceCondition, ReferencePoint};

/// 패턴/카테고리 필터 키워드
pub const PATTERN_KEYWORDS: &[&str] = &["pattern", "syndrome", "deficiency", "excess"];

/// 검색 전략별 읽기 연산
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// 전문 검색 (용어 OR 결합, 저장소 관련성 순위 유지)
    async fn fulltext_chunks(&self, terms: &[String], limit: usize) -> Result<Vec<ChunkHit>>;

    /// 고정 패턴 키워드 필터 검색
    async fn pattern_chunks(&self, limit: usize) -> Result<Vec<ChunkHit>>;

    /// 경혈 조회 (용어 포함 필터, 용어가 없으면 필터 없음)
    async fn points(&self, terms: &[String], limit: usize) -> Result<Vec<ReferencePoint>>;

    /// 질환 조회 (용어 포함 필터, 용어가 없으면 필터 없음)
    async fn conditions(&self, terms: &[String], limit: usize)
        -> Result<Vec<ReferenceCondition>>;
}

// ============================================================================
// SQLite Adapter
// ============================================================================

/// `KnowledgeStore` 기반 소스
///
/// rusqlite 호출은 블로킹이므로 `spawn_blocking`에서 실행합니다.
/// 전략마다 읽기 전용 연결을 새로 열어서, 느린 전략이나 쓰기 잠금이
/// 다른 전략을 붙잡지 않습니다.
#[derive(Clone)]
pub struct SqliteKnowledgeSource {
    store: KnowledgeStore,
}

impl SqliteKnowledgeSource {
    pub fn new(store: KnowledgeStore) -> Self {
        Self { store }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Store task panicked")?
}

fn ranked(chunks: Vec<crate::knowledge::KnowledgeChunk>) -> Vec<ChunkHit> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(rank, chunk)| ChunkHit::new(chunk, rank))
        .collect()
}

#[async_trait]
impl KnowledgeSource for SqliteKnowledgeSource {
    async fn fulltext_chunks(&self, terms: &[String], limit: usize) -> Result<Vec<ChunkHit>> {
        let store = self.store.clone();
        let terms = terms.to_vec();
        let chunks = blocking(move || store.reader()?.search_chunks_fts(&terms, limit)).await?;
        Ok(ranked(chunks))
    }

    async fn pattern_chunks(&self, limit: usize) -> Result<Vec<ChunkHit>> {
        let store = self.store.clone();
        let chunks = blocking(move || {
            store
                .reader()?
                .search_chunks_containing(PATTERN_KEYWORDS, limit)
        })
        .await?;
        Ok(ranked(chunks))
    }

    async fn points(&self, terms: &[String], limit: usize) -> Result<Vec<ReferencePoint>> {
        let store = self.store.clone();
        let terms = terms.to_vec();
        blocking(move || store.reader()?.search_points(&terms, limit)).await
    }

    async fn conditions(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<ReferenceCondition>> {
        let store = self.store.clone();
        let terms = terms.to_vec();
        blocking(move || store.reader()?.search_conditions(&terms, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::knowledge::{KnowledgeCategory, NewChunk, NewKnowledgeDocument};
    use crate::retrieval::{MultiStrategyRetriever, SourceKind, Strategy};
    use std::time::Duration;
    use tempfile::TempDir;

    fn seeded_source() -> (TempDir, SqliteKnowledgeSource) {
        let dir = TempDir::new().unwrap();
        let store = KnowledgeStore::open(&dir.path().join("test.db")).unwrap();
        let chunks = ["Spleen overview", "Liver Qi stagnation syndrome", "Kidney Yang deficiency"]
            .iter()
            .map(|c| NewChunk {
                content: c.to_string(),
                qa: None,
                category: None,
            })
            .collect();
        store
            .add_document(NewKnowledgeDocument {
                file_name: "zangfu.csv".to_string(),
                display_name: None,
                category: KnowledgeCategory::ZangFu,
                file_hash: None,
                chunks,
            })
            .unwrap();
        (dir, SqliteKnowledgeSource::new(store))
    }

    #[tokio::test]
    async fn test_fulltext_chunks_assigns_rank() {
        let (_dir, source) = seeded_source();
        let hits = source
            .fulltext_chunks(&["spleen".to_string(), "liver".to_string()], 15)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rank, 0);
        assert_eq!(hits[1].rank, 1);
        assert!(hits[0].keyword_score.is_none());
    }

    #[tokio::test]
    async fn test_pattern_chunks_uses_fixed_keywords() {
        let (_dir, source) = seeded_source();
        let hits = source.pattern_chunks(10).await.unwrap();
        let indices: Vec<i64> = hits.iter().map(|h| h.chunk.chunk_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    fn seed_reference_rows(source: &SqliteKnowledgeSource) {
        source
            .store
            .upsert_point(&ReferencePoint {
                code: "LV3".to_string(),
                name: "Taichong".to_string(),
                alt_name: None,
                group: Some("Liver".to_string()),
                location: None,
                indications: vec!["irritability".to_string()],
                actions: vec!["moves liver qi".to_string()],
            })
            .unwrap();
        source
            .store
            .upsert_condition(&ReferenceCondition {
                name: "Liver Qi Stagnation".to_string(),
                alt_name: None,
                symptoms: vec!["irritability".to_string()],
                patterns: vec![],
                recommended_points: vec!["LV3".to_string()],
                treatment_principles: vec![],
                lifestyle_advice: None,
            })
            .unwrap();
    }

    fn fast_timeout_retriever() -> MultiStrategyRetriever {
        MultiStrategyRetriever::new(RetrievalConfig {
            strategy_timeout_ms: 100,
            ..RetrievalConfig::default()
        })
    }

    #[tokio::test]
    async fn test_strategies_not_blocked_by_held_write_lock() {
        let (_dir, source) = seeded_source();
        seed_reference_rows(&source);

        // 다른 스레드가 쓰기 연결을 타임아웃보다 오래 잡고 있음
        let store = source.store.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = store.lock_for_test();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        let outcome = fast_timeout_retriever()
            .retrieve(&source, "liver spleen")
            .await
            .unwrap();
        holder.join().unwrap();

        assert!(outcome.failed.is_empty(), "failed: {:?}", outcome.failed);
        let kinds: Vec<SourceKind> = outcome.results.iter().map(|r| r.kind()).collect();
        assert!(kinds.contains(&SourceKind::Chunk));
        assert!(kinds.contains(&SourceKind::PatternChunk));
        assert!(kinds.contains(&SourceKind::Point));
        assert!(kinds.contains(&SourceKind::Condition));
    }

    /// 경혈 조회만 느린 SQLite 소스
    struct SlowPointsSource {
        inner: SqliteKnowledgeSource,
    }

    #[async_trait]
    impl KnowledgeSource for SlowPointsSource {
        async fn fulltext_chunks(&self, terms: &[String], limit: usize) -> Result<Vec<ChunkHit>> {
            self.inner.fulltext_chunks(terms, limit).await
        }

        async fn pattern_chunks(&self, limit: usize) -> Result<Vec<ChunkHit>> {
            self.inner.pattern_chunks(limit).await
        }

        async fn points(&self, terms: &[String], limit: usize) -> Result<Vec<ReferencePoint>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.inner.points(terms, limit).await
        }

        async fn conditions(
            &self,
            terms: &[String],
            limit: usize,
        ) -> Result<Vec<ReferenceCondition>> {
            self.inner.conditions(terms, limit).await
        }
    }

    #[tokio::test]
    async fn test_slow_strategy_keeps_other_sqlite_results() {
        let (_dir, inner) = seeded_source();
        seed_reference_rows(&inner);
        let source = SlowPointsSource { inner };

        let outcome = fast_timeout_retriever()
            .retrieve(&source, "liver irritability")
            .await
            .unwrap();

        assert_eq!(outcome.failed, vec![Strategy::Points]);
        let kinds: Vec<SourceKind> = outcome.results.iter().map(|r| r.kind()).collect();
        assert!(kinds.contains(&SourceKind::Chunk));
        assert!(kinds.contains(&SourceKind::PatternChunk));
        assert!(kinds.contains(&SourceKind::Condition));
        assert!(!kinds.contains(&SourceKind::Point));
    }
}
