//! Confidence & Hybrid Scorer
//!
//! 결합 점수 = 사용 가능한 하위 점수의 가중 평균
//!   - 둘 다 있으면: (ws * semantic + wk * keyword) / (ws + wk)
//!   - 하나만 있으면: 그 점수 그대로
//!   - 없으면: 0
//!
//! 가중치가 음수가 아니므로 어느 하위 점수를 올려도 결합 점수는 내려가지 않습니다.
//!
//! 키워드 점수는 소스가 명시적으로 준 값이 있으면 그 최대값,
//! 없으면 검색 용어 중 결과 텍스트에 등장한 비율(커버리지)을 사용합니다.

use serde::Serialize;

use super::RetrievalResult;
use crate::config::ScoringConfig;

/// 하이브리드 스코어 (응답 1건당 1회 계산)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridScore {
    pub semantic: Option<f32>,
    pub keyword: Option<f32>,
    pub combined: f32,
    pub threshold: f32,
    pub meets_threshold: bool,
}

impl HybridScore {
    /// 0~100 신뢰도
    pub fn confidence(&self) -> u8 {
        (self.combined * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// 신뢰도 등급
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    External,
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    /// 등급 판정 (external 우선)
    ///
    /// # Arguments
    /// * `internal_sourced` - 내부 지식베이스 컨텍스트로 답했는지
    /// * `confidence` - 0~100
    pub fn derive(internal_sourced: bool, confidence: u8) -> Self {
        if !internal_sourced {
            ConfidenceTier::External
        } else if confidence >= 80 {
            ConfidenceTier::High
        } else if confidence >= 50 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::External => "external",
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }
}

/// 하이브리드 스코어 계산기
#[derive(Debug, Clone, Copy)]
pub struct HybridScorer {
    config: ScoringConfig,
}

impl HybridScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// 하위 점수로부터 결합 점수 계산
    pub fn combine(&self, semantic: Option<f32>, keyword: Option<f32>) -> HybridScore {
        let semantic = semantic.map(unit);
        let keyword = keyword.map(unit);
        let ws = self.config.semantic_weight;
        let wk = self.config.keyword_weight;

        let combined = match (semantic, keyword) {
            (Some(s), Some(k)) if ws + wk > 0.0 => unit((ws * s + wk * k) / (ws + wk)),
            (Some(s), Some(k)) => s.max(k),
            (Some(s), None) => s,
            (None, Some(k)) => k,
            (None, None) => 0.0,
        };

        HybridScore {
            semantic,
            keyword,
            combined,
            threshold: self.config.threshold,
            meets_threshold: combined >= self.config.threshold,
        }
    }

    /// 검색 결과 묶음 점수
    pub fn score(&self, terms: &[String], results: &[RetrievalResult]) -> HybridScore {
        let hits = || results.iter().filter_map(|r| r.chunk_hit());

        let semantic = hits().filter_map(|h| h.semantic_score).reduce(f32::max);
        let keyword = hits()
            .filter_map(|h| h.keyword_score)
            .reduce(f32::max)
            .or_else(|| keyword_coverage(terms, results));

        self.combine(semantic, keyword)
    }
}

/// 검색 용어 중 결과 텍스트에 등장한 비율 (용어가 없으면 None)
pub fn keyword_coverage(terms: &[String], results: &[RetrievalResult]) -> Option<f32> {
    if terms.is_empty() {
        return None;
    }

    let texts: Vec<String> = results.iter().map(|r| r.search_text()).collect();
    let matched = terms
        .iter()
        .filter(|term| {
            let term = term.to_lowercase();
            texts.iter().any(|text| text.contains(&term))
        })
        .count();

    Some(matched as f32 / terms.len() as f32)
}

fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
