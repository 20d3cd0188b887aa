//! Context Assembler
//!
//! 검색 결과 묶음 -> 합성기용 컨텍스트 문자열 + 인용 목록
//!
//! - 섹션 순서 고정: 전문 검색 청크 -> 패턴 청크 -> 경혈 -> 질환
//! - 청크는 (file name, chunk index)로 중복 제거 (먼저 나온 섹션 우선)
//! - 같은 결과 묶음은 입력 순서와 무관하게 항상 같은 문자열로 렌더링
//! - 길이 제한 없음 (잘라내지 않음)

use std::collections::HashSet;

use serde::Serialize;

use super::{ChunkHit, RetrievalResult};
use crate::knowledge::{KnowledgeCategory, ReferenceCondition, ReferencePoint};

/// 인용 미리보기 길이 (문자)
const PREVIEW_CHARS: usize = 100;

const HEADER_CHUNKS: &str = "=== TCM KNOWLEDGE BASE ===";
const HEADER_PATTERNS: &str = "=== TCM PATTERNS & SYNDROMES ===";
const HEADER_POINTS: &str = "=== ACUPUNCTURE POINTS REFERENCE ===";
const HEADER_CONDITIONS: &str = "=== TCM CONDITIONS DATABASE ===";

/// 인용 (응답의 `sources` 항목)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub file_name: String,
    pub chunk_index: i64,
    pub preview: String,
    pub category: KnowledgeCategory,
}

/// 조립 결과
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// 컨텍스트 문자열 (결과가 없을 때만 빈 문자열)
    pub text: String,
    /// 중복 제거된 청크 인용 (전체)
    pub citations: Vec<Citation>,
    /// 표시 상한
    pub max_display: usize,
}

impl AssembledContext {
    /// 중복 제거된 청크 수 (`chunksFound`)
    pub fn chunks_found(&self) -> usize {
        self.citations.len()
    }

    /// 인용된 고유 파일 수 (`documentsSearched`)
    pub fn documents_searched(&self) -> usize {
        self.citations
            .iter()
            .map(|c| c.file_name.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// 표시용 인용 (앞에서부터 최대 `max_display`개)
    pub fn display_citations(&self) -> &[Citation] {
        let end = self.citations.len().min(self.max_display);
        &self.citations[..end]
    }
}

/// 컨텍스트 조립기
pub struct ContextAssembler {
    max_display_sources: usize,
}

impl ContextAssembler {
    pub fn new(max_display_sources: usize) -> Self {
        Self {
            max_display_sources,
        }
    }

    /// 결과 묶음 조립
    pub fn assemble(&self, results: &[RetrievalResult]) -> AssembledContext {
        let mut fulltext: Vec<&ChunkHit> = Vec::new();
        let mut pattern: Vec<&ChunkHit> = Vec::new();
        let mut points: Vec<&ReferencePoint> = Vec::new();
        let mut conditions: Vec<&ReferenceCondition> = Vec::new();

        for result in results {
            match result {
                RetrievalResult::Chunk(hit) => fulltext.push(hit),
                RetrievalResult::PatternChunk(hit) => pattern.push(hit),
                RetrievalResult::Point(p) => points.push(p),
                RetrievalResult::Condition(c) => conditions.push(c),
            }
        }

        // 섹션 내부 순서: 청크는 전략 순위, 참조 데이터는 키 순
        fulltext.sort_by(|a, b| chunk_order(a, b));
        pattern.sort_by(|a, b| chunk_order(a, b));
        points.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.name.cmp(&b.name)));
        conditions.sort_by(|a, b| a.name.cmp(&b.name));

        let mut seen: HashSet<(String, i64)> = HashSet::new();
        let mut citations = Vec::new();
        let mut sections: Vec<String> = Vec::new();

        for (header, hits) in [(HEADER_CHUNKS, fulltext), (HEADER_PATTERNS, pattern)] {
            let mut blocks = Vec::new();
            for hit in hits {
                let (file_name, chunk_index) = hit.provenance();
                if !seen.insert((file_name.to_string(), chunk_index)) {
                    continue;
                }
                blocks.push(format_chunk(hit));
                citations.push(Citation {
                    file_name: hit.chunk.file_name.clone(),
                    chunk_index: hit.chunk.chunk_index,
                    preview: hit.chunk.preview_source().chars().take(PREVIEW_CHARS).collect(),
                    category: hit.chunk.category,
                });
            }
            push_section(&mut sections, header, blocks);
        }

        push_section(
            &mut sections,
            HEADER_POINTS,
            points.into_iter().map(format_point).collect(),
        );
        push_section(
            &mut sections,
            HEADER_CONDITIONS,
            conditions.into_iter().map(format_condition).collect(),
        );

        AssembledContext {
            text: sections.join("\n\n"),
            citations,
            max_display: self.max_display_sources,
        }
    }
}

// ============================================================================
// Formatting
// ============================================================================

fn chunk_order(a: &ChunkHit, b: &ChunkHit) -> std::cmp::Ordering {
    a.rank
        .cmp(&b.rank)
        .then_with(|| a.chunk.file_name.cmp(&b.chunk.file_name))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
}

fn push_section(sections: &mut Vec<String>, header: &str, blocks: Vec<String>) {
    if blocks.is_empty() {
        return;
    }
    let mut section = String::from(header);
    for block in blocks {
        section.push_str("\n\n");
        section.push_str(&block);
    }
    sections.push(section);
}

fn format_chunk(hit: &ChunkHit) -> String {
    let chunk = &hit.chunk;
    let header = format!("[Source: {}, Entry #{}]", chunk.file_name, chunk.chunk_index);
    match &chunk.qa {
        Some(qa) => format!("{}\nQ: {}\nA: {}", header, qa.question, qa.answer),
        None => format!("{}\n{}", header, chunk.content),
    }
}

fn format_point(point: &ReferencePoint) -> String {
    let mut title = format!("[Point: {} - {}", point.code, point.name);
    if let Some(alt) = non_empty(point.alt_name.as_deref()) {
        title.push_str(&format!(" ({})", alt));
    }
    title.push(']');

    let mut lines = vec![title];
    push_line(&mut lines, "Meridian", non_empty(point.group.as_deref()));
    push_line(&mut lines, "Location", non_empty(point.location.as_deref()));
    push_list(&mut lines, "Indications", &point.indications);
    push_list(&mut lines, "Actions", &point.actions);
    lines.join("\n")
}

fn format_condition(condition: &ReferenceCondition) -> String {
    let mut title = format!("[Condition: {}", condition.name);
    if let Some(alt) = non_empty(condition.alt_name.as_deref()) {
        title.push_str(&format!(" ({})", alt));
    }
    title.push(']');

    let mut lines = vec![title];
    push_list(&mut lines, "Symptoms", &condition.symptoms);
    push_list(&mut lines, "TCM Patterns", &condition.patterns);
    push_list(&mut lines, "Points", &condition.recommended_points);
    push_list(&mut lines, "Principles", &condition.treatment_principles);
    push_line(
        &mut lines,
        "Lifestyle",
        non_empty(condition.lifestyle_advice.as_deref()),
    );
    lines.join("\n")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn push_line(lines: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(value) = value {
        lines.push(format!("{}: {}", label, value));
    }
}

fn push_list(lines: &mut Vec<String>, label: &str, values: &[String]) {
    if !values.is_empty() {
        lines.push(format!("{}: {}", label, values.join(", ")));
    }
}

// ============================================================================
// Tests
// ============================================================================
