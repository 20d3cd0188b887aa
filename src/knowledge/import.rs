//! Knowledge Pack Import - JSON 지식 팩 수집
//!
//! 팩 형식:
//! ```json
//! {
//!   "documents": [{ "fileName": "a.csv", "category": "patterns", "rows": [ {...} ] }],
//!   "points": [{ "code": "ST36", "name": "Zusanli", ... }],
//!   "conditions": [{ "name": "Raynaud", ... }]
//! }
//! ```
//!
//! 문서는 행(rows) 내용의 SHA-256 해시로 중복을 판정합니다.
//! 이미 수집된 문서는 건너뛰고 `AlreadyIndexed`로 보고합니다.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::store::{KnowledgeStore, NewChunk, NewKnowledgeDocument};
use super::types::{KnowledgeCategory, QaPair, ReferenceCondition, ReferencePoint};

/// 청크 본문 최대 길이 (문자)
const MAX_CONTENT_CHARS: usize = 10_000;
/// 질문 최대 길이 (문자)
const MAX_QUESTION_CHARS: usize = 2_000;
/// 답변 최대 길이 (문자)
const MAX_ANSWER_CHARS: usize = 5_000;

/// Q/A 행으로 인식하는 (질문, 답변) 키 쌍
const QA_KEY_PAIRS: &[(&str, &str)] = &[
    ("question", "answer"),
    ("Question", "Answer"),
    ("patient_question", "clinic_answer"),
    ("Question_Therapist", "Answer_Therapist"),
];

// ============================================================================
// Pack Types
// ============================================================================

/// 지식 팩 (JSON 파일 전체)
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePack {
    #[serde(default)]
    pub documents: Vec<PackDocument>,
    #[serde(default)]
    pub points: Vec<ReferencePoint>,
    #[serde(default)]
    pub conditions: Vec<ReferenceCondition>,
}

/// 팩 내 문서
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackDocument {
    pub file_name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub rows: Vec<Value>,
}

/// 문서별 수집 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DocumentOutcome {
    Indexed { document_id: i64, chunks: usize },
    AlreadyIndexed { document_id: i64 },
    Skipped { reason: String },
}

/// 수집 리포트
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub documents: Vec<(String, DocumentOutcome)>,
    pub points_imported: usize,
    pub conditions_imported: usize,
}

impl ImportReport {
    pub fn indexed_count(&self) -> usize {
        self.documents
            .iter()
            .filter(|(_, o)| matches!(o, DocumentOutcome::Indexed { .. }))
            .count()
    }
}

// ============================================================================
// Import
// ============================================================================

/// 파일에서 지식 팩 수집
pub fn import_pack_file(store: &KnowledgeStore, path: &Path) -> Result<ImportReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read knowledge pack: {:?}", path))?;
    let pack: KnowledgePack = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid knowledge pack JSON: {:?}", path))?;

    import_pack(store, pack)
}

/// 지식 팩 수집
///
/// 문서 하나의 실패는 리포트에 기록하고 나머지를 계속 처리합니다.
pub fn import_pack(store: &KnowledgeStore, pack: KnowledgePack) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for doc in pack.documents {
        let name = doc.file_name.clone();
        let outcome = match import_document(store, doc) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Failed to import {}: {:#}", name, e);
                DocumentOutcome::Skipped {
                    reason: format!("{:#}", e),
                }
            }
        };
        report.documents.push((name, outcome));
    }

    for point in &pack.points {
        store.upsert_point(point)?;
        report.points_imported += 1;
    }
    for condition in &pack.conditions {
        store.upsert_condition(condition)?;
        report.conditions_imported += 1;
    }

    tracing::info!(
        "Import finished: {} documents indexed, {} points, {} conditions",
        report.indexed_count(),
        report.points_imported,
        report.conditions_imported
    );

    Ok(report)
}

fn import_document(store: &KnowledgeStore, doc: PackDocument) -> Result<DocumentOutcome> {
    if doc.file_name.trim().is_empty() || doc.rows.is_empty() {
        return Ok(DocumentOutcome::Skipped {
            reason: "Missing required fields".to_string(),
        });
    }

    let file_hash = hash_rows(&doc.rows)?;
    if let Some(existing) = store.find_document_by_hash(&file_hash)? {
        tracing::info!("{} already indexed (id={})", doc.file_name, existing.id);
        return Ok(DocumentOutcome::AlreadyIndexed {
            document_id: existing.id,
        });
    }

    let category = doc
        .category
        .as_deref()
        .map(KnowledgeCategory::parse_lossy)
        .unwrap_or(KnowledgeCategory::General);

    let chunks: Vec<NewChunk> = doc.rows.iter().map(row_to_chunk).collect();
    let chunk_count = chunks.len();

    let document_id = store.add_document(NewKnowledgeDocument {
        file_name: sanitize_file_name(&doc.file_name),
        display_name: Some(doc.file_name),
        category,
        file_hash: Some(file_hash),
        chunks,
    })?;

    Ok(DocumentOutcome::Indexed {
        document_id,
        chunks: chunk_count,
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 행 목록 SHA-256 (16진수)
fn hash_rows(rows: &[Value]) -> Result<String> {
    let serialized = serde_json::to_string(rows).context("Failed to serialize rows")?;
    let digest = Sha256::digest(serialized.as_bytes());
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// 파일 이름 정규화 (`[A-Za-z0-9._-]` 외 문자는 `_`)
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 행 -> 청크 변환
///
/// Q/A 키가 있으면 `Q: ..\nA: ..` 형식, `content` 키가 있으면 그대로,
/// 그 외에는 비어있지 않은 값들을 ` | `로 연결합니다.
fn row_to_chunk(row: &Value) -> NewChunk {
    let category = row
        .get("category")
        .and_then(Value::as_str)
        .and_then(|c| c.parse::<KnowledgeCategory>().ok());

    for (q_key, a_key) in QA_KEY_PAIRS {
        if let (Some(question), Some(answer)) = (text_field(row, q_key), text_field(row, a_key)) {
            let question = truncate_chars(&question, MAX_QUESTION_CHARS);
            let answer = truncate_chars(&answer, MAX_ANSWER_CHARS);
            let content = truncate_chars(&format!("Q: {}\nA: {}", question, answer), MAX_CONTENT_CHARS);
            return NewChunk {
                content,
                qa: Some(QaPair { question, answer }),
                category,
            };
        }
    }

    let content = match text_field(row, "content") {
        Some(content) => content,
        None => match row {
            Value::Object(map) => map
                .values()
                .filter_map(value_text)
                .collect::<Vec<_>>()
                .join(" | "),
            other => value_text(other).unwrap_or_default(),
        },
    };

    NewChunk {
        content: truncate_chars(&content, MAX_CONTENT_CHARS),
        qa: None,
        category,
    }
}

fn text_field(row: &Value, key: &str) -> Option<String> {
    row.get(key).and_then(value_text)
}

/// 비어있지 않은 스칼라 값의 텍스트
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ============================================================================
// Tests
// ============================================================================
