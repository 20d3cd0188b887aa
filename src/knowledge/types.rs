//! 지식베이스 데이터 모델
//!
//! 문서/청크는 수집 시점에 생성되고 질의 시점에는 읽기 전용입니다.
//! 청크 인덱스는 인용 앵커이므로 생성 후 재번호 매기지 않습니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Category
// ============================================================================

/// 지식 문서 카테고리 (도메인 토픽)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    Diagnostics,
    PulseTongue,
    ZangFu,
    Acupuncture,
    ClinicalQa,
    TreatmentPlanning,
    Patterns,
    AgeSpecific,
    General,
}

impl KnowledgeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeCategory::Diagnostics => "diagnostics",
            KnowledgeCategory::PulseTongue => "pulse_tongue",
            KnowledgeCategory::ZangFu => "zang_fu",
            KnowledgeCategory::Acupuncture => "acupuncture",
            KnowledgeCategory::ClinicalQa => "clinical_qa",
            KnowledgeCategory::TreatmentPlanning => "treatment_planning",
            KnowledgeCategory::Patterns => "patterns",
            KnowledgeCategory::AgeSpecific => "age_specific",
            KnowledgeCategory::General => "general",
        }
    }

    /// 저장된 문자열 파싱 (알 수 없는 값은 General)
    pub fn parse_lossy(s: &str) -> Self {
        s.parse().unwrap_or(KnowledgeCategory::General)
    }
}

impl fmt::Display for KnowledgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "diagnostics" => Ok(KnowledgeCategory::Diagnostics),
            "pulse_tongue" | "pulse" | "tongue" => Ok(KnowledgeCategory::PulseTongue),
            "zang_fu" | "zangfu" => Ok(KnowledgeCategory::ZangFu),
            "acupuncture" | "points" => Ok(KnowledgeCategory::Acupuncture),
            "clinical_qa" | "qa" => Ok(KnowledgeCategory::ClinicalQa),
            "treatment_planning" | "treatment" => Ok(KnowledgeCategory::TreatmentPlanning),
            "patterns" | "pattern" => Ok(KnowledgeCategory::Patterns),
            "age_specific" => Ok(KnowledgeCategory::AgeSpecific),
            "general" => Ok(KnowledgeCategory::General),
            other => Err(format!("Unknown knowledge category: {}", other)),
        }
    }
}

// ============================================================================
// Documents & Chunks
// ============================================================================

/// 수집된 지식 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: i64,
    /// 정규화된 파일 이름
    pub file_name: String,
    /// 표시용 이름 (원본 파일 이름)
    pub display_name: Option<String>,
    pub category: KnowledgeCategory,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    /// 인용에 사용되는 이름
    pub fn citation_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.file_name)
    }
}

/// Q/A 쌍
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// 문서의 텍스트 청크 (검색 결과로도 사용)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub document_id: i64,
    /// 소속 문서의 인용 이름
    pub file_name: String,
    /// 문서 내 순번 (0-based, 인용 앵커)
    pub chunk_index: i64,
    pub content: String,
    pub qa: Option<QaPair>,
    /// 청크 카테고리 (없으면 문서 카테고리 상속)
    pub category: KnowledgeCategory,
}

impl KnowledgeChunk {
    /// 미리보기 원본 텍스트 (질문 우선)
    pub fn preview_source(&self) -> &str {
        match &self.qa {
            Some(qa) if !qa.question.is_empty() => &qa.question,
            _ => &self.content,
        }
    }
}

// ============================================================================
// Structured Reference Tables
// ============================================================================

/// 경혈 참조 데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    /// 경혈 코드 (예: LI4, ST36)
    pub code: String,
    pub name: String,
    pub alt_name: Option<String>,
    /// 경락 등 그룹 태그
    pub group: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub indications: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// 질환 참조 데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCondition {
    pub name: String,
    pub alt_name: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub recommended_points: Vec<String>,
    #[serde(default)]
    pub treatment_principles: Vec<String>,
    pub lifestyle_advice: Option<String>,
}

// ============================================================================
// Search Text
// ============================================================================
//
// 포함 검색 필터(저장 시 컬럼)와 키워드 커버리지 스코어가 같은 필드 집합을 쓰도록
// 검색 텍스트는 여기서만 만듭니다. 소문자 변환은 Rust 유니코드 규칙(`to_lowercase`)입니다.

/// 청크 검색 텍스트 (본문 + Q/A)
pub(crate) fn chunk_search_text(content: &str, qa: Option<&QaPair>) -> String {
    match qa {
        Some(qa) => format!("{}\n{}\n{}", content, qa.question, qa.answer),
        None => content.to_string(),
    }
    .to_lowercase()
}

impl KnowledgeChunk {
    /// 소문자 검색 텍스트
    pub fn search_text(&self) -> String {
        chunk_search_text(&self.content, self.qa.as_ref())
    }
}

impl ReferencePoint {
    /// 소문자 검색 텍스트 (코드, 이름, 별칭, 경락, 위치, 적응증, 작용)
    pub fn search_text(&self) -> String {
        let indications = self.indications.join(" ");
        let actions = self.actions.join(" ");
        [
            self.code.as_str(),
            self.name.as_str(),
            self.alt_name.as_deref().unwrap_or_default(),
            self.group.as_deref().unwrap_or_default(),
            self.location.as_deref().unwrap_or_default(),
            indications.as_str(),
            actions.as_str(),
        ]
        .join(" ")
        .to_lowercase()
    }
}

impl ReferenceCondition {
    /// 소문자 검색 텍스트 (이름, 별칭, 증상, 패턴, 추천 경혈, 치료 원칙)
    pub fn search_text(&self) -> String {
        let symptoms = self.symptoms.join(" ");
        let patterns = self.patterns.join(" ");
        let points = self.recommended_points.join(" ");
        let principles = self.treatment_principles.join(" ");
        [
            self.name.as_str(),
            self.alt_name.as_deref().unwrap_or_default(),
            symptoms.as_str(),
            patterns.as_str(),
            points.as_str(),
            principles.as_str(),
        ]
        .join(" ")
        .to_lowercase()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse() {
        assert_eq!("zang-fu".parse::<KnowledgeCategory>(), Ok(KnowledgeCategory::ZangFu));
        assert_eq!("Clinical QA".parse::<KnowledgeCategory>(), Ok(KnowledgeCategory::ClinicalQa));
        assert!("herbs".parse::<KnowledgeCategory>().is_err());
        assert_eq!(KnowledgeCategory::parse_lossy("herbs"), KnowledgeCategory::General);
    }

    #[test]
    fn test_category_roundtrip_as_str() {
        let all = [
            KnowledgeCategory::Diagnostics,
            KnowledgeCategory::PulseTongue,
            KnowledgeCategory::ZangFu,
            KnowledgeCategory::Acupuncture,
            KnowledgeCategory::ClinicalQa,
            KnowledgeCategory::TreatmentPlanning,
            KnowledgeCategory::Patterns,
            KnowledgeCategory::AgeSpecific,
            KnowledgeCategory::General,
        ];
        for category in all {
            assert_eq!(KnowledgeCategory::parse_lossy(category.as_str()), category);
        }
    }

    #[test]
    fn test_preview_source_prefers_question() {
        let mut chunk = KnowledgeChunk {
            id: 1,
            document_id: 1,
            file_name: "qa.csv".to_string(),
            chunk_index: 0,
            content: "Q: What is LI4?\nA: Hegu".to_string(),
            qa: Some(QaPair {
                question: "What is LI4?".to_string(),
                answer: "Hegu".to_string(),
            }),
            category: KnowledgeCategory::ClinicalQa,
        };
        assert_eq!(chunk.preview_source(), "What is LI4?");

        chunk.qa = None;
        assert!(chunk.preview_source().starts_with("Q: What is LI4?"));
    }

    #[test]
    fn test_search_text_folds_unicode_case() {
        let point = ReferencePoint {
            code: "SP9".to_string(),
            name: "Yinlingquan".to_string(),
            alt_name: None,
            group: Some("Spleen".to_string()),
            location: Some("Medial Knee".to_string()),
            indications: vec!["Ödem".to_string()],
            actions: vec![],
        };
        let text = point.search_text();
        assert!(text.contains("ödem"));
        assert!(text.contains("medial knee"));

        let condition = ReferenceCondition {
            name: "Édème".to_string(),
            alt_name: None,
            symptoms: vec![],
            patterns: vec![],
            recommended_points: vec![],
            treatment_principles: vec!["Drain Damp".to_string()],
            lifestyle_advice: None,
        };
        assert!(condition.search_text().starts_with("édème"));
        assert!(condition.search_text().contains("drain damp"));
    }

    #[test]
    fn test_citation_name_falls_back_to_file_name() {
        let doc = KnowledgeDocument {
            id: 1,
            file_name: "yang_deficiency.csv".to_string(),
            display_name: None,
            category: KnowledgeCategory::Patterns,
            row_count: 0,
            created_at: Utc::now(),
        };
        assert_eq!(doc.citation_name(), "yang_deficiency.csv");
    }
}
