//! Synthesis 모듈 - 응답 합성기 (외부 LLM) 계약
//!
//! - `Synthesizer`: 시스템 지시문 + 대화 메시지 -> 답변 문자열
//! - 시스템 지시문 빌더: 행동 규칙, 컨텍스트 블록, 질의, 환자 정보, 연령군 가이드
//! - `GatewaySynthesizer`: OpenAI 호환 chat completions 클라이언트
//!
//! 합성기는 자동 재시도하지 않습니다. 분류된 에러를 호출자에게 그대로 올립니다.

mod gateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gateway::GatewaySynthesizer;

// ============================================================================
// Errors
// ============================================================================

/// 합성기 에러 분류
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// HTTP 429
    #[error("Rate limit exceeded")]
    RateLimited,

    /// HTTP 402
    #[error("AI credits exhausted")]
    Billing,

    /// 그 외 비정상 상태 코드 (본문은 로그 전용)
    #[error("AI gateway returned status {status}")]
    Upstream { status: u16, body: String },

    /// 네트워크/타임아웃/응답 파싱 실패
    #[error("AI gateway request failed: {0}")]
    Transport(String),

    /// 200 이지만 답변이 비어있음
    #[error("AI gateway returned an empty response")]
    EmptyResponse,

    /// API 키 없음
    #[error("AI gateway API key not configured")]
    NotConfigured,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 대화 메시지 (요청의 `messages` 항목과 같은 형태)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// 합성 요청
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub system_instruction: String,
    /// 이전 대화 + 현재 질의 (마지막이 user)
    pub messages: Vec<ChatMessage>,
}

impl SynthesisRequest {
    /// 요청 구성
    ///
    /// 이전 대화의 system 메시지는 버립니다. 마지막 메시지가 현재 질의와 같으면
    /// 중복 추가하지 않습니다.
    pub fn new(system_instruction: String, history: &[ChatMessage], query: &str) -> Self {
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.role != ChatRole::System && !m.content.trim().is_empty())
            .cloned()
            .collect();

        let already_last = messages
            .last()
            .is_some_and(|m| m.role == ChatRole::User && m.content.trim() == query.trim());
        if !already_last {
            messages.push(ChatMessage::new(ChatRole::User, query.trim()));
        }

        Self {
            system_instruction,
            messages,
        }
    }

    /// system 메시지를 맨 앞에 둔 전체 메시지
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        let mut all = Vec::with_capacity(self.messages.len() + 1);
        all.push(ChatMessage::new(ChatRole::System, self.system_instruction.clone()));
        all.extend(self.messages.iter().cloned());
        all
    }
}

/// 응답 합성기
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// 감사 로그에 기록할 모델 이름
    fn model_name(&self) -> &str;

    /// 답변 생성 (비어있지 않은 문자열)
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, SynthesisError>;
}

// ============================================================================
// System Instruction
// ============================================================================

const KNOWLEDGE_BASE_PROMPT: &str = "You are a TCM Knowledge Assistant, powered EXCLUSIVELY by the clinic's proprietary knowledge base.

CRITICAL RULES:
1. You MUST ONLY answer using the provided context from the knowledge base
2. If the context doesn't contain relevant information, say: \"I don't have information about this in the knowledge base.\"
3. ALWAYS cite sources using [Source: filename, entry #X] format
4. NEVER make up information or use general knowledge
5. Respond in the same language as the user's question

When answering:
- Quote or paraphrase directly from the provided context
- Include specific acupoints, formulas, or clinical notes when available
- Mention safety considerations if present in the source material
- Be concise but thorough";

const EXTERNAL_PROMPT: &str = "You are a general TCM (Traditional Chinese Medicine) knowledge assistant.

IMPORTANT DISCLAIMER - INCLUDE THIS IN EVERY RESPONSE:
This response is from EXTERNAL AI and is NOT from the clinic's verified knowledge base.
The therapist has accepted liability for using this external information.

When answering:
- Provide helpful TCM information based on general knowledge
- Include appropriate medical disclaimers
- Recommend consulting the verified knowledge base for clinical decisions
- Respond in the same language as the user's question";

const LIMITED_COVERAGE_NOTE: &str = "NOTE: Limited information found in knowledge base for this query. \
Tell the user that knowledge-base coverage was limited. Do not present general knowledge as if it came from the knowledge base.";

/// 연령군별 가이드
const AGE_GROUPS: &[(&str, &str)] = &[
    (
        "newborn",
        "This is a newborn/infant patient (0-2 years). Treatment must be extremely gentle: minimal needling (often avoid), prefer tuina, moxa, herbal baths. Focus on supporting natural development. Reduce herb doses significantly (1/10-1/20 adult dose).",
    ),
    (
        "children",
        "This is a pediatric patient (3-12 years). Consider school stress, growth patterns, digestive development. Use gentler techniques and reduced dosages. Ask about screen time, sleep, concentration, and social factors.",
    ),
    (
        "teenage",
        "This is a teenage patient (13-18 years). Consider academic pressure, hormonal changes, social/peer stress, identity development, and emotional regulation. Focus on Liver Qi stagnation, Heart-Kidney axis for anxiety, and sleep disruption from screen use. Be sensitive to mental health concerns including depression, anxiety, and exam stress.",
    ),
    (
        "adults_18_50",
        "This is an adult patient (18-50 years). Consider work stress, lifestyle, fertility/cycles where relevant. Focus on Liver Qi stagnation patterns, digestive issues from irregular eating, and sleep disruption from modern lifestyle.",
    ),
    (
        "adults_50_70",
        "This is a middle-aged patient (50-70 years). Consider chronic disease history, medications, hormonal changes (menopause/andropause). Focus on Kidney Yin/Yang balance, joint health, cardiovascular patterns. Ask about medication interactions.",
    ),
    (
        "elderly",
        "This is an elderly patient (70+ years). Treatment must be gentle: shallow needling, fewer points (5-8 max), shorter retention. Reduce herb doses to 1/3-1/2 normal. Focus on quality of life, fall prevention, medication interactions. Coordinate with Western medical care.",
    ),
];

/// 연령군 가이드 조회 (알 수 없는 값은 None)
pub fn age_group_guidance(age_group: &str) -> Option<&'static str> {
    let key = age_group.trim().to_lowercase();
    AGE_GROUPS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, text)| *text)
}

/// 시스템 지시문 입력
#[derive(Debug, Clone, Default)]
pub struct InstructionInput<'a> {
    /// 조립된 컨텍스트 (external 모드에서는 무시)
    pub context: &'a str,
    pub query: &'a str,
    pub patient_context: Option<&'a str>,
    pub age_group: Option<&'a str>,
    /// 외부 일반 지식 모드
    pub external_mode: bool,
    /// 이 길이 미만의 컨텍스트는 커버리지 부족으로 취급
    pub min_context_chars: usize,
}

impl InstructionInput<'_> {
    /// 컨텍스트가 커버리지 기준 이상인지
    pub fn has_sufficient_context(&self) -> bool {
        self.context.chars().count() >= self.min_context_chars
    }
}

/// 시스템 지시문 생성
pub fn build_system_instruction(input: &InstructionInput<'_>) -> String {
    let mut out = String::from(if input.external_mode {
        EXTERNAL_PROMPT
    } else {
        KNOWLEDGE_BASE_PROMPT
    });

    // 환자 메타데이터 (key: value)
    let patient_context = input.patient_context.map(str::trim).filter(|s| !s.is_empty());
    let age_group = input.age_group.map(str::trim).filter(|s| !s.is_empty());
    if patient_context.is_some() || age_group.is_some() {
        out.push_str("\n\n=== PATIENT INFORMATION ===");
        if let Some(age_group) = age_group {
            out.push_str(&format!("\nAge group: {}", age_group));
        }
        if let Some(patient_context) = patient_context {
            out.push_str(&format!("\nPatient context: {}", patient_context));
        }
        out.push_str("\n=== END PATIENT INFO ===");
    }

    if let Some(guidance) = age_group.and_then(age_group_guidance) {
        out.push_str("\n\n=== PATIENT AGE GROUP CONTEXT ===\n");
        out.push_str(guidance);
        out.push_str("\n=== END AGE CONTEXT ===");
    }

    if !input.external_mode {
        let context = input.context.trim();
        if !context.is_empty() {
            out.push_str("\n\n=== CONTEXT FROM KNOWLEDGE BASE ===\n\n");
            out.push_str(context);
            out.push_str("\n\n=== END CONTEXT ===");
        }
        if !input.has_sufficient_context() {
            out.push_str("\n\n");
            out.push_str(LIMITED_COVERAGE_NOTE);
        }
    }

    out.push_str("\n\n=== USER QUESTION ===\n");
    out.push_str(input.query.trim());

    out
}

// ============================================================================
// Tests
// ============================================================================
