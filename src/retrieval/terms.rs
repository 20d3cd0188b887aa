//! 질의 토크나이저 (순수 함수)
//!
//! 규칙:
//! - 소문자 변환
//! - 문자/결합 문자/숫자가 아닌 모든 문자(공백, 구두점, 기호)에서 분리
//!   (니쿠드가 있는 히브리어, NFD 악센트 문자는 한 단어로 유지)
//! - 2자 이하 토큰 제거 (문자 단위, 바이트 아님)
//! - 중복 제거, 최초 등장 순서 유지
//! - 최대 10개

use std::sync::OnceLock;

use regex::Regex;

/// 최대 검색 용어 수
pub const MAX_TERMS: usize = 10;

/// 이 길이 이하의 토큰은 버림
pub const MIN_TERM_CHARS: usize = 2;

fn splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"[^\p{L}\p{M}\p{N}]+").expect("valid regex"))
}

/// 질의 -> 검색 용어 목록
pub fn extract_terms(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut terms: Vec<String> = Vec::new();

    for token in splitter().split(&lowered) {
        if token.chars().count() <= MIN_TERM_CHARS {
            continue;
        }
        if terms.iter().any(|t| t == token) {
            continue;
        }
        terms.push(token.to_string());
        if terms.len() == MAX_TERMS {
            break;
        }
    }

    terms
}

/// 응답의 `searchTermsUsed` 표시 형식
pub fn join_terms(terms: &[String]) -> String {
    terms.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_terms_basic() {
        assert_eq!(
            extract_terms("Cold hands, and FEET!"),
            vec!["cold", "hands", "and", "feet"]
        );
    }

    #[test]
    fn test_extract_terms_drops_short_tokens() {
        assert_eq!(extract_terms("qi is ok at ST36"), vec!["st36"]);
        assert!(extract_terms("a b cd").is_empty());
    }

    #[test]
    fn test_extract_terms_hebrew_counts_chars() {
        // 각 히브리 문자는 2바이트지만 길이는 문자 수로 판단
        assert_eq!(extract_terms("קור בידיים"), vec!["קור", "בידיים"]);
        assert!(extract_terms("של זה").is_empty());
    }

    #[test]
    fn test_extract_terms_keeps_combining_marks() {
        // 니쿠드 (홀람 U+05B9)
        assert_eq!(extract_terms("קוֹר בידיים"), vec!["קוֹר", "בידיים"]);
        // NFD: e + U+0301
        assert_eq!(
            extract_terms("Pe\u{301}te\u{301}chies, rash"),
            vec!["pe\u{301}te\u{301}chies", "rash"]
        );
    }

    #[test]
    fn test_extract_terms_dedupes_in_order() {
        assert_eq!(extract_terms("cold COLD hands cold"), vec!["cold", "hands"]);
    }

    #[test]
    fn test_extract_terms_caps_at_ten() {
        let query = (0..15).map(|i| format!("term{:02}", i)).collect::<Vec<_>>().join(" ");
        let terms = extract_terms(&query);
        assert_eq!(terms.len(), MAX_TERMS);
        assert_eq!(terms[0], "term00");
        assert_eq!(terms[9], "term09");
    }

    #[test]
    fn test_extract_terms_empty_and_punctuation() {
        assert!(extract_terms("").is_empty());
        assert!(extract_terms("   ").is_empty());
        assert!(extract_terms("?!... ---").is_empty());
    }

    #[test]
    fn test_join_terms() {
        let terms = vec!["cold".to_string(), "hands".to_string()];
        assert_eq!(join_terms(&terms), "cold | hands");
        assert_eq!(join_terms(&[]), "");
    }
}
