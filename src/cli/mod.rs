//! CLI 모듈
//!
//! tcm-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::RagConfig;
use crate::engine::{QueryRequest, RagEngine};
use crate::knowledge::{import_pack_file, DocumentOutcome, KnowledgeCategory, KnowledgeStore};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "tcm-rag")]
#[command(version, about = "TCM 지식베이스 RAG 질의 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP 서버 실행
    Serve {
        /// 바인드 주소 (기본: TCM_RAG_BIND 또는 127.0.0.1:8787)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// 단일 질의 실행
    Query {
        /// 질의
        query: String,

        /// 환자 정보
        #[arg(short, long)]
        patient_context: Option<String>,

        /// 연령군 (newborn, children, teenage, adults_18_50, adults_50_70, elderly)
        #[arg(short, long)]
        age_group: Option<String>,

        /// 내부 지식베이스 대신 일반 지식으로 답변
        #[arg(long)]
        external: bool,

        /// 감사 로그에 기록할 사용자 ID
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// JSON 지식 팩 수집
    Import {
        /// 지식 팩 파일 경로
        file: PathBuf,

        /// 수집 후 FTS 인덱스 리빌드
        #[arg(long)]
        reindex: bool,
    },

    /// 저장된 문서 목록
    List {
        /// 카테고리 필터
        #[arg(short, long)]
        category: Option<KnowledgeCategory>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env()?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            crate::server::serve(&config).await
        }
        Commands::Query {
            query,
            patient_context,
            age_group,
            external,
            user,
        } => {
            let request = QueryRequest {
                query,
                patient_context,
                age_group,
                use_external_ai: external,
                ..Default::default()
            };
            cmd_query(&config, &user, request).await
        }
        Commands::Import { file, reindex } => cmd_import(&config, file, reindex),
        Commands::List { category, limit } => cmd_list(&config, category, limit),
        Commands::Status => cmd_status(&config),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 질의 명령어 (query)
async fn cmd_query(config: &RagConfig, user: &str, request: QueryRequest) -> Result<()> {
    let engine = RagEngine::from_config(config).context("RagEngine 초기화 실패")?;

    println!("[*] 질의 중: \"{}\"", request.query.trim());
    let response = engine.query(user, request).await?;

    println!();
    println!("{}", response.response);
    println!();
    println!(
        "[OK] 신뢰도: {} ({}%), 청크 {} 건, 문서 {} 건",
        response.confidence_tier.as_str(),
        response.confidence,
        response.chunks_found,
        response.documents_searched
    );
    println!("     검색어: {}", response.search_terms_used);

    if !response.sources.is_empty() {
        println!();
        println!("[*] 출처:");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "  {}. {} #{} [{}]",
                i + 1,
                source.file_name,
                source.chunk_index,
                source.category
            );
            println!("     {}", truncate_text(&source.preview, 80));
        }
        if let Some(more) = response.more_label() {
            println!("  {}", more);
        }
    }

    if !response.audit_logged {
        println!("[!] 감사 로그 기록 실패");
    }

    Ok(())
}

/// 수집 명령어 (import)
fn cmd_import(config: &RagConfig, file: PathBuf, reindex: bool) -> Result<()> {
    let store = KnowledgeStore::open(&config.db_path()).context("KnowledgeStore 열기 실패")?;

    println!("[*] 지식 팩 수집 중: {}", file.display());
    let report = import_pack_file(&store, &file)?;

    for (name, outcome) in &report.documents {
        match outcome {
            DocumentOutcome::Indexed {
                document_id,
                chunks,
            } => println!("  [OK] {} (ID: {}, 청크 {} 개)", name, document_id, chunks),
            DocumentOutcome::AlreadyIndexed { document_id } => {
                println!("  [=] {} 이미 수집됨 (ID: {})", name, document_id)
            }
            DocumentOutcome::Skipped { reason } => println!("  [!] {} 건너뜀: {}", name, reason),
        }
    }

    println!();
    println!(
        "[OK] 문서 {} 건 수집, 경혈 {} 건, 질환 {} 건",
        report.indexed_count(),
        report.points_imported,
        report.conditions_imported
    );

    if reindex {
        let count = store.rebuild_fts_index()?;
        println!("[OK] FTS 인덱스 리빌드: {} 청크", count);
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(config: &RagConfig, category: Option<KnowledgeCategory>, limit: usize) -> Result<()> {
    let store = KnowledgeStore::open(&config.db_path()).context("KnowledgeStore 열기 실패")?;
    let docs = store.list_documents(limit, category)?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());
    for doc in docs {
        println!(
            "  #{:<4} [{}] {}",
            doc.id,
            doc.category,
            truncate_text(doc.citation_name(), 60)
        );
        println!(
            "        행: {}, 수집: {}",
            doc.row_count,
            doc.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("tcm-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 모델: {} ({})", config.llm.model, config.llm.endpoint);

    if config.llm.api_key.is_some() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export LOVABLE_API_KEY=your-key");
    }
    println!("[*] API 토큰: {} 개", config.server.api_tokens.len());

    match KnowledgeStore::open(&config.db_path()) {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!("[OK] 저장된 문서: {} 건 (청크 {} 개)", stats.document_count, stats.chunk_count);
                println!(
                    "     경혈 {} 건, 질환 {} 건, 질의 로그 {} 건",
                    stats.point_count, stats.condition_count, stats.query_log_count
                );
                if let Ok(meta) = std::fs::metadata(&stats.db_path) {
                    println!("     DB 크기: {}", format_bytes(meta.len() as usize));
                }
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] KnowledgeStore 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "tcm-rag",
            "query",
            "cold hands",
            "--age-group",
            "elderly",
            "--external",
        ])
        .unwrap();

        match cli.command {
            Commands::Query {
                query,
                age_group,
                external,
                user,
                ..
            } => {
                assert_eq!(query, "cold hands");
                assert_eq!(age_group.as_deref(), Some("elderly"));
                assert!(external);
                assert_eq!(user, "cli");
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_parse_list_category() {
        let cli = Cli::try_parse_from(["tcm-rag", "list", "--category", "zang-fu"]).unwrap();
        match cli.command {
            Commands::List { category, limit } => {
                assert_eq!(category, Some(KnowledgeCategory::ZangFu));
                assert_eq!(limit, 20);
            }
            _ => panic!("expected list command"),
        }
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        let hebrew = "קור בידיים";
        assert_eq!(truncate_text(hebrew, 3), "קור...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
