//! Knowledge Store - rusqlite 기반 지식 저장소
//!
//! 지식 문서/청크 (FTS5 키워드 검색), 구조화 참조 테이블 (경혈, 질환),
//! 질의 감사 로그를 하나의 SQLite 파일에 저장합니다.
//! 저장 위치: ~/.tcm-rag/knowledge.db
//!
//! 질의 경로에서는 읽기만 합니다. 쓰기는 수집(import)과 감사 로그뿐입니다.
//! 검색은 `KnowledgeReader`(호출마다 여는 읽기 전용 연결)로 하므로
//! 쓰기 연결의 잠금을 기다리지 않습니다 (WAL 모드).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use super::types::{
    chunk_search_text, KnowledgeCategory, KnowledgeChunk, KnowledgeDocument, QaPair,
    ReferenceCondition, ReferencePoint,
};

/// 잠긴 DB 대기 시간
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.tcm-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tcm-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 새 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewKnowledgeDocument {
    pub file_name: String,
    pub display_name: Option<String>,
    pub category: KnowledgeCategory,
    /// 행 내용 해시 (중복 수집 방지)
    pub file_hash: Option<String>,
    /// 청크 (순서대로 chunk_index 0, 1, 2, ...)
    pub chunks: Vec<NewChunk>,
}

/// 새 청크 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub qa: Option<QaPair>,
    /// 문서 카테고리 오버라이드
    pub category: Option<KnowledgeCategory>,
}

/// 감사 로그 행
#[derive(Debug, Clone, Serialize)]
pub struct QueryLogEntry {
    pub query_id: String,
    pub user_id: String,
    pub query_text: String,
    pub search_terms: String,
    pub chunks_found: usize,
    /// 인용 출처 (JSON)
    pub sources_used: serde_json::Value,
    pub response_preview: String,
    pub ai_model: String,
    pub is_external: bool,
    pub confidence: u8,
}

/// 저장된 감사 로그 식별 정보
#[derive(Debug, Clone)]
pub struct QueryLogReceipt {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub point_count: usize,
    pub condition_count: usize,
    pub query_log_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store - 동기 지식 저장소
///
/// 연결은 `Arc<Mutex<_>>`로 공유되므로 clone 비용이 작습니다.
#[derive(Clone)]
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 쓰기 연결 잠금 유지 (테스트용)
    #[cfg(test)]
    pub(crate) fn lock_for_test(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// 읽기 전용 검색 연결 열기
    ///
    /// 연결마다 독립적이므로 동시에 여러 개를 열어도 서로 기다리지 않습니다.
    pub fn reader(&self) -> Result<KnowledgeReader> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open read-only connection")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(KnowledgeReader { conn })
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        // source: https://www.sqlite.org/wal.html
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS knowledge_documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name TEXT NOT NULL,
                display_name TEXT,
                category TEXT NOT NULL DEFAULT 'general',
                file_hash TEXT UNIQUE,
                row_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS knowledge_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL
                    REFERENCES knowledge_documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                question TEXT,
                answer TEXT,
                category TEXT,
                search_text TEXT NOT NULL DEFAULT '',
                UNIQUE (document_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON knowledge_chunks(document_id);

            CREATE TABLE IF NOT EXISTS acupuncture_points (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                alt_name TEXT,
                grouping TEXT,
                location TEXT,
                indications TEXT NOT NULL DEFAULT '[]',
                actions TEXT NOT NULL DEFAULT '[]',
                search_text TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS conditions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                alt_name TEXT,
                symptoms TEXT NOT NULL DEFAULT '[]',
                patterns TEXT NOT NULL DEFAULT '[]',
                recommended_points TEXT NOT NULL DEFAULT '[]',
                treatment_principles TEXT NOT NULL DEFAULT '[]',
                lifestyle_advice TEXT,
                search_text TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS rag_query_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                query_text TEXT NOT NULL,
                search_terms TEXT NOT NULL,
                chunks_found INTEGER NOT NULL,
                sources_used TEXT NOT NULL,
                response_preview TEXT NOT NULL,
                ai_model TEXT NOT NULL,
                is_external INTEGER NOT NULL DEFAULT 0,
                confidence INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create knowledge tables")?;

        // FTS5 가상 테이블 (청크 본문 키워드 검색)
        // source: https://www.sqlite.org/fts5.html
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_chunks_fts USING fts5(
                content,
                content=knowledge_chunks,
                content_rowid=id
            );

            CREATE TRIGGER IF NOT EXISTS knowledge_chunks_ai AFTER INSERT ON knowledge_chunks BEGIN
                INSERT INTO knowledge_chunks_fts(rowid, content) VALUES (new.id, new.content);
            END;

            CREATE TRIGGER IF NOT EXISTS knowledge_chunks_ad AFTER DELETE ON knowledge_chunks BEGIN
                INSERT INTO knowledge_chunks_fts(knowledge_chunks_fts, rowid, content)
                VALUES ('delete', old.id, old.content);
            END;
            "#,
        )
        .context("Failed to create FTS5 index (SQLite built without FTS5?)")?;

        // search_text 컬럼이 없던 DB 마이그레이션
        for table in ["knowledge_chunks", "acupuncture_points", "conditions"] {
            add_column_if_missing(&conn, table, "search_text", "TEXT NOT NULL DEFAULT ''")?;
        }
        backfill_search_text(&conn)?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// 문서와 청크 저장 (단일 트랜잭션)
    ///
    /// chunk_index는 입력 순서대로 0부터 부여됩니다.
    pub fn add_document(&self, doc: NewKnowledgeDocument) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO knowledge_documents
                (file_name, display_name, category, file_hash, row_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                doc.file_name,
                doc.display_name,
                doc.category.as_str(),
                doc.file_hash,
                doc.chunks.len() as i64,
                now
            ],
        )
        .context("Failed to insert document")?;

        let doc_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO knowledge_chunks
                    (document_id, chunk_index, content, question, answer, category, search_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for (index, chunk) in doc.chunks.iter().enumerate() {
                let (question, answer) = match &chunk.qa {
                    Some(qa) => (Some(qa.question.as_str()), Some(qa.answer.as_str())),
                    None => (None, None),
                };
                stmt.execute(params![
                    doc_id,
                    index as i64,
                    chunk.content,
                    question,
                    answer,
                    chunk.category.map(|c| c.as_str()),
                    chunk_search_text(&chunk.content, chunk.qa.as_ref()),
                ])
                .context("Failed to insert chunk")?;
            }
        }

        tx.commit().context("Failed to commit document")?;

        tracing::info!(
            "Added document: {} (id={}, chunks={})",
            doc.file_name,
            doc_id,
            doc.chunks.len()
        );
        Ok(doc_id)
    }

    /// 해시로 문서 조회 (이미 수집된 파일 확인)
    pub fn find_document_by_hash(&self, file_hash: &str) -> Result<Option<KnowledgeDocument>> {
        let conn = self.lock()?;
        let doc = conn
            .query_row(
                "SELECT id, file_name, display_name, category, row_count, created_at
                 FROM knowledge_documents WHERE file_hash = ?1",
                params![file_hash],
                map_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// 문서 목록 조회
    pub fn list_documents(
        &self,
        limit: usize,
        category: Option<KnowledgeCategory>,
    ) -> Result<Vec<KnowledgeDocument>> {
        let conn = self.lock()?;

        let docs = if let Some(category) = category {
            let mut stmt = conn.prepare(
                "SELECT id, file_name, display_name, category, row_count, created_at
                 FROM knowledge_documents
                 WHERE category = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![category.as_str(), limit as i64], map_document)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, file_name, display_name, category, row_count, created_at
                 FROM knowledge_documents
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], map_document)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(docs)
    }

    // ------------------------------------------------------------------------
    // Reference tables
    // ------------------------------------------------------------------------

    /// 경혈 저장 (코드가 같으면 교체)
    pub fn upsert_point(&self, point: &ReferencePoint) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO acupuncture_points
                (code, name, alt_name, grouping, location, indications, actions, search_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                point.code,
                point.name,
                point.alt_name,
                point.group,
                point.location,
                serde_json::to_string(&point.indications)?,
                serde_json::to_string(&point.actions)?,
                point.search_text(),
            ],
        )
        .context("Failed to upsert acupuncture point")?;
        Ok(())
    }

    /// 질환 저장 (이름이 같으면 교체)
    pub fn upsert_condition(&self, condition: &ReferenceCondition) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO conditions
                (name, alt_name, symptoms, patterns, recommended_points,
                 treatment_principles, lifestyle_advice, search_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                condition.name,
                condition.alt_name,
                serde_json::to_string(&condition.symptoms)?,
                serde_json::to_string(&condition.patterns)?,
                serde_json::to_string(&condition.recommended_points)?,
                serde_json::to_string(&condition.treatment_principles)?,
                condition.lifestyle_advice,
                condition.search_text(),
            ],
        )
        .context("Failed to upsert condition")?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------------

    /// 감사 로그 추가 (append-only)
    pub fn insert_query_log(&self, entry: &QueryLogEntry) -> Result<QueryLogReceipt> {
        let conn = self.lock()?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO rag_query_logs
                (query_id, user_id, query_text, search_terms, chunks_found, sources_used,
                 response_preview, ai_model, is_external, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.query_id,
                entry.user_id,
                entry.query_text,
                entry.search_terms,
                entry.chunks_found as i64,
                entry.sources_used.to_string(),
                entry.response_preview,
                entry.ai_model,
                entry.is_external,
                entry.confidence as i64,
                created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert query log")?;

        Ok(QueryLogReceipt {
            id: conn.last_insert_rowid(),
            created_at,
        })
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            document_count: count("knowledge_documents")?,
            chunk_count: count("knowledge_chunks")?,
            point_count: count("acupuncture_points")?,
            condition_count: count("conditions")?,
            query_log_count: count("rag_query_logs")?,
            db_path: self.db_path.clone(),
        })
    }

    /// FTS5 인덱스 리빌드
    ///
    /// 트리거가 동작하지 않은 경우 수동으로 인덱스를 재생성합니다.
    pub fn rebuild_fts_index(&self) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO knowledge_chunks_fts(knowledge_chunks_fts) VALUES ('rebuild')",
            [],
        )?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge_chunks", [], |row| row.get(0))?;
        tracing::info!("Rebuilt FTS5 index with {} chunks", count);
        Ok(count as usize)
    }
}

// ============================================================================
// KnowledgeReader
// ============================================================================

/// 읽기 전용 검색 연결
///
/// `KnowledgeStore::reader()`로 열고, 검색 한 번에 하나씩 씁니다.
/// 포함 검색은 저장 시 Rust로 소문자 변환한 `search_text` 컬럼에 `instr`로 매칭합니다
/// (SQLite `LOWER`/`LIKE`는 ASCII만 접음).
pub struct KnowledgeReader {
    conn: Connection,
}

impl KnowledgeReader {
    /// FTS5 키워드 검색 (용어 OR 결합)
    ///
    /// BM25 순위 순서를 그대로 유지합니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search_chunks_fts(&self, terms: &[String], limit: usize) -> Result<Vec<KnowledgeChunk>> {
        let match_query = build_fts_query(terms);
        if match_query.is_empty() {
            return Ok(vec![]);
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS}
             FROM knowledge_chunks_fts
             JOIN knowledge_chunks c ON c.id = knowledge_chunks_fts.rowid
             JOIN knowledge_documents d ON d.id = c.document_id
             WHERE knowledge_chunks_fts MATCH ?1
             ORDER BY bm25(knowledge_chunks_fts), c.id
             LIMIT ?2"
        ))?;

        let chunks = stmt
            .query_map(params![match_query, limit as i64], map_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(chunks)
    }

    /// 키워드 중 하나라도 포함된 청크 검색 (대소문자 무시)
    pub fn search_chunks_containing(
        &self,
        keywords: &[&str],
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>> {
        if keywords.is_empty() {
            return Ok(vec![]);
        }

        let (filter, needles) = containment_filter("c.search_text", keywords);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS}
             FROM knowledge_chunks c
             JOIN knowledge_documents d ON d.id = c.document_id
             {filter}
             ORDER BY c.document_id, c.chunk_index
             LIMIT {limit}"
        ))?;

        let chunks = stmt
            .query_map(params_from_iter(needles.iter()), map_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(chunks)
    }

    /// 경혈 조회
    ///
    /// `terms`가 비어있지 않으면 `ReferencePoint::search_text` 필드 중
    /// 하나라도 용어를 포함하는 경혈만 반환합니다.
    pub fn search_points(&self, terms: &[String], limit: usize) -> Result<Vec<ReferencePoint>> {
        let (filter, needles) = containment_filter("search_text", terms);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POINT_COLUMNS}
             FROM acupuncture_points
             {filter}
             ORDER BY code
             LIMIT {limit}"
        ))?;

        let points = stmt
            .query_map(params_from_iter(needles.iter()), map_point)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(points)
    }

    /// 질환 조회 (`search_points`와 같은 포함 규칙)
    pub fn search_conditions(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<ReferenceCondition>> {
        let (filter, needles) = containment_filter("search_text", terms);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONDITION_COLUMNS}
             FROM conditions
             {filter}
             ORDER BY name
             LIMIT {limit}"
        ))?;

        let conditions = stmt
            .query_map(params_from_iter(needles.iter()), map_condition)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conditions)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

const CHUNK_COLUMNS: &str = "c.id, c.document_id, COALESCE(d.display_name, d.file_name), \
     c.chunk_index, c.content, c.question, c.answer, COALESCE(c.category, d.category)";

fn map_chunk(row: &Row<'_>) -> rusqlite::Result<KnowledgeChunk> {
    let question: Option<String> = row.get(5)?;
    let answer: Option<String> = row.get(6)?;
    let qa = match (question, answer) {
        (Some(question), Some(answer)) if !question.is_empty() && !answer.is_empty() => {
            Some(QaPair { question, answer })
        }
        _ => None,
    };

    Ok(KnowledgeChunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        file_name: row.get(2)?,
        chunk_index: row.get(3)?,
        content: row.get(4)?,
        qa,
        category: KnowledgeCategory::parse_lossy(&row.get::<_, String>(7)?),
    })
}

const POINT_COLUMNS: &str = "code, name, alt_name, grouping, location, indications, actions";

const CONDITION_COLUMNS: &str = "name, alt_name, symptoms, patterns, recommended_points, \
     treatment_principles, lifestyle_advice";

fn map_point(row: &Row<'_>) -> rusqlite::Result<ReferencePoint> {
    Ok(ReferencePoint {
        code: row.get(0)?,
        name: row.get(1)?,
        alt_name: row.get(2)?,
        group: row.get(3)?,
        location: row.get(4)?,
        indications: parse_list(row.get(5)?),
        actions: parse_list(row.get(6)?),
    })
}

fn map_condition(row: &Row<'_>) -> rusqlite::Result<ReferenceCondition> {
    Ok(ReferenceCondition {
        name: row.get(0)?,
        alt_name: row.get(1)?,
        symptoms: parse_list(row.get(2)?),
        patterns: parse_list(row.get(3)?),
        recommended_points: parse_list(row.get(4)?),
        treatment_principles: parse_list(row.get(5)?),
        lifestyle_advice: row.get(6)?,
    })
}

fn map_document(row: &Row<'_>) -> rusqlite::Result<KnowledgeDocument> {
    Ok(KnowledgeDocument {
        id: row.get(0)?,
        file_name: row.get(1)?,
        display_name: row.get(2)?,
        category: KnowledgeCategory::parse_lossy(&row.get::<_, String>(3)?),
        row_count: row.get::<_, i64>(4)? as usize,
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// JSON 배열 컬럼 파싱
fn parse_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

/// `WHERE instr(column, ?1) > 0 OR ...` 절 생성 (용어는 소문자 변환)
fn containment_filter<S: AsRef<str>>(column: &str, terms: &[S]) -> (String, Vec<String>) {
    if terms.is_empty() {
        return (String::new(), Vec::new());
    }

    let clause = (1..=terms.len())
        .map(|i| format!("instr({}, ?{}) > 0", column, i))
        .collect::<Vec<_>>()
        .join(" OR ");
    let needles = terms.iter().map(|t| t.as_ref().to_lowercase()).collect();

    (format!("WHERE {}", clause), needles)
}

/// 컬럼 추가 (이미 있으면 무시)
fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .iter()
        .any(|name| name == column);

    if !exists {
        conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl), [])
            .with_context(|| format!("Failed to add {}.{}", table, column))?;
        tracing::info!("Added column {}.{}", table, column);
    }
    Ok(())
}

/// 비어있는 search_text 채우기
fn backfill_search_text(conn: &Connection) -> Result<()> {
    let chunks = {
        let mut stmt = conn.prepare(
            "SELECT id, content, question, answer FROM knowledge_chunks WHERE search_text = ''",
        )?;
        let rows = stmt.query_map([], |row| {
            let question: Option<String> = row.get(2)?;
            let answer: Option<String> = row.get(3)?;
            let qa = match (question, answer) {
                (Some(question), Some(answer)) => Some(QaPair { question, answer }),
                _ => None,
            };
            Ok((row.get::<_, i64>(0)?, chunk_search_text(&row.get::<_, String>(1)?, qa.as_ref())))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for (id, text) in &chunks {
        conn.execute(
            "UPDATE knowledge_chunks SET search_text = ?1 WHERE id = ?2",
            params![text, id],
        )?;
    }

    let points = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {POINT_COLUMNS} FROM acupuncture_points WHERE search_text = ''"
        ))?;
        let rows = stmt.query_map([], map_point)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for point in &points {
        conn.execute(
            "UPDATE acupuncture_points SET search_text = ?1 WHERE code = ?2",
            params![point.search_text(), point.code],
        )?;
    }

    let conditions = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONDITION_COLUMNS} FROM conditions WHERE search_text = ''"
        ))?;
        let rows = stmt.query_map([], map_condition)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for condition in &conditions {
        conn.execute(
            "UPDATE conditions SET search_text = ?1 WHERE name = ?2",
            params![condition.search_text(), condition.name],
        )?;
    }

    let total = chunks.len() + points.len() + conditions.len();
    if total > 0 {
        tracing::debug!("Backfilled search_text for {} rows", total);
    }
    Ok(())
}

/// FTS5 MATCH 쿼리 생성
///
/// 각 용어를 따옴표로 감싸 OR로 결합합니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn build_fts_query(terms: &[String]) -> String {
    static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();
    // 결합 문자(니쿠드, NFD 악센트)는 단어의 일부로 유지
    let unsafe_chars =
        UNSAFE_CHARS.get_or_init(|| Regex::new(r"[^\p{L}\p{M}\p{N}_]").expect("valid regex"));

    terms
        .iter()
        .map(|t| unsafe_chars.replace_all(t, "").into_owned())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================
