//! Audit 모듈 - 질의 감사 로그 (append-only)
//!
//! 응답 계산이 끝난 뒤 백그라운드 작업으로 기록합니다.
//! 기록 실패는 호출자에게 에러로 올라가지 않고 `auditLogged: false`로만 반영됩니다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::knowledge::{KnowledgeStore, QueryLogReceipt};

pub use crate::knowledge::QueryLogEntry as AuditRecord;

/// 응답 미리보기 길이 (문자)
pub const RESPONSE_PREVIEW_CHARS: usize = 500;

/// 대기열 크기
const QUEUE_CAPACITY: usize = 256;

/// 응답 미리보기
pub fn response_preview(response: &str) -> String {
    response.chars().take(RESPONSE_PREVIEW_CHARS).collect()
}

// ============================================================================
// Sink
// ============================================================================

/// 감사 로그 저장소
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// 기록 후 로그 ID와 기록 시각 반환
    async fn record(&self, record: &AuditRecord) -> Result<QueryLogReceipt>;
}

/// SQLite `rag_query_logs` 테이블 sink
pub struct SqliteAuditSink {
    store: KnowledgeStore,
}

impl SqliteAuditSink {
    pub fn new(store: KnowledgeStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<QueryLogReceipt> {
        let store = self.store.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.insert_query_log(&record))
            .await
            .context("Audit task panicked")?
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct AuditJob {
    record: AuditRecord,
    ack: oneshot::Sender<Result<QueryLogReceipt, String>>,
}

/// 백그라운드 감사 로그 디스패처
///
/// 단일 작업자가 대기열을 순서대로 처리합니다.
#[derive(Clone)]
pub struct AuditDispatcher {
    tx: mpsc::Sender<AuditJob>,
}

impl AuditDispatcher {
    /// 작업자 시작 (tokio 런타임 안에서 호출)
    pub fn spawn(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditJob>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = sink.record(&job.record).await;
                let ack = match result {
                    Ok(receipt) => {
                        tracing::debug!(
                            "Audit log written (id={}, query_id={})",
                            receipt.id,
                            job.record.query_id
                        );
                        Ok(receipt)
                    }
                    Err(e) => {
                        tracing::warn!("Audit log failed (query_id={}): {:#}", job.record.query_id, e);
                        Err(format!("{:#}", e))
                    }
                };
                // 호출자가 기다리지 않아도 기록은 완료됨
                let _ = job.ack.send(ack);
            }
            tracing::debug!("Audit dispatcher stopped");
        });

        Self { tx }
    }

    /// 기록 요청 (대기하지 않음)
    pub fn dispatch(&self, record: AuditRecord) -> AuditTicket {
        let (ack, rx) = oneshot::channel();
        match self.tx.try_send(AuditJob { record, ack }) {
            Ok(()) => AuditTicket { rx: Some(rx) },
            Err(e) => {
                tracing::warn!("Audit queue unavailable: {}", e);
                AuditTicket { rx: None }
            }
        }
    }
}

/// 기록 결과 확인 핸들
pub struct AuditTicket {
    rx: Option<oneshot::Receiver<Result<QueryLogReceipt, String>>>,
}

impl AuditTicket {
    /// 최대 `timeout`까지 기록 확인 대기
    ///
    /// 기록되면 영수증, 실패/시간 초과면 None
    pub async fn wait(self, timeout: Duration) -> Option<QueryLogReceipt> {
        let rx = self.rx?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(receipt))) => Some(receipt),
            Ok(Ok(Err(_))) | Ok(Err(_)) => None,
            Err(_) => {
                tracing::warn!("Audit acknowledgement timed out after {:?}", timeout);
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
