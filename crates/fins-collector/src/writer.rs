//! 단일 writer 배치 쓰기 파이프라인.
//!
//! 수집 라운드는 쓰기 배치를 `submit`하고 바로 다음 라운드 수집으로 넘어갑니다.
//! 배치는 용량 1인 채널을 거쳐 하나의 writer 태스크가 순서대로 씁니다.
//! 따라서 DB에 동시에 쓰이는 배치는 항상 하나이고, 라운드 N+1의 배치는
//! 라운드 N의 쓰기가 시작된 뒤에만 채널에 들어갑니다.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::{CollectorError, Result};

/// 배치 하나의 쓰기 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub rows: usize,
    /// 쓰지 못해 실패로 기록된 항목 (키, 사유)
    pub rejected: Vec<(String, String)>,
}

impl BatchReport {
    pub fn rows(rows: usize) -> Self {
        Self {
            rows,
            rejected: Vec::new(),
        }
    }
}

/// writer 태스크 누적 통계.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub batches: usize,
    pub rows: usize,
    pub failed_batches: usize,
    pub rejected: Vec<(String, String)>,
}

/// 단일 writer 파이프라인.
pub struct BatchWriter<B> {
    name: &'static str,
    tx: mpsc::Sender<B>,
    handle: JoinHandle<WriterStats>,
}

impl<B: Send + 'static> BatchWriter<B> {
    /// writer 태스크를 시작합니다. `write`는 배치 하나를 쓰고 결과를 반환합니다.
    pub fn spawn<F, Fut>(name: &'static str, mut write: F) -> Self
    where
        F: FnMut(B) -> Fut + Send + 'static,
        Fut: Future<Output = Result<BatchReport>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<B>(1);

        let handle = tokio::spawn(async move {
            let mut stats = WriterStats::default();
            while let Some(batch) = rx.recv().await {
                stats.batches += 1;
                match write(batch).await {
                    Ok(report) => {
                        stats.rows += report.rows;
                        if !report.rejected.is_empty() {
                            warn!(
                                writer = name,
                                batch = stats.batches,
                                rejected = report.rejected.len(),
                                "배치 일부를 실패로 기록"
                            );
                        }
                        debug!(writer = name, batch = stats.batches, rows = report.rows, "배치 쓰기 완료");
                        stats.rejected.extend(report.rejected);
                    }
                    Err(e) => {
                        stats.failed_batches += 1;
                        error!(writer = name, batch = stats.batches, error = %e, "배치 쓰기 실패");
                    }
                }
            }
            stats
        });

        Self { name, tx, handle }
    }

    /// 배치를 넘깁니다. 앞선 배치가 아직 대기 중이면 그 쓰기가 시작될 때까지 기다립니다.
    pub async fn submit(&self, batch: B) -> Result<()> {
        self.tx.send(batch).await.map_err(|_| {
            CollectorError::Config(format!("{} writer 태스크가 종료되었습니다", self.name))
        })
    }

    /// 남은 배치를 모두 쓰고 통계를 반환합니다.
    pub async fn finish(self) -> WriterStats {
        drop(self.tx);
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(writer = self.name, error = %e, "writer 태스크 비정상 종료");
                WriterStats::default()
            }
        }
    }
}
