//! 스테이지 실행 기록과 "오늘 이미 완료" 건너뛰기.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::future::Future;
use std::time::Instant;
use tracing::{info, warn};

use fins_core::BatchRun;
use fins_data::{BatchLogRepository, Database};

use super::Stage;
use crate::{Result, StageStats};

/// 마지막 완료 기록이 `today`에 끝났으면 건너뜁니다.
pub fn should_skip(last_completed: Option<&BatchRun>, today: NaiveDate) -> bool {
    last_completed.is_some_and(|run| run.completed_on(today))
}

/// 스테이지 실행 기록 저장소.
#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn last_completed(&self, stage: &str) -> fins_data::Result<Option<BatchRun>>;
    async fn start(&self, stage: &str) -> fins_data::Result<i32>;
    async fn complete(&self, id: i32, processed: i32, updated: i32) -> fins_data::Result<()>;
    async fn fail(&self, id: i32, message: &str) -> fins_data::Result<()>;
}

#[async_trait]
impl RunLedger for BatchLogRepository {
    async fn last_completed(&self, stage: &str) -> fins_data::Result<Option<BatchRun>> {
        BatchLogRepository::last_completed(self, stage).await
    }

    async fn start(&self, stage: &str) -> fins_data::Result<i32> {
        BatchLogRepository::start(self, stage).await
    }

    async fn complete(&self, id: i32, processed: i32, updated: i32) -> fins_data::Result<()> {
        BatchLogRepository::complete(self, id, processed, updated).await
    }

    async fn fail(&self, id: i32, message: &str) -> fins_data::Result<()> {
        BatchLogRepository::fail(self, id, message).await
    }
}

/// 진행 중인 스테이지 실행 기록.
pub struct BatchGuard<'a> {
    ledger: &'a dyn RunLedger,
    id: i32,
    stage: Stage,
}

impl<'a> BatchGuard<'a> {
    /// 오늘 완료 기록이 없으면 `running` 기록을 만들고 guard를 반환합니다.
    pub async fn begin(ledger: &'a dyn RunLedger, stage: Stage, today: NaiveDate) -> Result<Option<Self>> {
        let last = ledger.last_completed(stage.as_str()).await?;
        if should_skip(last.as_ref(), today) {
            return Ok(None);
        }

        let id = ledger.start(stage.as_str()).await?;
        info!(stage = stage.as_str(), batch_id = id, "스테이지 시작");
        Ok(Some(Self { ledger, id, stage }))
    }

    pub async fn complete(self, processed: usize, updated: usize) -> Result<()> {
        self.ledger
            .complete(self.id, to_i32(processed), to_i32(updated))
            .await?;
        Ok(())
    }

    /// 실패 기록. 기록 자체가 실패하면 경고만 남깁니다.
    pub async fn fail(self, message: &str) {
        if let Err(e) = self.ledger.fail(self.id, message).await {
            warn!(stage = self.stage.as_str(), error = %e, "실패 기록 저장 실패");
        }
    }
}

fn to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// guard 안에서 스테이지 본문을 실행합니다.
///
/// 오늘 이미 완료됐으면 본문을 실행하지 않습니다. 본문이 에러를 반환하면
/// 실행 기록을 `failed`로 남기고 에러를 그대로 돌려줍니다.
pub async fn guarded<F, Fut>(db: &Database, stage: Stage, today: NaiveDate, body: F) -> Result<StageStats>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StageStats>>,
{
    let log = db.batch_log();
    guarded_with(&log, stage, today, body).await
}

pub async fn guarded_with<F, Fut>(
    ledger: &dyn RunLedger,
    stage: Stage,
    today: NaiveDate,
    body: F,
) -> Result<StageStats>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StageStats>>,
{
    let Some(guard) = BatchGuard::begin(ledger, stage, today).await? else {
        let stats = StageStats::skipped_today();
        stats.log_summary(stage.as_str());
        return Ok(stats);
    };

    let start = Instant::now();
    match body().await {
        Ok(mut stats) => {
            stats.elapsed = start.elapsed();
            guard.complete(stats.processed, stats.updated).await?;
            stats.log_summary(stage.as_str());
            Ok(stats)
        }
        Err(e) => {
            guard.fail(&e.to_string()).await;
            Err(e)
        }
    }
}
