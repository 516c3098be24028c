//! 스테이지 실행 기록 (`batch_update_log`).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use fins_core::{BatchRun, RunStatus};

use super::Database;
use crate::error::Result;

#[derive(Debug, FromRow)]
struct BatchRunRow {
    id: i32,
    updater_name: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: String,
    symbols_processed: i32,
    symbols_updated: i32,
    error_message: Option<String>,
}

impl TryFrom<BatchRunRow> for BatchRun {
    type Error = crate::error::DataError;

    fn try_from(row: BatchRunRow) -> Result<Self> {
        Ok(BatchRun {
            id: row.id,
            updater_name: row.updater_name,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status: row.status.parse::<RunStatus>()?,
            symbols_processed: row.symbols_processed,
            symbols_updated: row.symbols_updated,
            error_message: row.error_message,
        })
    }
}

/// 실행 기록 repository.
pub struct BatchLogRepository {
    db: Database,
}

impl BatchLogRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// `running` 상태의 기록을 만들고 ID를 반환합니다.
    pub async fn start(&self, updater_name: &str) -> Result<i32> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO batch_update_log (updater_name, started_at, status)
            VALUES ($1, NOW(), 'running')
            RETURNING id
            "#,
        )
        .bind(updater_name)
        .fetch_one(self.db.pool())
        .await?;
        Ok(id)
    }

    pub async fn complete(&self, id: i32, processed: i32, updated: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE batch_update_log SET
                completed_at = NOW(),
                status = 'completed',
                symbols_processed = $2,
                symbols_updated = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(processed)
        .bind(updated)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn fail(&self, id: i32, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE batch_update_log SET
                completed_at = NOW(),
                status = 'failed',
                error_message = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// 가장 최근 정상 완료 기록.
    pub async fn last_completed(&self, updater_name: &str) -> Result<Option<BatchRun>> {
        let row: Option<BatchRunRow> = sqlx::query_as(
            r#"
            SELECT * FROM batch_update_log
            WHERE updater_name = $1 AND status = 'completed'
            ORDER BY completed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(updater_name)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(BatchRun::try_from).transpose()
    }

    /// 스테이지의 모든 기록 삭제 (오늘 재실행 강제).
    pub async fn delete(&self, updater_name: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM batch_update_log WHERE updater_name = $1")
            .bind(updater_name)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// 스테이지별 최근 기록 (status 명령용).
    pub async fn latest_per_stage(&self) -> Result<Vec<BatchRun>> {
        let rows: Vec<BatchRunRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (updater_name) *
            FROM batch_update_log
            ORDER BY updater_name, started_at DESC, id DESC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(BatchRun::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support;

    #[tokio::test]
    #[ignore] // DATABASE_URL 필요
    async fn test_start_complete_and_last_completed() {
        let log = test_support::connect().await.batch_log();
        log.delete("zz_test_stage").await.unwrap();

        let id = log.start("zz_test_stage").await.unwrap();
        assert!(log.last_completed("zz_test_stage").await.unwrap().is_none());

        log.complete(id, 10, 7).await.unwrap();
        let run = log.last_completed("zz_test_stage").await.unwrap().unwrap();
        assert_eq!(run.id, id);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.symbols_processed, 10);
        assert!(run.completed_on(Utc::now().date_naive()));

        let failed = log.start("zz_test_stage").await.unwrap();
        log.fail(failed, "bulk fetch failed").await.unwrap();
        let latest = log.latest_per_stage().await.unwrap();
        let last = latest.iter().find(|r| r.updater_name == "zz_test_stage").unwrap();
        assert_eq!(last.id, failed);
        assert_eq!(last.status, RunStatus::Failed);
        // 실패 기록은 완료 기록을 가리지 않음
        assert_eq!(log.last_completed("zz_test_stage").await.unwrap().unwrap().id, id);

        assert_eq!(log.delete("zz_test_stage").await.unwrap(), 2);
    }
}
