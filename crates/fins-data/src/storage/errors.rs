//! 구조화 에러 로그 (`errors` 테이블).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tracing::warn;

use super::Database;
use crate::error::Result;

/// 에러 로그 한 행.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct ErrorRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// 발생 위치 (예: `updater.quote`)
    pub source: String,
    /// 분류 (예: `conversion_error`)
    pub error_type: String,
    pub message: String,
    pub details: Option<String>,
}

/// 에러 로그 repository.
#[derive(Clone)]
pub struct ErrorLogRepository {
    db: Database,
}

impl ErrorLogRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn log(
        &self,
        source: &str,
        error_type: &str,
        message: &str,
        details: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO errors (timestamp, source, error_type, message, details)
            VALUES (NOW(), $1, $2, $3, $4)
            "#,
        )
        .bind(source)
        .bind(error_type)
        .bind(message)
        .bind(details)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// 기록 실패를 경고로만 남기는 `log`.
    pub async fn record(&self, source: &str, error_type: &str, message: &str) {
        warn!(source, error_type, "{}", message);
        if let Err(e) = self.log(source, error_type, message, None).await {
            warn!(source, error = %e, "에러 로그 저장 실패");
        }
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<ErrorRecord>> {
        let rows = sqlx::query_as(
            "SELECT * FROM errors ORDER BY timestamp DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn by_source(&self, source: &str, limit: i64) -> Result<Vec<ErrorRecord>> {
        let rows = sqlx::query_as(
            "SELECT * FROM errors WHERE source = $1 ORDER BY timestamp DESC, id DESC LIMIT $2",
        )
        .bind(source)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: i64) -> Result<Option<ErrorRecord>> {
        let row = sqlx::query_as("SELECT * FROM errors WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row)
    }

    pub async fn count_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM errors WHERE timestamp >= $1")
            .bind(since)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// `cutoff` 이전 기록 삭제.
    pub async fn clear_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM errors WHERE timestamp < $1")
            .bind(cutoff)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM errors")
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support;

    #[tokio::test]
    #[ignore] // DATABASE_URL 필요
    async fn test_log_and_query_by_source() {
        let errors = test_support::connect().await.errors();
        errors
            .log("zz.test", "conversion_error", "no forex data at 2024-01-02", Some("EUR"))
            .await
            .unwrap();

        let rows = errors.by_source("zz.test", 10).await.unwrap();
        assert!(!rows.is_empty());
        assert_eq!(rows[0].error_type, "conversion_error");
        assert_eq!(rows[0].details.as_deref(), Some("EUR"));

        let fetched = errors.get(rows[0].id).await.unwrap().unwrap();
        assert_eq!(fetched, rows[0]);
    }
}
