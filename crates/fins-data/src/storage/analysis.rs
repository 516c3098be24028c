//! 분석 패키지와 결과 저장소.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use fins_core::{CoreError, Interval};

use super::Database;
use crate::error::{DataError, Result};

/// 분석 패키지 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Processing,
    Ready,
    Failed,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::invalid("package status", other)),
        }
    }
}

/// 분석 패키지 메타데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPackage {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub interval: Interval,
    pub time_from: NaiveDate,
    pub time_to: NaiveDate,
    pub hist_bins: i32,
    pub hist_min: f64,
    pub hist_max: f64,
    /// 최소 시가총액 (USD)
    pub mcap_min: Option<i64>,
    /// 이 날짜 이전 상장 종목만
    pub inception_max: Option<NaiveDate>,
    pub symbol_count: i32,
    pub status: PackageStatus,
}

#[derive(Debug, FromRow)]
struct PackageRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    interval: String,
    time_from: NaiveDate,
    time_to: NaiveDate,
    hist_bins: i32,
    hist_min: f64,
    hist_max: f64,
    mcap_min: Option<i64>,
    inception_max: Option<NaiveDate>,
    symbol_count: i32,
    status: String,
}

impl TryFrom<PackageRow> for AnalysisPackage {
    type Error = DataError;

    fn try_from(row: PackageRow) -> Result<Self> {
        Ok(AnalysisPackage {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
            interval: row.interval.parse()?,
            time_from: row.time_from,
            time_to: row.time_to,
            hist_bins: row.hist_bins,
            hist_min: row.hist_min,
            hist_max: row.hist_max,
            mcap_min: row.mcap_min,
            inception_max: row.inception_max,
            symbol_count: row.symbol_count,
            status: row.status.parse()?,
        })
    }
}

/// 티커별 분석 결과 행.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct AnalysisResultRecord {
    pub package_id: Uuid,
    pub ticker: String,
    pub count: i32,
    pub mean: f64,
    pub stddev: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    /// 히스토그램 (JSON)
    pub histogram: serde_json::Value,
}

/// 분석 패키지 repository.
#[derive(Clone)]
pub struct AnalysisRepository {
    db: Database,
}

impl AnalysisRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_package(&self, package: &AnalysisPackage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_packages (
                id, name, created_at, interval, time_from, time_to,
                hist_bins, hist_min, hist_max, mcap_min, inception_max, symbol_count, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(package.id)
        .bind(&package.name)
        .bind(package.created_at)
        .bind(package.interval.as_str())
        .bind(package.time_from)
        .bind(package.time_to)
        .bind(package.hist_bins)
        .bind(package.hist_min)
        .bind(package.hist_max)
        .bind(package.mcap_min)
        .bind(package.inception_max)
        .bind(package.symbol_count)
        .bind(package.status.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: PackageStatus,
        symbol_count: i32,
    ) -> Result<()> {
        sqlx::query("UPDATE analysis_packages SET status = $2, symbol_count = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(symbol_count)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn get_package(&self, id: Uuid) -> Result<Option<AnalysisPackage>> {
        let row: Option<PackageRow> =
            sqlx::query_as("SELECT * FROM analysis_packages WHERE id = $1")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;
        row.map(AnalysisPackage::try_from).transpose()
    }

    pub async fn list_packages(&self) -> Result<Vec<AnalysisPackage>> {
        let rows: Vec<PackageRow> =
            sqlx::query_as("SELECT * FROM analysis_packages ORDER BY created_at DESC")
                .fetch_all(self.db.pool())
                .await?;
        rows.into_iter().map(AnalysisPackage::try_from).collect()
    }

    pub async fn rename_package(&self, id: Uuid, name: &str) -> Result<()> {
        sqlx::query("UPDATE analysis_packages SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// 패키지와 결과 삭제 (결과는 CASCADE).
    pub async fn delete_package(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM analysis_packages WHERE id = $1")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn save_result(&self, result: &AnalysisResultRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_results (
                package_id, ticker, count, mean, stddev, variance, min, max, histogram
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (package_id, ticker) DO UPDATE SET
                count = EXCLUDED.count,
                mean = EXCLUDED.mean,
                stddev = EXCLUDED.stddev,
                variance = EXCLUDED.variance,
                min = EXCLUDED.min,
                max = EXCLUDED.max,
                histogram = EXCLUDED.histogram
            "#,
        )
        .bind(result.package_id)
        .bind(&result.ticker)
        .bind(result.count)
        .bind(result.mean)
        .bind(result.stddev)
        .bind(result.variance)
        .bind(result.min)
        .bind(result.max)
        .bind(&result.histogram)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn results(&self, package_id: Uuid) -> Result<Vec<AnalysisResultRecord>> {
        let rows = sqlx::query_as(
            r#"
            SELECT package_id, ticker, count, mean, stddev, variance, min, max, histogram
            FROM analysis_results
            WHERE package_id = $1
            ORDER BY ticker
            "#,
        )
        .bind(package_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support;

    #[test]
    fn test_package_status_parse() {
        for s in [PackageStatus::Processing, PackageStatus::Ready, PackageStatus::Failed] {
            assert_eq!(s.as_str().parse::<PackageStatus>().unwrap(), s);
        }
        assert!("done".parse::<PackageStatus>().is_err());
    }

    #[tokio::test]
    #[ignore] // DATABASE_URL 필요
    async fn test_package_lifecycle() {
        let repo = test_support::connect().await.analysis();
        let package = AnalysisPackage {
            id: Uuid::new_v4(),
            name: "zz test".into(),
            created_at: Utc::now(),
            interval: Interval::Monthly,
            time_from: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
            time_to: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            hist_bins: 10,
            hist_min: -100.0,
            hist_max: 100.0,
            mcap_min: Some(1_000_000_000),
            inception_max: None,
            symbol_count: 0,
            status: PackageStatus::Processing,
        };
        repo.create_package(&package).await.unwrap();

        repo.save_result(&AnalysisResultRecord {
            package_id: package.id,
            ticker: "AAPL".into(),
            count: 3,
            mean: 1.0,
            stddev: 0.5,
            variance: 0.25,
            min: 0.5,
            max: 1.5,
            histogram: serde_json::json!({"bins": [1, 2], "min": -100.0, "max": 100.0}),
        })
        .await
        .unwrap();
        repo.update_status(package.id, PackageStatus::Ready, 1).await.unwrap();

        let stored = repo.get_package(package.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PackageStatus::Ready);
        assert_eq!(stored.symbol_count, 1);
        assert_eq!(repo.results(package.id).await.unwrap().len(), 1);

        assert!(repo.delete_package(package.id).await.unwrap());
    }
}
