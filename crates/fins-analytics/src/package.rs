//! 분석 패키지.
//!
//! 패키지는 필터(시가총액 하한, 상장일 상한)로 고른 종목 전체에 대한 일괄 분석 결과 묶음입니다.
//! 생성 시 `processing` 상태로 저장하고, 분석이 끝나면 `ready` 또는 `failed`가 됩니다.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use fins_core::Interval;
use fins_data::{AnalysisPackage, AnalysisRepository, AnalysisResultRecord, Database, PackageStatus};

use crate::batch::{analyze_batch, AnalysisSink, BatchOutcome, BatchRequest, DEFAULT_WORKERS};
use crate::outliers::OutlierMode;
use crate::stats::{HistogramConfig, Stats};
use crate::{AnalyticsError, Result};

/// 새 패키지 설정.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub name: String,
    pub interval: Interval,
    pub time_from: NaiveDate,
    pub time_to: NaiveDate,
    pub histogram: HistogramConfig,
    /// USD 시가총액 하한
    pub mcap_min: Option<i64>,
    /// 상장일 상한
    pub inception_max: Option<NaiveDate>,
}

impl PackageSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AnalyticsError::InvalidConfig("package name is empty".into()));
        }
        if self.time_from >= self.time_to {
            return Err(AnalyticsError::InvalidConfig(format!(
                "time_from {} must be before time_to {}",
                self.time_from, self.time_to
            )));
        }
        if self.histogram.bins == 0 {
            return Err(AnalyticsError::InvalidConfig("histogram needs at least one bin".into()));
        }
        if self.histogram.min >= self.histogram.max {
            return Err(AnalyticsError::InvalidConfig(format!(
                "histogram min {} must be below max {}",
                self.histogram.min, self.histogram.max
            )));
        }
        Ok(())
    }

    fn to_package(&self, id: Uuid) -> AnalysisPackage {
        AnalysisPackage {
            id,
            name: self.name.trim().to_string(),
            created_at: Utc::now(),
            interval: self.interval,
            time_from: self.time_from,
            time_to: self.time_to,
            hist_bins: i32::try_from(self.histogram.bins).unwrap_or(i32::MAX),
            hist_min: self.histogram.min,
            hist_max: self.histogram.max,
            mcap_min: self.mcap_min,
            inception_max: self.inception_max,
            symbol_count: 0,
            status: PackageStatus::Processing,
        }
    }
}

/// 저장된 패키지의 히스토그램 설정.
pub fn histogram_of(package: &AnalysisPackage) -> HistogramConfig {
    HistogramConfig::new(
        usize::try_from(package.hist_bins).unwrap_or(0),
        package.hist_min,
        package.hist_max,
    )
}

/// 통계를 결과 레코드로 변환합니다.
pub fn to_record(package_id: Uuid, ticker: &str, stats: &Stats) -> Result<AnalysisResultRecord> {
    Ok(AnalysisResultRecord {
        package_id,
        ticker: ticker.to_string(),
        count: i32::try_from(stats.count).unwrap_or(i32::MAX),
        mean: stats.mean,
        stddev: stats.stddev,
        variance: stats.variance,
        min: stats.min,
        max: stats.max,
        histogram: serde_json::to_value(&stats.histogram)?,
    })
}

/// 결과를 패키지에 바로 저장하는 sink.
struct PackageSink {
    repo: AnalysisRepository,
    package_id: Uuid,
}

#[async_trait]
impl AnalysisSink for PackageSink {
    async fn save_result(&self, ticker: &str, stats: &Stats) -> Result<()> {
        let record = to_record(self.package_id, ticker, stats)?;
        self.repo.save_result(&record).await?;
        Ok(())
    }

    async fn progress(&self, _processed: usize, results: usize) -> Result<()> {
        self.repo
            .update_status(
                self.package_id,
                PackageStatus::Processing,
                i32::try_from(results).unwrap_or(i32::MAX),
            )
            .await?;
        Ok(())
    }
}

/// 분석 패키지 관리.
#[derive(Clone)]
pub struct PackageService {
    db: Database,
    workers: usize,
    outliers: OutlierMode,
}

impl PackageService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            workers: DEFAULT_WORKERS,
            outliers: OutlierMode::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_outliers(mut self, mode: OutlierMode) -> Self {
        self.outliers = mode;
        self
    }

    fn repo(&self) -> AnalysisRepository {
        self.db.analysis()
    }

    /// 패키지를 `processing` 상태로 만듭니다.
    pub async fn create(&self, spec: &PackageSpec) -> Result<AnalysisPackage> {
        spec.validate()?;
        let package = spec.to_package(Uuid::new_v4());
        self.repo().create_package(&package).await?;
        info!(
            package_id = %package.id,
            name = %package.name,
            interval = %package.interval,
            from = %package.time_from,
            to = %package.time_to,
            mcap_min = ?package.mcap_min,
            inception_max = ?package.inception_max,
            bins = package.hist_bins,
            "분석 패키지 생성"
        );
        Ok(package)
    }

    /// 패키지 분석을 실행하고 상태를 `ready`/`failed`로 남깁니다.
    pub async fn run(&self, package: &AnalysisPackage) -> Result<BatchOutcome> {
        let repo = self.repo();
        match self.process(package).await {
            Ok(outcome) => {
                let count = i32::try_from(outcome.results.len()).unwrap_or(i32::MAX);
                repo.update_status(package.id, PackageStatus::Ready, count).await?;
                info!(package_id = %package.id, results = count, "분석 패키지 준비 완료");
                Ok(outcome)
            }
            Err(e) => {
                error!(package_id = %package.id, error = %e, "분석 패키지 처리 실패");
                if let Err(status_err) = repo.update_status(package.id, PackageStatus::Failed, 0).await {
                    warn!(package_id = %package.id, error = %status_err, "실패 상태 저장 실패");
                }
                Err(e)
            }
        }
    }

    async fn process(&self, package: &AnalysisPackage) -> Result<BatchOutcome> {
        let tickers = self
            .db
            .symbols()
            .filtered_tickers(package.mcap_min, package.inception_max)
            .await?;
        info!(package_id = %package.id, tickers = tickers.len(), "분석 대상 종목 조회");
        if tickers.is_empty() {
            warn!(package_id = %package.id, "분석 대상 종목 없음");
            return Ok(BatchOutcome::default());
        }

        let request = BatchRequest {
            label: package.id.to_string(),
            histogram: histogram_of(package),
            outliers: self.outliers,
            workers: self.workers,
            ..BatchRequest::new(tickers, package.interval, package.time_from, package.time_to)
        };
        let sink: Arc<dyn AnalysisSink> = Arc::new(PackageSink {
            repo: self.repo(),
            package_id: package.id,
        });
        let prices = self.db.prices();
        analyze_batch(&request, &prices, Some(sink)).await
    }

    /// 생성 후 바로 실행합니다.
    pub async fn create_and_run(&self, spec: &PackageSpec) -> Result<(AnalysisPackage, BatchOutcome)> {
        let package = self.create(spec).await?;
        let outcome = self.run(&package).await?;
        Ok((package, outcome))
    }

    pub async fn get(&self, id: Uuid) -> Result<AnalysisPackage> {
        self.repo()
            .get_package(id)
            .await?
            .ok_or_else(|| AnalyticsError::NotFound(format!("package {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<AnalysisPackage>> {
        Ok(self.repo().list_packages().await?)
    }

    pub async fn results(&self, id: Uuid) -> Result<Vec<AnalysisResultRecord>> {
        self.get(id).await?;
        Ok(self.repo().results(id).await?)
    }

    pub async fn rename(&self, id: Uuid, name: &str) -> Result<AnalysisPackage> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AnalyticsError::InvalidConfig("package name is empty".into()));
        }
        let mut package = self.get(id).await?;
        self.repo().rename_package(id, name).await?;
        package.name = name.to_string();
        Ok(package)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if self.repo().delete_package(id).await? {
            info!(package_id = %id, "분석 패키지 삭제");
            Ok(())
        } else {
            Err(AnalyticsError::NotFound(format!("package {}", id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PackageSpec {
        PackageSpec {
            name: " Large caps ".into(),
            interval: Interval::Monthly,
            time_from: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(),
            time_to: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            histogram: HistogramConfig::new(40, -100.0, 300.0),
            mcap_min: Some(10_000_000_000),
            inception_max: None,
        }
    }

    #[test]
    fn test_validate() {
        assert!(spec().validate().is_ok());

        let mut bad = spec();
        bad.time_to = bad.time_from;
        assert!(matches!(bad.validate(), Err(AnalyticsError::InvalidConfig(_))));

        let mut bad = spec();
        bad.histogram.bins = 0;
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.histogram.max = -200.0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_package_round_trips_histogram_config() {
        let package = spec().to_package(Uuid::new_v4());
        assert_eq!(package.name, "Large caps");
        assert_eq!(package.status, PackageStatus::Processing);
        assert_eq!(histogram_of(&package), spec().histogram);
    }

    #[test]
    fn test_to_record_serializes_histogram() {
        let stats = crate::stats::calculate(&[1.0, 2.0, 3.0], HistogramConfig::new(2, 0.0, 4.0));
        let record = to_record(Uuid::nil(), "AAPL", &stats).unwrap();

        assert_eq!(record.count, 3);
        let bins = record.histogram.as_array().unwrap();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0]["count"], 1);
        assert_eq!(bins[1]["count"], 2);
    }
}
