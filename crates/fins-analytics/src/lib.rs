//! YoY 분포 분석 엔진.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 이상치 처리 (절대 범위, IQR, 표준편차, 분위수 절삭, 윈저화)
//! - 기술 통계와 고정 구간 히스토그램
//! - 여러 종목 일괄 분석과 제외 사유 집계
//! - 분석 패키지 생성/실행/관리
//!
//! # 사용 예시
//!
//! ```rust,ignore
//! use fins_analytics::{analyze_batch, BatchRequest, HistogramConfig};
//!
//! let mut request = BatchRequest::new(tickers, Interval::Monthly, from, to);
//! request.histogram = HistogramConfig::new(40, -100.0, 300.0);
//! let outcome = analyze_batch(&request, &db.prices(), None).await?;
//! println!("{} results, {} rejected", outcome.results.len(), outcome.total_rejected());
//! ```

pub mod batch;
pub mod error;
pub mod outliers;
pub mod package;
pub mod stats;
pub mod yoy;

pub use batch::{
    analyze_batch, AnalysisSink, BatchOutcome, BatchRequest, PriceSource, Rejection, SymbolStats,
};
pub use error::{AnalyticsError, Result};
pub use outliers::{
    remove_outliers_absolute, remove_outliers_iqr, remove_outliers_percentile,
    remove_outliers_stddev, winsorize, OutlierMode,
};
pub use package::{PackageService, PackageSpec};
pub use stats::{calculate, HistogramBin, HistogramConfig, Stats};
pub use yoy::{analyze_yoy, extract_yoy};
