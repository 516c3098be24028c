//! YoY 분포 분석.

use fins_core::PriceSample;

use crate::outliers::OutlierMode;
use crate::stats::{calculate, HistogramConfig, Stats};

/// 수집 시 계산된 YoY 값만 모읍니다.
pub fn extract_yoy(prices: &[PriceSample]) -> Vec<f64> {
    prices.iter().filter_map(|p| p.yoy).collect()
}

/// 기본 이상치 처리 후 YoY 통계.
pub fn analyze_yoy(prices: &[PriceSample], config: HistogramConfig) -> Stats {
    analyze_yoy_with(prices, config, OutlierMode::default())
}

pub fn analyze_yoy_with(prices: &[PriceSample], config: HistogramConfig, mode: OutlierMode) -> Stats {
    calculate(&mode.apply(&extract_yoy(prices)), config)
}
