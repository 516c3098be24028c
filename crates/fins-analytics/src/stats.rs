//! 기술 통계와 고정 구간 히스토그램.

use serde::{Deserialize, Serialize};

/// 히스토그램 설정. 범위 밖의 값은 양 끝 구간에 포함됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramConfig {
    pub bins: usize,
    pub min: f64,
    pub max: f64,
}

impl HistogramConfig {
    pub fn new(bins: usize, min: f64, max: f64) -> Self {
        Self { bins, min, max }
    }

    fn width(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }

    /// 빈 구간들.
    pub fn empty_bins(&self) -> Vec<HistogramBin> {
        let width = self.width();
        (0..self.bins)
            .map(|i| HistogramBin {
                min: self.min + i as f64 * width,
                max: self.min + (i + 1) as f64 * width,
                count: 0,
            })
            .collect()
    }

    /// 값이 들어갈 구간. NaN/Inf는 `None`.
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        if self.bins == 0 || !value.is_finite() {
            return None;
        }
        let last = self.bins - 1;
        let index = if value < self.min {
            0
        } else if value >= self.max {
            last
        } else {
            (((value - self.min) / self.width()) as usize).min(last)
        };
        Some(index)
    }
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            bins: 40,
            min: -100.0,
            max: 300.0,
        }
    }
}

/// 히스토그램 구간 (`[min, max)`, 마지막 구간은 범위 밖 값도 포함).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// 요약 통계. 분산과 표준편차는 모집단 기준입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub count: usize,
    pub mean: f64,
    pub variance: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub histogram: Vec<HistogramBin>,
    pub config: HistogramConfig,
}

impl Stats {
    fn empty(config: HistogramConfig) -> Self {
        Self {
            count: 0,
            mean: 0.0,
            variance: 0.0,
            stddev: 0.0,
            min: 0.0,
            max: 0.0,
            histogram: Vec::new(),
            config,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// 히스토그램에 들어간 값 수.
    pub fn binned(&self) -> usize {
        self.histogram.iter().map(|b| b.count).sum()
    }
}

/// 통계와 히스토그램을 계산합니다.
///
/// NaN/Inf는 `count`에는 포함되지만 히스토그램에서는 빠집니다.
pub fn calculate(values: &[f64], config: HistogramConfig) -> Stats {
    if values.is_empty() {
        return Stats::empty(config);
    }

    let n = values.len() as f64;
    let (sum, min, max) = values.iter().fold(
        (0.0, f64::INFINITY, f64::NEG_INFINITY),
        |(sum, min, max), &v| (sum + v, min.min(v), max.max(v)),
    );
    let mean = sum / n;

    let mut histogram = config.empty_bins();
    let mut squared = 0.0;
    for &v in values {
        squared += (v - mean).powi(2);
        if let Some(i) = config.bin_index(v) {
            histogram[i].count += 1;
        }
    }
    let variance = squared / n;

    Stats {
        count: values.len(),
        mean,
        variance,
        stddev: variance.sqrt(),
        min,
        max,
        histogram,
        config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_calculate_basic() {
        let stats = calculate(&[2.0, 4.0, 6.0, 8.0, 10.0], HistogramConfig::new(5, 0.0, 12.0));
        assert_eq!(stats.count, 5);
        assert!((stats.mean - 6.0).abs() < 1e-12);
        assert!((stats.variance - 8.0).abs() < 1e-12);
        assert!((stats.stddev - 8.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 10.0);
        assert_eq!(stats.histogram.len(), 5);
        assert_eq!(stats.binned(), 5);
    }

    #[test]
    fn test_out_of_range_clamped_to_edges() {
        let values = [-15.0, -5.0, 0.0, 5.0, 10.0, 15.0, 25.0, 30.0, 105.0];
        let stats = calculate(&values, HistogramConfig::new(5, 0.0, 100.0));
        let counts: Vec<usize> = stats.histogram.iter().map(|b| b.count).collect();

        // [0,20): -15, -5, 0, 5, 10, 15 / [20,40): 25, 30 / [80,100]: 105
        assert_eq!(counts, vec![6, 2, 0, 0, 1]);
        assert_eq!(stats.binned(), 9);
    }

    #[test]
    fn test_bins_layout() {
        let bins = HistogramConfig::new(4, -100.0, 100.0).empty_bins();
        assert_eq!(bins[0].min, -100.0);
        assert_eq!(bins[0].max, -50.0);
        assert_eq!(bins[3].max, 100.0);
    }

    #[test]
    fn test_non_finite_counted_but_not_binned() {
        let stats = calculate(&[1.0, f64::NAN, 2.0], HistogramConfig::new(2, 0.0, 4.0));
        assert_eq!(stats.count, 3);
        assert_eq!(stats.binned(), 2);
    }

    #[test]
    fn test_empty_input() {
        let stats = calculate(&[], HistogramConfig::default());
        assert!(stats.is_empty());
        assert!(stats.histogram.is_empty());
    }

    #[test]
    fn test_zero_bins() {
        let stats = calculate(&[1.0, 2.0], HistogramConfig::new(0, 0.0, 10.0));
        assert_eq!(stats.count, 2);
        assert!(stats.histogram.is_empty());
    }

    proptest! {
        #[test]
        fn prop_histogram_total_equals_count(
            values in prop::collection::vec(-1e5f64..1e5, 1..300),
            bins in 1usize..50,
        ) {
            let stats = calculate(&values, HistogramConfig::new(bins, -100.0, 300.0));
            prop_assert_eq!(stats.binned(), stats.count);
            prop_assert!(stats.mean >= stats.min - 1e-6 && stats.mean <= stats.max + 1e-6);
        }
    }
}
