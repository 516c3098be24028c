//! 이상치 처리.
//!
//! YoY 변화율은 분모가 0에 가까운 종목 때문에 극단값이 자주 나옵니다.
//! 먼저 절대 범위로 불가능한 값을 버리고, 남은 값에 IQR 필터를 적용합니다.

use serde::{Deserialize, Serialize};

/// YoY 하한 (전액 손실)
pub const YOY_FLOOR: f64 = -100.0;
/// 기본 YoY 상한
pub const YOY_CAP: f64 = 10_000.0;
/// 보수적 모드의 YoY 상한
pub const YOY_CAP_CONSERVATIVE: f64 = 50_000.0;

/// 이상치 처리 방식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMode {
    /// 절대 범위 [-100, 10000] 후 1.5 IQR 제거
    #[default]
    Balanced,
    /// 절대 범위 [-100, 50000] 후 3.0 IQR 제거
    Conservative,
    /// 절대 범위 [-100, 10000] 후 5/95 분위수로 윈저화
    Winsorized,
}

impl OutlierMode {
    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        match self {
            OutlierMode::Balanced => {
                remove_outliers_iqr(&remove_outliers_absolute(values, YOY_FLOOR, YOY_CAP), 1.5)
            }
            OutlierMode::Conservative => remove_outliers_iqr(
                &remove_outliers_absolute(values, YOY_FLOOR, YOY_CAP_CONSERVATIVE),
                3.0,
            ),
            OutlierMode::Winsorized => {
                winsorize(&remove_outliers_absolute(values, YOY_FLOOR, YOY_CAP), 5, 95)
            }
        }
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// `[min, max]` 밖의 값을 버립니다. 순서는 유지됩니다.
pub fn remove_outliers_absolute(values: &[f64], min: f64, max: f64) -> Vec<f64> {
    values
        .iter()
        .copied()
        .filter(|v| *v >= min && *v <= max)
        .collect()
}

/// `[Q1 - k*IQR, Q3 + k*IQR]` 밖의 값을 버립니다. 결과는 정렬됩니다.
///
/// 값이 4개 미만이면 그대로 반환합니다.
pub fn remove_outliers_iqr(values: &[f64], multiplier: f64) -> Vec<f64> {
    if values.len() < 4 {
        return values.to_vec();
    }
    let sorted = sorted(values);
    let n = sorted.len();
    let q1 = sorted[n / 4];
    let q3 = sorted[(3 * n) / 4];
    let iqr = q3 - q1;
    let lower = q1 - multiplier * iqr;
    let upper = q3 + multiplier * iqr;

    sorted
        .into_iter()
        .filter(|v| *v >= lower && *v <= upper)
        .collect()
}

/// 평균에서 `num_stddev` 표준편차 밖의 값을 버립니다 (모표준편차).
pub fn remove_outliers_stddev(values: &[f64], num_stddev: f64) -> Vec<f64> {
    if values.len() < 2 {
        return values.to_vec();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let band = num_stddev * variance.sqrt();

    values
        .iter()
        .copied()
        .filter(|v| *v >= mean - band && *v <= mean + band)
        .collect()
}

/// 양 끝에서 `(100 - percentile) / 2`%씩 (올림) 잘라 가운데만 남깁니다. 결과는 정렬됩니다.
///
/// `percentile`이 (0, 100) 밖이면 그대로 반환하고, 전부 잘리면 빈 벡터입니다.
pub fn remove_outliers_percentile(values: &[f64], percentile: u32) -> Vec<f64> {
    if values.is_empty() || percentile == 0 || percentile >= 100 {
        return values.to_vec();
    }
    let sorted = sorted(values);
    let trim = f64::from(100 - percentile) / 2.0 / 100.0;
    let remove = (sorted.len() as f64 * trim).ceil() as usize;
    if remove * 2 >= sorted.len() {
        return Vec::new();
    }
    sorted[remove..sorted.len() - remove].to_vec()
}

/// 분위수 밖의 값을 경계값으로 바꿉니다. 개수와 순서는 유지됩니다.
pub fn winsorize(values: &[f64], low_percentile: u32, high_percentile: u32) -> Vec<f64> {
    if values.is_empty() || low_percentile >= high_percentile {
        return values.to_vec();
    }
    let sorted = sorted(values);
    let last = sorted.len() - 1;
    let index = |p: u32| ((last as f64 * f64::from(p) / 100.0).floor() as usize).min(last);
    let low = sorted[index(low_percentile)];
    let high = sorted[index(high_percentile)];

    values
        .iter()
        .map(|&v| {
            if v < low {
                low
            } else if v > high {
                high
            } else {
                v
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_absolute_bounds() {
        let values = [-150.0, -50.0, 0.0, 50.0, 100.0, 200.0, 50000.0];
        let filtered = remove_outliers_absolute(&values, -100.0, 1000.0);
        assert_eq!(filtered, vec![-50.0, 0.0, 50.0, 100.0, 200.0]);
    }

    #[test]
    fn test_absolute_drops_nan() {
        let filtered = remove_outliers_absolute(&[1.0, f64::NAN, f64::INFINITY], -100.0, 1000.0);
        assert_eq!(filtered, vec![1.0]);
    }

    #[test]
    fn test_iqr_removes_extreme() {
        let values = [10.0, 12.0, 11.0, 13.0, 9.0, 10.5, 500.0, 11.5];
        let filtered = remove_outliers_iqr(&values, 1.5);
        assert!(!filtered.contains(&500.0));
        assert_eq!(filtered.len(), 7);
        // 정렬된 결과
        assert!(filtered.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_iqr_quartiles_use_nearest_index() {
        // n=8: Q1 = sorted[2] = 3, Q3 = sorted[6] = 7
        let values: Vec<f64> = (1..=8).map(f64::from).collect();
        assert_eq!(remove_outliers_iqr(&values, 0.0), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_iqr_small_input_untouched() {
        assert_eq!(remove_outliers_iqr(&[1.0, 1000.0, 3.0], 1.5), vec![1.0, 1000.0, 3.0]);
    }

    #[test]
    fn test_stddev_filter() {
        let values = [1.0, 2.0, 3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 100.0];
        let filtered = remove_outliers_stddev(&values, 2.0);
        assert!(!filtered.contains(&100.0));
        assert_eq!(filtered.len(), 8);
    }

    #[test]
    fn test_percentile_trims_both_ends() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        // 75 → 양쪽 12.5% → ceil(1.25) = 2개씩
        assert_eq!(remove_outliers_percentile(&values, 75), vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert!(remove_outliers_percentile(&[1.0, 2.0], 10).is_empty());
        assert_eq!(remove_outliers_percentile(&values, 100), values);
    }

    #[test]
    fn test_winsorize_caps_in_place() {
        let values = [100.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, -50.0];
        let capped = winsorize(&values, 10, 90);
        // 정렬: [-50, 1, 2, ..., 8, 100], low idx 0, high idx 8
        assert_eq!(capped.len(), values.len());
        assert_eq!(capped[0], 8.0);
        assert_eq!(capped[9], -50.0);
        assert_eq!(capped[1], 1.0);
    }

    #[test]
    fn test_modes() {
        let values = [-150.0, 5.0, 6.0, 7.0, 8.0, 6.5, 20_000.0];
        let balanced = OutlierMode::Balanced.apply(&values);
        assert!(balanced.iter().all(|v| (-100.0..=10_000.0).contains(v)));

        let winsorized = OutlierMode::Winsorized.apply(&values);
        // 절대 범위에서 2개 제거 후 개수 유지
        assert_eq!(winsorized.len(), 5);
    }

    proptest! {
        #[test]
        fn prop_absolute_within_bounds(values in prop::collection::vec(-1e6f64..1e6, 0..200)) {
            let filtered = remove_outliers_absolute(&values, -100.0, 1000.0);
            prop_assert!(filtered.len() <= values.len());
            prop_assert!(filtered.iter().all(|v| *v >= -100.0 && *v <= 1000.0));
        }

        #[test]
        fn prop_winsorize_keeps_count(values in prop::collection::vec(-1e6f64..1e6, 1..200)) {
            let capped = winsorize(&values, 5, 95);
            prop_assert_eq!(capped.len(), values.len());
        }
    }
}
