//! 일봉 → 주봉/월봉 집계.
//!
//! 일봉을 날짜순으로 한 번 순회하며 주봉과 월봉을 동시에 만듭니다.
//! 기간별 집계 규칙:
//! - open: 첫 일봉 시가, close: 마지막 일봉 종가
//! - high/low: 기간 내 최고/최저
//! - avg: 일봉 종가의 평균
//!
//! YoY는 정확히 한 기간 길이 전(월봉 12개월, 주봉 364일) 샘플이 있을 때만 채워집니다.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{yoy_percent, Interval, PriceSample};

/// 공급자에서 받은 일봉 (원통화).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Default)]
struct Bucket {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    close_sum: f64,
    count: usize,
}

impl Bucket {
    fn add(&mut self, bar: &DailyBar) {
        if self.count == 0 {
            self.open = bar.open;
            self.high = bar.high;
            self.low = bar.low;
        } else {
            self.high = self.high.max(bar.high);
            self.low = self.low.min(bar.low);
        }
        self.close = bar.close;
        self.close_sum += bar.close;
        self.count += 1;
    }
}

/// 한 주기의 집계 상태.
struct Rollup {
    interval: Interval,
    current: Option<(NaiveDate, Bucket)>,
    closes: HashMap<NaiveDate, f64>,
    out: Vec<PriceSample>,
}

impl Rollup {
    fn new(interval: Interval) -> Self {
        Self {
            interval,
            current: None,
            closes: HashMap::new(),
            out: Vec::new(),
        }
    }

    fn push(&mut self, ticker: &str, bar: &DailyBar) {
        let period = self.interval.period_start(bar.date);
        match &mut self.current {
            Some((start, bucket)) if *start == period => bucket.add(bar),
            _ => {
                self.flush(ticker);
                let mut bucket = Bucket::default();
                bucket.add(bar);
                self.current = Some((period, bucket));
            }
        }
    }

    fn flush(&mut self, ticker: &str) {
        let Some((period, bucket)) = self.current.take() else {
            return;
        };

        let yoy = self
            .interval
            .year_ago(period)
            .and_then(|ago| self.closes.get(&ago))
            .and_then(|prev| yoy_percent(bucket.close, *prev));
        self.closes.insert(period, bucket.close);

        self.out.push(PriceSample {
            ticker: ticker.to_string(),
            date: period,
            open: bucket.open,
            high: bucket.high,
            low: bucket.low,
            avg: bucket.close_sum / bucket.count as f64,
            close: bucket.close,
            yoy,
            original: None,
        });
    }

    fn finish(mut self, ticker: &str) -> Vec<PriceSample> {
        self.flush(ticker);
        self.out
    }
}

/// 날짜 오름차순 일봉을 (월봉, 주봉)으로 집계합니다.
pub fn aggregate_daily(bars: &[DailyBar], ticker: &str) -> (Vec<PriceSample>, Vec<PriceSample>) {
    let mut monthly = Rollup::new(Interval::Monthly);
    let mut weekly = Rollup::new(Interval::Weekly);

    for bar in bars {
        monthly.push(ticker, bar);
        weekly.push(ticker, bar);
    }

    (monthly.finish(ticker), weekly.finish(ticker))
}

/// 최근 12개월 월봉 최고가. 양수인 고가가 없으면 `None`.
pub fn ath_12m(monthly: &[PriceSample], today: NaiveDate) -> Option<f64> {
    let cutoff = today.checked_sub_months(Months::new(12))?;
    let max = monthly
        .iter()
        .filter(|s| s.date > cutoff)
        .map(|s| s.high)
        .fold(0.0_f64, f64::max);
    (max > 0.0).then_some(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(date: NaiveDate, close: f64) -> DailyBar {
        DailyBar {
            date,
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
        }
    }

    #[test]
    fn test_monthly_ohlc_rules() {
        let bars = vec![
            DailyBar { date: d(2024, 1, 2), open: 10.0, high: 11.0, low: 9.0, close: 10.5 },
            DailyBar { date: d(2024, 1, 3), open: 10.5, high: 14.0, low: 10.0, close: 13.0 },
            DailyBar { date: d(2024, 1, 4), open: 13.0, high: 13.5, low: 8.0, close: 9.5 },
        ];
        let (monthly, weekly) = aggregate_daily(&bars, "AAPL");

        assert_eq!(monthly.len(), 1);
        let m = &monthly[0];
        assert_eq!(m.date, d(2024, 1, 1));
        assert_eq!(m.open, 10.0);
        assert_eq!(m.high, 14.0);
        assert_eq!(m.low, 8.0);
        assert_eq!(m.close, 9.5);
        assert!((m.avg - 11.0).abs() < 1e-9);
        assert_eq!(m.yoy, None);

        // 2024-01-02는 화요일, 주 시작은 2024-01-01 월요일
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].date, d(2024, 1, 1));
    }

    #[test]
    fn test_monthly_yoy_same_month_previous_year() {
        let bars = vec![
            bar(d(2023, 3, 15), 100.0),
            bar(d(2023, 4, 14), 80.0),
            bar(d(2024, 3, 15), 120.0),
            bar(d(2024, 5, 15), 90.0),
        ];
        let (monthly, _) = aggregate_daily(&bars, "X");

        assert_eq!(monthly.len(), 4);
        assert_eq!(monthly[0].yoy, None);
        assert_eq!(monthly[1].yoy, None);
        assert!((monthly[2].yoy.unwrap() - 20.0).abs() < 1e-9);
        // 2023-05 샘플 없음
        assert_eq!(monthly[3].yoy, None);
    }

    #[test]
    fn test_weekly_yoy_exactly_52_weeks() {
        let start = d(2023, 1, 2); // 월요일
        let bars: Vec<DailyBar> = (0..54)
            .map(|w| bar(start + Duration::weeks(w), 100.0 + w as f64))
            .collect();
        let (_, weekly) = aggregate_daily(&bars, "X");

        assert_eq!(weekly.len(), 54);
        for (i, sample) in weekly.iter().enumerate() {
            if i < 52 {
                assert_eq!(sample.yoy, None, "week {i}");
            } else {
                let expected = (sample.close - (100.0 + (i - 52) as f64)) / (100.0 + (i - 52) as f64) * 100.0;
                assert!((sample.yoy.unwrap() - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_yoy_skipped_for_non_positive_previous_close() {
        let bars = vec![bar(d(2023, 6, 5), 0.0), bar(d(2024, 6, 5), 10.0)];
        let (monthly, _) = aggregate_daily(&bars, "X");
        assert_eq!(monthly[1].yoy, None);
    }

    #[test]
    fn test_empty_input() {
        let (monthly, weekly) = aggregate_daily(&[], "X");
        assert!(monthly.is_empty());
        assert!(weekly.is_empty());
    }

    #[test]
    fn test_ath_12m() {
        let bars = vec![
            bar(d(2023, 1, 10), 500.0),
            bar(d(2023, 9, 10), 40.0),
            bar(d(2024, 2, 10), 60.0),
        ];
        let (monthly, _) = aggregate_daily(&bars, "X");
        // 2023-01 월봉은 12개월 범위 밖
        assert_eq!(ath_12m(&monthly, d(2024, 3, 1)), Some(62.0));
        assert_eq!(ath_12m(&[], d(2024, 3, 1)), None);
    }
}
