//! 주봉/월봉 가격 샘플.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::period::{start_of_month, start_of_week};
use crate::CoreError;

/// 가격 집계 주기.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// 저장 테이블 이름.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly_prices",
            Self::Monthly => "monthly_prices",
        }
    }

    /// 날짜가 속한 기간의 시작일.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Weekly => start_of_week(date),
            Self::Monthly => start_of_month(date),
        }
    }

    /// 다음 기간의 시작일.
    pub fn next_period(&self, period: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Weekly => period.checked_add_days(Days::new(7)),
            Self::Monthly => period.checked_add_months(Months::new(1)),
        }
    }

    /// YoY 비교 대상 기간 (월봉: 12개월 전, 주봉: 52주 = 364일 전).
    pub fn year_ago(&self, period: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Weekly => period.checked_sub_days(Days::new(364)),
            Self::Monthly => period.checked_sub_months(Months::new(12)),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(CoreError::invalid("interval", other)),
        }
    }
}

/// USD 환산 전 원통화 가격.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginalPrices {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub avg: f64,
    pub close: f64,
}

/// (ticker, date) 단위 가격 샘플.
///
/// 가격 필드는 USD 환산 값입니다. `original`은 USD 종목이면 `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub ticker: String,
    /// 기간 시작일
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub avg: f64,
    pub close: f64,
    /// 전년 동기 대비 변화율 (%)
    pub yoy: Option<f64>,
    pub original: Option<OriginalPrices>,
}

impl PriceSample {
    /// 환율을 적용한 USD 샘플을 반환합니다. 원통화 값은 `original`에 보존됩니다.
    pub fn converted(&self, rate: f64) -> Self {
        Self {
            ticker: self.ticker.clone(),
            date: self.date,
            open: self.open * rate,
            high: self.high * rate,
            low: self.low * rate,
            avg: self.avg * rate,
            close: self.close * rate,
            yoy: self.yoy,
            original: Some(OriginalPrices {
                open: self.open,
                high: self.high,
                low: self.low,
                avg: self.avg,
                close: self.close,
            }),
        }
    }
}

/// YoY 변화율 (%) 계산. 이전 종가가 0 이하면 `None`.
pub fn yoy_percent(close: f64, year_ago_close: f64) -> Option<f64> {
    if year_ago_close > 0.0 {
        Some((close - year_ago_close) / year_ago_close * 100.0)
    } else {
        None
    }
}
