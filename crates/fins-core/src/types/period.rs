//! 기간(주/월) 날짜 계산.
//!
//! 모든 기간 날짜는 UTC 기준 기간 시작일로 정규화됩니다
//! (주봉: 월요일, 월봉: 1일).

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};

/// 주의 시작일 (월요일).
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday() as u64;
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

/// 월의 시작일 (1일).
pub fn start_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn is_start_of_week(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Mon
}

pub fn is_start_of_month(date: NaiveDate) -> bool {
    date.day() == 1
}

/// 주어진 시각 기준 어제 날짜 (UTC).
pub fn yesterday(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.pred_opt().unwrap_or(today)
}
