//! 통화별 USD 환율 캐시.
//!
//! 통화마다 전체 환율 이력을 한 번 받아 메모리에 보관합니다. 조회 날짜가
//! 보관 중인 범위를 벗어나면 하루 한 번까지 다시 받습니다.
//!
//! 조회 규칙:
//! - 정확한 날짜 우선. 일별 값과 함께 주/월 시작일 키(해당 기간의 첫 환율)도 둡니다.
//! - 마지막 데이터 이후 7일 이내면 마지막 환율 사용
//! - 그 외에는 `no forex data at YYYY-MM-DD` 에러

use chrono::{Days, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fins_core::{normalize_currency, start_of_month, start_of_week};

use crate::error::{DataError, Result};
use crate::provider::{ForexPoint, MarketDataSource};

/// 마지막 환율을 대신 쓸 수 있는 최대 일수.
pub const STALE_RATE_TOLERANCE_DAYS: u64 = 7;

/// 한 통화의 USD 환율 이력.
#[derive(Debug, Clone)]
pub struct ForexSeries {
    pub currency: String,
    rates: BTreeMap<NaiveDate, f64>,
    pub time_from: NaiveDate,
    pub time_to: NaiveDate,
    pub fetched_on: NaiveDate,
}

impl ForexSeries {
    /// 환율 점 목록으로 생성. 비어 있으면 `None`.
    pub fn from_points(currency: &str, points: &[ForexPoint], fetched_on: NaiveDate) -> Option<Self> {
        let mut sorted: Vec<&ForexPoint> = points.iter().filter(|p| p.price > 0.0).collect();
        sorted.sort_by_key(|p| p.date);

        let time_from = sorted.first()?.date;
        let time_to = sorted.last()?.date;

        let mut rates: BTreeMap<NaiveDate, f64> =
            sorted.iter().map(|p| (p.date, p.price)).collect();
        for p in &sorted {
            rates.entry(start_of_week(p.date)).or_insert(p.price);
            rates.entry(start_of_month(p.date)).or_insert(p.price);
        }

        Some(Self {
            currency: currency.to_string(),
            rates,
            time_from,
            time_to,
            fetched_on,
        })
    }

    /// `date`가 받아 둔 범위 안에 있는지 확인.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.time_from && date <= self.time_to
    }

    /// 해당 날짜의 환율.
    pub fn rate_at(&self, date: NaiveDate) -> Result<f64> {
        if let Some(rate) = self.rates.get(&date) {
            return Ok(*rate);
        }

        let tolerance_end = self
            .time_to
            .checked_add_days(Days::new(STALE_RATE_TOLERANCE_DAYS))
            .unwrap_or(self.time_to);
        if date > self.time_to && date <= tolerance_end {
            if let Some(rate) = self.rates.get(&self.time_to) {
                return Ok(*rate);
            }
        }

        Err(DataError::Conversion(format!(
            "no forex data at {}",
            date.format("%Y-%m-%d")
        )))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// 통화별 환율 캐시. 맵 전체를 하나의 잠금으로 보호합니다.
pub struct ForexCache {
    source: Arc<dyn MarketDataSource>,
    series: Mutex<HashMap<String, Arc<ForexSeries>>>,
    today: fn() -> NaiveDate,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

fn is_usd(currency: &str) -> bool {
    currency.is_empty() || currency == "USD"
}

impl ForexCache {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            series: Mutex::new(HashMap::new()),
            today: utc_today,
        }
    }

    /// 갱신 판단에 쓰는 "오늘" 함수 지정.
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// `date` 기준으로 유효한 환율 이력. USD는 `None`.
    pub async fn series(&self, currency: &str, date: NaiveDate) -> Result<Option<Arc<ForexSeries>>> {
        let currency = normalize_currency(currency);
        if is_usd(&currency) {
            return Ok(None);
        }

        let today = (self.today)();
        let mut cache = self.series.lock().await;

        let cached = cache.get(&currency).cloned();
        let needs_fetch = match &cached {
            None => true,
            Some(series) => !series.covers(date) && series.fetched_on != today,
        };

        if !needs_fetch {
            return Ok(cached);
        }

        debug!(currency = %currency, date = %date, "환율 이력 요청");
        let fetched = self
            .source
            .forex_history(&currency)
            .await
            .map_err(DataError::from)
            .and_then(|points| {
                ForexSeries::from_points(&currency, &points, today).ok_or_else(|| {
                    DataError::Conversion(format!("no forex data returned for {}USD", currency))
                })
            });

        match fetched {
            Ok(series) => {
                info!(
                    currency = %currency,
                    from = %series.time_from,
                    to = %series.time_to,
                    "환율 이력 갱신"
                );
                let series = Arc::new(series);
                cache.insert(currency, series.clone());
                Ok(Some(series))
            }
            Err(e) => match cached {
                // 기존 이력이 있으면 그대로 사용
                Some(series) => {
                    warn!(currency = %currency, error = %e, "환율 갱신 실패 - 기존 이력 사용");
                    Ok(Some(series))
                }
                None => Err(e),
            },
        }
    }

    /// USD 환율. USD는 항상 1.0.
    pub async fn rate(&self, currency: &str, date: NaiveDate) -> Result<f64> {
        match self.series(currency, date).await? {
            None => Ok(1.0),
            Some(series) => series.rate_at(date),
        }
    }

    /// 금액을 USD로 변환.
    pub async fn to_usd(&self, amount: f64, currency: &str, date: NaiveDate) -> Result<f64> {
        Ok(amount * self.rate(currency, date).await?)
    }

    /// 캐시된 통화 목록.
    pub async fn cached_currencies(&self) -> Vec<String> {
        let mut currencies: Vec<String> = self.series.lock().await.keys().cloned().collect();
        currencies.sort();
        currencies
    }

    pub async fn clear(&self) {
        self.series.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CompanyProfile, EodQuote, FetchError, FetchResult, ListedSymbol};
    use async_trait::async_trait;
    use fins_core::DailyBar;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn today() -> NaiveDate {
        d(2024, 3, 20)
    }

    /// 환율 이력만 제공하는 공급자.
    struct FxOnly {
        points: Vec<ForexPoint>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataSource for FxOnly {
        async fn stock_list(&self) -> FetchResult<Vec<ListedSymbol>> {
            Ok(vec![])
        }
        async fn index_list(&self) -> FetchResult<Vec<ListedSymbol>> {
            Ok(vec![])
        }
        async fn delisted_companies(&self) -> FetchResult<Vec<ListedSymbol>> {
            Ok(vec![])
        }
        async fn profile(&self, ticker: &str) -> FetchResult<CompanyProfile> {
            Err(FetchError::NotFound(ticker.into()))
        }
        async fn profile_by_cik(&self, cik: &str) -> FetchResult<CompanyProfile> {
            Err(FetchError::NotFound(cik.into()))
        }
        async fn bulk_profiles(&self) -> FetchResult<Vec<CompanyProfile>> {
            Ok(vec![])
        }
        async fn bulk_eod(&self, _date: NaiveDate) -> FetchResult<HashMap<String, EodQuote>> {
            Ok(HashMap::new())
        }
        async fn price_history(&self, ticker: &str) -> FetchResult<Vec<DailyBar>> {
            Err(FetchError::NotFound(ticker.into()))
        }
        async fn forex_history(&self, currency: &str) -> FetchResult<Vec<ForexPoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.points.is_empty() {
                return Err(FetchError::NotFound(format!("{currency}USD")));
            }
            Ok(self.points.clone())
        }
    }

    fn eur_points() -> Vec<ForexPoint> {
        vec![
            ForexPoint { date: d(2024, 2, 29), price: 1.08 },
            ForexPoint { date: d(2024, 3, 4), price: 1.09 },
            ForexPoint { date: d(2024, 3, 5), price: 1.10 },
            ForexPoint { date: d(2024, 3, 8), price: 1.12 },
        ]
    }

    fn cache_with(points: Vec<ForexPoint>) -> (ForexCache, Arc<FxOnly>) {
        let source = Arc::new(FxOnly {
            points,
            calls: AtomicUsize::new(0),
        });
        let cache = ForexCache::new(source.clone()).with_today(today);
        (cache, source)
    }

    #[tokio::test]
    async fn test_usd_short_circuits() {
        let (cache, source) = cache_with(vec![]);
        assert_eq!(cache.rate("USD", d(2024, 1, 1)).await.unwrap(), 1.0);
        assert_eq!(cache.to_usd(5.0, "", d(2024, 1, 1)).await.unwrap(), 5.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exact_and_period_start_lookup() {
        let (cache, _) = cache_with(eur_points());
        assert_eq!(cache.rate("EUR", d(2024, 3, 5)).await.unwrap(), 1.10);
        // 3월 1일은 거래일이 아니지만 월 시작 키로 3월 첫 환율을 가짐
        assert_eq!(cache.rate("EUR", d(2024, 3, 1)).await.unwrap(), 1.09);
        // 2024-02-26 월요일 주 시작 키
        assert_eq!(cache.rate("EUR", d(2024, 2, 26)).await.unwrap(), 1.08);
    }

    #[tokio::test]
    async fn test_stale_tolerance_window() {
        let (cache, _) = cache_with(eur_points());
        assert_eq!(cache.rate("EUR", d(2024, 3, 15)).await.unwrap(), 1.12);

        let err = cache.rate("EUR", d(2024, 3, 16)).await.unwrap_err();
        assert_eq!(err.to_string(), "no forex data at 2024-03-16");

        // 범위 안의 빈 날짜는 대체 없음
        let err = cache.rate("EUR", d(2024, 3, 6)).await.unwrap_err();
        assert!(err.to_string().contains("2024-03-06"));
    }

    #[tokio::test]
    async fn test_refreshes_at_most_once_per_day() {
        let (cache, source) = cache_with(eur_points());
        cache.rate("EUR", d(2024, 3, 4)).await.unwrap();
        cache.rate("EUR", d(2024, 3, 5)).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // 범위 밖이지만 오늘 이미 받았으므로 재요청하지 않음
        let _ = cache.rate("EUR", d(2024, 3, 19)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached_currencies().await, vec!["EUR".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_currency_errors() {
        let (cache, _) = cache_with(vec![]);
        let err = cache.rate("XYZ", d(2024, 3, 4)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_currency_aliases_normalized() {
        let (cache, _) = cache_with(eur_points());
        cache.rate("ila", d(2024, 3, 4)).await.unwrap();
        assert_eq!(cache.cached_currencies().await, vec!["ILS".to_string()]);
    }
}
