//! 현재가 갱신 (벌크 EOD).
//!
//! 기준일은 어제입니다. 기준일이 주/월의 첫날이고 저장된 마지막 주봉/월봉이
//! 정확히 한 기간 전이면, EOD 행으로 새 기간 샘플 하나를 바로 추가합니다.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use fins_core::{normalize_currency, yesterday, yoy_percent, Interval, PriceSample};
use fins_data::{Database, EodQuote};

use super::{guarded, Stage};
use crate::{Result, StageStats, UpdaterContext};

/// 증분 추가 후보를 찾을 때 조회하는 최대 심볼 수.
const INCREMENTAL_CANDIDATE_LIMIT: i64 = 10_000;

/// `date`에 `interval` 기간 샘플을 바로 추가할 수 있으면 그 기간 시작일.
///
/// `date`가 기간 첫날이고 마지막 샘플의 다음 기간이 `date`일 때만 해당합니다.
pub fn append_period(interval: Interval, latest: Option<NaiveDate>, date: NaiveDate) -> Option<NaiveDate> {
    let period = interval.period_start(date);
    if period != date {
        return None;
    }
    let next = interval.next_period(latest?)?;
    (next == period).then_some(period)
}

/// EOD 행으로 기간 샘플을 만듭니다. avg는 종가입니다.
///
/// `rate`는 USD 환율 (USD 종목은 `None`). `year_ago`는 한 기간 길이 전 저장 샘플.
pub fn appended_sample(
    quote: &EodQuote,
    period: NaiveDate,
    rate: Option<f64>,
    year_ago: Option<&PriceSample>,
) -> PriceSample {
    let yoy = year_ago.and_then(|prev| {
        let prev_close = prev.original.map(|o| o.close).unwrap_or(prev.close);
        yoy_percent(quote.close, prev_close)
    });

    let sample = PriceSample {
        ticker: quote.ticker.clone(),
        date: period,
        open: quote.open,
        high: quote.high,
        low: quote.low,
        avg: quote.close,
        close: quote.close,
        yoy,
        original: None,
    };

    match rate {
        Some(rate) => sample.converted(rate),
        None => sample,
    }
}

/// 증분 추가 대상 (인터벌별 티커 → 기간 시작일).
#[derive(Debug, Default)]
struct IncrementalPlan {
    weekly: HashMap<String, NaiveDate>,
    monthly: HashMap<String, NaiveDate>,
}

impl IncrementalPlan {
    fn is_empty(&self) -> bool {
        self.weekly.is_empty() && self.monthly.is_empty()
    }

    fn get(&self, interval: Interval) -> &HashMap<String, NaiveDate> {
        match interval {
            Interval::Weekly => &self.weekly,
            Interval::Monthly => &self.monthly,
        }
    }
}

/// 증분 추가에 쓰는 저장소 연산.
#[async_trait]
pub trait IncrementalStore: Send + Sync {
    async fn append_candidates(&self, stale_before: DateTime<Utc>, limit: i64) -> fins_data::Result<Vec<String>>;

    async fn latest_dates(
        &self,
        tickers: &[String],
        interval: Interval,
    ) -> fins_data::Result<HashMap<String, NaiveDate>>;

    async fn sample_at(
        &self,
        ticker: &str,
        interval: Interval,
        date: NaiveDate,
    ) -> fins_data::Result<Option<PriceSample>>;

    async fn put_samples(&self, interval: Interval, samples: &[PriceSample]) -> fins_data::Result<usize>;

    async fn record_error(&self, error_type: &str, message: &str);
}

#[async_trait]
impl IncrementalStore for Database {
    async fn append_candidates(&self, stale_before: DateTime<Utc>, limit: i64) -> fins_data::Result<Vec<String>> {
        let stale = self.symbols().stale_price_symbols(stale_before, limit).await?;
        Ok(stale.into_iter().map(|s| s.ticker).collect())
    }

    async fn latest_dates(
        &self,
        tickers: &[String],
        interval: Interval,
    ) -> fins_data::Result<HashMap<String, NaiveDate>> {
        self.prices().latest_dates(tickers, interval).await
    }

    async fn sample_at(
        &self,
        ticker: &str,
        interval: Interval,
        date: NaiveDate,
    ) -> fins_data::Result<Option<PriceSample>> {
        self.prices().sample_at(ticker, interval, date).await
    }

    async fn put_samples(&self, interval: Interval, samples: &[PriceSample]) -> fins_data::Result<usize> {
        self.prices().put_prices(interval, samples).await
    }

    async fn record_error(&self, error_type: &str, message: &str) {
        self.errors()
            .record(Stage::Quotes.error_source(), error_type, message)
            .await;
    }
}

async fn plan_incremental<S: IncrementalStore + ?Sized>(
    store: &S,
    date: NaiveDate,
    stale_before: DateTime<Utc>,
) -> fins_data::Result<IncrementalPlan> {
    let mut plan = IncrementalPlan::default();
    let due: Vec<Interval> = [Interval::Weekly, Interval::Monthly]
        .into_iter()
        .filter(|i| i.period_start(date) == date)
        .collect();
    if due.is_empty() {
        return Ok(plan);
    }

    let candidates = store
        .append_candidates(stale_before, INCREMENTAL_CANDIDATE_LIMIT)
        .await?;

    for interval in due {
        let latest = store.latest_dates(&candidates, interval).await?;
        let target = match interval {
            Interval::Weekly => &mut plan.weekly,
            Interval::Monthly => &mut plan.monthly,
        };
        for (ticker, last) in latest {
            if let Some(period) = append_period(interval, Some(last), date) {
                target.insert(ticker, period);
            }
        }
        info!(interval = %interval, count = target.len(), "증분 추가 대상");
    }
    Ok(plan)
}

/// 증분 계획. 실패하면 기록하고 증분 추가 없이 진행합니다.
async fn plan_or_skip<S: IncrementalStore + ?Sized>(
    store: &S,
    date: NaiveDate,
    stale_before: DateTime<Utc>,
) -> IncrementalPlan {
    match plan_incremental(store, date, stale_before).await {
        Ok(plan) => plan,
        Err(e) => {
            store
                .record_error(
                    "incremental_update_error",
                    &format!("Failed to plan incremental samples for {}: {}", date, e),
                )
                .await;
            IncrementalPlan::default()
        }
    }
}

/// 한 EOD 행으로 추가할 기간 샘플들. 1년 전 샘플 조회에 실패한 인터벌은 건너뜁니다.
async fn samples_for_quote<S: IncrementalStore + ?Sized>(
    store: &S,
    plan: &IncrementalPlan,
    quote: &EodQuote,
    rate: Option<f64>,
) -> Vec<(Interval, PriceSample)> {
    let mut samples = Vec::new();
    for interval in [Interval::Weekly, Interval::Monthly] {
        let Some(period) = plan.get(interval).get(&quote.ticker).copied() else {
            continue;
        };
        let year_ago = match interval.year_ago(period) {
            Some(ago) => match store.sample_at(&quote.ticker, interval, ago).await {
                Ok(sample) => sample,
                Err(e) => {
                    let message = format!(
                        "Failed to read {} {} sample for {}: {}",
                        quote.ticker, interval, ago, e
                    );
                    store.record_error("incremental_update_error", &message).await;
                    continue;
                }
            },
            None => None,
        };
        debug!(ticker = %quote.ticker, interval = %interval, period = %period, "기간 샘플 추가");
        samples.push((interval, appended_sample(quote, period, rate, year_ago.as_ref())));
    }
    samples
}

/// 증분 샘플 저장. 인터벌 단위로 실패를 기록하고 나머지는 계속 씁니다.
async fn write_appended<S: IncrementalStore + ?Sized>(
    store: &S,
    appended: &HashMap<Interval, Vec<PriceSample>>,
) -> usize {
    let mut total = 0;
    for (interval, samples) in appended {
        match store.put_samples(*interval, samples).await {
            Ok(written) => {
                info!(interval = %interval, written, "증분 기간 샘플 저장");
                total += written;
            }
            Err(e) => {
                let message = format!(
                    "Failed to append {} {} samples: {}",
                    samples.len(),
                    interval,
                    e
                );
                store.record_error("incremental_update_error", &message).await;
            }
        }
    }
    total
}

/// 현재가 갱신 스테이지.
pub async fn update_quotes(ctx: &UpdaterContext) -> Result<StageStats> {
    let today = Utc::now().date_naive();
    guarded(&ctx.db, Stage::Quotes, today, || run(ctx)).await
}

async fn run(ctx: &UpdaterContext) -> Result<StageStats> {
    let mut stats = StageStats::new();
    let date = yesterday(Utc::now());
    let repo = ctx.db.symbols();

    let needed = repo.tickers_needing_quote_update(date).await?;
    if needed.is_empty() {
        info!(date = %date, "현재가 갱신 대상 없음");
        return Ok(stats);
    }

    let stale_before = ctx.config.price.stale_before(Utc::now());
    let plan = plan_or_skip(&ctx.db, date, stale_before).await;
    let currencies = repo.all_currencies().await?;
    let bulk = ctx.source.bulk_eod(date).await?;
    info!(date = %date, needed = needed.len(), bulk = bulk.len(), "벌크 EOD 조회 완료");

    let quotes = select_needed(&bulk, &needed);
    let mut updates: Vec<(String, f64)> = Vec::with_capacity(quotes.len());
    let mut appended: HashMap<Interval, Vec<PriceSample>> = HashMap::new();

    for quote in quotes {
        let Some(currency) = currencies.get(&quote.ticker) else {
            stats.skipped += 1;
            continue;
        };

        let rate = match ctx.forex.rate(currency, date).await {
            Ok(rate) => rate,
            Err(e) => {
                let message = format!(
                    "Failed to convert {} from {} to USD: {}",
                    quote.ticker, currency, e
                );
                ctx.errors
                    .record(Stage::Quotes.error_source(), "conversion_error", &message)
                    .await;
                stats.record_failure(&quote.ticker, "conversion");
                continue;
            }
        };
        updates.push((quote.ticker.clone(), quote.close * rate));

        if plan.is_empty() {
            continue;
        }
        let sample_rate = (!is_usd(currency)).then_some(rate);
        for (interval, sample) in samples_for_quote(&ctx.db, &plan, quote, sample_rate).await {
            appended.entry(interval).or_default().push(sample);
        }
    }

    let updated = repo.update_quotes(&updates, date).await?;
    write_appended(&ctx.db, &appended).await;

    stats.processed = bulk.len();
    stats.updated = updated as usize;
    Ok(stats)
}

fn is_usd(currency: &str) -> bool {
    let currency = normalize_currency(currency);
    currency.is_empty() || currency == "USD"
}

/// 갱신이 필요한 티커의 EOD 행만 티커 순으로 고릅니다.
fn select_needed<'a>(bulk: &'a HashMap<String, EodQuote>, needed: &HashSet<String>) -> Vec<&'a EodQuote> {
    let mut quotes: Vec<&EodQuote> = bulk
        .iter()
        .filter(|(ticker, _)| needed.contains(*ticker))
        .map(|(_, quote)| quote)
        .collect();
    quotes.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    quotes
}

#[cfg(test)]
mod tests {
    use super::*;
    use fins_core::OriginalPrices;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn quote(close: f64) -> EodQuote {
        EodQuote {
            ticker: "SAP.DE".into(),
            date: d(2024, 7, 1),
            open: 10.0,
            high: 12.0,
            low: 9.0,
            avg: 11.0,
            close,
        }
    }

    #[test]
    fn test_append_period_weekly() {
        // 2024-07-01 월요일
        let monday = d(2024, 7, 1);
        assert_eq!(append_period(Interval::Weekly, Some(d(2024, 6, 24)), monday), Some(monday));
        // 두 주 뒤처짐
        assert_eq!(append_period(Interval::Weekly, Some(d(2024, 6, 17)), monday), None);
        // 이미 최신
        assert_eq!(append_period(Interval::Weekly, Some(monday), monday), None);
        // 월요일이 아님
        assert_eq!(append_period(Interval::Weekly, Some(d(2024, 6, 24)), d(2024, 7, 2)), None);
        assert_eq!(append_period(Interval::Weekly, None, monday), None);
    }

    #[test]
    fn test_append_period_monthly() {
        let first = d(2024, 7, 1);
        assert_eq!(append_period(Interval::Monthly, Some(d(2024, 6, 1)), first), Some(first));
        assert_eq!(append_period(Interval::Monthly, Some(d(2024, 5, 1)), first), None);
        assert_eq!(append_period(Interval::Monthly, Some(d(2024, 6, 1)), d(2024, 7, 15)), None);
    }

    #[test]
    fn test_appended_sample_converts_and_computes_yoy() {
        let prev = PriceSample {
            ticker: "SAP.DE".into(),
            date: d(2023, 7, 1),
            open: 22.0,
            high: 22.0,
            low: 22.0,
            avg: 22.0,
            close: 22.0,
            yoy: None,
            original: Some(OriginalPrices {
                open: 10.0,
                high: 10.0,
                low: 10.0,
                avg: 10.0,
                close: 10.0,
            }),
        };
        let sample = appended_sample(&quote(12.0), d(2024, 7, 1), Some(2.0), Some(&prev));

        assert_eq!(sample.date, d(2024, 7, 1));
        assert_eq!(sample.close, 24.0);
        assert_eq!(sample.avg, 24.0);
        assert_eq!(sample.original.unwrap().close, 12.0);
        // 원통화 종가 기준 10 → 12
        assert!((sample.yoy.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_appended_sample_usd_without_history() {
        let sample = appended_sample(&quote(5.0), d(2024, 7, 1), None, None);
        assert_eq!(sample.close, 5.0);
        assert!(sample.original.is_none());
        assert!(sample.yoy.is_none());
    }

    /// 실패 지점을 고를 수 있는 메모리 저장소.
    #[derive(Default)]
    struct FakeIncremental {
        fail_candidates: bool,
        fail_sample_at: bool,
        fail_put: Option<Interval>,
        latest: HashMap<String, NaiveDate>,
        written: std::sync::Mutex<Vec<(Interval, usize)>>,
        errors: std::sync::Mutex<Vec<String>>,
    }

    fn db_error() -> fins_data::DataError {
        fins_data::DataError::PoolExhausted
    }

    #[async_trait]
    impl IncrementalStore for FakeIncremental {
        async fn append_candidates(&self, _: DateTime<Utc>, _: i64) -> fins_data::Result<Vec<String>> {
            if self.fail_candidates {
                return Err(db_error());
            }
            Ok(self.latest.keys().cloned().collect())
        }

        async fn latest_dates(
            &self,
            _: &[String],
            _: Interval,
        ) -> fins_data::Result<HashMap<String, NaiveDate>> {
            Ok(self.latest.clone())
        }

        async fn sample_at(&self, _: &str, _: Interval, _: NaiveDate) -> fins_data::Result<Option<PriceSample>> {
            if self.fail_sample_at {
                return Err(db_error());
            }
            Ok(None)
        }

        async fn put_samples(&self, interval: Interval, samples: &[PriceSample]) -> fins_data::Result<usize> {
            if self.fail_put == Some(interval) {
                return Err(db_error());
            }
            self.written.lock().unwrap().push((interval, samples.len()));
            Ok(samples.len())
        }

        async fn record_error(&self, error_type: &str, _message: &str) {
            self.errors.lock().unwrap().push(error_type.to_string());
        }
    }

    #[tokio::test]
    async fn test_plan_failure_falls_back_to_empty_plan() {
        let store = FakeIncremental { fail_candidates: true, ..Default::default() };

        let plan = plan_or_skip(&store, d(2024, 7, 1), Utc::now()).await;

        assert!(plan.is_empty());
        assert_eq!(*store.errors.lock().unwrap(), vec!["incremental_update_error".to_string()]);
    }

    #[tokio::test]
    async fn test_plan_targets_tickers_one_period_behind() {
        let store = FakeIncremental {
            latest: [("SAP.DE".to_string(), d(2024, 6, 1)), ("OLD".to_string(), d(2024, 3, 1))].into(),
            ..Default::default()
        };

        // 2024-07-01은 월요일이자 월초
        let plan = plan_or_skip(&store, d(2024, 7, 1), Utc::now()).await;

        assert_eq!(plan.monthly.get("SAP.DE"), Some(&d(2024, 7, 1)));
        assert!(!plan.monthly.contains_key("OLD"));
        assert!(store.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sample_lookup_failure_skips_interval() {
        let store = FakeIncremental { fail_sample_at: true, ..Default::default() };
        let mut plan = IncrementalPlan::default();
        plan.monthly.insert("SAP.DE".into(), d(2024, 7, 1));

        let samples = samples_for_quote(&store, &plan, &quote(12.0), Some(2.0)).await;

        assert!(samples.is_empty());
        assert_eq!(store.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sample_for_planned_quote() {
        let store = FakeIncremental::default();
        let mut plan = IncrementalPlan::default();
        plan.weekly.insert("SAP.DE".into(), d(2024, 7, 1));

        let samples = samples_for_quote(&store, &plan, &quote(12.0), None).await;

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].0, Interval::Weekly);
        assert_eq!(samples[0].1.close, 12.0);
        assert!(samples[0].1.yoy.is_none());
    }

    #[tokio::test]
    async fn test_append_write_failure_keeps_other_interval() {
        let store = FakeIncremental { fail_put: Some(Interval::Weekly), ..Default::default() };
        let sample = appended_sample(&quote(5.0), d(2024, 7, 1), None, None);
        let appended: HashMap<Interval, Vec<PriceSample>> = [
            (Interval::Weekly, vec![sample.clone()]),
            (Interval::Monthly, vec![sample]),
        ]
        .into();

        let total = write_appended(&store, &appended).await;

        assert_eq!(total, 1);
        assert_eq!(*store.written.lock().unwrap(), vec![(Interval::Monthly, 1)]);
        assert_eq!(*store.errors.lock().unwrap(), vec!["incremental_update_error".to_string()]);
    }

    #[test]
    fn test_select_needed_sorted() {
        let mut bulk = HashMap::new();
        for t in ["MSFT", "AAPL", "XYZ"] {
            let mut q = quote(1.0);
            q.ticker = t.into();
            bulk.insert(t.to_string(), q);
        }
        let needed: HashSet<String> = ["MSFT".to_string(), "AAPL".to_string()].into();
        let picked: Vec<&str> = select_needed(&bulk, &needed)
            .iter()
            .map(|q| q.ticker.as_str())
            .collect();
        assert_eq!(picked, vec!["AAPL", "MSFT"]);
    }
}
