//! 가격 이력 갱신.
//!
//! 오래된 심볼을 라운드 단위로 가져와 워커 풀에서 일봉 이력을 조회하고
//! 주봉/월봉으로 집계합니다. 라운드 결과는 단일 writer로 넘겨 백그라운드에서
//! 쓰고, 그동안 다음 라운드를 수집합니다.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use tracing::{error, info, warn};

use fins_core::{aggregate_daily, ath_12m, DailyBar, FetchStatus, Interval, PriceSample, Symbol};
use fins_data::{Database, FetchError, ForexSeries, StalePriceSymbol};

use super::{guarded, Stage};
use crate::pool::run_all;
use crate::writer::{BatchReport, BatchWriter, WriterStats};
use crate::{CollectorError, Result, StageStats, UpdaterContext};

/// 한 라운드에서 조회하는 후보 배수. 아직 쓰이지 않은 앞 라운드 심볼을 건너뛰기 위함.
const CANDIDATE_FACTOR: usize = 3;

/// 한 심볼의 갱신 결과.
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    pub symbol: Symbol,
    pub monthly: Vec<PriceSample>,
    pub weekly: Vec<PriceSample>,
    /// 환율이 없어 버린 샘플 수
    pub dropped: usize,
}

/// 한 라운드의 쓰기 배치.
#[derive(Debug, Default)]
pub struct PriceWriteBatch {
    pub monthly: Vec<PriceSample>,
    pub weekly: Vec<PriceSample>,
    pub symbols: Vec<Symbol>,
}

impl PriceWriteBatch {
    fn push(&mut self, update: PriceUpdate) {
        self.monthly.extend(update.monthly);
        self.weekly.extend(update.weekly);
        self.symbols.push(update.symbol);
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// 워커 한 건의 결과.
#[derive(Debug)]
enum PriceOutcome {
    Updated(PriceUpdate),
    Status { ticker: String, status: FetchStatus, reason: Option<String> },
}

fn convert_samples(samples: Vec<PriceSample>, rates: Option<&ForexSeries>) -> (Vec<PriceSample>, usize) {
    let Some(rates) = rates else {
        return (samples, 0);
    };
    let total = samples.len();
    let converted: Vec<PriceSample> = samples
        .into_iter()
        .filter_map(|s| rates.rate_at(s.date).ok().map(|rate| s.converted(rate)))
        .collect();
    let dropped = total - converted.len();
    (converted, dropped)
}

/// 일봉 이력으로 심볼 갱신 내용을 만듭니다.
///
/// `rates`가 있으면 (비 USD 종목) 기간 시작일 환율로 USD 환산하고, 환율이 없는 샘플은 버립니다.
pub fn build_price_update(
    ticker: &str,
    mut bars: Vec<DailyBar>,
    rates: Option<&ForexSeries>,
    now: DateTime<Utc>,
) -> PriceUpdate {
    bars.sort_by_key(|b| b.date);
    let (monthly, weekly) = aggregate_daily(&bars, ticker);
    let (monthly, dropped_monthly) = convert_samples(monthly, rates);
    let (weekly, dropped_weekly) = convert_samples(weekly, rates);

    let symbol = Symbol {
        oldest_price: bars.first().map(|b| b.date),
        ath12m: ath_12m(&monthly, now.date_naive()),
        last_price_update: Some(now),
        last_price_status: Some(FetchStatus::Ok),
        ..Symbol::new(ticker)
    };

    PriceUpdate {
        symbol,
        monthly,
        weekly,
        dropped: dropped_monthly + dropped_weekly,
    }
}

fn status_symbol(ticker: &str, status: FetchStatus, now: DateTime<Utc>) -> Symbol {
    Symbol {
        last_price_update: Some(now),
        last_price_status: Some(status),
        ..Symbol::new(ticker)
    }
}

async fn process_symbol(ctx: UpdaterContext, target: StalePriceSymbol, today: NaiveDate) -> PriceOutcome {
    let ticker = target.ticker;
    let bars = match ctx.source.price_history(&ticker).await {
        Ok(bars) if bars.is_empty() => {
            return PriceOutcome::Status { ticker, status: FetchStatus::NotFound, reason: None };
        }
        Ok(bars) => bars,
        Err(e) if e.is_not_found() => {
            return PriceOutcome::Status { ticker, status: FetchStatus::NotFound, reason: None };
        }
        Err(e) => {
            return PriceOutcome::Status {
                ticker,
                status: FetchStatus::Failed,
                reason: Some(e.to_string()),
            };
        }
    };

    let currency = target.currency.unwrap_or_default();
    let rates = match ctx.forex.series(&currency, today).await {
        Ok(rates) => rates,
        Err(e) => {
            let message = format!("Failed to convert prices of {} from {} to USD: {}", ticker, currency, e);
            ctx.errors
                .record(Stage::Prices.error_source(), "conversion_error", &message)
                .await;
            return PriceOutcome::Status {
                ticker,
                status: FetchStatus::Failed,
                reason: Some(format!("conversion: {}", e)),
            };
        }
    };

    let update = build_price_update(&ticker, bars, rates.as_deref(), Utc::now());
    if update.dropped > 0 {
        warn!(ticker = %ticker, currency = %currency, dropped = update.dropped, "환율 없는 샘플 제외");
    }
    PriceOutcome::Updated(update)
}

/// 가격 라운드 쓰기에 필요한 저장소 연산.
#[async_trait]
pub trait PriceRoundStore: Send + Sync {
    /// 월봉, 주봉, 심볼을 하나의 트랜잭션으로 씁니다.
    async fn write_round(&self, batch: &PriceWriteBatch) -> fins_data::Result<usize>;

    /// 심볼 상태만 씁니다.
    async fn put_statuses(&self, symbols: &[Symbol]) -> fins_data::Result<usize>;

    async fn record_error(&self, error_type: &str, message: &str);
}

#[async_trait]
impl PriceRoundStore for Database {
    async fn write_round(&self, batch: &PriceWriteBatch) -> fins_data::Result<usize> {
        self.prices()
            .write_round(&batch.monthly, &batch.weekly, &batch.symbols)
            .await
    }

    async fn put_statuses(&self, symbols: &[Symbol]) -> fins_data::Result<usize> {
        self.symbols().put_symbols(symbols).await
    }

    async fn record_error(&self, error_type: &str, message: &str) {
        self.errors()
            .record(Stage::Prices.error_source(), error_type, message)
            .await;
    }
}

/// writer 태스크가 실행하는 라운드 쓰기.
///
/// 라운드 전체를 한 트랜잭션으로 씁니다. 실패하면 가격을 받은 심볼을 `failed`로
/// 바꿔 상태만 다시 쓰고, 그 티커들을 `rejected`로 보고합니다.
pub async fn write_batch<S: PriceRoundStore + ?Sized>(
    store: &S,
    batch: PriceWriteBatch,
    now: DateTime<Utc>,
) -> Result<BatchReport> {
    let error = match store.write_round(&batch).await {
        Ok(rows) => return Ok(BatchReport::rows(rows)),
        Err(e) => e,
    };

    warn!(symbols = batch.symbols.len(), error = %error, "가격 라운드 쓰기 실패 - 실패 상태로 기록");
    if error.is_constraint_violation() {
        store
            .record_error("db_constraint_violation", &error.to_string())
            .await;
    }

    let reason = error.to_string();
    let mut rejected = Vec::new();
    let statuses: Vec<Symbol> = batch
        .symbols
        .into_iter()
        .map(|symbol| {
            if symbol.last_price_status == Some(FetchStatus::Ok) {
                rejected.push((symbol.ticker.clone(), reason.clone()));
                status_symbol(&symbol.ticker, FetchStatus::Failed, now)
            } else {
                symbol
            }
        })
        .collect();

    // 상태 기록도 실패하면 심볼이 오래된 상태로 남아 다음 실행에서 다시 시도됨
    let rows = match store.put_statuses(&statuses).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(symbols = statuses.len(), error = %e, "실패 상태 기록 실패");
            0
        }
    };
    Ok(BatchReport { rows, rejected })
}

/// writer 결과를 스테이지 통계에 반영합니다.
fn apply_writer_stats(stats: &mut StageStats, written: &WriterStats) {
    for (ticker, reason) in &written.rejected {
        stats.demote_updated(ticker, reason);
    }
    if written.failed_batches > 0 {
        stats
            .failures
            .push(format!("{} write batches failed", written.failed_batches));
    }
}

/// 가격 이력 갱신 스테이지.
pub async fn update_prices(ctx: &UpdaterContext) -> Result<StageStats> {
    let today = Utc::now().date_naive();
    guarded(&ctx.db, Stage::Prices, today, || run(ctx, today)).await
}

async fn run(ctx: &UpdaterContext, today: NaiveDate) -> Result<StageStats> {
    let mut stats = StageStats::new();
    let config = &ctx.config.price;
    let repo = ctx.db.symbols();
    let stale_before = config.stale_before(Utc::now());

    let writer = {
        let db = ctx.db.clone();
        BatchWriter::spawn("prices", move |batch: PriceWriteBatch| {
            let db = db.clone();
            async move { write_batch(&db, batch, Utc::now()).await }
        })
    };

    let mut attempted: HashSet<String> = HashSet::new();
    let mut round = 0usize;
    let outcome = loop {
        if ctx.is_cancelled() {
            break Err(CollectorError::Cancelled);
        }
        let limit = config.round_limit(attempted.len());
        if limit == 0 {
            info!(max_symbols = config.max_symbols, "최대 심볼 수 도달");
            break Ok(());
        }

        let candidates = repo
            .stale_price_symbols(stale_before, (limit * CANDIDATE_FACTOR) as i64)
            .await?;
        let remaining = repo.count_stale_prices(stale_before).await?;
        let targets: Vec<StalePriceSymbol> = candidates
            .into_iter()
            .filter(|s| !attempted.contains(&s.ticker))
            .take(limit)
            .collect();
        if targets.is_empty() {
            break Ok(());
        }

        round += 1;
        info!(round, remaining, size = targets.len(), "가격 갱신 라운드 시작");
        attempted.extend(targets.iter().map(|s| s.ticker.clone()));

        let outcomes = run_all(targets, config.workers, |target| {
            process_symbol(ctx.clone(), target, today)
        })
        .await;

        let now = Utc::now();
        let mut batch = PriceWriteBatch::default();
        for outcome in outcomes {
            stats.processed += 1;
            match outcome {
                PriceOutcome::Updated(update) => {
                    stats.updated += 1;
                    batch.push(update);
                }
                PriceOutcome::Status { ticker, status, reason } => {
                    match status {
                        FetchStatus::NotFound => stats.not_found += 1,
                        _ => stats.record_failure(&ticker, reason.as_deref().unwrap_or("failed")),
                    }
                    batch.symbols.push(status_symbol(&ticker, status, now));
                }
            }
        }

        if !batch.is_empty() {
            writer.submit(batch).await?;
        }
    };

    let written = writer.finish().await;
    info!(
        rounds = round,
        batches = written.batches,
        rows = written.rows,
        failed_batches = written.failed_batches,
        rejected = written.rejected.len(),
        "가격 배치 쓰기 종료"
    );
    apply_writer_stats(&mut stats, &written);

    outcome.map(|_| stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fins_data::ForexPoint;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(date: NaiveDate, close: f64) -> DailyBar {
        DailyBar {
            date,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    #[test]
    fn test_build_price_update_usd() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        // 순서가 섞여 들어와도 정렬됨
        let bars = vec![bar(d(2024, 3, 4), 12.0), bar(d(2024, 2, 5), 10.0), bar(d(2024, 2, 6), 11.0)];
        let update = build_price_update("AAPL", bars, None, now);

        assert_eq!(update.monthly.len(), 2);
        assert_eq!(update.monthly[0].date, d(2024, 2, 1));
        assert_eq!(update.monthly[0].open, 10.0);
        assert_eq!(update.symbol.oldest_price, Some(d(2024, 2, 5)));
        assert_eq!(update.symbol.ath12m, Some(13.0));
        assert_eq!(update.symbol.last_price_status, Some(FetchStatus::Ok));
        assert_eq!(update.dropped, 0);
        assert!(update.monthly.iter().all(|s| s.original.is_none()));
    }

    #[test]
    fn test_build_price_update_drops_samples_without_rate() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        let points = vec![
            ForexPoint { date: d(2024, 3, 1), price: 1.1 },
            ForexPoint { date: d(2024, 3, 4), price: 1.2 },
        ];
        let series = ForexSeries::from_points("EUR", &points, d(2024, 3, 20)).unwrap();

        // 2023-06 샘플은 환율 범위 밖
        let bars = vec![bar(d(2023, 6, 5), 50.0), bar(d(2024, 3, 4), 10.0)];
        let update = build_price_update("SAP.DE", bars, Some(&series), now);

        assert_eq!(update.monthly.len(), 1);
        let march = &update.monthly[0];
        assert_eq!(march.date, d(2024, 3, 1));
        assert!((march.close - 11.0).abs() < 1e-9);
        assert_eq!(march.original.unwrap().close, 10.0);
        assert!(update.dropped >= 1);
        // oldest_price는 환산과 무관하게 첫 일봉 날짜
        assert_eq!(update.symbol.oldest_price, Some(d(2023, 6, 5)));
    }

    #[test]
    fn test_write_batch_collects_symbols() {
        let mut batch = PriceWriteBatch::default();
        assert!(batch.is_empty());
        let now = Utc::now();
        batch.push(build_price_update("A", vec![bar(d(2024, 1, 2), 1.0)], None, now));
        batch.symbols.push(status_symbol("B", FetchStatus::NotFound, now));

        assert_eq!(batch.symbols.len(), 2);
        assert_eq!(batch.monthly.len(), 1);
        assert_eq!(batch.weekly.len(), 1);
        assert_eq!(batch.symbols[1].last_price_status, Some(FetchStatus::NotFound));
    }

    /// 라운드 쓰기를 메모리에 기록하는 저장소.
    #[derive(Default)]
    struct FakeRoundStore {
        fail_round: bool,
        rounds: std::sync::Mutex<usize>,
        statuses: std::sync::Mutex<Vec<Symbol>>,
        errors: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PriceRoundStore for FakeRoundStore {
        async fn write_round(&self, batch: &PriceWriteBatch) -> fins_data::Result<usize> {
            if self.fail_round {
                return Err(fins_data::DataError::ConstraintViolation(
                    "violates foreign key constraint \"monthly_prices_ticker_fkey\"".into(),
                ));
            }
            *self.rounds.lock().unwrap() += 1;
            Ok(batch.monthly.len() + batch.weekly.len() + batch.symbols.len())
        }

        async fn put_statuses(&self, symbols: &[Symbol]) -> fins_data::Result<usize> {
            self.statuses.lock().unwrap().extend_from_slice(symbols);
            Ok(symbols.len())
        }

        async fn record_error(&self, error_type: &str, _message: &str) {
            self.errors.lock().unwrap().push(error_type.to_string());
        }
    }

    fn mixed_batch(now: DateTime<Utc>) -> PriceWriteBatch {
        let mut batch = PriceWriteBatch::default();
        batch.push(build_price_update("AAPL", vec![bar(d(2024, 1, 2), 1.0)], None, now));
        batch.symbols.push(status_symbol("GONE", FetchStatus::NotFound, now));
        batch
    }

    #[tokio::test]
    async fn test_failed_round_marks_priced_symbols_failed() {
        let store = FakeRoundStore { fail_round: true, ..Default::default() };
        let now = Utc::now();

        let report = write_batch(&store, mixed_batch(now), now).await.unwrap();

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "AAPL");
        assert_eq!(report.rows, 2);

        let statuses = store.statuses.lock().unwrap();
        let aapl = statuses.iter().find(|s| s.ticker == "AAPL").unwrap();
        assert_eq!(aapl.last_price_status, Some(FetchStatus::Failed));
        // 실패 상태 심볼은 가격 범위를 건드리지 않음
        assert_eq!(aapl.oldest_price, None);
        let gone = statuses.iter().find(|s| s.ticker == "GONE").unwrap();
        assert_eq!(gone.last_price_status, Some(FetchStatus::NotFound));

        assert_eq!(*store.errors.lock().unwrap(), vec!["db_constraint_violation".to_string()]);
    }

    #[tokio::test]
    async fn test_successful_round_writes_once() {
        let store = FakeRoundStore::default();
        let now = Utc::now();

        let report = write_batch(&store, mixed_batch(now), now).await.unwrap();

        assert!(report.rejected.is_empty());
        assert_eq!(*store.rounds.lock().unwrap(), 1);
        assert!(store.statuses.lock().unwrap().is_empty());
        assert!(store.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rejected_tickers_move_from_updated_to_failed() {
        let mut stats = StageStats::new();
        stats.updated = 3;
        let written = WriterStats {
            batches: 2,
            rows: 10,
            failed_batches: 0,
            rejected: vec![("AAPL".into(), "constraint".into())],
        };

        apply_writer_stats(&mut stats, &written);

        assert_eq!(stats.updated, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failures, vec!["AAPL: constraint".to_string()]);
    }

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::NotFound("x".into()).is_not_found());
        assert!(!FetchError::Transient("x".into()).is_not_found());
    }
}
