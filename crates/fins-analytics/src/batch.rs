//! 여러 종목의 YoY 분포를 한 번에 분석합니다.
//!
//! 가격은 한 번의 일괄 조회로 가져오고, 종목별 분석은 제한된 동시성으로 실행합니다.
//! 이력이 부족한 종목은 분석 전에 걸러 사유별로 집계합니다.

use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use fins_core::{Interval, PriceSample};
use fins_data::PriceRepository;

use crate::outliers::OutlierMode;
use crate::stats::{HistogramConfig, Stats};
use crate::yoy::analyze_yoy_with;
use crate::Result;

/// 기본 동시 분석 수
pub const DEFAULT_WORKERS: usize = 32;
/// 진행 로그 간격
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// 가격 일괄 조회.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn prices_batch(
        &self,
        tickers: &[String],
        interval: Interval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<String, Vec<PriceSample>>>;
}

#[async_trait]
impl PriceSource for PriceRepository {
    async fn prices_batch(
        &self,
        tickers: &[String],
        interval: Interval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<String, Vec<PriceSample>>> {
        Ok(PriceRepository::prices_batch(self, tickers, interval, from, to).await?)
    }
}

/// 분석 결과 저장과 진행 상황 보고.
#[async_trait]
pub trait AnalysisSink: Send + Sync {
    async fn save_result(&self, ticker: &str, stats: &Stats) -> Result<()>;

    /// 주기적으로 호출됩니다.
    async fn progress(&self, processed: usize, results: usize) -> Result<()>;
}

/// 분석에서 제외된 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    NoPriceData,
    EmptyPriceData,
    /// 첫 샘플이 시작일 + 12개월보다 늦음
    InsufficientHistory,
    /// 이상치 처리 후 YoY 값이 없음
    NoYoyData,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NoPriceData => "no_price_data",
            Rejection::EmptyPriceData => "empty_price_data",
            Rejection::InsufficientHistory => "insufficient_history",
            Rejection::NoYoyData => "no_yoy_data",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 분석 전 거름. 통과하면 `None`.
pub fn screen(prices: Option<&Vec<PriceSample>>, from: NaiveDate) -> Option<Rejection> {
    let Some(prices) = prices else {
        return Some(Rejection::NoPriceData);
    };
    let Some(first) = prices.iter().map(|p| p.date).min() else {
        return Some(Rejection::EmptyPriceData);
    };
    let limit = from.checked_add_months(Months::new(12)).unwrap_or(from);
    (first > limit).then_some(Rejection::InsufficientHistory)
}

/// 일괄 분석 요청.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// 로그 식별용 (패키지 ID 등)
    pub label: String,
    pub tickers: Vec<String>,
    pub interval: Interval,
    pub time_from: NaiveDate,
    pub time_to: NaiveDate,
    pub histogram: HistogramConfig,
    pub outliers: OutlierMode,
    pub workers: usize,
}

impl BatchRequest {
    pub fn new(tickers: Vec<String>, interval: Interval, time_from: NaiveDate, time_to: NaiveDate) -> Self {
        Self {
            label: "batch".to_string(),
            tickers,
            interval,
            time_from,
            time_to,
            histogram: HistogramConfig::default(),
            outliers: OutlierMode::default(),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// 종목별 통계.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolStats {
    pub ticker: String,
    pub stats: Stats,
}

/// 일괄 분석 결과.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// 티커 순
    pub results: Vec<SymbolStats>,
    pub rejections: BTreeMap<Rejection, usize>,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn total_rejected(&self) -> usize {
        self.rejections.values().sum()
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    results: AtomicUsize,
}

/// 요청한 모든 종목을 분석합니다. 결과 수와 제외 수의 합은 요청 종목 수와 같습니다.
///
/// `sink`가 있으면 결과를 나오는 즉시 저장하고 진행 상황을 주기적으로 보고합니다.
pub async fn analyze_batch(
    request: &BatchRequest,
    source: &dyn PriceSource,
    sink: Option<Arc<dyn AnalysisSink>>,
) -> Result<BatchOutcome> {
    let start = Instant::now();
    let total = request.tickers.len();
    let mut prices = source
        .prices_batch(&request.tickers, request.interval, request.time_from, request.time_to)
        .await?;
    info!(label = %request.label, tickers = total, found = prices.len(), "가격 일괄 조회 완료");

    let counters = Arc::new(Counters::default());
    let mut rejections: BTreeMap<Rejection, usize> = BTreeMap::new();
    let mut accepted: Vec<(String, Vec<PriceSample>)> = Vec::with_capacity(total);

    for ticker in &request.tickers {
        match screen(prices.get(ticker), request.time_from) {
            Some(reason) => {
                *rejections.entry(reason).or_default() += 1;
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                let series = prices.remove(ticker).unwrap_or_default();
                accepted.push((ticker.clone(), series));
            }
        }
    }

    let reporter = sink.clone().map(|sink| {
        let counters = counters.clone();
        let label = request.label.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let processed = counters.processed.load(Ordering::Relaxed);
                let results = counters.results.load(Ordering::Relaxed);
                if processed == 0 {
                    continue;
                }
                info!(
                    label = %label,
                    processed,
                    total,
                    results,
                    percent = processed as f64 / total.max(1) as f64 * 100.0,
                    "분석 진행"
                );
                if let Err(e) = sink.progress(processed, results).await {
                    warn!(label = %label, error = %e, "진행 상황 저장 실패");
                }
            }
        })
    });

    let config = request.histogram;
    let mode = request.outliers;
    let analyzed: Vec<(String, Stats)> = stream::iter(accepted)
        .map(|(ticker, series)| {
            let sink = sink.clone();
            let counters = counters.clone();
            async move {
                let stats = analyze_yoy_with(&series, config, mode);
                if !stats.is_empty() {
                    if let Some(sink) = &sink {
                        if let Err(e) = sink.save_result(&ticker, &stats).await {
                            warn!(ticker = %ticker, error = %e, "분석 결과 저장 실패");
                        }
                    }
                    counters.results.fetch_add(1, Ordering::Relaxed);
                }
                counters.processed.fetch_add(1, Ordering::Relaxed);
                (ticker, stats)
            }
        })
        .buffer_unordered(request.workers.max(1))
        .collect()
        .await;

    if let Some(handle) = reporter {
        handle.abort();
    }

    let mut results = Vec::with_capacity(analyzed.len());
    for (ticker, stats) in analyzed {
        if stats.is_empty() {
            *rejections.entry(Rejection::NoYoyData).or_default() += 1;
        } else {
            results.push(SymbolStats { ticker, stats });
        }
    }
    results.sort_by(|a, b| a.ticker.cmp(&b.ticker));

    let outcome = BatchOutcome {
        results,
        rejections,
        elapsed: start.elapsed(),
    };
    log_outcome(&request.label, total, &outcome);
    Ok(outcome)
}

fn log_outcome(label: &str, total: usize, outcome: &BatchOutcome) {
    let secs = outcome.elapsed.as_secs_f64();
    info!(
        label,
        results = outcome.results.len(),
        total,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        throughput = if secs > 0.0 { outcome.results.len() as f64 / secs } else { 0.0 },
        "일괄 분석 완료"
    );

    let rejected = outcome.total_rejected();
    if rejected > 0 {
        info!(label, rejected, "분석 제외 요약");
        for (reason, count) in &outcome.rejections {
            info!(
                label,
                reason = %reason,
                count,
                percent = *count as f64 / total.max(1) as f64 * 100.0,
                "제외 사유"
            );
        }
    }
}
