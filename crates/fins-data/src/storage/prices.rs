//! 주봉/월봉 가격 저장소.

use chrono::NaiveDate;
use sqlx::{FromRow, PgConnection};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

use fins_core::{Interval, OriginalPrices, PriceSample, Symbol};

use super::symbols::upsert_symbols;
use super::{Database, WRITE_CHUNK_SIZE};
use crate::error::Result;

#[derive(Debug, FromRow)]
struct PriceRow {
    symbol_ticker: String,
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    avg: f64,
    close: f64,
    yoy: Option<f64>,
    open_orig: Option<f64>,
    high_orig: Option<f64>,
    low_orig: Option<f64>,
    avg_orig: Option<f64>,
    close_orig: Option<f64>,
}

impl From<PriceRow> for PriceSample {
    fn from(row: PriceRow) -> Self {
        let original = match (
            row.open_orig,
            row.high_orig,
            row.low_orig,
            row.avg_orig,
            row.close_orig,
        ) {
            (Some(open), Some(high), Some(low), Some(avg), Some(close)) => Some(OriginalPrices {
                open,
                high,
                low,
                avg,
                close,
            }),
            _ => None,
        };

        PriceSample {
            ticker: row.symbol_ticker,
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            avg: row.avg,
            close: row.close,
            yoy: row.yoy,
            original,
        }
    }
}

const PRICE_COLUMNS: &str =
    "symbol_ticker, date, open, high, low, avg, close, yoy, open_orig, high_orig, low_orig, avg_orig, close_orig";

/// 가격 데이터 repository.
pub struct PriceRepository {
    db: Database,
}

impl PriceRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 가격 샘플 일괄 upsert. 같은 (티커, 날짜)는 나중 값이 이깁니다.
    #[instrument(skip(self, samples), fields(interval = %interval, count = samples.len()))]
    pub async fn put_prices(&self, interval: Interval, samples: &[PriceSample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.pool().acquire().await?;
        let mut written = 0;
        for chunk in samples.chunks(WRITE_CHUNK_SIZE) {
            written += upsert_prices(&mut conn, interval, chunk).await?;
        }

        debug!(written, "가격 upsert 완료");
        Ok(written)
    }

    /// 가격 갱신 한 라운드를 하나의 트랜잭션으로 씁니다.
    ///
    /// 월봉, 주봉, 심볼 순서로 쓰며 하나라도 실패하면 전체가 롤백됩니다.
    /// 따라서 가격이 저장되지 않은 심볼이 `ok`로 남지 않습니다.
    #[instrument(skip_all, fields(monthly = monthly.len(), weekly = weekly.len(), symbols = symbols.len()))]
    pub async fn write_round(
        &self,
        monthly: &[PriceSample],
        weekly: &[PriceSample],
        symbols: &[Symbol],
    ) -> Result<usize> {
        let mut tx = self.db.pool().begin().await?;
        let mut written = 0;
        for (interval, samples) in [(Interval::Monthly, monthly), (Interval::Weekly, weekly)] {
            for chunk in samples.chunks(WRITE_CHUNK_SIZE) {
                written += upsert_prices(&mut tx, interval, chunk).await?;
            }
        }
        for chunk in symbols.chunks(WRITE_CHUNK_SIZE) {
            written += upsert_symbols(&mut tx, chunk).await?;
        }
        tx.commit().await?;

        debug!(written, "가격 라운드 커밋");
        Ok(written)
    }

    /// 티커의 가장 최근 샘플 날짜.
    pub async fn latest_date(&self, ticker: &str, interval: Interval) -> Result<Option<NaiveDate>> {
        let query = format!(
            "SELECT MAX(date) FROM {} WHERE symbol_ticker = $1",
            interval.table()
        );
        let date = sqlx::query_scalar(&query)
            .bind(ticker)
            .fetch_one(self.db.pool())
            .await?;
        Ok(date)
    }

    /// 여러 티커의 가장 최근 샘플 날짜. 샘플이 없는 티커는 빠집니다.
    pub async fn latest_dates(
        &self,
        tickers: &[String],
        interval: Interval,
    ) -> Result<HashMap<String, NaiveDate>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }
        let query = format!(
            "SELECT symbol_ticker, MAX(date) FROM {} WHERE symbol_ticker = ANY($1) GROUP BY symbol_ticker",
            interval.table()
        );
        let rows: Vec<(String, NaiveDate)> = sqlx::query_as(&query)
            .bind(tickers)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.into_iter().collect())
    }

    /// (티커, 날짜)의 샘플.
    pub async fn sample_at(
        &self,
        ticker: &str,
        interval: Interval,
        date: NaiveDate,
    ) -> Result<Option<PriceSample>> {
        let query = format!(
            "SELECT {} FROM {} WHERE symbol_ticker = $1 AND date = $2",
            PRICE_COLUMNS,
            interval.table()
        );
        let row: Option<PriceRow> = sqlx::query_as(&query)
            .bind(ticker)
            .bind(date)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(PriceSample::from))
    }

    /// 한 티커의 기간 내 샘플 (날짜 오름차순).
    pub async fn prices(
        &self,
        ticker: &str,
        interval: Interval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceSample>> {
        let query = format!(
            r#"
            SELECT {} FROM {}
            WHERE symbol_ticker = $1 AND date BETWEEN $2 AND $3
            ORDER BY date
            "#,
            PRICE_COLUMNS,
            interval.table()
        );
        let rows: Vec<PriceRow> = sqlx::query_as(&query)
            .bind(ticker)
            .bind(from)
            .bind(to)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.into_iter().map(PriceSample::from).collect())
    }

    /// 여러 티커의 기간 내 샘플을 한 번의 쿼리로 조회합니다.
    pub async fn prices_batch(
        &self,
        tickers: &[String],
        interval: Interval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<String, Vec<PriceSample>>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }
        let query = format!(
            r#"
            SELECT {} FROM {}
            WHERE symbol_ticker = ANY($1) AND date BETWEEN $2 AND $3
            ORDER BY symbol_ticker, date
            "#,
            PRICE_COLUMNS,
            interval.table()
        );
        let rows: Vec<PriceRow> = sqlx::query_as(&query)
            .bind(tickers)
            .bind(from)
            .bind(to)
            .fetch_all(self.db.pool())
            .await?;

        let mut series: HashMap<String, Vec<PriceSample>> = HashMap::with_capacity(tickers.len());
        for row in rows {
            let sample = PriceSample::from(row);
            series.entry(sample.ticker.clone()).or_default().push(sample);
        }
        debug!(tickers = tickers.len(), found = series.len(), "가격 일괄 조회");
        Ok(series)
    }
}

async fn upsert_prices(
    conn: &mut PgConnection,
    interval: Interval,
    chunk: &[PriceSample],
) -> Result<usize> {
    let query = format!(
        r#"
        INSERT INTO {table} ({columns})
        SELECT * FROM UNNEST(
            $1::text[], $2::date[],
            $3::float8[], $4::float8[], $5::float8[], $6::float8[], $7::float8[], $8::float8[],
            $9::float8[], $10::float8[], $11::float8[], $12::float8[], $13::float8[]
        )
        ON CONFLICT (symbol_ticker, date) DO UPDATE SET
            open = EXCLUDED.open,
            high = EXCLUDED.high,
            low = EXCLUDED.low,
            avg = EXCLUDED.avg,
            close = EXCLUDED.close,
            yoy = EXCLUDED.yoy,
            open_orig = EXCLUDED.open_orig,
            high_orig = EXCLUDED.high_orig,
            low_orig = EXCLUDED.low_orig,
            avg_orig = EXCLUDED.avg_orig,
            close_orig = EXCLUDED.close_orig
        "#,
        table = interval.table(),
        columns = PRICE_COLUMNS,
    );

    let chunk = last_per_key(chunk);
    let orig = |f: fn(&OriginalPrices) -> f64| -> Vec<Option<f64>> {
        chunk.iter().map(|s| s.original.as_ref().map(f)).collect()
    };

    let result = sqlx::query(&query)
        .bind(chunk.iter().map(|s| s.ticker.as_str()).collect::<Vec<_>>())
        .bind(chunk.iter().map(|s| s.date).collect::<Vec<_>>())
        .bind(chunk.iter().map(|s| s.open).collect::<Vec<_>>())
        .bind(chunk.iter().map(|s| s.high).collect::<Vec<_>>())
        .bind(chunk.iter().map(|s| s.low).collect::<Vec<_>>())
        .bind(chunk.iter().map(|s| s.avg).collect::<Vec<_>>())
        .bind(chunk.iter().map(|s| s.close).collect::<Vec<_>>())
        .bind(chunk.iter().map(|s| s.yoy).collect::<Vec<_>>())
        .bind(orig(|o| o.open))
        .bind(orig(|o| o.high))
        .bind(orig(|o| o.low))
        .bind(orig(|o| o.avg))
        .bind(orig(|o| o.close))
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() as usize)
}

/// (티커, 날짜)별 마지막 샘플만 남깁니다.
fn last_per_key(chunk: &[PriceSample]) -> Vec<&PriceSample> {
    let mut seen: HashSet<(&str, NaiveDate)> = HashSet::with_capacity(chunk.len());
    let mut out: Vec<&PriceSample> = chunk
        .iter()
        .rev()
        .filter(|s| seen.insert((s.ticker.as_str(), s.date)))
        .collect();
    out.reverse();
    out
}
