//! 심볼 저장소.
//!
//! upsert는 `COALESCE(EXCLUDED.x, symbols.x)`로 `None` 필드의 기존 값을 보존합니다.
//! 따라서 스테이지는 자신이 아는 필드만 채운 부분 레코드를 그대로 쓸 수 있습니다.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgConnection};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

use fins_core::{FetchStatus, Symbol, SymbolType};

use super::{Database, WRITE_CHUNK_SIZE};
use crate::error::{DataError, Result};

#[derive(Debug, FromRow)]
struct SymbolRow {
    ticker: String,
    exchange: Option<String>,
    name: Option<String>,
    #[sqlx(rename = "type")]
    symbol_type: Option<String>,
    currency: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
    country: Option<String>,
    description: Option<String>,
    website: Option<String>,
    isin: Option<String>,
    cik: Option<String>,
    inception: Option<NaiveDate>,
    oldest_price: Option<NaiveDate>,
    is_actively_trading: Option<bool>,
    market_cap: Option<i64>,
    primary_listing: Option<String>,
    ath12m: Option<f64>,
    current_price_usd: Option<f64>,
    current_price_time: Option<NaiveDate>,
    last_profile_update: Option<DateTime<Utc>>,
    last_profile_status: Option<String>,
    last_price_update: Option<DateTime<Utc>>,
    last_price_status: Option<String>,
}

impl TryFrom<SymbolRow> for Symbol {
    type Error = DataError;

    fn try_from(row: SymbolRow) -> Result<Self> {
        let symbol_type = row
            .symbol_type
            .as_deref()
            .map(str::parse::<SymbolType>)
            .transpose()?;
        let last_profile_status = row
            .last_profile_status
            .as_deref()
            .map(str::parse::<FetchStatus>)
            .transpose()?;
        let last_price_status = row
            .last_price_status
            .as_deref()
            .map(str::parse::<FetchStatus>)
            .transpose()?;

        Ok(Symbol {
            ticker: row.ticker,
            exchange: row.exchange,
            name: row.name,
            symbol_type,
            currency: row.currency,
            sector: row.sector,
            industry: row.industry,
            country: row.country,
            description: row.description,
            website: row.website,
            isin: row.isin,
            cik: row.cik,
            inception: row.inception,
            oldest_price: row.oldest_price,
            is_actively_trading: row.is_actively_trading,
            market_cap: row.market_cap,
            primary_listing: row.primary_listing,
            ath12m: row.ath12m,
            current_price_usd: row.current_price_usd,
            current_price_time: row.current_price_time,
            last_profile_update: row.last_profile_update,
            last_profile_status,
            last_price_update: row.last_price_update,
            last_price_status,
        })
    }
}

/// 중복 제거 대상 심볼.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DedupeCandidate {
    pub ticker: String,
    pub exchange: Option<String>,
    pub name: Option<String>,
    pub cik: Option<String>,
    pub oldest_price: Option<NaiveDate>,
    pub primary_listing: Option<String>,
}

/// 가격 갱신 대상 (티커, 통화).
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StalePriceSymbol {
    pub ticker: String,
    pub currency: Option<String>,
}

/// 저장소 현황 요약.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStatus {
    pub symbols: i64,
    pub actively_trading: i64,
    pub stale_profiles: i64,
    pub stale_prices: i64,
    pub oldest_profile_update: Option<DateTime<Utc>>,
    pub oldest_price_update: Option<DateTime<Utc>>,
}

/// 심볼 데이터 repository.
pub struct SymbolRepository {
    db: Database,
}

impl SymbolRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 심볼 일괄 upsert. 청크마다 하나의 트랜잭션을 사용합니다.
    ///
    /// 같은 청크에 같은 티커가 여러 번 있으면 마지막 레코드만 씁니다.
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    pub async fn put_symbols(&self, symbols: &[Symbol]) -> Result<usize> {
        if symbols.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for chunk in symbols.chunks(WRITE_CHUNK_SIZE) {
            let mut tx = self.db.pool().begin().await?;
            written += upsert_symbols(&mut tx, chunk).await?;
            tx.commit().await?;
        }

        debug!(written, "심볼 upsert 완료");
        Ok(written)
    }

    pub async fn get(&self, ticker: &str) -> Result<Option<Symbol>> {
        let row: Option<SymbolRow> = sqlx::query_as("SELECT * FROM symbols WHERE ticker = $1")
            .bind(ticker)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(Symbol::try_from).transpose()
    }

    pub async fn all_tickers(&self) -> Result<Vec<String>> {
        let tickers = sqlx::query_scalar("SELECT ticker FROM symbols ORDER BY ticker")
            .fetch_all(self.db.pool())
            .await?;
        Ok(tickers)
    }

    /// `keep`에 없는 심볼을 비활성화합니다. `keep`이 비어 있으면 아무것도 하지 않습니다.
    pub async fn deactivate_not_in(&self, keep: &[String]) -> Result<u64> {
        if keep.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE symbols SET is_actively_trading = false
            WHERE NOT (ticker = ANY($1))
              AND is_actively_trading IS DISTINCT FROM false
            "#,
        )
        .bind(keep)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// 프로필 갱신이 필요한 티커 (지수 제외).
    pub async fn tickers_needing_profile_update(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let tickers: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT ticker FROM symbols
            WHERE (last_profile_update IS NULL OR last_profile_update < $1)
              AND type IS DISTINCT FROM 'index'
            "#,
        )
        .bind(older_than)
        .fetch_all(self.db.pool())
        .await?;
        Ok(tickers.into_iter().collect())
    }

    pub async fn count_stale_profiles(&self, older_than: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM symbols
            WHERE (last_profile_update IS NULL OR last_profile_update < $1)
              AND type IS DISTINCT FROM 'index'
            "#,
        )
        .bind(older_than)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    /// 배치 시작 이후 갱신되지 않고 여전히 갱신 대상인 프로필을 `not_found`로 표시합니다.
    pub async fn mark_stale_profiles_not_found(
        &self,
        since: DateTime<Utc>,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE symbols SET
                last_profile_status = 'not_found',
                last_profile_update = NOW()
            WHERE (last_profile_update IS NULL OR (last_profile_update < $1 AND last_profile_update < $2))
              AND type IS DISTINCT FROM 'index'
            "#,
        )
        .bind(since)
        .bind(older_than)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// 가격 갱신 대상 심볼 (오래된 순).
    pub async fn stale_price_symbols(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<StalePriceSymbol>> {
        let rows = sqlx::query_as(
            r#"
            SELECT ticker, currency FROM symbols
            WHERE (last_price_update IS NULL OR last_price_update < $1)
              AND type = ANY($2)
            ORDER BY last_price_update ASC NULLS FIRST, ticker
            LIMIT $3
            "#,
        )
        .bind(older_than)
        .bind(SymbolType::price_update_names())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn count_stale_prices(&self, older_than: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM symbols
            WHERE (last_price_update IS NULL OR last_price_update < $1)
              AND type = ANY($2)
            "#,
        )
        .bind(older_than)
        .bind(SymbolType::price_update_names())
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    /// 현재가가 `date`보다 오래된 티커.
    pub async fn tickers_needing_quote_update(&self, date: NaiveDate) -> Result<HashSet<String>> {
        let tickers: Vec<String> = sqlx::query_scalar(
            "SELECT ticker FROM symbols WHERE current_price_time IS NULL OR current_price_time < $1",
        )
        .bind(date)
        .fetch_all(self.db.pool())
        .await?;
        Ok(tickers.into_iter().collect())
    }

    /// 전체 심볼의 티커 → 통화. 통화가 없으면 빈 문자열.
    pub async fn all_currencies(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT ticker, currency FROM symbols")
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(ticker, currency)| (ticker, currency.unwrap_or_default()))
            .collect())
    }

    /// 현재가 일괄 갱신. 청크마다 하나의 트랜잭션을 사용합니다.
    pub async fn update_quotes(&self, quotes: &[(String, f64)], date: NaiveDate) -> Result<u64> {
        let mut updated = 0;
        for chunk in quotes.chunks(WRITE_CHUNK_SIZE) {
            let tickers: Vec<&str> = chunk.iter().map(|(t, _)| t.as_str()).collect();
            let prices: Vec<f64> = chunk.iter().map(|(_, p)| *p).collect();

            let mut tx = self.db.pool().begin().await?;
            let result = sqlx::query(
                r#"
                UPDATE symbols AS s SET
                    current_price_usd = q.price,
                    current_price_time = $3
                FROM UNNEST($1::text[], $2::float8[]) AS q(ticker, price)
                WHERE s.ticker = q.ticker
                "#,
            )
            .bind(&tickers)
            .bind(&prices)
            .bind(date)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            updated += result.rows_affected();
        }
        Ok(updated)
    }

    // ==================== 중복 제거 ====================

    /// 중복 정리 대상 주식 심볼 (CIK 또는 이름이 있는 것).
    ///
    /// CIK 패스와 이름 패스로 나누는 것은 호출자 몫입니다.
    pub async fn dedupe_candidates(&self) -> Result<Vec<DedupeCandidate>> {
        let rows = sqlx::query_as(
            r#"
            SELECT ticker, exchange, name, cik, oldest_price, primary_listing
            FROM symbols
            WHERE type = 'stock'
              AND ((cik IS NOT NULL AND TRIM(cik) <> '') OR (name IS NOT NULL AND name <> ''))
            ORDER BY ticker
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// 그룹의 대표/보조 상장을 한 트랜잭션으로 기록합니다.
    pub async fn update_primary_listing_group(
        &self,
        primary: &str,
        secondaries: &[String],
    ) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("UPDATE symbols SET primary_listing = '' WHERE ticker = $1")
            .bind(primary)
            .execute(&mut *tx)
            .await?;

        if !secondaries.is_empty() {
            sqlx::query("UPDATE symbols SET primary_listing = $1 WHERE ticker = ANY($2)")
                .bind(primary)
                .bind(secondaries)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn reset_primary_listings(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE symbols SET primary_listing = NULL WHERE primary_listing IS NOT NULL",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    // ==================== 관리 ====================

    pub async fn reset_quote_timestamps(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE symbols SET current_price_time = NULL WHERE current_price_time IS NOT NULL",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn reset_price_timestamps(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE symbols SET last_price_update = NULL, last_price_status = NULL WHERE last_price_update IS NOT NULL",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn reset_profile_timestamps(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE symbols SET last_profile_update = NULL, last_profile_status = NULL WHERE last_profile_update IS NOT NULL",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// 지수의 가격 갱신 시각을 지우고 거래 중으로 표시합니다.
    pub async fn reset_index_timestamps(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE symbols SET
                last_price_update = NULL,
                last_price_status = NULL,
                is_actively_trading = true
            WHERE type = 'index'
            "#,
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// 한 심볼의 프로필/가격 갱신 시각을 지웁니다.
    pub async fn reset_symbol(&self, ticker: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE symbols SET
                last_profile_update = NULL,
                last_profile_status = NULL,
                last_price_update = NULL,
                last_price_status = NULL
            WHERE ticker = $1
            "#,
        )
        .bind(ticker)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("symbol {} not found", ticker)));
        }
        Ok(())
    }

    // ==================== 분석 대상 ====================

    /// 가격 조회가 성공한 가격 갱신 대상 유형 티커. 시가총액/상장일 필터는 선택.
    pub async fn filtered_tickers(
        &self,
        mcap_min: Option<i64>,
        inception_max: Option<NaiveDate>,
    ) -> Result<Vec<String>> {
        let tickers = sqlx::query_scalar(
            r#"
            SELECT ticker FROM symbols
            WHERE type = ANY($1)
              AND last_price_status = 'ok'
              AND ($2::bigint IS NULL OR market_cap >= $2)
              AND ($3::date IS NULL OR inception <= $3)
            ORDER BY ticker
            "#,
        )
        .bind(SymbolType::price_update_names())
        .bind(mcap_min)
        .bind(inception_max)
        .fetch_all(self.db.pool())
        .await?;
        Ok(tickers)
    }

    /// 현황 요약.
    pub async fn status(&self, stale_before: DateTime<Utc>) -> Result<StoreStatus> {
        let (symbols, actively_trading): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_actively_trading) FROM symbols",
        )
        .fetch_one(self.db.pool())
        .await?;

        let (oldest_profile_update, oldest_price_update): (
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as(
            r#"
            SELECT MIN(last_profile_update), MIN(last_price_update)
            FROM symbols WHERE is_actively_trading
            "#,
        )
        .fetch_one(self.db.pool())
        .await?;

        Ok(StoreStatus {
            symbols,
            actively_trading,
            stale_profiles: self.count_stale_profiles(stale_before).await?,
            stale_prices: self.count_stale_prices(stale_before).await?,
            oldest_profile_update,
            oldest_price_update,
        })
    }
}

/// 심볼 청크 하나를 upsert합니다. 트랜잭션은 호출자가 관리합니다.
pub(crate) async fn upsert_symbols(conn: &mut PgConnection, chunk: &[Symbol]) -> Result<usize> {
    let chunk = last_per_ticker(chunk);

    let tickers: Vec<&str> = chunk.iter().map(|s| s.ticker.as_str()).collect();
    let exchanges: Vec<Option<String>> = chunk.iter().map(|s| s.exchange.clone()).collect();
    let names: Vec<Option<String>> = chunk.iter().map(|s| s.name.clone()).collect();
    let types: Vec<Option<String>> = chunk
        .iter()
        .map(|s| s.symbol_type.map(|t| t.as_str().to_string()))
        .collect();
    let currencies: Vec<Option<String>> = chunk.iter().map(|s| s.currency.clone()).collect();
    let sectors: Vec<Option<String>> = chunk.iter().map(|s| s.sector.clone()).collect();
    let industries: Vec<Option<String>> = chunk.iter().map(|s| s.industry.clone()).collect();
    let countries: Vec<Option<String>> = chunk.iter().map(|s| s.country.clone()).collect();
    let descriptions: Vec<Option<String>> =
        chunk.iter().map(|s| s.description.clone()).collect();
    let websites: Vec<Option<String>> = chunk.iter().map(|s| s.website.clone()).collect();
    let isins: Vec<Option<String>> = chunk.iter().map(|s| s.isin.clone()).collect();
    let ciks: Vec<Option<String>> = chunk.iter().map(|s| s.cik.clone()).collect();
    let inceptions: Vec<Option<NaiveDate>> = chunk.iter().map(|s| s.inception).collect();
    let oldest: Vec<Option<NaiveDate>> = chunk.iter().map(|s| s.oldest_price).collect();
    let trading: Vec<Option<bool>> = chunk.iter().map(|s| s.is_actively_trading).collect();
    let market_caps: Vec<Option<i64>> = chunk.iter().map(|s| s.market_cap).collect();
    let primaries: Vec<Option<String>> =
        chunk.iter().map(|s| s.primary_listing.clone()).collect();
    let aths: Vec<Option<f64>> = chunk.iter().map(|s| s.ath12m).collect();
    let prices: Vec<Option<f64>> = chunk.iter().map(|s| s.current_price_usd).collect();
    let price_times: Vec<Option<NaiveDate>> =
        chunk.iter().map(|s| s.current_price_time).collect();
    let profile_updates: Vec<Option<DateTime<Utc>>> =
        chunk.iter().map(|s| s.last_profile_update).collect();
    let profile_statuses: Vec<Option<String>> = chunk
        .iter()
        .map(|s| s.last_profile_status.map(|st| st.as_str().to_string()))
        .collect();
    let price_updates: Vec<Option<DateTime<Utc>>> =
        chunk.iter().map(|s| s.last_price_update).collect();
    let price_statuses: Vec<Option<String>> = chunk
        .iter()
        .map(|s| s.last_price_status.map(|st| st.as_str().to_string()))
        .collect();

    let result = sqlx::query(
        r#"
        INSERT INTO symbols (
            ticker, exchange, name, type, currency, sector, industry, country,
            description, website, isin, cik, inception, oldest_price,
            is_actively_trading, market_cap, primary_listing, ath12m,
            current_price_usd, current_price_time,
            last_profile_update, last_profile_status, last_price_update, last_price_status
        )
        SELECT * FROM UNNEST(
            $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[],
            $7::text[], $8::text[], $9::text[], $10::text[], $11::text[], $12::text[],
            $13::date[], $14::date[], $15::bool[], $16::bigint[], $17::text[],
            $18::float8[], $19::float8[], $20::date[],
            $21::timestamptz[], $22::text[], $23::timestamptz[], $24::text[]
        )
        ON CONFLICT (ticker) DO UPDATE SET
            exchange = COALESCE(EXCLUDED.exchange, symbols.exchange),
            name = COALESCE(EXCLUDED.name, symbols.name),
            type = COALESCE(EXCLUDED.type, symbols.type),
            currency = COALESCE(EXCLUDED.currency, symbols.currency),
            sector = COALESCE(EXCLUDED.sector, symbols.sector),
            industry = COALESCE(EXCLUDED.industry, symbols.industry),
            country = COALESCE(EXCLUDED.country, symbols.country),
            description = COALESCE(EXCLUDED.description, symbols.description),
            website = COALESCE(EXCLUDED.website, symbols.website),
            isin = COALESCE(EXCLUDED.isin, symbols.isin),
            cik = COALESCE(EXCLUDED.cik, symbols.cik),
            inception = COALESCE(EXCLUDED.inception, symbols.inception),
            oldest_price = COALESCE(EXCLUDED.oldest_price, symbols.oldest_price),
            is_actively_trading = COALESCE(EXCLUDED.is_actively_trading, symbols.is_actively_trading),
            market_cap = COALESCE(EXCLUDED.market_cap, symbols.market_cap),
            primary_listing = COALESCE(EXCLUDED.primary_listing, symbols.primary_listing),
            ath12m = COALESCE(EXCLUDED.ath12m, symbols.ath12m),
            current_price_usd = COALESCE(EXCLUDED.current_price_usd, symbols.current_price_usd),
            current_price_time = COALESCE(EXCLUDED.current_price_time, symbols.current_price_time),
            last_profile_update = COALESCE(EXCLUDED.last_profile_update, symbols.last_profile_update),
            last_profile_status = COALESCE(EXCLUDED.last_profile_status, symbols.last_profile_status),
            last_price_update = COALESCE(EXCLUDED.last_price_update, symbols.last_price_update),
            last_price_status = COALESCE(EXCLUDED.last_price_status, symbols.last_price_status)
        "#,
    )
    .bind(&tickers)
    .bind(&exchanges)
    .bind(&names)
    .bind(&types)
    .bind(&currencies)
    .bind(&sectors)
    .bind(&industries)
    .bind(&countries)
    .bind(&descriptions)
    .bind(&websites)
    .bind(&isins)
    .bind(&ciks)
    .bind(&inceptions)
    .bind(&oldest)
    .bind(&trading)
    .bind(&market_caps)
    .bind(&primaries)
    .bind(&aths)
    .bind(&prices)
    .bind(&price_times)
    .bind(&profile_updates)
    .bind(&profile_statuses)
    .bind(&price_updates)
    .bind(&price_statuses)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() as usize)
}

/// 티커별 마지막 레코드만 남깁니다 (첫 등장 순서 유지).
fn last_per_ticker(chunk: &[Symbol]) -> Vec<&Symbol> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(chunk.len());
    let mut out: Vec<&Symbol> = Vec::with_capacity(chunk.len());
    for symbol in chunk {
        match index.get(symbol.ticker.as_str()) {
            Some(&i) => out[i] = symbol,
            None => {
                index.insert(symbol.ticker.as_str(), out.len());
                out.push(symbol);
            }
        }
    }
    out
}
