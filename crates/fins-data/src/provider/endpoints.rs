//! FMP 엔드포인트별 요청과 응답 타입.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, info, warn};

use fins_core::DailyBar;

use super::error::{FetchError, FetchResult};
use super::fmp::FmpClient;

/// 상장 폐지 목록 페이지 크기.
pub const DELISTED_PAGE_LIMIT: usize = 100;

/// 상장 폐지 목록 최대 페이지 수.
pub const DELISTED_MAX_PAGES: u32 = 100;

/// 벌크 프로필 최대 파트 수.
pub const BULK_PROFILE_MAX_PARTS: u32 = 100;

/// 벌크 프로필 파트 사이 대기.
const BULK_PART_DELAY: Duration = Duration::from_millis(100);

/// 전체 이력 조회 시작일.
const HISTORY_FROM: &str = "1900-01-01";

/// 목록 엔드포인트 항목 (주식, 지수, 상장 폐지).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListedSymbol {
    pub symbol: String,
    #[serde(default, alias = "companyName")]
    pub name: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
}

/// 회사 프로필.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyProfile {
    pub symbol: String,
    pub company_name: Option<String>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub industry: Option<String>,
    pub sector: Option<String>,
    pub country: Option<String>,
    pub cik: Option<String>,
    pub isin: Option<String>,
    pub market_cap: Option<f64>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub ipo_date: Option<String>,
    #[serde(deserialize_with = "null_as_false")]
    pub is_actively_trading: bool,
    #[serde(deserialize_with = "null_as_false")]
    pub is_etf: bool,
    #[serde(deserialize_with = "null_as_false")]
    pub is_fund: bool,
    #[serde(deserialize_with = "null_as_false")]
    pub is_adr: bool,
}

fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

impl CompanyProfile {
    /// 상장일. 형식이 맞지 않으면 `None`.
    pub fn ipo_date(&self) -> Option<NaiveDate> {
        self.ipo_date
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
    }
}

/// 벌크 EOD 시세 한 건 (원통화).
#[derive(Debug, Clone, PartialEq)]
pub struct EodQuote {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub avg: f64,
    pub close: f64,
}

/// 일봉 원본. 수정 주가 필드가 있으면 우선합니다.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDailyPrice {
    date: String,
    adj_open: Option<f64>,
    adj_high: Option<f64>,
    adj_low: Option<f64>,
    adj_close: Option<f64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
}

impl RawDailyPrice {
    fn into_bar(self) -> Option<DailyBar> {
        Some(DailyBar {
            date: parse_date(&self.date)?,
            open: self.adj_open.or(self.open)?,
            high: self.adj_high.or(self.high)?,
            low: self.adj_low.or(self.low)?,
            close: self.adj_close.or(self.close)?,
        })
    }
}

/// 환율 시계열 한 점.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForexPoint {
    pub date: NaiveDate,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
struct RawForexPoint {
    date: String,
    price: f64,
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok()
}

impl FmpClient {
    pub async fn stock_list(&self) -> FetchResult<Vec<ListedSymbol>> {
        self.fetch_json("stable/stock-list", &[]).await
    }

    pub async fn index_list(&self) -> FetchResult<Vec<ListedSymbol>> {
        self.fetch_json("stable/index-list", &[]).await
    }

    /// 상장 폐지 목록.
    ///
    /// 페이지 크기 미만(빈 페이지 포함)이나 400 응답에서 끝납니다.
    /// 최대 페이지 수에 도달하면 그때까지 받은 목록을 반환합니다.
    pub async fn delisted_companies(&self) -> FetchResult<Vec<ListedSymbol>> {
        let limit = DELISTED_PAGE_LIMIT.to_string();
        let mut all = Vec::new();

        for page in 0..DELISTED_MAX_PAGES {
            let page_str = page.to_string();
            let items: Vec<ListedSymbol> = match self
                .fetch_json(
                    "stable/delisted-companies",
                    &[("page", page_str.as_str()), ("limit", limit.as_str())],
                )
                .await
            {
                Ok(items) => items,
                Err(FetchError::BadRequest(_)) => {
                    debug!(page, total = all.len(), "상장 폐지 목록 마지막 페이지 도달");
                    return Ok(all);
                }
                Err(e) => return Err(e),
            };

            let count = items.len();
            all.extend(items);
            debug!(page, count, total = all.len(), "상장 폐지 목록 페이지");

            if count < DELISTED_PAGE_LIMIT {
                return Ok(all);
            }
        }

        warn!(max_pages = DELISTED_MAX_PAGES, total = all.len(), "상장 폐지 목록 최대 페이지 도달");
        Ok(all)
    }

    pub async fn profile(&self, ticker: &str) -> FetchResult<CompanyProfile> {
        let mut profiles: Vec<CompanyProfile> = self
            .fetch_non_empty("stable/profile", &[("symbol", ticker)], ticker)
            .await?;
        Ok(profiles.swap_remove(0))
    }

    pub async fn profile_by_cik(&self, cik: &str) -> FetchResult<CompanyProfile> {
        let mut profiles: Vec<CompanyProfile> = self
            .fetch_non_empty("stable/profile-cik", &[("cik", cik)], cik)
            .await?;
        Ok(profiles.swap_remove(0))
    }

    /// 전체 벌크 프로필 (CSV 파트 순회).
    ///
    /// 400 응답이나 빈 파트에서 끝납니다. 최대 파트 수를 넘으면 에러입니다.
    pub async fn bulk_profiles(&self) -> FetchResult<Vec<CompanyProfile>> {
        let mut all = Vec::new();
        let mut part = 0u32;

        loop {
            let part_str = part.to_string();
            let body = match self.fetch("stable/profile-bulk", &[("part", part_str.as_str())]).await {
                Ok(body) => body,
                Err(FetchError::BadRequest(_)) => {
                    debug!(part, "벌크 프로필 마지막 파트 도달");
                    break;
                }
                Err(e) => return Err(e),
            };

            let profiles = super::bulk::parse_profiles_csv(&body)?;
            if profiles.is_empty() {
                break;
            }

            all.extend(profiles);
            info!(part, total = all.len(), "벌크 프로필 파트 수신");

            part += 1;
            if part > BULK_PROFILE_MAX_PARTS {
                return Err(FetchError::Parse(format!(
                    "too many pages (>{}), stopping",
                    BULK_PROFILE_MAX_PARTS
                )));
            }
            self.limiter().pause(BULK_PART_DELAY).await?;
        }

        Ok(all)
    }

    /// 특정 일자의 전 종목 EOD 시세 (티커별).
    pub async fn bulk_eod(
        &self,
        date: NaiveDate,
    ) -> FetchResult<std::collections::HashMap<String, EodQuote>> {
        let date_str = date.format("%Y-%m-%d").to_string();
        let body = self.fetch("stable/eod-bulk", &[("date", date_str.as_str())]).await?;
        super::bulk::parse_eod_csv(&body)
    }

    /// 전체 일봉 이력 (날짜 오름차순). 지수는 비수정 주가 엔드포인트를 사용합니다.
    pub async fn price_history(&self, ticker: &str) -> FetchResult<Vec<DailyBar>> {
        let endpoint = if ticker.starts_with('^') {
            "stable/historical-price-eod/full"
        } else {
            "stable/historical-price-eod/dividend-adjusted"
        };

        let raw: Vec<RawDailyPrice> = self
            .fetch_non_empty(endpoint, &[("symbol", ticker), ("from", HISTORY_FROM)], ticker)
            .await?;

        let mut bars: Vec<DailyBar> = raw
            .into_iter()
            .filter_map(RawDailyPrice::into_bar)
            .collect();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// `{CUR}USD` 환율 전체 이력 (날짜 오름차순).
    pub async fn forex_history(&self, currency: &str) -> FetchResult<Vec<ForexPoint>> {
        let pair = format!("{}USD", currency);
        let raw: Vec<RawForexPoint> = self
            .fetch_non_empty(
                "stable/historical-price-eod/light",
                &[("symbol", pair.as_str()), ("from", HISTORY_FROM)],
                &pair,
            )
            .await?;

        let mut points: Vec<ForexPoint> = raw
            .into_iter()
            .filter_map(|p| {
                Some(ForexPoint {
                    date: parse_date(&p.date)?,
                    price: p.price,
                })
            })
            .collect();
        points.sort_by_key(|p| p.date);
        Ok(points)
    }
}
