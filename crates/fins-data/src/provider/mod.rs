//! 시장 데이터 공급자.
//!
//! ## 구성
//! - `RateLimiter`: 모든 요청이 공유하는 요청 간격 제한
//! - `ResponseCache`: 일 단위 디스크 응답 캐시
//! - `FmpClient`: Financial Modeling Prep HTTP 클라이언트
//!
//! 업데이터는 [`MarketDataSource`] 트레이트에만 의존하므로 테스트에서는
//! 메모리 구현으로 대체할 수 있습니다.

pub mod bulk;
pub mod cache;
pub mod endpoints;
pub mod error;
pub mod fmp;
pub mod rate_limiter;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use fins_core::DailyBar;

pub use cache::{CachedResponse, ResponseCache};
pub use endpoints::{CompanyProfile, EodQuote, ForexPoint, ListedSymbol};
pub use error::{FetchError, FetchResult};
pub use fmp::FmpClient;
pub use rate_limiter::{RateLimiter, RequestLogEntry, RequestOutcome};

/// 업데이터가 사용하는 공급자 연산.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn stock_list(&self) -> FetchResult<Vec<ListedSymbol>>;

    async fn index_list(&self) -> FetchResult<Vec<ListedSymbol>>;

    async fn delisted_companies(&self) -> FetchResult<Vec<ListedSymbol>>;

    async fn profile(&self, ticker: &str) -> FetchResult<CompanyProfile>;

    async fn profile_by_cik(&self, cik: &str) -> FetchResult<CompanyProfile>;

    async fn bulk_profiles(&self) -> FetchResult<Vec<CompanyProfile>>;

    async fn bulk_eod(&self, date: NaiveDate) -> FetchResult<HashMap<String, EodQuote>>;

    async fn price_history(&self, ticker: &str) -> FetchResult<Vec<DailyBar>>;

    async fn forex_history(&self, currency: &str) -> FetchResult<Vec<ForexPoint>>;
}

#[async_trait]
impl MarketDataSource for FmpClient {
    async fn stock_list(&self) -> FetchResult<Vec<ListedSymbol>> {
        FmpClient::stock_list(self).await
    }

    async fn index_list(&self) -> FetchResult<Vec<ListedSymbol>> {
        FmpClient::index_list(self).await
    }

    async fn delisted_companies(&self) -> FetchResult<Vec<ListedSymbol>> {
        FmpClient::delisted_companies(self).await
    }

    async fn profile(&self, ticker: &str) -> FetchResult<CompanyProfile> {
        FmpClient::profile(self, ticker).await
    }

    async fn profile_by_cik(&self, cik: &str) -> FetchResult<CompanyProfile> {
        FmpClient::profile_by_cik(self, cik).await
    }

    async fn bulk_profiles(&self) -> FetchResult<Vec<CompanyProfile>> {
        FmpClient::bulk_profiles(self).await
    }

    async fn bulk_eod(&self, date: NaiveDate) -> FetchResult<HashMap<String, EodQuote>> {
        FmpClient::bulk_eod(self, date).await
    }

    async fn price_history(&self, ticker: &str) -> FetchResult<Vec<DailyBar>> {
        FmpClient::price_history(self, ticker).await
    }

    async fn forex_history(&self, currency: &str) -> FetchResult<Vec<ForexPoint>> {
        FmpClient::forex_history(self, currency).await
    }
}
