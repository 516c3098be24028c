//! 시장 데이터 수집과 저장.
//!
//! 이 crate는 다음을 제공합니다:
//! - 레이트 리밋/디스크 캐시/재시도가 적용된 공급자 클라이언트 ([`provider`])
//! - 통화별 USD 환율 캐시 ([`forex`])
//! - PostgreSQL 저장소 ([`storage`])

pub mod error;
pub mod forex;
pub mod provider;
pub mod storage;

pub use error::{DataError, Result};
pub use forex::{ForexCache, ForexSeries, STALE_RATE_TOLERANCE_DAYS};
pub use provider::{
    CompanyProfile, EodQuote, FetchError, FetchResult, FmpClient, ForexPoint, ListedSymbol,
    MarketDataSource, RateLimiter, ResponseCache,
};
pub use storage::{
    AnalysisPackage, AnalysisRepository, AnalysisResultRecord, BatchLogRepository, Database,
    DedupeCandidate, ErrorLogRepository, ErrorRecord, PackageStatus, PriceRepository,
    StalePriceSymbol, StoreStatus, SymbolRepository,
};
