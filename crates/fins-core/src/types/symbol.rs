//! 심볼(상장 종목) 정의.
//!
//! `primary_listing` 필드 규칙:
//! - `None`: 아직 분류되지 않음
//! - `Some("")`: 그룹의 대표 상장
//! - `Some(ticker)`: 대표 상장 `ticker`를 가리키는 보조 상장

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// 심볼 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolType {
    Stock,
    Etf,
    Fund,
    Adr,
    Index,
}

/// 가격 갱신 대상 유형.
pub const PRICE_UPDATE_TYPES: [SymbolType; 3] = [SymbolType::Stock, SymbolType::Adr, SymbolType::Index];

impl SymbolType {
    /// DB 저장용 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Etf => "etf",
            Self::Fund => "fund",
            Self::Adr => "adr",
            Self::Index => "index",
        }
    }

    /// 티커 형식만으로 추정한 유형 (`^`로 시작하면 지수).
    pub fn from_ticker(ticker: &str) -> Self {
        if ticker.starts_with('^') {
            Self::Index
        } else {
            Self::Stock
        }
    }

    /// 가격 갱신 대상인지 확인.
    pub fn receives_prices(&self) -> bool {
        PRICE_UPDATE_TYPES.contains(self)
    }

    /// `PRICE_UPDATE_TYPES`의 문자열 목록 (쿼리 바인딩용).
    pub fn price_update_names() -> Vec<String> {
        PRICE_UPDATE_TYPES
            .iter()
            .map(|t| t.as_str().to_string())
            .collect()
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stock" => Ok(Self::Stock),
            "etf" => Ok(Self::Etf),
            "fund" => Ok(Self::Fund),
            "adr" => Ok(Self::Adr),
            "index" => Ok(Self::Index),
            other => Err(CoreError::invalid("symbol type", other)),
        }
    }
}

/// 스테이지별 조회 결과 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// 정상 갱신
    Ok,
    /// 공급자에 데이터 없음
    NotFound,
    /// 갱신 실패
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "not_found" => Ok(Self::NotFound),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::invalid("fetch status", other)),
        }
    }
}

/// 저장소의 심볼 레코드.
///
/// `None` 필드는 upsert 시 기존 값을 유지합니다 (COALESCE).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub ticker: String,
    pub exchange: Option<String>,
    pub name: Option<String>,
    pub symbol_type: Option<SymbolType>,
    pub currency: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub isin: Option<String>,
    /// SEC 등록 ID
    pub cik: Option<String>,
    pub inception: Option<NaiveDate>,
    /// 가장 오래된 일봉 날짜
    pub oldest_price: Option<NaiveDate>,
    pub is_actively_trading: Option<bool>,
    /// 시가총액 (USD)
    pub market_cap: Option<i64>,
    pub primary_listing: Option<String>,
    /// 최근 12개월 최고가 (USD)
    pub ath12m: Option<f64>,
    pub current_price_usd: Option<f64>,
    pub current_price_time: Option<NaiveDate>,
    pub last_profile_update: Option<DateTime<Utc>>,
    pub last_profile_status: Option<FetchStatus>,
    pub last_price_update: Option<DateTime<Utc>>,
    pub last_price_status: Option<FetchStatus>,
}

impl Symbol {
    /// 티커만 채워진 심볼 생성.
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            ..Default::default()
        }
    }

    /// 심볼 동기화에서 새로 발견된 티커의 초기 레코드.
    pub fn stub(ticker: impl Into<String>) -> Self {
        let ticker = ticker.into();
        let symbol_type = SymbolType::from_ticker(&ticker);
        Self {
            ticker,
            symbol_type: Some(symbol_type),
            is_actively_trading: Some(true),
            ..Default::default()
        }
    }

    /// 대표 상장 여부.
    pub fn is_primary(&self) -> bool {
        matches!(self.primary_listing.as_deref(), Some(""))
    }
}

/// 통화 코드 정규화.
///
/// 일부 거래소는 보조 통화 단위(예: 아고로트)로 가격을 표기합니다.
pub fn normalize_currency(code: &str) -> String {
    let upper = code.trim().to_uppercase();
    match upper.as_str() {
        "ILA" => "ILS".to_string(),
        "KWF" => "KWD".to_string(),
        _ => upper,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_type_roundtrip() {
        for t in [
            SymbolType::Stock,
            SymbolType::Etf,
            SymbolType::Fund,
            SymbolType::Adr,
            SymbolType::Index,
        ] {
            assert_eq!(t.as_str().parse::<SymbolType>().unwrap(), t);
        }
        assert!("bond".parse::<SymbolType>().is_err());
    }

    #[test]
    fn test_stub_type_from_ticker() {
        assert_eq!(Symbol::stub("^GSPC").symbol_type, Some(SymbolType::Index));
        assert_eq!(Symbol::stub("AAPL").symbol_type, Some(SymbolType::Stock));
        assert_eq!(Symbol::stub("AAPL").is_actively_trading, Some(true));
    }

    #[test]
    fn test_price_update_types() {
        assert!(SymbolType::Adr.receives_prices());
        assert!(!SymbolType::Etf.receives_prices());
        assert_eq!(
            SymbolType::price_update_names(),
            vec!["stock", "adr", "index"]
        );
    }

    #[test]
    fn test_is_primary() {
        let mut s = Symbol::new("SAP");
        assert!(!s.is_primary());
        s.primary_listing = Some(String::new());
        assert!(s.is_primary());
        s.primary_listing = Some("SAP.DE".into());
        assert!(!s.is_primary());
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency("ila"), "ILS");
        assert_eq!(normalize_currency("KWF"), "KWD");
        assert_eq!(normalize_currency(" eur "), "EUR");
    }
}
