//! 벌크 CSV 응답 파싱.
//!
//! 잘못된 행은 에러 없이 건너뜁니다. CSV 구조 자체가 깨진 경우만 에러입니다.

use chrono::NaiveDate;
use std::collections::HashMap;

use super::endpoints::{CompanyProfile, EodQuote};
use super::error::FetchResult;

/// 벌크 프로필 CSV. 열은 헤더 이름으로 찾습니다.
pub fn parse_profiles_csv(body: &[u8]) -> FetchResult<Vec<CompanyProfile>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body);

    let columns: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_string(), i))
        .collect();

    let mut profiles = Vec::new();
    for record in reader.records() {
        let record = record?;
        let col = |name: &str| -> Option<String> {
            columns
                .get(name)
                .and_then(|&i| record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let flag = |name: &str| {
            col(name)
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false)
        };

        let Some(symbol) = col("symbol") else {
            continue;
        };

        profiles.push(CompanyProfile {
            symbol,
            company_name: col("companyName"),
            exchange: col("exchange"),
            currency: col("currency"),
            industry: col("industry"),
            sector: col("sector"),
            country: col("country"),
            cik: col("cik"),
            isin: col("isin"),
            market_cap: col("marketCap").and_then(|v| v.parse().ok()),
            description: col("description"),
            website: col("website"),
            ipo_date: col("ipoDate"),
            is_actively_trading: flag("isActivelyTrading"),
            is_etf: flag("isEtf"),
            is_fund: flag("isFund"),
            is_adr: flag("isAdr"),
        });
    }

    Ok(profiles)
}

/// 벌크 EOD CSV (`symbol,date,open,low,high,close,adjClose,volume`).
///
/// 열이 8개 미만이거나 숫자/날짜가 잘못됐거나 종가가 0 이하인 행은 제외합니다.
/// `avg`는 OHLC 네 값의 평균입니다.
pub fn parse_eod_csv(body: &[u8]) -> FetchResult<HashMap<String, EodQuote>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body);

    let mut quotes = HashMap::new();
    for record in reader.records() {
        let record = record?;
        if record.len() < 8 {
            continue;
        }

        let num = |i: usize| record.get(i).and_then(|v| v.trim().parse::<f64>().ok());
        let Some(date) = record
            .get(1)
            .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
        else {
            continue;
        };
        let (Some(open), Some(low), Some(high), Some(close)) = (num(2), num(3), num(4), num(5))
        else {
            continue;
        };
        if close <= 0.0 {
            continue;
        }

        let ticker = record.get(0).unwrap_or_default().trim().to_string();
        quotes.insert(
            ticker.clone(),
            EodQuote {
                ticker,
                date,
                open,
                high,
                low,
                avg: (open + high + low + close) / 4.0,
                close,
            },
        );
    }

    Ok(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_by_header_name() {
        let csv = "\
isEtf,symbol,companyName,marketCap,currency,isAdr,ipoDate
false,AAPL,Apple Inc.,3000000000000,USD,no,1980-12-12
TRUE,SPY,SPDR S&P 500,,USD,0,
,,Missing Symbol,1,USD,,
1,TSM,\"Taiwan Semiconductor, Ltd\",5.5e11,usd,yes,1997-10-09
";
        let profiles = parse_profiles_csv(csv.as_bytes()).unwrap();
        assert_eq!(profiles.len(), 3);

        assert_eq!(profiles[0].symbol, "AAPL");
        assert_eq!(profiles[0].market_cap, Some(3.0e12));
        assert!(!profiles[0].is_etf);

        assert!(profiles[1].is_etf);
        assert_eq!(profiles[1].market_cap, None);
        assert_eq!(profiles[1].ipo_date, None);

        assert_eq!(profiles[2].company_name.as_deref(), Some("Taiwan Semiconductor, Ltd"));
        assert!(profiles[2].is_adr);
    }

    #[test]
    fn test_empty_profile_part() {
        let profiles = parse_profiles_csv(b"symbol,companyName\n").unwrap();
        assert!(profiles.is_empty());
    }

    #[test]
    fn test_eod_filters_bad_rows() {
        let csv = "\
symbol,date,open,low,high,close,adjClose,volume
AAPL,2024-03-01,100,99,104,102,102,1000
BAD,2024-03-01,x,1,1,1,1,1
ZERO,2024-03-01,1,1,1,0,0,1
SHORT,2024-03-01,1,1,1
NODATE,03/01/2024,1,1,1,1,1,1
";
        let quotes = parse_eod_csv(csv.as_bytes()).unwrap();
        assert_eq!(quotes.len(), 1);

        let q = &quotes["AAPL"];
        assert_eq!(q.open, 100.0);
        assert_eq!(q.low, 99.0);
        assert_eq!(q.high, 104.0);
        assert_eq!(q.close, 102.0);
        assert!((q.avg - 101.25).abs() < 1e-9);
    }
}
