//! 회사 프로필 갱신.
//!
//! 정기 갱신은 벌크 프로필 CSV 한 번으로 처리합니다. 개별 티커 갱신은
//! 프로필 엔드포인트를 워커 풀로 호출합니다.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use tracing::{info, warn};

use fins_core::{normalize_currency, FetchStatus, Symbol, SymbolType};
use fins_data::{CompanyProfile, FetchError};

use super::{guarded, Stage};
use crate::pool::run_all;
use crate::{Result, StageStats, UpdaterContext};

/// 프로필 플래그로 심볼 유형 결정 (ETF > Fund > ADR > Stock, `^`는 지수).
pub fn derive_type(profile: &CompanyProfile) -> SymbolType {
    if profile.symbol.starts_with('^') {
        SymbolType::Index
    } else if profile.is_etf {
        SymbolType::Etf
    } else if profile.is_fund {
        SymbolType::Fund
    } else if profile.is_adr {
        SymbolType::Adr
    } else {
        SymbolType::Stock
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 프로필을 심볼 레코드로 변환합니다. 시가총액은 별도로 USD 환산해야 합니다.
pub fn profile_to_symbol(profile: &CompanyProfile, now: DateTime<Utc>) -> Symbol {
    Symbol {
        ticker: profile.symbol.trim().to_string(),
        exchange: non_empty(&profile.exchange),
        name: non_empty(&profile.company_name),
        symbol_type: Some(derive_type(profile)),
        currency: non_empty(&profile.currency).map(|c| normalize_currency(&c)),
        sector: non_empty(&profile.sector),
        industry: non_empty(&profile.industry),
        country: non_empty(&profile.country),
        description: non_empty(&profile.description),
        website: non_empty(&profile.website),
        isin: non_empty(&profile.isin),
        cik: non_empty(&profile.cik),
        inception: profile.ipo_date(),
        is_actively_trading: Some(profile.is_actively_trading),
        last_profile_update: Some(now),
        last_profile_status: Some(FetchStatus::Ok),
        ..Symbol::new(profile.symbol.trim())
    }
}

/// 조회 실패를 상태만 담은 레코드로 기록합니다.
fn status_only(ticker: &str, status: FetchStatus, now: DateTime<Utc>) -> Symbol {
    Symbol {
        last_profile_update: Some(now),
        last_profile_status: Some(status),
        ..Symbol::new(ticker)
    }
}

/// 시가총액을 오늘 환율로 USD 환산해 채웁니다. 실패하면 상태를 `failed`로 바꿉니다.
async fn apply_market_cap(
    ctx: &UpdaterContext,
    symbol: &mut Symbol,
    market_cap: Option<f64>,
    today: NaiveDate,
) -> bool {
    let Some(market_cap) = market_cap.filter(|m| m.is_finite() && *m > 0.0) else {
        return true;
    };
    let currency = symbol.currency.clone().unwrap_or_default();

    match ctx.forex.to_usd(market_cap, &currency, today).await {
        Ok(usd) => {
            symbol.market_cap = Some(usd.round() as i64);
            true
        }
        Err(e) => {
            ctx.errors
                .record(
                    Stage::Profiles.error_source(),
                    "conversion_error",
                    &format!(
                        "Failed to convert market cap of {} from {} to USD: {}",
                        symbol.ticker, currency, e
                    ),
                )
                .await;
            symbol.market_cap = None;
            symbol.last_profile_status = Some(FetchStatus::Failed);
            false
        }
    }
}

/// 정기 프로필 갱신 스테이지 (벌크).
pub async fn update_profiles(ctx: &UpdaterContext) -> Result<StageStats> {
    let today = Utc::now().date_naive();
    guarded(&ctx.db, Stage::Profiles, today, || run_bulk(ctx)).await
}

async fn run_bulk(ctx: &UpdaterContext) -> Result<StageStats> {
    let mut stats = StageStats::new();
    let repo = ctx.db.symbols();
    let stale_before = ctx.config.profile.stale_before(Utc::now());

    let needed = repo.tickers_needing_profile_update(stale_before).await?;
    if needed.is_empty() {
        info!("프로필 갱신 대상 없음");
        return Ok(stats);
    }
    info!(needed = needed.len(), "프로필 갱신 대상 조회");

    let batch_start = Utc::now();
    let today = batch_start.date_naive();
    let bulk = ctx.source.bulk_profiles().await?;
    let profiles = filter_needed(bulk, &needed);
    info!(profiles = profiles.len(), "벌크 프로필 중 갱신 대상");

    if profiles.is_empty() {
        return Ok(stats);
    }

    let mut symbols = Vec::with_capacity(profiles.len());
    for profile in &profiles {
        let mut symbol = profile_to_symbol(profile, batch_start);
        if !apply_market_cap(ctx, &mut symbol, profile.market_cap, today).await {
            stats.record_failure(&symbol.ticker, "market cap conversion");
        }
        symbols.push(symbol);
    }

    let written = repo.put_symbols(&symbols).await?;
    let not_found = repo
        .mark_stale_profiles_not_found(batch_start, stale_before)
        .await?;
    if not_found > 0 {
        info!(not_found, "벌크 프로필에 없는 심볼을 not_found로 표시");
    }

    stats.processed = profiles.len();
    stats.updated = written.saturating_sub(stats.failed);
    stats.not_found = not_found as usize;
    Ok(stats)
}

/// 갱신 대상 티커의 프로필만 남깁니다. 같은 티커가 여러 번 나오면 처음 것을 씁니다.
pub fn filter_needed(profiles: Vec<CompanyProfile>, needed: &HashSet<String>) -> Vec<CompanyProfile> {
    let mut seen = HashSet::with_capacity(needed.len());
    profiles
        .into_iter()
        .filter(|p| {
            let ticker = p.symbol.trim();
            needed.contains(ticker) && seen.insert(ticker.to_string())
        })
        .collect()
}

/// 단일 티커 프로필 갱신. 결과 상태를 저장하고 반환합니다.
pub async fn update_profile(ctx: &UpdaterContext, ticker: &str) -> Result<FetchStatus> {
    let now = Utc::now();
    let repo = ctx.db.symbols();

    let symbol = match ctx.source.profile(ticker).await {
        Ok(profile) => {
            let mut symbol = profile_to_symbol(&profile, now);
            symbol.ticker = ticker.to_string();
            apply_market_cap(ctx, &mut symbol, profile.market_cap, now.date_naive()).await;
            symbol
        }
        Err(FetchError::Shutdown) => return Err(FetchError::Shutdown.into()),
        Err(e) if e.is_not_found() => status_only(ticker, FetchStatus::NotFound, now),
        Err(e) => {
            warn!(ticker, error = %e, "프로필 조회 실패");
            status_only(ticker, FetchStatus::Failed, now)
        }
    };

    let status = symbol
        .last_profile_status
        .unwrap_or(FetchStatus::Failed);

    if let Err(e) = repo.put_symbols(std::slice::from_ref(&symbol)).await {
        warn!(ticker, error = %e, "프로필 저장 실패");
        repo.put_symbols(&[status_only(ticker, FetchStatus::Failed, now)])
            .await?;
        return Ok(FetchStatus::Failed);
    }
    Ok(status)
}

/// 여러 티커의 프로필을 개별 조회로 갱신합니다.
pub async fn update_profiles_for(ctx: &UpdaterContext, tickers: Vec<String>) -> Result<StageStats> {
    let mut stats = StageStats::new();
    let workers = ctx.config.profile.workers;

    let results = run_all(tickers, workers, |ticker| {
        let ctx = ctx.clone();
        async move {
            let result = update_profile(&ctx, &ticker).await;
            (ticker, result)
        }
    })
    .await;

    for (ticker, result) in results {
        stats.processed += 1;
        match result {
            Ok(FetchStatus::Ok) => stats.updated += 1,
            Ok(FetchStatus::NotFound) => stats.not_found += 1,
            Ok(FetchStatus::Failed) => stats.record_failure(&ticker, "profile update failed"),
            Err(e) => stats.record_failure(&ticker, e),
        }
    }

    stats.log_summary("profile");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(symbol: &str) -> CompanyProfile {
        CompanyProfile {
            symbol: symbol.to_string(),
            company_name: Some("Acme Corp".into()),
            exchange: Some("NASDAQ".into()),
            currency: Some("ila".into()),
            cik: Some(" ".into()),
            ipo_date: Some("1999-05-01".into()),
            is_actively_trading: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_derive_type_priority() {
        let mut p = profile("X");
        assert_eq!(derive_type(&p), SymbolType::Stock);
        p.is_adr = true;
        assert_eq!(derive_type(&p), SymbolType::Adr);
        p.is_fund = true;
        assert_eq!(derive_type(&p), SymbolType::Fund);
        p.is_etf = true;
        assert_eq!(derive_type(&p), SymbolType::Etf);
        assert_eq!(derive_type(&profile("^DJI")), SymbolType::Index);
    }

    #[test]
    fn test_profile_to_symbol() {
        let now = Utc::now();
        let symbol = profile_to_symbol(&profile("TEVA.TA"), now);

        assert_eq!(symbol.ticker, "TEVA.TA");
        assert_eq!(symbol.currency.as_deref(), Some("ILS"));
        assert_eq!(symbol.cik, None);
        assert_eq!(symbol.inception, NaiveDate::from_ymd_opt(1999, 5, 1));
        assert_eq!(symbol.last_profile_status, Some(FetchStatus::Ok));
        assert_eq!(symbol.last_profile_update, Some(now));
        // 시가총액은 환산 전까지 비어 있음
        assert_eq!(symbol.market_cap, None);
        assert_eq!(symbol.primary_listing, None);
    }

    #[test]
    fn test_filter_needed_keeps_first_occurrence() {
        let mut dup = profile("AAPL");
        dup.company_name = Some("Second".into());
        let profiles = vec![profile("AAPL"), profile("MSFT"), dup];
        let needed: HashSet<String> = ["AAPL".to_string()].into();

        let filtered = filter_needed(profiles, &needed);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].company_name.as_deref(), Some("Acme Corp"));
    }
}
