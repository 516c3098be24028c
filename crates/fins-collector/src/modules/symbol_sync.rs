//! 심볼 목록 동기화.
//!
//! 주식/지수 목록에서 상장 폐지 종목을 뺀 것이 활성 목록입니다.
//! 저장소에서 활성 목록에 없는 심볼은 비활성화하고, 새 티커는 최소 정보만으로 추가합니다.

use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use tracing::info;

use fins_core::Symbol;
use fins_data::ListedSymbol;

use super::{guarded, Stage};
use crate::{Result, StageStats, UpdaterContext};

/// 동기화 계획.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolSyncPlan {
    /// 활성 티커 (정렬됨)
    pub active: Vec<String>,
    /// 저장소에 없는 새 티커 (정렬됨)
    pub new: Vec<String>,
}

/// 목록들과 기존 티커로 동기화 계획을 만듭니다.
pub fn plan_symbol_sync(
    stocks: &[ListedSymbol],
    indices: &[ListedSymbol],
    delisted: &[ListedSymbol],
    existing: &HashSet<String>,
) -> SymbolSyncPlan {
    let delisted: HashSet<&str> = delisted.iter().map(|s| s.symbol.trim()).collect();

    let active: BTreeSet<String> = stocks
        .iter()
        .chain(indices)
        .map(|s| s.symbol.trim())
        .filter(|t| !t.is_empty() && !delisted.contains(t))
        .map(str::to_string)
        .collect();

    let new = active
        .iter()
        .filter(|t| !existing.contains(*t))
        .cloned()
        .collect();

    SymbolSyncPlan {
        active: active.into_iter().collect(),
        new,
    }
}

/// 심볼 목록 동기화 스테이지.
pub async fn sync_symbols(ctx: &UpdaterContext) -> Result<StageStats> {
    let today = Utc::now().date_naive();
    guarded(&ctx.db, Stage::Symbols, today, || run(ctx)).await
}

async fn run(ctx: &UpdaterContext) -> Result<StageStats> {
    let mut stats = StageStats::new();

    let stocks = ctx.source.stock_list().await?;
    let indices = ctx.source.index_list().await?;
    let delisted = ctx.source.delisted_companies().await?;
    info!(
        stocks = stocks.len(),
        indices = indices.len(),
        delisted = delisted.len(),
        "심볼 목록 조회 완료"
    );

    let repo = ctx.db.symbols();
    let existing: HashSet<String> = repo.all_tickers().await?.into_iter().collect();
    let plan = plan_symbol_sync(&stocks, &indices, &delisted, &existing);

    let deactivated = repo.deactivate_not_in(&plan.active).await?;
    let stubs: Vec<Symbol> = plan.new.iter().map(Symbol::stub).collect();
    repo.put_symbols(&stubs).await?;

    info!(
        active = plan.active.len(),
        new = plan.new.len(),
        deactivated,
        "심볼 동기화 반영"
    );

    stats.processed = plan.active.len();
    stats.updated = plan.new.len();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(symbol: &str) -> ListedSymbol {
        ListedSymbol {
            symbol: symbol.to_string(),
            name: None,
            exchange: None,
        }
    }

    #[test]
    fn test_plan_excludes_delisted_and_finds_new() {
        let stocks = vec![listed("AAPL"), listed("MSFT"), listed("OLD"), listed(" ")];
        let indices = vec![listed("^GSPC")];
        let delisted = vec![listed("OLD")];
        let existing: HashSet<String> = ["AAPL".to_string(), "GONE".to_string()].into();

        let plan = plan_symbol_sync(&stocks, &indices, &delisted, &existing);
        assert_eq!(plan.active, vec!["AAPL", "MSFT", "^GSPC"]);
        assert_eq!(plan.new, vec!["MSFT", "^GSPC"]);
    }

    #[test]
    fn test_plan_deduplicates_tickers() {
        let stocks = vec![listed("AAPL"), listed("AAPL")];
        let plan = plan_symbol_sync(&stocks, &[], &[], &HashSet::new());
        assert_eq!(plan.active, vec!["AAPL"]);
        assert_eq!(plan.new, vec!["AAPL"]);
    }
}
