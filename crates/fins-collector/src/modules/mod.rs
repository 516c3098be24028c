//! 업데이터 스테이지 모듈.

pub mod batch_guard;
pub mod dedupe;
pub mod orchestrator;
pub mod price_sync;
pub mod profile_sync;
pub mod quote_sync;
pub mod symbol_sync;

use std::fmt;

pub use batch_guard::{guarded, guarded_with, should_skip, BatchGuard, RunLedger};
pub use dedupe::{dedupe_listings, dedupe_listings_with, DedupeFilter, Group};
pub use orchestrator::{run_cycle, run_forever, CycleReport, StageOutcome, StageRunner};
pub use price_sync::update_prices;
pub use profile_sync::{update_profile, update_profiles, update_profiles_for};
pub use quote_sync::update_quotes;
pub use symbol_sync::sync_symbols;

/// 업데이트 사이클의 스테이지. 선언 순서가 실행 순서입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Stage {
    Symbols,
    Profiles,
    Quotes,
    Prices,
    Dedupe,
}

impl Stage {
    /// 사이클 실행 순서.
    pub const ALL: [Stage; 5] = [
        Stage::Symbols,
        Stage::Profiles,
        Stage::Quotes,
        Stage::Prices,
        Stage::Dedupe,
    ];

    /// `batch_update_log.updater_name` 값.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symbols => "symbols",
            Self::Profiles => "profile_batch",
            Self::Quotes => "quote",
            Self::Prices => "prices",
            Self::Dedupe => "dedupe",
        }
    }

    /// `errors.source` 값.
    pub fn error_source(&self) -> &'static str {
        match self {
            Self::Symbols => "updater.symbols",
            Self::Profiles => "updater.profile_batch",
            Self::Quotes => "updater.quote",
            Self::Prices => "updater.prices",
            Self::Dedupe => "updater.dedupe",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
