//! 환경변수 기반 스테이지 설정.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 프로필 갱신 설정
    pub profile: ProfileConfig,
    /// 가격 이력 갱신 설정
    pub price: PriceConfig,
    /// 중복 상장 정리 설정
    pub dedupe: DedupeConfig,
    /// 데몬 모드 설정
    pub daemon: DaemonConfig,
}

/// 프로필 갱신 설정
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// 갱신 기준 일수 (마지막 갱신 후 N일 경과 시 재조회)
    pub refresh_days: i64,
    /// 개별 조회 시 동시 작업 수
    pub workers: usize,
}

/// 가격 이력 갱신 설정
#[derive(Debug, Clone)]
pub struct PriceConfig {
    /// 동시 작업 수
    pub workers: usize,
    /// 라운드당 심볼 수
    pub batch_size: usize,
    /// 갱신 기준 일수
    pub stale_days: i64,
    /// 한 번의 실행에서 처리할 최대 심볼 수 (0이면 제한 없음)
    pub max_symbols: usize,
}

/// 중복 상장 정리 설정
#[derive(Debug, Clone)]
pub struct DedupeConfig {
    /// 동시 작업 수
    pub workers: usize,
}

/// 데몬 모드 설정
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// 사이클 사이 대기 (시간 단위)
    pub cycle_hours: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            profile: ProfileConfig {
                refresh_days: 30,
                workers: 10,
            },
            price: PriceConfig {
                workers: 20,
                batch_size: 200,
                stale_days: 30,
                max_symbols: 0,
            },
            dedupe: DedupeConfig { workers: 16 },
            daemon: DaemonConfig { cycle_hours: 8 },
        }
    }
}

impl CollectorConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            profile: ProfileConfig {
                refresh_days: env_var_parse("PROFILE_REFRESH_DAYS", defaults.profile.refresh_days),
                workers: env_var_parse("PROFILE_WORKERS", defaults.profile.workers).max(1),
            },
            price: PriceConfig {
                workers: env_var_parse("PRICE_WORKERS", defaults.price.workers).max(1),
                batch_size: env_var_parse("PRICE_BATCH_SIZE", defaults.price.batch_size).max(1),
                stale_days: env_var_parse("PRICE_STALE_DAYS", defaults.price.stale_days),
                max_symbols: env_var_parse("PRICE_MAX_SYMBOLS", defaults.price.max_symbols),
            },
            dedupe: DedupeConfig {
                workers: env_var_parse("DEDUPE_WORKERS", defaults.dedupe.workers).max(1),
            },
            daemon: DaemonConfig {
                cycle_hours: env_var_parse("CYCLE_HOURS", defaults.daemon.cycle_hours),
            },
        }
    }
}

impl ProfileConfig {
    /// 이 시각 이전에 갱신된 프로필은 갱신 대상입니다.
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - ChronoDuration::days(self.refresh_days)
    }
}

impl PriceConfig {
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - ChronoDuration::days(self.stale_days)
    }

    /// 이번 라운드에서 처리할 심볼 수. `attempted`는 지금까지 처리한 수.
    pub fn round_limit(&self, attempted: usize) -> usize {
        if self.max_symbols == 0 {
            self.batch_size
        } else {
            self.batch_size.min(self.max_symbols.saturating_sub(attempted))
        }
    }
}

impl DaemonConfig {
    /// 사이클 사이 대기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.cycle_hours * 60 * 60)
    }
}

/// 환경변수를 파싱하거나 기본값 반환
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
