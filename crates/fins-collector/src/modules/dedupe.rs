//! 중복 상장 정리.
//!
//! 같은 회사로 보이는 티커를 CIK 또는 정확히 같은 이름으로 묶고,
//! 그룹마다 대표 상장 하나를 고릅니다. CIK가 있는 심볼은 CIK 패스에만, 나머지는 이름 패스에만
//! 들어가므로 두 패스를 동시에 실행해도 한 심볼이 두 번 배정되지 않습니다.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fins_data::DedupeCandidate;

use super::{guarded, Stage};
use crate::pool::TaskQueue;
use crate::{Result, StageStats, UpdaterContext};

/// CIK 패스 진행 로그 간격 (그룹 수)
const CIK_PROGRESS_EVERY: usize = 100;
/// 이름 패스 진행 로그 간격 (그룹 수)
const NAME_PROGRESS_EVERY: usize = 1000;

/// 같은 회사로 묶인 상장 목록. 멤버 순서는 티커 순입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: String,
    pub members: Vec<DedupeCandidate>,
}

impl Group {
    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.ticker.as_str())
    }

    /// `primary`를 뺀 나머지 티커.
    pub fn secondaries(&self, primary: &str) -> Vec<String> {
        self.tickers()
            .filter(|t| *t != primary)
            .map(str::to_string)
            .collect()
    }

    /// 이미 `primary` 기준으로 정리된 그룹인지 확인.
    pub fn is_settled(&self, primary: &str) -> bool {
        self.members.iter().all(|m| match m.primary_listing.as_deref() {
            Some("") => m.ticker == primary,
            Some(p) => p == primary && m.ticker != primary,
            None => false,
        })
    }

    fn first_ticker(&self) -> &str {
        self.members.first().map(|m| m.ticker.as_str()).unwrap_or_default()
    }
}

/// 실행 범위 제한 (관리 명령용).
#[derive(Debug, Clone, Default)]
pub struct DedupeFilter {
    /// 패스별 최대 그룹 수 (0 = 무제한)
    pub max_groups: usize,
    /// 이 티커를 포함하는 그룹만 처리 (비어 있으면 전체)
    pub tickers: Vec<String>,
}

impl DedupeFilter {
    fn apply(&self, mut groups: Vec<Group>) -> Vec<Group> {
        if !self.tickers.is_empty() {
            groups.retain(|g| g.tickers().any(|t| self.tickers.iter().any(|r| r == t)));
        }
        if self.max_groups > 0 && groups.len() > self.max_groups {
            info!(limit = self.max_groups, total = groups.len(), "그룹 수 제한");
            groups.truncate(self.max_groups);
        }
        groups
    }
}

/// 키로 묶고 두 개 이상인 그룹만 키 순으로 반환합니다.
pub fn group_by<F>(candidates: Vec<DedupeCandidate>, key: F) -> Vec<Group>
where
    F: Fn(&DedupeCandidate) -> Option<String>,
{
    let mut grouped: BTreeMap<String, Vec<DedupeCandidate>> = BTreeMap::new();
    for candidate in candidates {
        if let Some(k) = key(&candidate).filter(|k| !k.is_empty()) {
            grouped.entry(k).or_default().push(candidate);
        }
    }

    grouped
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(key, mut members)| {
            members.sort_by(|a, b| a.ticker.cmp(&b.ticker));
            Group { key, members }
        })
        .collect()
}

/// 가장 오래된 가격 기록을 가진 멤버. 기록이 없거나 동률이면 앞선 멤버.
pub fn primary_by_oldest_price(group: &Group) -> &str {
    group
        .members
        .iter()
        .filter_map(|m| m.oldest_price.map(|d| (d, m.ticker.as_str())))
        .min_by_key(|(date, _)| *date)
        .map(|(_, ticker)| ticker)
        .unwrap_or_else(|| group.first_ticker())
}

/// 대표 거래소와 같은 거래소의 멤버. 없으면 첫 멤버.
pub fn pick_by_exchange<'a>(group: &'a Group, exchange: Option<&str>) -> &'a str {
    exchange
        .and_then(|ex| {
            group
                .members
                .iter()
                .find(|m| m.exchange.as_deref() == Some(ex))
        })
        .map(|m| m.ticker.as_str())
        .unwrap_or_else(|| group.first_ticker())
}

/// CIK 키를 쓸지, 이름 키를 쓸지 나눕니다.
///
/// 공백이 아닌 CIK가 있으면 CIK 패스, 없고 이름이 있으면 이름 패스입니다.
/// 둘 다 없는 후보는 버립니다.
pub fn partition_candidates(
    candidates: Vec<DedupeCandidate>,
) -> (Vec<DedupeCandidate>, Vec<DedupeCandidate>) {
    let mut with_cik = Vec::new();
    let mut by_name = Vec::new();
    for candidate in candidates {
        let has_cik = candidate.cik.as_deref().is_some_and(|c| !c.trim().is_empty());
        let has_name = candidate.name.as_deref().is_some_and(|n| !n.is_empty());
        if has_cik {
            with_cik.push(candidate);
        } else if has_name {
            by_name.push(candidate);
        }
    }
    (with_cik, by_name)
}

/// 대표 상장 결정과 기록.
#[async_trait]
pub trait ListingBackend: Send + Sync {
    /// CIK 프로필의 거래소. 조회 실패 시 `None`.
    async fn canonical_exchange(&self, cik: &str) -> Option<String>;

    async fn assign_primary(&self, primary: &str, secondaries: &[String]) -> fins_data::Result<()>;
}

#[async_trait]
impl ListingBackend for UpdaterContext {
    async fn canonical_exchange(&self, cik: &str) -> Option<String> {
        match self.source.profile_by_cik(cik).await {
            Ok(profile) => profile.exchange,
            Err(e) => {
                warn!(cik, error = %e, "CIK 프로필 조회 실패 - 첫 멤버 사용");
                None
            }
        }
    }

    async fn assign_primary(&self, primary: &str, secondaries: &[String]) -> fins_data::Result<()> {
        self.db
            .symbols()
            .update_primary_listing_group(primary, secondaries)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Cik,
    Name,
}

impl Pass {
    fn label(self) -> &'static str {
        match self {
            Pass::Cik => "cik",
            Pass::Name => "name",
        }
    }

    fn progress_every(self) -> usize {
        match self {
            Pass::Cik => CIK_PROGRESS_EVERY,
            Pass::Name => NAME_PROGRESS_EVERY,
        }
    }
}

/// 패스 진행 카운터.
#[derive(Default)]
struct Progress {
    groups: AtomicUsize,
    updated: AtomicUsize,
    failed: AtomicUsize,
}

async fn settle_group<B: ListingBackend + ?Sized>(
    backend: &B,
    pass: Pass,
    group: Group,
) -> std::result::Result<usize, usize> {
    let primary = match pass {
        Pass::Cik => {
            let exchange = backend.canonical_exchange(&group.key).await;
            pick_by_exchange(&group, exchange.as_deref()).to_string()
        }
        Pass::Name => primary_by_oldest_price(&group).to_string(),
    };

    if group.is_settled(&primary) {
        return Ok(group.members.len());
    }

    let secondaries = group.secondaries(&primary);
    match backend.assign_primary(&primary, &secondaries).await {
        Ok(()) => Ok(group.members.len()),
        Err(e) => {
            warn!(pass = pass.label(), key = %group.key, error = %e, "그룹 갱신 실패");
            Err(group.members.len())
        }
    }
}

async fn run_pass<B: ListingBackend + 'static>(
    backend: Arc<B>,
    pass: Pass,
    groups: Vec<Group>,
    workers: usize,
    shutdown: &CancellationToken,
) -> StageStats {
    let total = groups.len();
    info!(pass = pass.label(), groups = total, "중복 그룹 처리 시작");

    let progress = Arc::new(Progress::default());
    let start = Instant::now();
    let mut queue = TaskQueue::new(workers);

    for group in groups {
        if shutdown.is_cancelled() {
            break;
        }
        let backend = backend.clone();
        let progress = progress.clone();
        queue.submit(async move {
            match settle_group(backend.as_ref(), pass, group).await {
                Ok(n) => progress.updated.fetch_add(n, Ordering::Relaxed),
                Err(n) => progress.failed.fetch_add(n, Ordering::Relaxed),
            };
            let done = progress.groups.fetch_add(1, Ordering::Relaxed) + 1;
            if done % pass.progress_every() == 0 {
                info!(
                    pass = pass.label(),
                    done,
                    remaining = total - done,
                    updated = progress.updated.load(Ordering::Relaxed),
                    failed = progress.failed.load(Ordering::Relaxed),
                    elapsed_secs = start.elapsed().as_secs(),
                    "중복 정리 진행"
                );
            }
        });
    }
    queue.drain().await;

    let mut stats = StageStats::new();
    stats.updated = progress.updated.load(Ordering::Relaxed);
    let failed = progress.failed.load(Ordering::Relaxed);
    if failed > 0 {
        stats.failed = failed;
        stats
            .failures
            .push(format!("{}: {} listings in failed groups", pass.label(), failed));
    }
    stats.processed = stats.updated + stats.failed;
    info!(
        pass = pass.label(),
        updated = stats.updated,
        failed = stats.failed,
        elapsed_secs = start.elapsed().as_secs(),
        "중복 그룹 처리 완료"
    );
    stats
}

/// 후보를 두 패스로 나눠 동시에 정리합니다.
async fn settle_candidates<B: ListingBackend + 'static>(
    backend: Arc<B>,
    candidates: Vec<DedupeCandidate>,
    filter: &DedupeFilter,
    workers: usize,
    shutdown: &CancellationToken,
) -> StageStats {
    let (with_cik, by_name) = partition_candidates(candidates);

    let cik_groups = filter.apply(group_by(with_cik, |c| {
        c.cik.as_deref().map(str::trim).map(str::to_string)
    }));
    let name_groups = filter.apply(group_by(by_name, |c| c.name.clone()));

    let (mut stats, name_stats) = tokio::join!(
        run_pass(backend.clone(), Pass::Cik, cik_groups, workers, shutdown),
        run_pass(backend, Pass::Name, name_groups, workers, shutdown),
    );
    stats.merge(name_stats);
    stats
}

/// 중복 정리 스테이지.
pub async fn dedupe_listings(ctx: &UpdaterContext) -> Result<StageStats> {
    dedupe_listings_with(ctx, &DedupeFilter::default()).await
}

/// 범위를 제한한 중복 정리.
pub async fn dedupe_listings_with(ctx: &UpdaterContext, filter: &DedupeFilter) -> Result<StageStats> {
    let today = Utc::now().date_naive();
    guarded(&ctx.db, Stage::Dedupe, today, || run(ctx, filter)).await
}

async fn run(ctx: &UpdaterContext, filter: &DedupeFilter) -> Result<StageStats> {
    let candidates = ctx.db.symbols().dedupe_candidates().await?;
    let stats = settle_candidates(
        Arc::new(ctx.clone()),
        candidates,
        filter,
        ctx.config.dedupe.workers,
        &ctx.shutdown,
    )
    .await;

    ctx.check_cancelled()?;
    Ok(stats)
}
