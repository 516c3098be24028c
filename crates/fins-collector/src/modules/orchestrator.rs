//! 업데이트 사이클 실행.
//!
//! 다섯 스테이지를 정해진 순서로 실행합니다. 한 스테이지가 실패해도 다음 스테이지는 계속 진행하고,
//! 종료 신호는 스테이지 사이에서 확인합니다.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{dedupe_listings, sync_symbols, update_prices, update_profiles, update_quotes, Stage};
use crate::{CollectorError, Result, StageStats, UpdaterContext};

/// 스테이지 하나를 실행하는 주체.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run_stage(&self, stage: Stage) -> Result<StageStats>;
}

#[async_trait]
impl StageRunner for UpdaterContext {
    async fn run_stage(&self, stage: Stage) -> Result<StageStats> {
        match stage {
            Stage::Symbols => sync_symbols(self).await,
            Stage::Profiles => update_profiles(self).await,
            Stage::Quotes => update_quotes(self).await,
            Stage::Prices => update_prices(self).await,
            Stage::Dedupe => dedupe_listings(self).await,
        }
    }
}

/// 스테이지 실행 결과.
#[derive(Debug)]
pub enum StageOutcome {
    Completed(StageStats),
    Failed(String),
}

/// 한 사이클의 결과.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(Stage, StageOutcome)>,
    /// 종료 신호로 중간에 멈춤
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn failed_stages(&self) -> Vec<Stage> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, StageOutcome::Failed(_)))
            .map(|(s, _)| *s)
            .collect()
    }

    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, StageOutcome::Completed(_)))
            .count()
    }
}

/// 전체 사이클 한 번 실행.
pub async fn run_cycle<R: StageRunner + ?Sized>(runner: &R, shutdown: &CancellationToken) -> CycleReport {
    let start = Instant::now();
    let mut report = CycleReport::default();
    let total = Stage::ALL.len();

    for (i, stage) in Stage::ALL.into_iter().enumerate() {
        if shutdown.is_cancelled() {
            info!(next = %stage, "종료 신호 수신 - 사이클 중단");
            report.cancelled = true;
            break;
        }

        info!(step = i + 1, total, stage = %stage, "스테이지 실행");
        let outcome = match runner.run_stage(stage).await {
            Ok(stats) => StageOutcome::Completed(stats),
            Err(CollectorError::Cancelled) => {
                info!(stage = %stage, "스테이지 취소됨");
                report.cancelled = true;
                report.outcomes.push((stage, StageOutcome::Failed("cancelled".into())));
                break;
            }
            Err(e) => {
                error!(stage = %stage, error = %e, "스테이지 실패");
                StageOutcome::Failed(e.to_string())
            }
        };
        report.outcomes.push((stage, outcome));
    }

    report.elapsed = start.elapsed();
    if !report.cancelled {
        info!(
            elapsed_secs = report.elapsed.as_secs(),
            completed = report.completed(),
            failed = report.failed_stages().len(),
            "전체 사이클 완료"
        );
    }
    report
}

/// 종료 신호가 올 때까지 사이클을 반복합니다. 사이클이 끝나면 `interval`만큼 쉽니다.
pub async fn run_forever<R: StageRunner + ?Sized>(
    runner: &R,
    shutdown: &CancellationToken,
    interval: Duration,
) -> usize {
    let mut cycles = 0;
    info!(interval_secs = interval.as_secs(), "업데이트 데몬 시작");

    loop {
        let report = run_cycle(runner, shutdown).await;
        cycles += 1;
        if report.cancelled {
            break;
        }

        info!(hours = interval.as_secs() / 3600, "다음 사이클까지 대기");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                info!("종료 신호 수신 - 대기 중단");
                break;
            }
        }
    }

    info!(cycles, "업데이트 데몬 종료");
    cycles
}
