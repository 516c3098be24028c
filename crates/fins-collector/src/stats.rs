//! 스테이지 통계.

use serde::Serialize;
use std::time::Duration;

/// 로그에 남길 실패 사유 최대 개수.
pub const FAILURE_SAMPLE_LIMIT: usize = 5;

/// 스테이지 실행 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    /// 처리한 항목 수 (BatchRun의 `symbols_processed`)
    pub processed: usize,
    /// 정상 갱신 수
    pub updated: usize,
    /// 공급자에 데이터 없음
    pub not_found: usize,
    /// 실패 수
    pub failed: usize,
    /// 건너뛴 항목 수 (통화 없음, 이미 최신 등)
    pub skipped: usize,
    /// 오늘 이미 완료되어 스테이지 전체를 건너뜀
    pub stage_skipped: bool,
    /// 실패 사유 (`티커: 사유`)
    pub failures: Vec<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl StageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 오늘 이미 완료된 스테이지.
    pub fn skipped_today() -> Self {
        Self {
            stage_skipped: true,
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, ticker: &str, reason: impl std::fmt::Display) {
        self.failed += 1;
        self.failures.push(format!("{}: {}", ticker, reason));
    }

    /// 갱신으로 셌던 항목을 실패로 옮깁니다 (쓰기 단계에서 실패한 경우).
    pub fn demote_updated(&mut self, ticker: &str, reason: impl std::fmt::Display) {
        self.updated = self.updated.saturating_sub(1);
        self.record_failure(ticker, reason);
    }

    /// 다른 통계를 합칩니다.
    pub fn merge(&mut self, other: StageStats) {
        self.processed += other.processed;
        self.updated += other.updated;
        self.not_found += other.not_found;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            (self.updated as f64 / self.processed as f64) * 100.0
        }
    }

    /// 로그용 실패 사유 샘플. 최대 5개와 나머지 개수 한 줄.
    pub fn failure_sample(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .failures
            .iter()
            .take(FAILURE_SAMPLE_LIMIT)
            .cloned()
            .collect();
        if self.failures.len() > FAILURE_SAMPLE_LIMIT {
            lines.push(format!(
                "... and {} more failures",
                self.failures.len() - FAILURE_SAMPLE_LIMIT
            ));
        }
        lines
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, stage: &str) {
        if self.stage_skipped {
            tracing::info!(stage, "오늘 이미 완료됨, 건너뛰기");
            return;
        }

        tracing::info!(
            stage,
            processed = self.processed,
            updated = self.updated,
            not_found = self.not_found,
            failed = self.failed,
            skipped = self.skipped,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "스테이지 완료"
        );

        for line in self.failure_sample() {
            tracing::warn!(stage, "{}", line);
        }
    }
}
