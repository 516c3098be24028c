//! 업데이터 스테이지 실행 기록.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::CoreError;

/// 배치 실행 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::invalid("run status", other)),
        }
    }
}

/// `batch_update_log` 한 행.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: i32,
    pub updater_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub symbols_processed: i32,
    pub symbols_updated: i32,
    pub error_message: Option<String>,
}

impl BatchRun {
    /// 주어진 날짜(UTC)에 정상 완료된 실행인지 확인.
    pub fn completed_on(&self, day: NaiveDate) -> bool {
        self.status == RunStatus::Completed
            && self
                .completed_at
                .map(|t| t.date_naive() == day)
                .unwrap_or(false)
    }
}
