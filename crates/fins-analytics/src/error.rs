//! 분석 에러 타입.

use fins_data::DataError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// 저장소 오류
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// 잘못된 분석 설정
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// 패키지 없음
    #[error("Not found: {0}")]
    NotFound(String),

    /// 히스토그램 직렬화 실패
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalyticsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AnalyticsError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
