//! Collector 에러 타입.

use fins_data::{DataError, FetchError};
use thiserror::Error;

/// 스테이지 단위의 구조적 실패.
///
/// 개별 티커 실패는 여기에 오지 않고 [`crate::StageStats`]에 집계됩니다.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 저장소 오류
    #[error("Database error: {0}")]
    Database(#[from] DataError),

    /// 설정 오류
    #[error("Config error: {0}")]
    Config(String),

    /// 공급자 대량 조회 실패 등
    #[error("Data source error: {0}")]
    DataSource(String),

    /// 종료 신호 수신
    #[error("cancelled")]
    Cancelled,
}

impl From<FetchError> for CollectorError {
    fn from(err: FetchError) -> Self {
        if err.is_shutdown() {
            CollectorError::Cancelled
        } else {
            CollectorError::DataSource(err.to_string())
        }
    }
}

impl From<sqlx::Error> for CollectorError {
    fn from(err: sqlx::Error) -> Self {
        CollectorError::Database(DataError::from(err))
    }
}

/// Collector Result 타입
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_shutdown_maps_to_cancelled() {
        assert!(matches!(
            CollectorError::from(FetchError::Shutdown),
            CollectorError::Cancelled
        ));
        assert!(matches!(
            CollectorError::from(FetchError::BadRequest("page".into())),
            CollectorError::DataSource(_)
        ));
    }
}
