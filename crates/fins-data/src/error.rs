//! 데이터 모듈 오류 타입.

use thiserror::Error;

use crate::provider::FetchError;

/// 데이터 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    QueryError(String),

    /// 레코드를 찾을 수 없음
    #[error("Record not found: {0}")]
    NotFound(String),

    /// 중복 레코드 (23505)
    #[error("Duplicate record: {0}")]
    DuplicateError(String),

    /// 외래 키 제약 위반 (23503)
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// 직렬화/역직렬화 오류
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// 마이그레이션 오류
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// 통화 변환 실패 (환율 없음 등)
    #[error("{0}")]
    Conversion(String),

    /// 외부 데이터 소스 오류
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DataError {
    /// 외래 키 제약 위반인지 확인.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DataError::ConstraintViolation(_))
    }

    /// 공급자에 데이터가 없는 경우인지 확인.
    pub fn is_not_found(&self) -> bool {
        match self {
            DataError::NotFound(_) => true,
            DataError::Fetch(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DataError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DataError::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL 고유 제약 조건 위반
                    "23505" => DataError::DuplicateError(db_err.message().to_string()),
                    "23503" => DataError::ConstraintViolation(db_err.message().to_string()),
                    _ => DataError::QueryError(db_err.message().to_string()),
                }
            }
            _ => DataError::QueryError(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DataError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DataError::MigrationError(err.to_string())
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::SerializationError(err.to_string())
    }
}

impl From<fins_core::CoreError> for DataError {
    fn from(err: fins_core::CoreError) -> Self {
        match err {
            fins_core::CoreError::Config(msg) => DataError::ConfigError(msg),
            other => DataError::SerializationError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_not_found_propagates() {
        let err: DataError = FetchError::NotFound("stable/profile".into()).into();
        assert!(err.is_not_found());
        assert!(!err.is_constraint_violation());
    }

    #[test]
    fn test_conversion_message_is_verbatim() {
        let err = DataError::Conversion("no forex data at 2024-01-02".into());
        assert_eq!(err.to_string(), "no forex data at 2024-01-02");
    }
}
