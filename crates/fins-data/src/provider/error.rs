//! 공급자 요청 에러 분류.

use std::time::Duration;
use thiserror::Error;

/// 공급자 요청 에러.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 공급자에 데이터 없음 (빈 배열, 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// 400 응답. 재시도하지 않고 캐시됩니다.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// 402/429 응답
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 네트워크 에러 또는 기타 비정상 응답
    #[error("Transient error: {0}")]
    Transient(String),

    /// 재시도 횟수 소진
    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// 인증 실패 (401/403, 키 누락)
    #[error("Auth error: {0}")]
    Auth(String),

    /// 응답 본문 파싱 실패
    #[error("Parse error: {0}")]
    Parse(String),

    /// 레이트 리미터 종료
    #[error("rate limiter shutdown")]
    Shutdown,

    /// HTTP 클라이언트 생성 실패
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }

    /// 같은 요청을 다시 보낼 가치가 있는지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::RateLimited(_) | FetchError::Transient(_))
    }

    /// 재시도 전 권장 대기 시간 (`attempt`는 0부터).
    pub fn retry_delay(&self, base: Duration, attempt: u32) -> Option<Duration> {
        match self {
            FetchError::RateLimited(_) => Some(Duration::from_secs(60)),
            FetchError::Transient(_) => Some(base.saturating_mul(1u32 << attempt.min(16))),
            _ => None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, FetchError::Shutdown)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

impl From<csv::Error> for FetchError {
    fn from(err: csv::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::RateLimited("429".into()).is_retryable());
        assert!(FetchError::Transient("503".into()).is_retryable());
        assert!(!FetchError::BadRequest("400".into()).is_retryable());
        assert!(!FetchError::NotFound("[]".into()).is_retryable());
        assert!(!FetchError::Shutdown.is_retryable());
    }

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_secs(3);
        let err = FetchError::Transient("timeout".into());
        assert_eq!(err.retry_delay(base, 0), Some(Duration::from_secs(3)));
        assert_eq!(err.retry_delay(base, 2), Some(Duration::from_secs(12)));
        assert_eq!(
            FetchError::RateLimited("402".into()).retry_delay(base, 4),
            Some(Duration::from_secs(60))
        );
        assert_eq!(FetchError::BadRequest("x".into()).retry_delay(base, 0), None);
    }

    #[test]
    fn test_shutdown_message() {
        assert_eq!(FetchError::Shutdown.to_string(), "rate limiter shutdown");
    }
}
