//! 공급자 요청 간격 제한.
//!
//! 모든 워커가 하나의 [`RateLimiter`]를 공유합니다. 허가 간격은
//! `60s / rpm * 1.05`이며, 대기 중에는 잠금을 유지하므로 허가 시각이
//! 항상 간격 이상 벌어집니다.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{FetchError, FetchResult};

/// 요청 로그 최대 보관 수.
pub const REQUEST_LOG_CAPACITY: usize = 1000;

/// 간격 여유 비율.
const INTERVAL_MARGIN: f64 = 1.05;

/// 요청 결과 분류 (디버깅용 로그).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Ok,
    NotFound,
    BadRequest,
    RateLimited,
    Auth,
    /// 재시도 대상 실패 (시도 번호)
    Retry(u32),
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::NotFound => f.write_str("not-found"),
            Self::BadRequest => f.write_str("bad-request"),
            Self::RateLimited => f.write_str("rate-limit"),
            Self::Auth => f.write_str("auth"),
            Self::Retry(attempt) => write!(f, "retry-{}", attempt),
        }
    }
}

/// 요청 로그 항목.
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub outcome: RequestOutcome,
}

/// 공유 요청 간격 제한기.
pub struct RateLimiter {
    interval: Duration,
    recover_duration: Duration,
    last_grant: Mutex<Option<Instant>>,
    shutdown: CancellationToken,
    log: StdMutex<VecDeque<RequestLogEntry>>,
}

impl RateLimiter {
    /// 분당 요청 수로 생성합니다. 0이면 1로 취급합니다.
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1) as f64;
        let interval = Duration::from_secs_f64(60.0 / rpm * INTERVAL_MARGIN);
        Self::with_interval(interval)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            recover_duration: Duration::from_secs(60),
            last_grant: Mutex::new(None),
            shutdown: CancellationToken::new(),
            log: StdMutex::new(VecDeque::with_capacity(REQUEST_LOG_CAPACITY)),
        }
    }

    /// 한도 초과 후 쿨다운 시간 지정.
    pub fn with_recover_duration(mut self, duration: Duration) -> Self {
        self.recover_duration = duration;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 다음 요청 허가까지 대기합니다.
    ///
    /// 종료 신호가 오면 [`FetchError::Shutdown`]을 반환하며, 대기 중인
    /// 호출도 즉시 깨어납니다.
    pub async fn wait(&self) -> FetchResult<()> {
        let mut last = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(FetchError::Shutdown),
            guard = self.last_grant.lock() => guard,
        };

        if self.shutdown.is_cancelled() {
            return Err(FetchError::Shutdown);
        }

        if let Some(prev) = *last {
            let next = prev + self.interval;
            if Instant::now() < next {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Err(FetchError::Shutdown),
                    _ = tokio::time::sleep_until(next) => {}
                }
            }
        }

        *last = Some(Instant::now());
        Ok(())
    }

    /// 한도 초과 응답 후 쿨다운. 1초 단위로 종료 신호를 확인합니다.
    pub async fn recover(&self) -> FetchResult<()> {
        let mut remaining = self.recover_duration;
        let tick = Duration::from_secs(1);

        while !remaining.is_zero() {
            let step = remaining.min(tick);
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(FetchError::Shutdown),
                _ = tokio::time::sleep(step) => {}
            }
            remaining -= step;
        }
        Ok(())
    }

    /// 종료 신호에 반응하는 대기 (재시도 백오프용).
    pub async fn pause(&self, duration: Duration) -> FetchResult<()> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(FetchError::Shutdown),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// 종료 신호. 이후 모든 `wait`/`recover`/`pause`가 실패합니다.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 요청 결과 기록. 오래된 항목부터 버립니다.
    pub fn log_request(&self, endpoint: &str, outcome: RequestOutcome) {
        let Ok(mut log) = self.log.lock() else {
            return;
        };
        if log.len() == REQUEST_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(RequestLogEntry {
            timestamp: Utc::now(),
            endpoint: endpoint.to_string(),
            outcome,
        });
    }

    /// 최근 요청 로그 (오래된 순).
    pub fn recent_requests(&self, limit: usize) -> Vec<RequestLogEntry> {
        let Ok(log) = self.log.lock() else {
            return Vec::new();
        };
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_interval_from_rpm() {
        let limiter = RateLimiter::new(3000);
        let expected = 60.0 / 3000.0 * 1.05;
        assert!((limiter.interval().as_secs_f64() - expected).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grants_are_spaced_by_interval() {
        let limiter = Arc::new(RateLimiter::with_interval(Duration::from_millis(100)));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait().await.unwrap();
                Instant::now()
            }));
        }

        let mut grants = Vec::new();
        for h in handles {
            grants.push(h.await.unwrap());
        }
        grants.sort();

        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_fails_waiters() {
        let limiter = Arc::new(RateLimiter::with_interval(Duration::from_secs(10)));
        limiter.wait().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.wait().await })
        };
        tokio::task::yield_now().await;
        limiter.shutdown();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(FetchError::Shutdown)));
        assert!(limiter.wait().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_waits_full_cooldown() {
        let limiter = RateLimiter::with_interval(Duration::from_millis(1))
            .with_recover_duration(Duration::from_secs(60));
        let start = Instant::now();
        limiter.recover().await.unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_aborts_on_shutdown() {
        let limiter = Arc::new(RateLimiter::with_interval(Duration::from_millis(1)));
        let task = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.recover().await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        limiter.shutdown();
        assert!(matches!(task.await.unwrap(), Err(FetchError::Shutdown)));
    }

    #[test]
    fn test_request_log_is_bounded() {
        let limiter = RateLimiter::new(3000);
        for i in 0..(REQUEST_LOG_CAPACITY + 5) {
            limiter.log_request(&format!("ep{i}"), RequestOutcome::Ok);
        }
        let all = limiter.recent_requests(usize::MAX);
        assert_eq!(all.len(), REQUEST_LOG_CAPACITY);
        assert_eq!(all[0].endpoint, "ep5");

        let last = limiter.recent_requests(2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].endpoint, format!("ep{}", REQUEST_LOG_CAPACITY + 4));
        assert_eq!(RequestOutcome::Retry(2).to_string(), "retry-2");
    }
}
