//! Financial Modeling Prep HTTP 클라이언트.
//!
//! 모든 요청은 같은 경로를 거칩니다:
//! 1. 당일 디스크 캐시 확인 (캐시된 400 에러는 그대로 재현)
//! 2. 레이트 리미터 대기 후 요청
//! 3. 응답 분류: 성공 → 캐시, 400 → 에러 캐시 후 종료,
//!    402/429 → 쿨다운 후 재시도, 그 외 → 지수 백오프 재시도

use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use fins_core::ProviderConfig;

use super::cache::{CachedResponse, ResponseCache};
use super::error::{FetchError, FetchResult};
use super::rate_limiter::{RateLimiter, RequestOutcome};

/// API 키 환경변수.
pub const API_KEY_ENV: &str = "FMP_API_KEY";

/// 최소 API 키 길이.
const MIN_API_KEY_LEN: usize = 10;

/// 이보다 오래 걸린 요청은 경고로 남깁니다.
const SLOW_REQUEST: Duration = Duration::from_secs(2);

/// FMP API 클라이언트.
#[derive(Debug)]
pub struct FmpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
    cache: ResponseCache,
    max_retries: u32,
    base_retry_delay: Duration,
}

impl FmpClient {
    /// 설정에서 클라이언트를 생성합니다. 캐시 디렉터리 정리도 이때 수행됩니다.
    pub fn from_config(config: &ProviderConfig) -> FetchResult<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref(), default_key_file().as_deref())?;
        let cache_dir = config
            .resolved_cache_dir()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        let cache = ResponseCache::open(cache_dir, config.cache_retention())
            .map_err(|e| FetchError::Client(format!("캐시 디렉터리 생성 실패: {}", e)))?;
        let limiter = Arc::new(
            RateLimiter::new(config.requests_per_minute)
                .with_recover_duration(config.recover_duration()),
        );

        Ok(Self::new(&config.base_url, api_key, limiter, cache, config.request_timeout())?
            .with_retry_policy(config.max_retries, config.base_retry_delay()))
    }

    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        limiter: Arc<RateLimiter>,
        cache: ResponseCache,
        timeout: Duration,
    ) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            limiter,
            cache,
            max_retries: 5,
            base_retry_delay: Duration::from_secs(3),
        })
    }

    /// 재시도 횟수와 백오프 기본 지연을 지정합니다.
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_retry_delay = base_delay;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// 진행 중인 대기를 모두 깨우고 이후 요청을 거부합니다.
    pub fn shutdown(&self) {
        self.limiter.shutdown();
    }

    /// 원시 응답 본문을 가져옵니다.
    pub async fn fetch(&self, endpoint: &str, params: &[(&str, &str)]) -> FetchResult<Vec<u8>> {
        let params: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let key = ResponseCache::key(endpoint, &params, Utc::now().date_naive());

        match self.cache.get(&key).await {
            Some(CachedResponse::Body(body)) => {
                debug!(endpoint, bytes = body.len(), "캐시 적중");
                return Ok(body);
            }
            Some(CachedResponse::Error(message)) => {
                debug!(endpoint, "캐시 적중 (에러)");
                return Err(FetchError::BadRequest(message));
            }
            None => {}
        }

        let url = format!("{}/{}", self.base_url, endpoint);
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            self.limiter.wait().await?;

            let started = Instant::now();
            let result = self
                .http
                .get(&url)
                .query(&params)
                .query(&[("apikey", self.api_key.as_str())])
                .send()
                .await;

            let (status, body) = match result {
                Ok(response) => {
                    let status = response.status();
                    match response.bytes().await {
                        Ok(body) => (status, body),
                        Err(e) => {
                            last_error = e.to_string();
                            self.retry_after_error(endpoint, attempt, &last_error).await?;
                            continue;
                        }
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.retry_after_error(endpoint, attempt, &last_error).await?;
                    continue;
                }
            };

            let elapsed = started.elapsed();
            if elapsed > SLOW_REQUEST {
                warn!(endpoint, elapsed_ms = elapsed.as_millis() as u64, status = status.as_u16(), "느린 요청");
            }

            match classify(endpoint, status, &body) {
                None => {
                    self.limiter.log_request(endpoint, RequestOutcome::Ok);
                    self.cache.put_body(&key, &body).await;
                    return Ok(body.to_vec());
                }
                Some(FetchError::BadRequest(message)) => {
                    warn!(endpoint, message = %message, "잘못된 요청");
                    self.limiter.log_request(endpoint, RequestOutcome::BadRequest);
                    self.cache.put_error(&key, &message).await;
                    return Err(FetchError::BadRequest(message));
                }
                Some(FetchError::RateLimited(message)) => {
                    warn!(endpoint, "요청 한도 초과 - 쿨다운");
                    self.limiter.log_request(endpoint, RequestOutcome::RateLimited);
                    last_error = message;
                    self.limiter.recover().await?;
                }
                Some(err @ FetchError::NotFound(_)) => {
                    self.limiter.log_request(endpoint, RequestOutcome::NotFound);
                    return Err(err);
                }
                Some(err @ FetchError::Auth(_)) => {
                    self.limiter.log_request(endpoint, RequestOutcome::Auth);
                    return Err(err);
                }
                Some(err) => {
                    last_error = err.to_string();
                    self.retry_after_error(endpoint, attempt, &last_error).await?;
                }
            }
        }

        warn!(endpoint, attempts = self.max_retries, error = %last_error, "요청 실패");
        Err(FetchError::Exhausted {
            attempts: self.max_retries,
            last: last_error,
        })
    }

    /// JSON 응답을 역직렬화합니다.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> FetchResult<T> {
        let body = self.fetch(endpoint, params).await?;
        serde_json::from_slice(&body).map_err(|e| {
            FetchError::Parse(format!("{}: {}", endpoint, e))
        })
    }

    /// 비어 있으면 `NotFound`인 JSON 배열 응답.
    pub async fn fetch_non_empty<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        subject: &str,
    ) -> FetchResult<Vec<T>> {
        let items: Vec<T> = self.fetch_json(endpoint, params).await?;
        if items.is_empty() {
            return Err(FetchError::NotFound(subject.to_string()));
        }
        Ok(items)
    }

    async fn retry_after_error(&self, endpoint: &str, attempt: u32, error: &str) -> FetchResult<()> {
        warn!(
            endpoint,
            attempt = attempt + 1,
            max_retries = self.max_retries,
            error,
            "요청 에러 - 재시도"
        );
        self.limiter.log_request(endpoint, RequestOutcome::Retry(attempt));
        if attempt + 1 < self.max_retries {
            let delay = FetchError::Transient(error.to_string())
                .retry_delay(self.base_retry_delay, attempt)
                .unwrap_or(self.base_retry_delay);
            self.limiter.pause(delay).await?;
        }
        Ok(())
    }
}

/// 응답 상태를 분류합니다. 성공이면 `None`.
fn classify(endpoint: &str, status: StatusCode, body: &[u8]) -> Option<FetchError> {
    let text = || String::from_utf8_lossy(body).chars().take(500).collect::<String>();

    match status {
        s if s.is_success() => None,
        StatusCode::BAD_REQUEST => Some(FetchError::BadRequest(format!(
            "status 400 - {}",
            text()
        ))),
        StatusCode::PAYMENT_REQUIRED | StatusCode::TOO_MANY_REQUESTS => {
            Some(FetchError::RateLimited(format!("status {} - {}", status.as_u16(), text())))
        }
        StatusCode::NOT_FOUND => Some(FetchError::NotFound(endpoint.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(FetchError::Auth(format!(
            "status {} - {}",
            status.as_u16(),
            text()
        ))),
        s => Some(FetchError::Transient(format!("status {} - {}", s.as_u16(), text()))),
    }
}

fn default_key_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".fins")
            .join("config")
            .join("financialmodelingprep.key")
    })
}

/// API 키 결정: 설정값 → `FMP_API_KEY` → 키 파일.
pub fn resolve_api_key(explicit: Option<&str>, key_file: Option<&Path>) -> FetchResult<String> {
    let key = if let Some(key) = explicit.filter(|k| !k.trim().is_empty()) {
        key.trim().to_string()
    } else if let Some(key) = std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()) {
        key.trim().to_string()
    } else {
        let path = key_file.ok_or_else(|| {
            FetchError::Auth(format!("{} 환경변수가 없고 키 파일 경로를 알 수 없습니다", API_KEY_ENV))
        })?;
        std::fs::read_to_string(path)
            .map_err(|e| {
                FetchError::Auth(format!(
                    "{} 환경변수가 없고 키 파일을 읽을 수 없습니다 ({}): {}",
                    API_KEY_ENV,
                    path.display(),
                    e
                ))
            })?
            .trim()
            .to_string()
    };

    if key.len() < MIN_API_KEY_LEN {
        return Err(FetchError::Auth("invalid API key: too short".to_string()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const KEY: &str = "test-key-0123456789";

    fn client(server: &mockito::Server, dir: &Path, max_retries: u32) -> FmpClient {
        let limiter = Arc::new(
            RateLimiter::with_interval(Duration::from_millis(1))
                .with_recover_duration(Duration::from_millis(5)),
        );
        let cache = ResponseCache::open(dir, Duration::from_secs(3600)).unwrap();
        FmpClient::new(&server.url(), KEY, limiter, cache, Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(max_retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_is_cached_for_the_day() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/stable/profile")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "AAPL".into()),
                Matcher::UrlEncoded("apikey".into(), KEY.into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"symbol":"AAPL"}]"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client(&server, dir.path(), 3);

        let first = client.fetch("stable/profile", &[("symbol", "AAPL")]).await.unwrap();
        let second = client.fetch("stable/profile", &[("symbol", "AAPL")]).await.unwrap();
        assert_eq!(first, second);
        mock.assert_async().await;

        let log = client.limiter().recent_requests(10);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, RequestOutcome::Ok);
    }

    #[tokio::test]
    async fn test_bad_request_is_terminal_and_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/stable/profile-bulk")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("Invalid or missing query parameter")
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client(&server, dir.path(), 5);

        for _ in 0..2 {
            let err = client.fetch("stable/profile-bulk", &[("part", "7")]).await.unwrap_err();
            assert!(matches!(err, FetchError::BadRequest(ref m) if m.contains("status 400")));
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/stable/stock-list")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client(&server, dir.path(), 3);

        let err = client.fetch("stable/stock-list", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        mock.assert_async().await;

        // 실패는 캐시되지 않음
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_recovers_and_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/stable/index-list")
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client(&server, dir.path(), 2);

        let err = client.fetch("stable/index-list", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 2, .. }));
        mock.assert_async().await;

        let outcomes: Vec<_> = client
            .limiter()
            .recent_requests(10)
            .into_iter()
            .map(|e| e.outcome)
            .collect();
        assert_eq!(outcomes, vec![RequestOutcome::RateLimited, RequestOutcome::RateLimited]);
    }

    #[tokio::test]
    async fn test_fetch_non_empty_maps_empty_array_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stable/profile")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client(&server, dir.path(), 2);

        let err = client
            .fetch_non_empty::<serde_json::Value>("stable/profile", &[("symbol", "ZZZZ")], "ZZZZ")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_requests() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let client = client(&server, dir.path(), 2);

        client.shutdown();
        let err = client.fetch("stable/stock-list", &[]).await.unwrap_err();
        assert!(err.is_shutdown());
    }

    #[test]
    fn test_classify_statuses() {
        assert!(classify("x", StatusCode::OK, b"").is_none());
        assert!(matches!(classify("x", StatusCode::PAYMENT_REQUIRED, b""), Some(FetchError::RateLimited(_))));
        assert!(matches!(classify("x", StatusCode::NOT_FOUND, b""), Some(FetchError::NotFound(_))));
        assert!(matches!(classify("x", StatusCode::BAD_GATEWAY, b""), Some(FetchError::Transient(_))));
    }

    #[test]
    fn test_api_key_from_file_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");

        assert_eq!(
            resolve_api_key(Some("  explicit-key-123  "), None).unwrap(),
            "explicit-key-123"
        );
        assert!(resolve_api_key(Some("short"), None).is_err());

        if std::env::var(API_KEY_ENV).is_err() {
            std::fs::write(&path, "file-key-abcdefgh\n").unwrap();
            assert_eq!(resolve_api_key(None, Some(&path)).unwrap(), "file-key-abcdefgh");
            assert!(resolve_api_key(None, Some(&dir.path().join("missing"))).is_err());
        }
    }
}
