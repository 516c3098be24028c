//! 설정 관리.
//!
//! 기본값 → TOML 파일(선택) → `FINS__섹션__키` 환경변수 순으로 덮어씁니다.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{CoreError, CoreResult};

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 시장 데이터 공급자 설정
    pub provider: ProviderConfig,
    /// 데이터베이스 설정
    pub database: DatabaseConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
}

/// 시장 데이터 공급자 (FMP) 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// API 키 직접 지정 (없으면 환경변수/키 파일 사용)
    pub api_key: Option<String>,
    /// 분당 허용 요청 수
    pub requests_per_minute: u32,
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 지수 백오프 기본 지연 (초)
    pub base_retry_delay_secs: u64,
    /// 요청 한도 초과 후 쿨다운 (초)
    pub recover_secs: u64,
    /// HTTP 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 응답 캐시 디렉터리 (없으면 ~/.gofins/cache)
    pub cache_dir: Option<PathBuf>,
    /// 캐시 보존 기간 (일)
    pub cache_retention_days: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://financialmodelingprep.com".to_string(),
            api_key: None,
            requests_per_minute: 3000,
            max_retries: 5,
            base_retry_delay_secs: 3,
            recover_secs: 60,
            request_timeout_secs: 30,
            cache_dir: None,
            cache_retention_days: 7,
        }
    }
}

impl ProviderConfig {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_secs(self.base_retry_delay_secs)
    }

    pub fn recover_duration(&self) -> Duration {
        Duration::from_secs(self.recover_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.cache_retention_days * 24 * 60 * 60)
    }

    /// 캐시 디렉터리 (설정값 또는 홈 디렉터리 기본 경로).
    pub fn resolved_cache_dir(&self) -> CoreResult<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".gofins").join("cache"))
            .ok_or_else(|| CoreError::Config("홈 디렉터리를 찾을 수 없습니다".to_string()))
    }
}

/// 데이터베이스 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 연결 URL (없으면 `DATABASE_URL`)
    pub url: Option<String>,
    /// 최대 연결 수
    pub max_connections: u32,
    /// 최소 유휴 연결 수
    pub min_connections: u32,
    /// 연결 획득 타임아웃 (초)
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// 연결 URL. 설정값이 없으면 `DATABASE_URL` 환경변수를 사용합니다.
    pub fn resolved_url(&self) -> CoreResult<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| {
                CoreError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
            })
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// 설정 파일(선택)과 환경변수에서 설정을 로드합니다.
    ///
    /// `.env` 파일이 있으면 먼저 읽습니다.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FINS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.requests_per_minute, 3000);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_retry_delay(), Duration::from_secs(3));
        assert_eq!(config.cache_retention(), Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_explicit_cache_dir() {
        let config = ProviderConfig {
            cache_dir: Some(PathBuf::from("/tmp/fins-cache")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_cache_dir().unwrap(),
            PathBuf::from("/tmp/fins-cache")
        );
    }

    #[test]
    fn test_deserialize_partial_section() {
        let config: AppConfig = config::Config::builder()
            .set_override("provider.requests_per_minute", 300)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.provider.requests_per_minute, 300);
        assert_eq!(config.provider.max_retries, 5);
        assert_eq!(config.database.max_connections, 20);
    }
}
