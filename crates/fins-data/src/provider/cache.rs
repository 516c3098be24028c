//! 일 단위 디스크 응답 캐시.
//!
//! 키는 `sha256(endpoint|k=v...|YYYY-MM-DD)` 16진수이며 파라미터는 이름순으로
//! 정렬됩니다. 같은 날 같은 요청은 같은 파일을 가리키므로 동시 쓰기는
//! 같은 내용을 덮어쓸 뿐입니다. 400 응답은 `ERROR:` 접두어로 저장됩니다.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const ERROR_PREFIX: &str = "ERROR:";

/// 캐시된 응답.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedResponse {
    Body(Vec<u8>),
    /// 캐시된 400 에러 메시지
    Error(String),
}

/// 디스크 응답 캐시.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    /// 디렉터리를 만들고 보존 기간이 지난 파일을 정리합니다.
    pub fn open(dir: impl Into<PathBuf>, retention: Duration) -> io::Result<Self> {
        let cache = Self { dir: dir.into() };
        std::fs::create_dir_all(&cache.dir)?;
        let removed = cache.sweep(retention);
        if removed > 0 {
            info!(removed, dir = %cache.dir.display(), "오래된 캐시 파일 정리");
        }
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 캐시 키 생성.
    pub fn key(endpoint: &str, params: &BTreeMap<String, String>, day: NaiveDate) -> String {
        let mut raw = String::from(endpoint);
        for (k, v) in params {
            raw.push('|');
            raw.push_str(k);
            raw.push('=');
            raw.push_str(v);
        }
        raw.push('|');
        raw.push_str(&day.format("%Y-%m-%d").to_string());

        hex::encode(Sha256::digest(raw.as_bytes()))
    }

    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let data = tokio::fs::read(self.dir.join(key)).await.ok()?;
        match data.strip_prefix(ERROR_PREFIX.as_bytes()) {
            Some(msg) => Some(CachedResponse::Error(
                String::from_utf8_lossy(msg).into_owned(),
            )),
            None => Some(CachedResponse::Body(data)),
        }
    }

    pub async fn put_body(&self, key: &str, body: &[u8]) {
        self.write(key, body).await;
    }

    pub async fn put_error(&self, key: &str, message: &str) {
        let payload = format!("{ERROR_PREFIX}{message}");
        self.write(key, payload.as_bytes()).await;
    }

    /// 캐시 쓰기 실패는 요청 결과에 영향을 주지 않습니다.
    async fn write(&self, key: &str, data: &[u8]) {
        let target = self.dir.join(key);
        let tmp = self
            .dir
            .join(format!("{key}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = async {
            tokio::fs::write(&tmp, data).await?;
            tokio::fs::rename(&tmp, &target).await
        }
        .await;

        if let Err(e) = result {
            warn!(key, error = %e, "캐시 쓰기 실패");
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }

    /// 수정 시각이 `max_age`보다 오래된 파일을 삭제하고 삭제 수를 반환합니다.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age > max_age && std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }

        debug!(removed, "캐시 정리 완료");
        removed
    }
}
