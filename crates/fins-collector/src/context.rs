//! 스테이지가 공유하는 서비스 묶음.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use fins_data::{Database, ErrorLogRepository, ForexCache, MarketDataSource};

use crate::{CollectorConfig, CollectorError, Result};

/// 업데이터 실행 컨텍스트.
///
/// DB 핸들, 공급자, 환율 캐시를 명시적으로 들고 다니며 모든 스테이지와 워커에 전달됩니다.
#[derive(Clone)]
pub struct UpdaterContext {
    pub db: Database,
    pub source: Arc<dyn MarketDataSource>,
    pub forex: Arc<ForexCache>,
    pub errors: ErrorLogRepository,
    pub config: Arc<CollectorConfig>,
    pub shutdown: CancellationToken,
}

impl UpdaterContext {
    pub fn new(
        db: Database,
        source: Arc<dyn MarketDataSource>,
        config: CollectorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let forex = Arc::new(ForexCache::new(source.clone()));
        let errors = db.errors();
        Self {
            db,
            source,
            forex,
            errors,
            config: Arc::new(config),
            shutdown,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 종료 신호가 왔으면 `Cancelled`.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CollectorError::Cancelled)
        } else {
            Ok(())
        }
    }
}
