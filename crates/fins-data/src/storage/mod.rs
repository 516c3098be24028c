//! PostgreSQL 저장소.
//!
//! 모든 쓰기는 자연 키 기준 `ON CONFLICT` upsert입니다. 대량 쓰기는
//! UNNEST 배열 바인딩으로 청크당 한 번의 쿼리만 보냅니다.

pub mod analysis;
pub mod batch_log;
pub mod errors;
pub mod prices;
pub mod symbols;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use fins_core::DatabaseConfig;

use crate::error::{DataError, Result};

pub use analysis::{AnalysisPackage, AnalysisRepository, AnalysisResultRecord, PackageStatus};
pub use batch_log::BatchLogRepository;
pub use errors::{ErrorLogRepository, ErrorRecord};
pub use prices::PriceRepository;
pub use symbols::{DedupeCandidate, StalePriceSymbol, StoreStatus, SymbolRepository};

/// 한 번의 쓰기 쿼리에 담는 최대 행 수.
pub const WRITE_CHUNK_SIZE: usize = 1000;

/// 데이터베이스 연결 풀 래퍼.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 새 연결 풀을 생성합니다.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.resolved_url()?;
        info!(
            max_connections = config.max_connections,
            "데이터베이스 연결 중..."
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&url)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!("데이터베이스 연결 완료");
        Ok(Self { pool })
    }

    /// 기존 연결 풀에서 생성합니다.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 스키마 마이그레이션을 실행합니다.
    pub async fn migrate(&self) -> Result<()> {
        info!("마이그레이션 실행 중...");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("마이그레이션 완료");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }

    pub fn symbols(&self) -> SymbolRepository {
        SymbolRepository::new(self.clone())
    }

    pub fn prices(&self) -> PriceRepository {
        PriceRepository::new(self.clone())
    }

    pub fn batch_log(&self) -> BatchLogRepository {
        BatchLogRepository::new(self.clone())
    }

    pub fn errors(&self) -> ErrorLogRepository {
        ErrorLogRepository::new(self.clone())
    }

    pub fn analysis(&self) -> AnalysisRepository {
        AnalysisRepository::new(self.clone())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;

    /// `DATABASE_URL`이 가리키는 DB에 연결하고 마이그레이션을 적용합니다.
    pub async fn connect() -> Database {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = sqlx::PgPool::connect(&url).await.expect("connect");
        let db = Database::from_pool(pool);
        db.migrate().await.expect("migrate");
        db
    }
}
