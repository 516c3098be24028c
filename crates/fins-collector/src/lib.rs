//! 시장 데이터 업데이터.
//!
//! 이 crate는 단계별 배치 업데이터를 제공합니다:
//! - 심볼 목록 동기화
//! - 회사 프로필 갱신 (벌크, 개별)
//! - 현재가 갱신과 기간 샘플 증분 추가
//! - 가격 이력 갱신 (주봉/월봉 집계, USD 환산)
//! - 중복 상장 정리
//!
//! 각 스테이지는 하루 한 번만 완료되며, [`modules::run_forever`]가 다섯 스테이지를 주기적으로 실행합니다.

pub mod config;
pub mod context;
pub mod error;
pub mod modules;
pub mod pool;
pub mod stats;
pub mod writer;

pub use config::CollectorConfig;
pub use context::UpdaterContext;
pub use error::{CollectorError, Result};
pub use modules::Stage;
pub use stats::StageStats;
