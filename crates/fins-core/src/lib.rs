//! # Fins Core
//!
//! 시장 데이터 파이프라인 전반에서 공유하는 핵심 타입을 제공합니다:
//! - 심볼, 가격 샘플, 배치 실행 기록
//! - 주/월 기간 계산과 일봉 집계 (YoY 포함)
//! - 설정 관리
//! - 로깅 인프라

pub mod aggregate;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use aggregate::*;
pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;
