//! 파이프라인 전반에서 사용되는 공통 타입.

mod batch_run;
mod period;
mod price;
mod symbol;

pub use batch_run::*;
pub use period::*;
pub use price::*;
pub use symbol::*;
