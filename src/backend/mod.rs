//! Backend abstraction over a managed runtime

pub mod detection;
pub mod traits;

pub use detection::{detect_strategy, StrategyKind};
pub use traits::*;
