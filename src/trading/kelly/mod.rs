pub mod engine;
pub mod types;

pub use engine::{KellyStatsEngine, ParameterAdjustment, OPTIMIZE_MIN_TRADES};
pub use types::{HistoricalStats, KellyConfig, KellyError, TradeRecord};
