//! 交易周期编排
//!
//! 冷却检查 → 构建上下文 → AI 决策 → 排序执行 → 更新止盈止损 → 记录日志

pub mod auto_trader;
pub mod cycle;
pub mod executor;

pub use auto_trader::{AccountInfo, AutoTrader, TraderDeps, TraderStatus};
pub use cycle::{
    run_cycle, update_protective_orders, CycleDeps, Pacing, TraderState,
    KELLY_TUNING_INTERVAL_CYCLES,
};
pub use executor::{
    margin_guard, ExecOutcome, MarginError, MARGIN_USAGE_RATIO, MIN_POSITION_VALUE,
};
