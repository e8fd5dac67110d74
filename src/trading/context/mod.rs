//! 交易上下文
//!
//! 每个周期开始时对账户、持仓、候选币种和历史表现做一次快照，
//! 快照之后不再修改，原样交给 AI 客户端和决策日志。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trading::decision_log::PerformanceSummary;
use crate::trading::exchange::PositionSide;

pub mod builder;
pub mod candidate_pool;
pub mod tracker;

pub use builder::{ContextBuilder, CycleMeta};
pub use candidate_pool::{
    create_candidate_pool, CandidatePool, HttpCandidatePool, StaticCandidatePool,
};
pub use tracker::PositionTracker;

/// 交易所未返回杠杆时的默认值
pub const DEFAULT_POSITION_LEVERAGE: u32 = 10;
/// 历史表现统计的记录条数
pub const PERFORMANCE_LOOKBACK: usize = 100;

/// 账户快照（USDT）
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AccountSnapshot {
    pub total_equity: f64,
    pub available_balance: f64,
    pub used_margin: f64,
    pub unrealized_pnl: f64,
    pub initial_balance: f64,
    /// 权益 - 初始资金
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub daily_pnl: f64,
    pub position_count: usize,
    pub margin_used_pct: f64,
}

/// 持仓快照，数量恒为非负
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub mark_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    /// 相对保证金的收益率（百分数）
    pub unrealized_pnl_pct: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
    /// 首次观察到该持仓的时间（毫秒）
    pub update_time: i64,
}

/// 候选币种及来源标签（custom / default / ai500 / oi_top）
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidateCoin {
    pub symbol: String,
    pub sources: Vec<String>,
}

impl CandidateCoin {
    pub fn new(symbol: impl Into<String>, source: &str) -> Self {
        Self {
            symbol: symbol.into(),
            sources: vec![source.to_string()],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeverageHints {
    pub btc_eth_leverage: u32,
    pub altcoin_leverage: u32,
}

/// 风控参考值，只出现在提示词中
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RiskHints {
    pub max_daily_loss: f64,
    pub max_drawdown: f64,
    pub stop_trading_minutes: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Context {
    pub current_time: DateTime<Utc>,
    pub runtime_minutes: i64,
    pub call_count: u64,
    pub account: AccountSnapshot,
    pub positions: Vec<PositionSnapshot>,
    pub candidate_coins: Vec<CandidateCoin>,
    pub performance: Option<PerformanceSummary>,
    pub leverage: LeverageHints,
    pub risk: RiskHints,
}

impl Context {
    pub fn find_position(&self, symbol: &str, side: PositionSide) -> Option<&PositionSnapshot> {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol && p.side == side)
    }

    pub fn candidate_symbols(&self) -> Vec<String> {
        self.candidate_coins.iter().map(|c| c.symbol.clone()).collect()
    }
}
