use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_config::env::{env_f64, env_i64};

/// 波动率数据不足时的默认值
pub const DEFAULT_VOLATILITY: f64 = 0.08;
/// 平均亏损未知时的默认值
pub const DEFAULT_AVG_LOSS: f64 = 0.08;

/// 凯利公式参数，运行期可调整
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KellyConfig {
    /// 凯利比例调整系数（半凯利）
    pub kelly_ratio_adjustment: f64,
    /// 目标盈利 / 当前盈利 的上限
    pub max_take_profit_multiplier: f64,
    /// 每天的时间衰减系数
    pub time_decay_lambda: f64,
    pub min_trades_for_kelly: u32,
    pub volatility_window: usize,
    pub save_interval_seconds: u64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            kelly_ratio_adjustment: 0.5,
            max_take_profit_multiplier: 3.0,
            time_decay_lambda: 0.01,
            min_trades_for_kelly: 5,
            volatility_window: 20,
            save_interval_seconds: 300,
        }
    }
}

impl KellyConfig {
    /// 环境变量覆盖，非法值忽略
    pub fn with_env_overrides(mut self) -> Self {
        let ratio = env_f64("KELLY_RATIO_ADJUSTMENT", -1.0);
        if ratio > 0.0 {
            self.kelly_ratio_adjustment = ratio;
        }
        let multiplier = env_f64("KELLY_MAX_TP_MULTIPLIER", -1.0);
        if multiplier > 0.0 {
            self.max_take_profit_multiplier = multiplier;
        }
        let lambda = env_f64("KELLY_TIME_DECAY_LAMBDA", -1.0);
        if lambda >= 0.0 {
            self.time_decay_lambda = lambda;
        }
        let min_trades = env_i64("KELLY_MIN_TRADES", -1);
        if min_trades > 0 {
            self.min_trades_for_kelly = min_trades as u32;
        }
        let window = env_i64("KELLY_VOLATILITY_WINDOW", -1);
        if window > 1 {
            self.volatility_window = window as usize;
        }
        let interval = env_i64("KELLY_SAVE_INTERVAL_SECONDS", -1);
        if interval > 0 {
            self.save_interval_seconds = interval as u64;
        }
        self
    }

    /// 交易历史保留条数
    pub fn history_capacity(&self) -> usize {
        self.volatility_window * 2
    }
}

/// 单笔已平仓交易
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TradeRecord {
    /// 平仓时间（秒）
    pub timestamp: i64,
    /// 收益率（小数，亏损为负）
    pub profit_pct: f64,
    pub is_win: bool,
    /// 记录时的权重
    pub weight: f64,
    /// 持仓时长（秒）
    pub holding_time: i64,
}

/// 单个交易对的历史统计
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct HistoricalStats {
    pub symbol: String,
    pub total_trades: u32,
    pub profitable_trades: u32,
    pub total_profit_pct: f64,
    /// 累计亏损幅度（绝对值）
    pub total_loss_pct: f64,
    /// 未加权胜率
    pub win_rate: f64,
    pub avg_win_pct: f64,
    /// 平均亏损幅度（绝对值）
    pub avg_loss_pct: f64,
    /// 最大单笔盈利
    pub max_profit_pct: f64,
    /// 最大单笔亏损幅度，不是权益回撤
    pub max_drawdown_pct: f64,
    pub updated_at: i64,
    pub trade_history: Vec<TradeRecord>,
    pub weighted_win_rate: f64,
    pub volatility: f64,
    pub time_decay_factor: f64,
}

impl HistoricalStats {
    pub fn new(symbol: impl Into<String>, time_decay_lambda: f64) -> Self {
        Self {
            symbol: symbol.into(),
            volatility: DEFAULT_VOLATILITY,
            time_decay_factor: time_decay_lambda,
            ..Default::default()
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KellyError {
    #[error("价格无效: entry_price={entry:.6}, current_price={current:.6}")]
    InvalidPrice { entry: f64, current: f64 },

    #[error("统计数据持久化失败: {0}")]
    Persistence(String),
}
