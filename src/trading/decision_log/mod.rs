//! 决策日志
//!
//! 每个周期一条 `DecisionRecord`，记录输入快照、提示词、思维链、AI 决策与执行结果。
//! 日志只追加，最近的记录同时用于计算历史表现反馈给 AI。

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trading::context::{AccountSnapshot, PositionSnapshot};

pub mod file_logger;
pub mod performance;

pub use file_logger::FileDecisionLogger;
pub use performance::{analyze_records, PerformanceSummary, SymbolPerformance, TradeOutcome};

/// 单个动作的执行结果
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ActionRecord {
    /// open_long / open_short / close_long / close_short / hold / wait
    pub action: String,
    pub symbol: String,
    /// 实际下单数量（币）
    pub quantity: f64,
    pub leverage: u32,
    /// 执行时的市场价
    pub price: f64,
    pub order_id: String,
    pub timestamp: i64,
    pub success: bool,
    pub error: String,
    /// 未执行也不算失败，原因写在 skip_reason
    pub skipped: bool,
    pub skip_reason: String,
}

impl ActionRecord {
    pub fn new(action: &str, symbol: &str) -> Self {
        Self {
            action: action.to_string(),
            symbol: symbol.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.success = false;
        self.skipped = true;
        self.skip_reason = reason.into();
    }
}

/// 一个交易周期的完整记录
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub cycle_number: u64,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub input_prompt: String,
    #[serde(default)]
    pub cot_trace: String,
    /// AI 返回的决策 JSON 原文
    #[serde(default)]
    pub decision_json: String,
    #[serde(default)]
    pub account_state: AccountSnapshot,
    #[serde(default)]
    pub positions: Vec<PositionSnapshot>,
    #[serde(default)]
    pub candidate_coins: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<ActionRecord>,
    #[serde(default)]
    pub execution_log: Vec<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
}

impl DecisionRecord {
    /// 新周期记录，默认成功，出错时由调用方改写
    pub fn new(cycle_number: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cycle_number,
            system_prompt: String::new(),
            input_prompt: String::new(),
            cot_trace: String::new(),
            decision_json: String::new(),
            account_state: AccountSnapshot::default(),
            positions: Vec::new(),
            candidate_coins: Vec::new(),
            decisions: Vec::new(),
            execution_log: Vec::new(),
            success: true,
            error_message: String::new(),
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.error_message = message.into();
    }
}

/// 决策日志存储
#[async_trait]
pub trait DecisionLogger: Send + Sync {
    /// 追加一条周期记录
    async fn log_decision(&self, record: &DecisionRecord) -> Result<()>;

    /// 最近 n 条记录，按时间正序
    async fn latest_records(&self, n: usize) -> Result<Vec<DecisionRecord>>;

    /// 基于最近 n 条记录统计交易表现
    async fn analyze_performance(&self, n: usize) -> Result<PerformanceSummary> {
        let records = self.latest_records(n).await?;
        Ok(analyze_records(&records))
    }
}
