//! 交易所抽象接口
//!
//! 编排层只依赖 `ExchangeAdapter`，各交易所在 infrastructure 风格的适配器中实现，
//! 交易所特有的类型（instId、合约张数、tdMode 等）不向上暴露

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app_config::trader_config::TraderConfig;
use crate::trading::okx::{OkxClient, OkxCredentials};

pub mod cache;
pub mod okx_adapter;

pub use cache::CachedExchange;
pub use okx_adapter::OkxExchangeAdapter;

/// 持仓方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    /// 大小写不敏感，兼容 buy/sell
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "long" | "buy" => Some(PositionSide::Long),
            "short" | "sell" => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl Display for PositionSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 账户余额（USDT 计价）；交易所未返回的字段为 None
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// 账户总权益（含未实现盈亏）
    pub total: Option<f64>,
    /// 钱包余额（不含未实现盈亏）
    pub wallet_balance: Option<f64>,
    /// 可用保证金
    pub free: Option<f64>,
    /// 已占用保证金
    pub used: Option<f64>,
    pub unrealized_pnl: Option<f64>,
}

/// 交易所原始持仓，数量单位为币（非合约张数），可能带符号
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    /// 通用交易对，如 BTCUSDT
    pub symbol: String,
    /// long / short，大小写以交易所为准
    pub side: String,
    pub entry_price: f64,
    pub mark_price: f64,
    pub quantity: f64,
    pub leverage: Option<u32>,
    pub unrealized_pnl: f64,
    pub liquidation_price: Option<f64>,
    pub margin_used: Option<f64>,
}

/// 下单回执
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    /// 实际下单数量（币）
    pub quantity: f64,
    pub avg_price: Option<f64>,
}

/// 交易所统一能力集
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// 获取交易所名称
    fn name(&self) -> &'static str;

    /// 获取账户余额，允许 15 秒内的缓存
    async fn get_balance(&self) -> Result<Balance>;

    /// 获取当前持仓，允许 15 秒内的缓存
    async fn get_positions(&self) -> Result<Vec<ExchangePosition>>;

    /// 市价开多
    ///
    /// # Arguments
    /// * `symbol` - 通用交易对（如"BTCUSDT"）
    /// * `quantity` - 币数量，必须大于0
    /// * `leverage` - 杠杆倍数
    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck>;

    /// 市价开空
    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck>;

    /// 平多；quantity 为 0 时全部平仓
    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck>;

    /// 平空；quantity 为 0 时全部平仓
    async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck>;

    /// 设置杠杆（幂等），范围 [1, 125]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    /// 设置保证金模式（幂等）
    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> Result<()>;

    /// 设置止损，替换该方向已有的止损单
    async fn set_stop_loss(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        trigger_price: f64,
    ) -> Result<()>;

    /// 设置止盈，替换该方向已有的止盈单
    async fn set_take_profit(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        trigger_price: f64,
    ) -> Result<()>;

    /// 撤销该交易对所有挂单（含条件单）
    async fn cancel_all_orders(&self, symbol: &str) -> Result<()>;

    /// 最新成交价
    async fn get_market_price(&self, symbol: &str) -> Result<f64>;
}

/// 按交易员配置创建交易所适配器
pub fn create_exchange_adapter(config: &TraderConfig) -> Result<Arc<dyn ExchangeAdapter>> {
    match config.exchange.to_lowercase().as_str() {
        "okx" => {
            let credentials = OkxCredentials::new(
                config.okx.api_key.clone(),
                config.okx.secret_key.clone(),
                config.okx.passphrase.clone(),
                config.okx.simulated.unwrap_or(true),
            );
            if !credentials.is_complete() {
                return Err(anyhow!("[{}] OKX凭证不完整", config.id));
            }
            let client = OkxClient::new(credentials)?;
            let adapter = OkxExchangeAdapter::new(Arc::new(client));
            Ok(Arc::new(CachedExchange::new(adapter)))
        }
        other => Err(anyhow!("不支持的交易所: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_side_parse() {
        assert_eq!(PositionSide::parse("LONG"), Some(PositionSide::Long));
        assert_eq!(PositionSide::parse(" sell "), Some(PositionSide::Short));
        assert_eq!(PositionSide::parse("net"), None);
        assert_eq!(PositionSide::Short.to_string(), "short");
    }

    #[test]
    fn test_factory_rejects_incomplete_credentials() {
        let raw = r#"{"id":"t1","ai_model":"deepseek","initial_balance":100,
            "okx":{"api_key":"","secret_key":"","passphrase":""}}"#;
        let config: TraderConfig = serde_json::from_str(raw).unwrap();
        assert!(create_exchange_adapter(&config).is_err());

        let mut config = config;
        config.exchange = "binance".into();
        let err = create_exchange_adapter(&config).err().unwrap();
        assert!(err.to_string().contains("不支持的交易所"));
    }
}
