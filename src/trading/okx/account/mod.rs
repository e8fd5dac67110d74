/*交易账户：余额、持仓、杠杆、持仓模式*/
use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::trading::okx::error::{validate_leverage, OkxError};
use crate::trading::okx::okx_client::OkxClient;
use crate::trading::okx::trade::{PosSide, TdMode};

/// 账户余额
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BalanceData {
    /// 美金层面权益
    pub total_eq: String,
    /// 美金层面有效保证金
    pub adj_eq: String,
    /// 美金层面逐仓仓位权益
    pub iso_eq: String,
    /// 美金层面未实现盈亏
    pub upl: String,
    pub details: Vec<BalanceDetail>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BalanceDetail {
    pub ccy: String,
    /// 币种总权益
    pub eq: String,
    /// 可用保证金
    pub avail_eq: String,
    /// 可用余额
    pub avail_bal: String,
    pub cash_bal: String,
    /// 未实现盈亏
    pub upl: String,
}

/// 持仓信息
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionData {
    /// 产品ID，如 BTC-USDT-SWAP
    pub inst_id: String,
    /// 保证金模式 (cross: 全仓, isolated: 逐仓)
    pub mgn_mode: String,
    /// 持仓方向 (long / short / net)
    pub pos_side: String,
    /// 持仓数量（张），买卖模式下可为负
    pub pos: String,
    /// 开仓平均价
    pub avg_px: String,
    /// 最新标记价格
    pub mark_px: String,
    /// 未实现收益（以标记价格计算）
    pub upl: String,
    pub upl_ratio: String,
    /// 杠杆倍数
    pub lever: String,
    /// 预估强平价
    pub liq_px: String,
    /// 初始保证金，仅适用于全仓
    pub imr: String,
    /// 保证金余额，仅适用于逐仓
    pub margin: String,
    /// 持仓创建时间
    pub c_time: String,
}

/// 账户配置
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountConfig {
    /// long_short_mode：开平仓模式 net_mode：买卖模式
    pub pos_mode: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SetLeverageRequest {
    pub inst_id: String,
    pub lever: String,
    pub mgn_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_side: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct SetPositionModeRequest {
    pos_mode: String,
}

pub const LONG_SHORT_MODE: &str = "long_short_mode";

pub struct OkxAccount {
    client: Arc<OkxClient>,
}

impl OkxAccount {
    pub fn new(client: Arc<OkxClient>) -> Self {
        Self { client }
    }

    /// 获取交易账户余额
    pub async fn get_balance(&self, ccy: Option<&str>) -> Result<Vec<BalanceData>, OkxError> {
        let mut path = "/api/v5/account/balance".to_string();
        if let Some(ccy) = ccy {
            path.push_str(&format!("?ccy={}", ccy));
        }
        self.client.send_request(Method::GET, &path, "").await
    }

    /// 获取永续合约持仓
    pub async fn get_positions(&self) -> Result<Vec<PositionData>, OkxError> {
        self.client
            .send_request(Method::GET, "/api/v5/account/positions?instType=SWAP", "")
            .await
    }

    pub async fn get_account_config(&self) -> Result<AccountConfig, OkxError> {
        let configs: Vec<AccountConfig> = self
            .client
            .send_request(Method::GET, "/api/v5/account/config", "")
            .await?;
        configs
            .into_iter()
            .next()
            .ok_or_else(|| OkxError::Decode("账户配置为空".to_string()))
    }

    pub async fn set_position_mode(&self, pos_mode: &str) -> Result<(), OkxError> {
        let body = serde_json::to_string(&SetPositionModeRequest {
            pos_mode: pos_mode.to_string(),
        })?;
        let _: serde_json::Value = self
            .client
            .send_request(Method::POST, "/api/v5/account/set-position-mode", &body)
            .await?;
        Ok(())
    }

    /// 确保账户处于开平仓（多空）模式，已是该模式时视为成功
    pub async fn ensure_long_short_mode(&self) -> Result<(), OkxError> {
        let config = self.get_account_config().await?;
        if config.pos_mode == LONG_SHORT_MODE {
            return Ok(());
        }

        info!("当前持仓模式为 {}，切换为 {}", config.pos_mode, LONG_SHORT_MODE);
        match self.set_position_mode(LONG_SHORT_MODE).await {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().to_lowercase().contains("already") => {
                warn!("持仓模式已是多空模式: {}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// 设置杠杆；逐仓模式下多空方向需分别设置
    pub async fn set_leverage(
        &self,
        inst_id: &str,
        leverage: u32,
        td_mode: TdMode,
    ) -> Result<(), OkxError> {
        validate_leverage(leverage)?;

        let requests: Vec<SetLeverageRequest> = match td_mode {
            TdMode::Cross => vec![SetLeverageRequest {
                inst_id: inst_id.to_string(),
                lever: leverage.to_string(),
                mgn_mode: td_mode.to_string(),
                pos_side: None,
            }],
            TdMode::Isolated => [PosSide::Long, PosSide::Short]
                .iter()
                .map(|pos_side| SetLeverageRequest {
                    inst_id: inst_id.to_string(),
                    lever: leverage.to_string(),
                    mgn_mode: td_mode.to_string(),
                    pos_side: Some(pos_side.to_string()),
                })
                .collect(),
        };

        for request in requests {
            let body = serde_json::to_string(&request)?;
            let _: serde_json::Value = self
                .client
                .send_request(Method::POST, "/api/v5/account/set-leverage", &body)
                .await?;
        }
        info!("设置杠杆成功: {} {}x {}", inst_id, leverage, td_mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_data_tolerates_missing_fields() {
        let raw = r#"{"instId":"BTC-USDT-SWAP","posSide":"long","pos":"3","avgPx":"100","markPx":"106","lever":""}"#;
        let position: PositionData = serde_json::from_str(raw).unwrap();
        assert_eq!(position.inst_id, "BTC-USDT-SWAP");
        assert_eq!(position.lever, "");
        assert_eq!(position.liq_px, "");
    }

    #[test]
    fn test_set_leverage_request_skips_pos_side() {
        let request = SetLeverageRequest {
            inst_id: "BTC-USDT-SWAP".into(),
            lever: "10".into(),
            mgn_mode: "cross".into(),
            pos_side: None,
        };
        let body = serde_json::to_string(&request).unwrap();
        assert_eq!(
            body,
            r#"{"instId":"BTC-USDT-SWAP","lever":"10","mgnMode":"cross"}"#
        );
    }
}
