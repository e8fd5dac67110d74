use std::fmt::{Display, Formatter};
use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::trading::okx::error::OkxError;
use crate::trading::okx::okx_client::OkxClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosSide {
    Long,
    Short,
}

impl Display for PosSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PosSide::Long => write!(f, "long"),
            PosSide::Short => write!(f, "short"),
        }
    }
}

impl PosSide {
    /// 开仓方向
    pub fn open_side(&self) -> Side {
        match self {
            PosSide::Long => Side::Buy,
            PosSide::Short => Side::Sell,
        }
    }

    /// 平仓（含止盈止损）方向
    pub fn close_side(&self) -> Side {
        match self {
            PosSide::Long => Side::Sell,
            PosSide::Short => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrdType {
    /// 市价单
    Market,
    /// 限价单
    Limit,
    /// 单向止盈止损
    Conditional,
}

impl Display for OrdType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OrdType::Market => write!(f, "market"),
            OrdType::Limit => write!(f, "limit"),
            OrdType::Conditional => write!(f, "conditional"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdMode {
    /// 保证金模式：isolated：逐仓
    Isolated,
    //保证金模式 ；cross：全仓
    Cross,
}

impl Display for TdMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TdMode::Isolated => write!(f, "isolated"),
            TdMode::Cross => write!(f, "cross"),
        }
    }
}

impl TdMode {
    pub fn from_cross(is_cross: bool) -> Self {
        if is_cross {
            TdMode::Cross
        } else {
            TdMode::Isolated
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("isolated") {
            TdMode::Isolated
        } else {
            TdMode::Cross
        }
    }
}

/// 止盈 / 止损
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectiveKind {
    StopLoss,
    TakeProfit,
}

impl Display for ProtectiveKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectiveKind::StopLoss => write!(f, "止损"),
            ProtectiveKind::TakeProfit => write!(f, "止盈"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    /// 产品ID，如 BTC-USDT-SWAP
    pub inst_id: String,
    /// 交易模式 isolated：逐仓 ；cross：全仓
    pub td_mode: String,
    /// 客户自定义订单ID，字母与数字组合，1-32位
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cl_ord_id: Option<String>,
    /// 订单方向 buy：买， sell：卖
    pub side: String,
    /// 持仓方向，开平仓模式下必填
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_side: Option<String>,
    /// 订单类型
    pub ord_type: String,
    /// 委托数量（张）
    pub sz: String,
    /// 是否只减仓
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderResponseData {
    pub ord_id: String,
    pub cl_ord_id: String,
    pub s_code: String,
    pub s_msg: String,
}

/// 策略委托（止盈止损）
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlgoOrderRequest {
    pub inst_id: String,
    pub td_mode: String,
    pub side: String,
    pub pos_side: String,
    pub ord_type: String,
    pub sz: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_ord_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_trigger_px_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_ord_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_trigger_px_type: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AlgoOrderResponseData {
    pub algo_id: String,
    pub s_code: String,
    pub s_msg: String,
}

/// 未完成的策略委托
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingAlgoOrder {
    pub algo_id: String,
    pub inst_id: String,
    pub pos_side: String,
    pub ord_type: String,
    pub sz: String,
    pub sl_trigger_px: String,
    pub tp_trigger_px: String,
}

impl PendingAlgoOrder {
    pub fn kind(&self) -> Option<ProtectiveKind> {
        if !self.sl_trigger_px.is_empty() {
            Some(ProtectiveKind::StopLoss)
        } else if !self.tp_trigger_px.is_empty() {
            Some(ProtectiveKind::TakeProfit)
        } else {
            None
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CancelAlgoRequest {
    pub algo_id: String,
    pub inst_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingOrder {
    pub ord_id: String,
    pub inst_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub inst_id: String,
    pub ord_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionRequest {
    pub inst_id: String,
    pub mgn_mode: String,
    pub pos_side: String,
    /// 平仓时自动撤销该持仓的挂单
    pub auto_cxl: bool,
}

/// 组装止盈或止损的条件单请求体
pub fn build_protective_algo_order(
    inst_id: &str,
    td_mode: TdMode,
    pos_side: PosSide,
    sz: &str,
    kind: ProtectiveKind,
    trigger_px: f64,
) -> AlgoOrderRequest {
    let trigger_px = format!("{:.8}", trigger_px);
    let mut request = AlgoOrderRequest {
        inst_id: inst_id.to_string(),
        td_mode: td_mode.to_string(),
        side: pos_side.close_side().to_string(),
        pos_side: pos_side.to_string(),
        ord_type: OrdType::Conditional.to_string(),
        sz: sz.to_string(),
        reduce_only: Some(true),
        ..Default::default()
    };
    match kind {
        ProtectiveKind::StopLoss => {
            request.sl_trigger_px = Some(trigger_px);
            // -1 表示市价触发
            request.sl_ord_px = Some("-1".to_string());
            request.sl_trigger_px_type = Some("last".to_string());
        }
        ProtectiveKind::TakeProfit => {
            request.tp_trigger_px = Some(trigger_px);
            request.tp_ord_px = Some("-1".to_string());
            request.tp_trigger_px_type = Some("last".to_string());
        }
    }
    request
}

pub struct OkxTrade {
    client: Arc<OkxClient>,
}

impl OkxTrade {
    pub fn new(client: Arc<OkxClient>) -> Self {
        Self { client }
    }

    /// 下单
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponseData, OkxError> {
        let body = serde_json::to_string(order)?;
        debug!("OKX下单请求: {}", body);
        let result: Vec<OrderResponseData> = self
            .client
            .send_request(Method::POST, "/api/v5/trade/order", &body)
            .await?;
        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| OkxError::Decode("下单响应为空".to_string()))?;
        info!(
            "下单成功: ordId={}, side={}, instId={}, sz={}",
            data.ord_id, order.side, order.inst_id, order.sz
        );
        Ok(data)
    }

    /// 市价全平
    pub async fn close_position(&self, request: &ClosePositionRequest) -> Result<(), OkxError> {
        let body = serde_json::to_string(request)?;
        let _: serde_json::Value = self
            .client
            .send_request(Method::POST, "/api/v5/trade/close-position", &body)
            .await?;
        info!("市价全平成功: {} {}", request.inst_id, request.pos_side);
        Ok(())
    }

    /// 策略委托下单
    pub async fn place_algo_order(
        &self,
        request: &AlgoOrderRequest,
    ) -> Result<AlgoOrderResponseData, OkxError> {
        let body = serde_json::to_string(request)?;
        debug!("OKX策略委托请求: {}", body);
        let result: Vec<AlgoOrderResponseData> = self
            .client
            .send_request(Method::POST, "/api/v5/trade/order-algo", &body)
            .await?;
        result
            .into_iter()
            .next()
            .ok_or_else(|| OkxError::Decode("策略委托响应为空".to_string()))
    }

    /// 未完成的条件单
    pub async fn get_pending_algo_orders(
        &self,
        inst_id: &str,
    ) -> Result<Vec<PendingAlgoOrder>, OkxError> {
        let path = format!(
            "/api/v5/trade/orders-algo-pending?ordType=conditional&instId={}",
            inst_id
        );
        self.client.send_request(Method::GET, &path, "").await
    }

    pub async fn cancel_algo_orders(&self, requests: &[CancelAlgoRequest]) -> Result<(), OkxError> {
        if requests.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_string(requests)?;
        let _: serde_json::Value = self
            .client
            .send_request(Method::POST, "/api/v5/trade/cancel-algos", &body)
            .await?;
        Ok(())
    }

    /// 未成交订单
    pub async fn get_pending_orders(&self, inst_id: &str) -> Result<Vec<PendingOrder>, OkxError> {
        let path = format!("/api/v5/trade/orders-pending?instId={}", inst_id);
        self.client.send_request(Method::GET, &path, "").await
    }

    pub async fn cancel_batch_orders(&self, requests: &[CancelOrderRequest]) -> Result<(), OkxError> {
        if requests.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_string(requests)?;
        let _: serde_json::Value = self
            .client
            .send_request(Method::POST, "/api/v5/trade/cancel-batch-orders", &body)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_stop_loss_algo_order() {
        let request = build_protective_algo_order(
            "BTC-USDT-SWAP",
            TdMode::Cross,
            PosSide::Long,
            "3",
            ProtectiveKind::StopLoss,
            101.8,
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["side"], "sell");
        assert_eq!(body["posSide"], "long");
        assert_eq!(body["ordType"], "conditional");
        assert_eq!(body["slTriggerPx"], "101.80000000");
        assert_eq!(body["slOrdPx"], "-1");
        assert_eq!(body["reduceOnly"], true);
        assert!(body.get("tpTriggerPx").is_none());
    }

    #[test]
    fn test_build_take_profit_algo_order_for_short() {
        let request = build_protective_algo_order(
            "ETH-USDT-SWAP",
            TdMode::Isolated,
            PosSide::Short,
            "1.5",
            ProtectiveKind::TakeProfit,
            90.0,
        );
        assert_eq!(request.side, "buy");
        assert_eq!(request.td_mode, "isolated");
        assert_eq!(request.tp_trigger_px.as_deref(), Some("90.00000000"));
        assert!(request.sl_trigger_px.is_none());
    }

    #[test]
    fn test_pending_algo_kind() {
        let order = PendingAlgoOrder {
            sl_trigger_px: "95".into(),
            ..Default::default()
        };
        assert_eq!(order.kind(), Some(ProtectiveKind::StopLoss));
        assert_eq!(PendingAlgoOrder::default().kind(), None);
    }
}
