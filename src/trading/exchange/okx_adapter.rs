//! OKX交易所适配器
//!
//! 把 OKX REST 接口适配为 `ExchangeAdapter`：通用交易对 <-> instId、币数量 <-> 合约张数、
//! 保证金模式按交易对记录并作为下单的 tdMode

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::trading::exchange::{Balance, ExchangeAdapter, ExchangePosition, OrderAck, PositionSide};
use crate::trading::okx::account::{BalanceData, OkxAccount, PositionData};
use crate::trading::okx::contract::{convert_to_contract_size, ContractSpec};
use crate::trading::okx::error::{validate_price, validate_quantity, validate_symbol};
use crate::trading::okx::market::OkxMarket;
use crate::trading::okx::okx_client::OkxClient;
use crate::trading::okx::public_data::OkxPublicData;
use crate::trading::okx::symbol::{from_okx_inst_id, to_okx_inst_id};
use crate::trading::okx::trade::{
    build_protective_algo_order, CancelAlgoRequest, CancelOrderRequest, ClosePositionRequest,
    OkxTrade, OrdType, OrderRequest, PosSide, ProtectiveKind, TdMode,
};
use crate::trading::okx::parse_f64;

impl From<PositionSide> for PosSide {
    fn from(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => PosSide::Long,
            PositionSide::Short => PosSide::Short,
        }
    }
}

pub struct OkxExchangeAdapter {
    account: OkxAccount,
    market: OkxMarket,
    public_data: OkxPublicData,
    trade: OkxTrade,
    /// instId -> 合约规格
    contract_specs: RwLock<HashMap<String, ContractSpec>>,
    /// instId -> 保证金模式，未设置时按全仓
    margin_modes: RwLock<HashMap<String, TdMode>>,
    position_mode_ready: AtomicBool,
}

impl OkxExchangeAdapter {
    pub fn new(client: Arc<OkxClient>) -> Self {
        Self {
            account: OkxAccount::new(client.clone()),
            market: OkxMarket::new(client.clone()),
            public_data: OkxPublicData::new(client.clone()),
            trade: OkxTrade::new(client),
            contract_specs: RwLock::new(HashMap::new()),
            margin_modes: RwLock::new(HashMap::new()),
            position_mode_ready: AtomicBool::new(false),
        }
    }

    /// 合约规格，查询失败时使用内置默认值（不缓存默认值）
    async fn contract_spec(&self, inst_id: &str) -> ContractSpec {
        if let Some(spec) = self.contract_specs.read().await.get(inst_id) {
            return *spec;
        }

        match self.public_data.get_instruments("SWAP", Some(inst_id)).await {
            Ok(instruments) => match instruments.into_iter().find(|i| i.inst_id == inst_id) {
                Some(instrument) => {
                    let spec = instrument.to_contract_spec();
                    debug!("OKX: 合约规格 {} {:?}", inst_id, spec);
                    self.contract_specs
                        .write()
                        .await
                        .insert(inst_id.to_string(), spec);
                    spec
                }
                None => {
                    warn!("OKX: 未找到合约 {}，使用默认规格", inst_id);
                    ContractSpec::default_for(inst_id)
                }
            },
            Err(e) => {
                warn!("OKX: 获取合约信息失败 {}: {}，使用默认规格", inst_id, e);
                ContractSpec::default_for(inst_id)
            }
        }
    }

    async fn td_mode(&self, inst_id: &str) -> TdMode {
        self.margin_modes
            .read()
            .await
            .get(inst_id)
            .copied()
            .unwrap_or(TdMode::Cross)
    }

    /// 首次开仓前确保为开平仓模式
    async fn ensure_position_mode(&self) {
        if self.position_mode_ready.load(Ordering::Acquire) {
            return;
        }
        match self.account.ensure_long_short_mode().await {
            Ok(()) => self.position_mode_ready.store(true, Ordering::Release),
            Err(e) => warn!("OKX: 设置持仓模式失败: {}", e),
        }
    }

    async fn open_position(
        &self,
        symbol: &str,
        pos_side: PosSide,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck> {
        validate_symbol(symbol)?;
        validate_quantity(quantity)?;
        let inst_id = to_okx_inst_id(symbol);

        // 准备阶段失败只告警，仍尝试下单
        if let Err(e) = self.set_leverage(symbol, leverage).await {
            warn!("OKX: 设置杠杆失败 {} {}x: {}", inst_id, leverage, e);
        }
        self.ensure_position_mode().await;

        let spec = self.contract_spec(&inst_id).await;
        let size = convert_to_contract_size(&inst_id, &spec, quantity)?;
        let order = OrderRequest {
            inst_id: inst_id.clone(),
            td_mode: self.td_mode(&inst_id).await.to_string(),
            cl_ord_id: Some(new_client_order_id()),
            side: pos_side.open_side().to_string(),
            pos_side: Some(pos_side.to_string()),
            ord_type: OrdType::Market.to_string(),
            sz: size.sz.clone(),
            reduce_only: None,
        };
        let data = self.trade.place_order(&order).await?;

        Ok(OrderAck {
            order_id: data.ord_id,
            symbol: symbol.to_string(),
            quantity: spec.contracts_to_base(size.contracts),
            avg_price: None,
        })
    }

    async fn close_position(
        &self,
        symbol: &str,
        pos_side: PosSide,
        quantity: f64,
    ) -> Result<OrderAck> {
        validate_symbol(symbol)?;
        let inst_id = to_okx_inst_id(symbol);
        let positions = self.account.get_positions().await?;
        let position = positions
            .iter()
            .find(|p| {
                p.inst_id == inst_id
                    && p.pos_side == pos_side.to_string()
                    && parse_f64(&p.pos).map(|v| v.abs() > 0.0).unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("没有找到 {} 的{}仓", symbol, pos_side))?;
        let spec = self.contract_spec(&inst_id).await;
        let held_contracts = parse_f64(&position.pos).unwrap_or_default().abs();

        if quantity <= 0.0 {
            let request = ClosePositionRequest {
                inst_id: inst_id.clone(),
                mgn_mode: TdMode::parse(&position.mgn_mode).to_string(),
                pos_side: pos_side.to_string(),
                auto_cxl: true,
            };
            self.trade.close_position(&request).await?;
            return Ok(OrderAck {
                order_id: String::new(),
                symbol: symbol.to_string(),
                quantity: spec.contracts_to_base(held_contracts),
                avg_price: parse_f64(&position.mark_px),
            });
        }

        let size = convert_to_contract_size(&inst_id, &spec, quantity)?;
        let order = OrderRequest {
            inst_id: inst_id.clone(),
            td_mode: TdMode::parse(&position.mgn_mode).to_string(),
            cl_ord_id: Some(new_client_order_id()),
            side: pos_side.close_side().to_string(),
            pos_side: Some(pos_side.to_string()),
            ord_type: OrdType::Market.to_string(),
            sz: size.sz.clone(),
            reduce_only: Some(true),
        };
        let data = self.trade.place_order(&order).await?;
        Ok(OrderAck {
            order_id: data.ord_id,
            symbol: symbol.to_string(),
            quantity: spec.contracts_to_base(size.contracts),
            avg_price: None,
        })
    }

    /// 撤掉同方向同类型的旧条件单，再挂新单
    async fn replace_protective_order(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        trigger_price: f64,
        kind: ProtectiveKind,
    ) -> Result<()> {
        validate_symbol(symbol)?;
        validate_quantity(quantity)?;
        validate_price(trigger_price)?;
        let inst_id = to_okx_inst_id(symbol);
        let pos_side = PosSide::from(side);

        let stale: Vec<CancelAlgoRequest> = self
            .trade
            .get_pending_algo_orders(&inst_id)
            .await?
            .into_iter()
            .filter(|o| o.pos_side == pos_side.to_string() && o.kind() == Some(kind))
            .map(|o| CancelAlgoRequest {
                algo_id: o.algo_id,
                inst_id: inst_id.clone(),
            })
            .collect();
        if !stale.is_empty() {
            debug!("OKX: 撤销旧{}单 {} 个 - {}", kind, stale.len(), inst_id);
            self.trade.cancel_algo_orders(&stale).await?;
        }

        let spec = self.contract_spec(&inst_id).await;
        let size = convert_to_contract_size(&inst_id, &spec, quantity)?;
        let request = build_protective_algo_order(
            &inst_id,
            self.td_mode(&inst_id).await,
            pos_side,
            &size.sz,
            kind,
            trigger_price,
        );
        let data = self.trade.place_algo_order(&request).await?;
        info!(
            "OKX: 设置{}成功 {} {} 触发价={:.4} algoId={}",
            kind, inst_id, pos_side, trigger_price, data.algo_id
        );
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for OkxExchangeAdapter {
    fn name(&self) -> &'static str {
        "okx"
    }

    async fn get_balance(&self) -> Result<Balance> {
        debug!("OKX: 获取账户余额");
        let data = self.account.get_balance(None).await?;
        Ok(map_balance(&data))
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>> {
        debug!("OKX: 获取持仓");
        let raw = self.account.get_positions().await?;
        let mut positions = Vec::with_capacity(raw.len());
        for item in raw.iter() {
            let spec = self.contract_spec(&item.inst_id).await;
            if let Some(position) = map_position(item, &spec) {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck> {
        self.open_position(symbol, PosSide::Long, quantity, leverage)
            .await
    }

    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck> {
        self.open_position(symbol, PosSide::Short, quantity, leverage)
            .await
    }

    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck> {
        self.close_position(symbol, PosSide::Long, quantity).await
    }

    async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck> {
        self.close_position(symbol, PosSide::Short, quantity).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let inst_id = to_okx_inst_id(symbol);
        let td_mode = self.td_mode(&inst_id).await;
        self.account.set_leverage(&inst_id, leverage, td_mode).await?;
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> Result<()> {
        validate_symbol(symbol)?;
        let inst_id = to_okx_inst_id(symbol);
        let td_mode = TdMode::from_cross(is_cross);
        let previous = self
            .margin_modes
            .write()
            .await
            .insert(inst_id.clone(), td_mode);
        if previous != Some(td_mode) {
            debug!("OKX: 保证金模式 {} -> {}", inst_id, td_mode);
        }
        Ok(())
    }

    async fn set_stop_loss(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        trigger_price: f64,
    ) -> Result<()> {
        self.replace_protective_order(symbol, side, quantity, trigger_price, ProtectiveKind::StopLoss)
            .await
    }

    async fn set_take_profit(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        trigger_price: f64,
    ) -> Result<()> {
        self.replace_protective_order(
            symbol,
            side,
            quantity,
            trigger_price,
            ProtectiveKind::TakeProfit,
        )
        .await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        validate_symbol(symbol)?;
        let inst_id = to_okx_inst_id(symbol);

        let orders: Vec<CancelOrderRequest> = self
            .trade
            .get_pending_orders(&inst_id)
            .await?
            .into_iter()
            .map(|o| CancelOrderRequest {
                inst_id: inst_id.clone(),
                ord_id: o.ord_id,
            })
            .collect();
        self.trade.cancel_batch_orders(&orders).await?;

        let algos: Vec<CancelAlgoRequest> = self
            .trade
            .get_pending_algo_orders(&inst_id)
            .await?
            .into_iter()
            .map(|o| CancelAlgoRequest {
                algo_id: o.algo_id,
                inst_id: inst_id.clone(),
            })
            .collect();
        self.trade.cancel_algo_orders(&algos).await?;

        info!(
            "OKX: 撤销 {} 挂单 {} 个，条件单 {} 个",
            inst_id,
            orders.len(),
            algos.len()
        );
        Ok(())
    }

    async fn get_market_price(&self, symbol: &str) -> Result<f64> {
        validate_symbol(symbol)?;
        let inst_id = to_okx_inst_id(symbol);
        Ok(self.market.get_last_price(&inst_id).await?)
    }
}

fn new_client_order_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 账户余额映射：totalEq 为总权益，USDT 可用保证金为 free，缺失时退回 adjEq
pub fn map_balance(data: &[BalanceData]) -> Balance {
    let Some(account) = data.first() else {
        return Balance::default();
    };

    let total = parse_f64(&account.total_eq);
    let unrealized_pnl = parse_f64(&account.upl);
    let usdt = account.details.iter().find(|d| d.ccy == "USDT");
    let free = usdt
        .and_then(|d| parse_f64(&d.avail_eq).or_else(|| parse_f64(&d.avail_bal)))
        .or_else(|| parse_f64(&account.adj_eq));
    let used = match (total, free) {
        (Some(total), Some(free)) => Some((total - free).max(0.0)),
        _ => None,
    };
    let wallet_balance = match (total, unrealized_pnl) {
        (Some(total), Some(upl)) => Some(total - upl),
        _ => None,
    };

    Balance {
        total,
        wallet_balance,
        free,
        used,
        unrealized_pnl,
    }
}

/// OKX 持仓 -> 通用持仓，张数换算为币数量；空仓返回 None
pub fn map_position(data: &PositionData, spec: &ContractSpec) -> Option<ExchangePosition> {
    let contracts = parse_f64(&data.pos)?;
    if contracts == 0.0 {
        return None;
    }

    let side = match data.pos_side.as_str() {
        "long" | "short" => data.pos_side.clone(),
        // 买卖模式下用数量符号判断方向
        _ if contracts > 0.0 => "long".to_string(),
        _ => "short".to_string(),
    };
    let margin_used = parse_f64(&data.imr)
        .filter(|v| *v > 0.0)
        .or_else(|| parse_f64(&data.margin).filter(|v| *v > 0.0));

    Some(ExchangePosition {
        symbol: from_okx_inst_id(&data.inst_id),
        side,
        entry_price: parse_f64(&data.avg_px).unwrap_or_default(),
        mark_price: parse_f64(&data.mark_px).unwrap_or_default(),
        quantity: spec.contracts_to_base(contracts),
        leverage: parse_f64(&data.lever).map(|v| v.round() as u32).filter(|v| *v > 0),
        unrealized_pnl: parse_f64(&data.upl).unwrap_or_default(),
        liquidation_price: parse_f64(&data.liq_px),
        margin_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::okx::account::BalanceDetail;
    use approx::assert_relative_eq;

    #[test]
    fn test_map_balance_prefers_usdt_avail_eq() {
        let data = vec![BalanceData {
            total_eq: "1200".into(),
            adj_eq: "1100".into(),
            upl: "20".into(),
            details: vec![BalanceDetail {
                ccy: "USDT".into(),
                avail_eq: "900".into(),
                avail_bal: "850".into(),
                ..Default::default()
            }],
            ..Default::default()
        }];
        let balance = map_balance(&data);
        assert_eq!(balance.total, Some(1200.0));
        assert_eq!(balance.free, Some(900.0));
        assert_eq!(balance.used, Some(300.0));
        assert_eq!(balance.wallet_balance, Some(1180.0));
    }

    #[test]
    fn test_map_balance_falls_back_to_adj_eq() {
        let data = vec![BalanceData {
            total_eq: "500".into(),
            adj_eq: "600".into(),
            ..Default::default()
        }];
        let balance = map_balance(&data);
        assert_eq!(balance.free, Some(600.0));
        // free > total 时 used 取 0
        assert_eq!(balance.used, Some(0.0));
        assert_eq!(balance.unrealized_pnl, None);
        assert_eq!(map_balance(&[]), Balance::default());
    }

    #[test]
    fn test_map_position_converts_contracts_to_base() {
        let data = PositionData {
            inst_id: "ETH-USDT-SWAP".into(),
            pos_side: "short".into(),
            pos: "-25".into(),
            avg_px: "3000".into(),
            mark_px: "2950".into(),
            upl: "125".into(),
            lever: "10".into(),
            liq_px: "".into(),
            imr: "".into(),
            margin: "740".into(),
            ..Default::default()
        };
        let spec = ContractSpec::new(0.1, 0.01, 0.01);
        let position = map_position(&data, &spec).unwrap();
        assert_eq!(position.symbol, "ETHUSDT");
        assert_eq!(position.side, "short");
        assert_relative_eq!(position.quantity, -2.5);
        assert_eq!(position.leverage, Some(10));
        assert_eq!(position.liquidation_price, None);
        assert_eq!(position.margin_used, Some(740.0));
    }

    #[test]
    fn test_map_position_skips_flat_and_infers_net_side() {
        let spec = ContractSpec::new(1.0, 1.0, 1.0);
        let flat = PositionData {
            inst_id: "SOL-USDT-SWAP".into(),
            pos: "0".into(),
            ..Default::default()
        };
        assert!(map_position(&flat, &spec).is_none());

        let net = PositionData {
            inst_id: "SOL-USDT-SWAP".into(),
            pos_side: "net".into(),
            pos: "-3".into(),
            ..Default::default()
        };
        assert_eq!(map_position(&net, &spec).unwrap().side, "short");
    }

    #[test]
    fn test_position_side_to_pos_side() {
        assert_eq!(PosSide::from(PositionSide::Long), PosSide::Long);
        assert_eq!(PosSide::from(PositionSide::Short).to_string(), "short");
    }
}
