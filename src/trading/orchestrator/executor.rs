//! 单条决策的执行

use anyhow::{bail, Result};
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::trading::ai::{Decision, DecisionAction, OpenIntent};
use crate::trading::decision_log::ActionRecord;
use crate::trading::exchange::{ExchangePosition, PositionSide};
use crate::trading::kelly::engine::profit_fraction;
use crate::trading::orchestrator::cycle::{CycleDeps, TraderState};

/// 最大仓位价值 = 可用保证金 × 杠杆 × 0.8
pub const MARGIN_USAGE_RATIO: f64 = 0.8;
/// 最小仓位价值（USDT）
pub const MIN_POSITION_VALUE: f64 = 10.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarginError {
    #[error("保证金不足: 可用 {free:.2} USDT，{leverage}x 杠杆最多开 {max:.2} USDT")]
    Insufficient { free: f64, leverage: u32, max: f64 },

    #[error("仓位价值 {value:.2} USDT 低于最小值 {min:.0} USDT")]
    BelowMinimum { value: f64, min: f64 },
}

/// 保证金检查，返回实际可开的仓位价值
pub fn margin_guard(requested: f64, free_margin: f64, leverage: u32) -> Result<f64, MarginError> {
    let max = MARGIN_USAGE_RATIO * free_margin.max(0.0) * leverage as f64;
    let mut value = requested;
    if value > max {
        if max < MIN_POSITION_VALUE {
            return Err(MarginError::Insufficient {
                free: free_margin,
                leverage,
                max,
            });
        }
        value = max;
    }
    if value < MIN_POSITION_VALUE {
        return Err(MarginError::BelowMinimum {
            value,
            min: MIN_POSITION_VALUE,
        });
    }
    Ok(value)
}

fn find_position<'p>(
    positions: &'p [ExchangePosition],
    symbol: &str,
    side: PositionSide,
) -> Option<&'p ExchangePosition> {
    positions.iter().find(|p| {
        p.symbol == symbol && PositionSide::parse(&p.side) == Some(side) && p.quantity != 0.0
    })
}

/// 单条决策的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// 已向交易所下单
    Written,
    /// hold / wait，无交易所调用
    NoWrite,
    /// 条件不满足，未调用交易所，不算失败
    Skipped(String),
}

/// 执行一条决策，结果写入 `action`
pub async fn execute_decision(
    deps: &CycleDeps<'_>,
    state: &mut TraderState,
    decision: &Decision,
    action: &mut ActionRecord,
) -> Result<ExecOutcome> {
    match &decision.action {
        DecisionAction::OpenLong(intent) => {
            execute_open(deps, state, &decision.symbol, PositionSide::Long, intent, action).await?;
            Ok(ExecOutcome::Written)
        }
        DecisionAction::OpenShort(intent) => {
            execute_open(deps, state, &decision.symbol, PositionSide::Short, intent, action)
                .await?;
            Ok(ExecOutcome::Written)
        }
        DecisionAction::CloseLong => {
            execute_close(deps, state, &decision.symbol, PositionSide::Long, action).await
        }
        DecisionAction::CloseShort => {
            execute_close(deps, state, &decision.symbol, PositionSide::Short, action).await
        }
        DecisionAction::Hold | DecisionAction::Wait => Ok(ExecOutcome::NoWrite),
    }
}

async fn execute_open(
    deps: &CycleDeps<'_>,
    state: &mut TraderState,
    symbol: &str,
    side: PositionSide,
    intent: &OpenIntent,
    action: &mut ActionRecord,
) -> Result<()> {
    let name = deps.config.display_name();
    let exchange = deps.exchange;
    info!(
        "[{}] 开{}仓: {} {:.2} USDT {}x",
        name, side, symbol, intent.position_size_usd, intent.leverage
    );

    let positions = exchange.get_positions().await?;
    if find_position(&positions, symbol, side).is_some() {
        bail!("{} 已有{}仓，拒绝重复开仓，如需调整请先平仓", symbol, side);
    }

    let price = exchange.get_market_price(symbol).await?;
    if !(price > 0.0) {
        bail!("{} 价格无效: {}", symbol, price);
    }

    let balance = exchange.get_balance().await?;
    let free = balance.free.unwrap_or_else(|| {
        warn!("[{}] 余额缺少可用保证金，按 0 处理", name);
        0.0
    });
    let position_value = margin_guard(intent.position_size_usd, free, intent.leverage)?;
    if position_value < intent.position_size_usd {
        warn!(
            "[{}] 保证金不足，仓位由 {:.2} 调整为 {:.2} USDT",
            name, intent.position_size_usd, position_value
        );
    }
    let quantity = position_value / price;

    action.leverage = intent.leverage;
    action.price = price;
    action.quantity = quantity;

    if let Err(e) = exchange
        .set_margin_mode(symbol, deps.config.is_cross_margin)
        .await
    {
        warn!("[{}] 设置保证金模式失败: {}", name, e);
    }

    let ack = match side {
        PositionSide::Long => exchange.open_long(symbol, quantity, intent.leverage).await?,
        PositionSide::Short => exchange.open_short(symbol, quantity, intent.leverage).await?,
    };
    action.order_id = ack.order_id;
    if ack.quantity > 0.0 {
        action.quantity = ack.quantity;
    }
    info!(
        "[{}] 开{}仓成功: {} 数量 {:.6} 订单 {}",
        name, side, symbol, action.quantity, action.order_id
    );

    state
        .tracker
        .record_open(symbol, side, Utc::now().timestamp_millis());

    if let Err(e) = exchange
        .set_stop_loss(symbol, side, action.quantity, intent.stop_loss)
        .await
    {
        warn!("[{}] 设置止损失败: {}", name, e);
    }
    if let Err(e) = exchange
        .set_take_profit(symbol, side, action.quantity, intent.take_profit)
        .await
    {
        warn!("[{}] 设置止盈失败: {}", name, e);
    }
    Ok(())
}

async fn execute_close(
    deps: &CycleDeps<'_>,
    state: &mut TraderState,
    symbol: &str,
    side: PositionSide,
    action: &mut ActionRecord,
) -> Result<ExecOutcome> {
    let name = deps.config.display_name();
    let exchange = deps.exchange;

    let positions = exchange.get_positions().await?;
    let Some(position) = find_position(&positions, symbol, side).cloned() else {
        warn!("[{}] 没有 {} 的{}仓，跳过平仓", name, symbol, side);
        return Ok(ExecOutcome::Skipped(format!("没有 {} 的{}仓", symbol, side)));
    };

    let price = if position.mark_price > 0.0 {
        position.mark_price
    } else {
        exchange.get_market_price(symbol).await?
    };
    let profit = profit_fraction(position.entry_price, price, side);

    let ack = match side {
        PositionSide::Long => exchange.close_long(symbol, 0.0).await?,
        PositionSide::Short => exchange.close_short(symbol, 0.0).await?,
    };
    action.order_id = ack.order_id;
    action.price = price;
    action.quantity = position.quantity.abs();
    action.leverage = position.leverage.unwrap_or_default();

    let now_ms = Utc::now().timestamp_millis();
    let holding_secs = state
        .tracker
        .remove(symbol, side)
        .map(|first_seen| (now_ms - first_seen).max(0) / 1000)
        .unwrap_or_default();

    deps.stats
        .record_trade_result(symbol, profit >= 0.0, profit * 100.0, holding_secs)
        .await;
    deps.stats.clear_position_peak(symbol).await;
    state.daily_pnl += position.unrealized_pnl;

    info!(
        "[{}] 平{}仓成功: {} 收益 {:+.2}% 持仓 {} 秒",
        name,
        side,
        symbol,
        profit * 100.0,
        holding_secs
    );
    Ok(ExecOutcome::Written)
}
