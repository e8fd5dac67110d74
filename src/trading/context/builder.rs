use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::app_config::trader_config::TraderConfig;
use crate::trading::context::candidate_pool::{CandidatePool, StaticCandidatePool, AI500_LIMIT};
use crate::trading::context::{
    AccountSnapshot, CandidateCoin, Context, LeverageHints, PositionSnapshot, PositionTracker,
    RiskHints, DEFAULT_POSITION_LEVERAGE, PERFORMANCE_LOOKBACK,
};
use crate::trading::decision_log::DecisionLogger;
use crate::trading::exchange::{Balance, ExchangeAdapter, ExchangePosition, PositionSide};
use crate::trading::okx::symbol::normalize_symbol;

/// 周期元数据，由编排器维护
#[derive(Debug, Clone, Copy)]
pub struct CycleMeta {
    pub now: DateTime<Utc>,
    pub call_count: u64,
    pub runtime_minutes: i64,
    pub daily_pnl: f64,
}

/// 上下文构建器，除首次观察时间外无副作用
pub struct ContextBuilder<'a> {
    exchange: &'a dyn ExchangeAdapter,
    pool: &'a dyn CandidatePool,
    logger: &'a dyn DecisionLogger,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(
        exchange: &'a dyn ExchangeAdapter,
        pool: &'a dyn CandidatePool,
        logger: &'a dyn DecisionLogger,
    ) -> Self {
        Self {
            exchange,
            pool,
            logger,
        }
    }

    pub async fn build(
        &self,
        config: &TraderConfig,
        meta: CycleMeta,
        tracker: &mut PositionTracker,
    ) -> Result<Context> {
        let name = config.display_name();
        let balance = self
            .exchange
            .get_balance()
            .await
            .context("获取账户余额失败")?;
        let raw_positions = self
            .exchange
            .get_positions()
            .await
            .context("获取持仓失败")?;

        let now_ms = meta.now.timestamp_millis();
        let mut positions = Vec::with_capacity(raw_positions.len());
        for raw in &raw_positions {
            let Some(side) = PositionSide::parse(&raw.side) else {
                warn!("[{}] 未知持仓方向 {} {}，跳过", name, raw.symbol, raw.side);
                continue;
            };
            if raw.quantity == 0.0 {
                continue;
            }
            let first_seen = tracker.observe(&raw.symbol, side, now_ms);
            positions.push(position_snapshot(raw, side, first_seen));
        }
        let alive: Vec<(String, PositionSide)> =
            positions.iter().map(|p| (p.symbol.clone(), p.side)).collect();
        tracker.prune(&alive);

        let account = account_snapshot(
            name,
            &balance,
            &positions,
            config.initial_balance,
            meta.daily_pnl,
        );

        let candidate_coins = resolve_candidates(name, config, self.pool).await;

        let performance = match self.logger.analyze_performance(PERFORMANCE_LOOKBACK).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("[{}] 分析历史表现失败: {}", name, e);
                None
            }
        };

        debug!(
            "[{}] 上下文: 权益 {:.2}, 可用 {:.2}, 持仓 {}, 候选 {}",
            name,
            account.total_equity,
            account.available_balance,
            positions.len(),
            candidate_coins.len()
        );

        Ok(Context {
            current_time: meta.now,
            runtime_minutes: meta.runtime_minutes,
            call_count: meta.call_count,
            account,
            positions,
            candidate_coins,
            performance,
            leverage: LeverageHints {
                btc_eth_leverage: config.btc_eth_leverage,
                altcoin_leverage: config.altcoin_leverage,
            },
            risk: RiskHints {
                max_daily_loss: config.max_daily_loss,
                max_drawdown: config.max_drawdown,
                stop_trading_minutes: config.stop_trading_minutes,
            },
        })
    }
}

/// 原始持仓标准化：数量取绝对值，缺省杠杆 10，保证金缺失时按 数量 × 标记价 / 杠杆 估算
pub fn position_snapshot(raw: &ExchangePosition, side: PositionSide, first_seen: i64) -> PositionSnapshot {
    let quantity = raw.quantity.abs();
    let leverage = raw
        .leverage
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_POSITION_LEVERAGE);
    let margin_used = raw
        .margin_used
        .filter(|m| *m > 0.0)
        .unwrap_or(quantity * raw.mark_price / leverage as f64);
    let unrealized_pnl_pct = if margin_used > 0.0 {
        raw.unrealized_pnl / margin_used * 100.0
    } else {
        0.0
    };

    PositionSnapshot {
        symbol: raw.symbol.clone(),
        side,
        entry_price: raw.entry_price,
        mark_price: raw.mark_price,
        quantity,
        leverage,
        unrealized_pnl: raw.unrealized_pnl,
        unrealized_pnl_pct,
        liquidation_price: raw.liquidation_price.unwrap_or_default(),
        margin_used,
        update_time: first_seen,
    }
}

fn field_or_zero(name: &str, field: &str, value: Option<f64>) -> f64 {
    value.unwrap_or_else(|| {
        warn!("[{}] 余额缺少字段 {}，按 0 处理", name, field);
        0.0
    })
}

/// 权益 = 钱包余额 + 未实现盈亏；交易所只给总权益时直接使用
pub fn account_snapshot(
    name: &str,
    balance: &Balance,
    positions: &[PositionSnapshot],
    initial_balance: f64,
    daily_pnl: f64,
) -> AccountSnapshot {
    let unrealized_pnl = field_or_zero(name, "unrealized_pnl", balance.unrealized_pnl);
    let total_equity = match (balance.wallet_balance, balance.total) {
        (Some(wallet), _) => wallet + unrealized_pnl,
        (None, Some(total)) => total,
        (None, None) => field_or_zero(name, "wallet_balance", None) + unrealized_pnl,
    };
    let available_balance = field_or_zero(name, "free", balance.free);
    let used_margin: f64 = positions.iter().map(|p| p.margin_used).sum();

    let total_pnl = total_equity - initial_balance;
    let total_pnl_pct = if initial_balance > 0.0 {
        total_pnl / initial_balance * 100.0
    } else {
        0.0
    };
    let margin_used_pct = if total_equity > 0.0 {
        used_margin / total_equity * 100.0
    } else {
        0.0
    };

    AccountSnapshot {
        total_equity,
        available_balance,
        used_margin,
        unrealized_pnl,
        initial_balance,
        total_pnl,
        total_pnl_pct,
        daily_pnl,
        position_count: positions.len(),
        margin_used_pct,
    }
}

/// 指定币种 > 默认币种 > 币种池；币种池失败时退回固定列表
pub async fn resolve_candidates(
    name: &str,
    config: &TraderConfig,
    pool: &dyn CandidatePool,
) -> Vec<CandidateCoin> {
    if !config.trading_coins.is_empty() {
        return tag_all(&config.trading_coins, "custom");
    }
    if !config.default_coins.is_empty() {
        info!("[{}] 使用默认币种: {}个", name, config.default_coins.len());
        return tag_all(&config.default_coins, "default");
    }

    match pool.fetch_candidates(AI500_LIMIT).await {
        Ok(coins) if !coins.is_empty() => coins,
        Ok(_) => {
            warn!("[{}] 币种池为空，使用固定候选列表", name);
            static_candidates().await
        }
        Err(e) => {
            warn!("[{}] 获取币种池失败，使用固定候选列表: {}", name, e);
            static_candidates().await
        }
    }
}

fn tag_all(symbols: &[String], source: &str) -> Vec<CandidateCoin> {
    let mut coins: Vec<CandidateCoin> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = normalize_symbol(symbol);
        if !coins.iter().any(|c| c.symbol == symbol) {
            coins.push(CandidateCoin::new(symbol, source));
        }
    }
    coins
}

async fn static_candidates() -> Vec<CandidateCoin> {
    StaticCandidatePool::default()
        .fetch_candidates(AI500_LIMIT)
        .await
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn raw_position(side: &str, quantity: f64, leverage: Option<u32>, margin: Option<f64>) -> ExchangePosition {
        ExchangePosition {
            symbol: "BTCUSDT".into(),
            side: side.into(),
            entry_price: 100.0,
            mark_price: 110.0,
            quantity,
            leverage,
            unrealized_pnl: 20.0,
            liquidation_price: None,
            margin_used: margin,
        }
    }

    #[test]
    fn test_position_snapshot_defaults() {
        let raw = raw_position("SHORT", -2.0, None, None);
        let snapshot = position_snapshot(&raw, PositionSide::Short, 42);
        assert_eq!(snapshot.quantity, 2.0);
        assert_eq!(snapshot.leverage, 10);
        assert_relative_eq!(snapshot.margin_used, 22.0, epsilon = 1e-9);
        assert_relative_eq!(snapshot.unrealized_pnl_pct, 20.0 / 22.0 * 100.0, epsilon = 1e-9);
        assert_eq!(snapshot.update_time, 42);

        let raw = raw_position("long", 1.0, Some(5), Some(40.0));
        let snapshot = position_snapshot(&raw, PositionSide::Long, 0);
        assert_relative_eq!(snapshot.margin_used, 40.0);
        assert_relative_eq!(snapshot.unrealized_pnl_pct, 50.0);
    }

    #[test]
    fn test_account_snapshot() {
        let balance = Balance {
            total: Some(1_000.0),
            wallet_balance: Some(980.0),
            free: Some(700.0),
            used: Some(300.0),
            unrealized_pnl: Some(20.0),
        };
        let positions = vec![position_snapshot(
            &raw_position("long", 1.0, Some(5), Some(250.0)),
            PositionSide::Long,
            0,
        )];
        let account = account_snapshot("t", &balance, &positions, 800.0, -5.0);
        assert_relative_eq!(account.total_equity, 1_000.0);
        assert_relative_eq!(account.total_pnl, 200.0);
        assert_relative_eq!(account.total_pnl_pct, 25.0);
        assert_relative_eq!(account.margin_used_pct, 25.0);
        assert_eq!(account.position_count, 1);
        assert_relative_eq!(account.daily_pnl, -5.0);

        let account = account_snapshot("t", &Balance::default(), &[], 100.0, 0.0);
        assert_eq!(account.total_equity, 0.0);
        assert_eq!(account.available_balance, 0.0);
        assert_eq!(account.margin_used_pct, 0.0);
    }

    #[test]
    fn test_tag_all_normalizes_and_dedups() {
        let coins = tag_all(&["btc".into(), "BTCUSDT".into(), "eth".into()], "custom");
        assert_eq!(coins.len(), 2);
        assert_eq!(coins[0].symbol, "BTCUSDT");
        assert_eq!(coins[1].sources, vec!["custom"]);
    }
}
