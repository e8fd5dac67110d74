use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::trading::decision_log::DecisionRecord;
use crate::trading::exchange::PositionSide;

/// 最近完成交易的保留条数
const RECENT_TRADES_LIMIT: usize = 10;

/// 一笔已配对的开平仓
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TradeOutcome {
    pub symbol: String,
    pub side: PositionSide,
    pub open_price: f64,
    pub close_price: f64,
    /// 价格收益率（百分数，未乘杠杆）
    pub pnl_pct: f64,
    pub open_time: i64,
    pub close_time: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SymbolPerformance {
    pub symbol: String,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub total_pnl_pct: f64,
    pub avg_pnl_pct: f64,
}

/// 历史表现汇总，没有已平仓交易时各项为 0
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PerformanceSummary {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// 百分数
    pub win_rate: f64,
    pub avg_win_pct: f64,
    /// 平均亏损幅度（绝对值）
    pub avg_loss_pct: f64,
    /// 总盈利 / 总亏损；没有亏损时为 0
    pub profit_factor: f64,
    pub symbol_stats: HashMap<String, SymbolPerformance>,
    pub recent_trades: Vec<TradeOutcome>,
}

struct OpenLeg {
    price: f64,
    time: i64,
}

fn parse_action(action: &str) -> Option<(bool, PositionSide)> {
    match action {
        "open_long" => Some((true, PositionSide::Long)),
        "open_short" => Some((true, PositionSide::Short)),
        "close_long" => Some((false, PositionSide::Long)),
        "close_short" => Some((false, PositionSide::Short)),
        _ => None,
    }
}

/// 按时间顺序把成功的开仓与之后的平仓按 (symbol, side) 配对
pub fn analyze_records(records: &[DecisionRecord]) -> PerformanceSummary {
    let mut open_legs: HashMap<(String, PositionSide), OpenLeg> = HashMap::new();
    let mut outcomes = Vec::new();

    let mut ordered: Vec<&DecisionRecord> = records.iter().collect();
    ordered.sort_by_key(|r| (r.timestamp, r.cycle_number));

    for record in ordered {
        for action in record.decisions.iter().filter(|a| a.success) {
            let Some((is_open, side)) = parse_action(&action.action) else {
                continue;
            };
            let key = (action.symbol.clone(), side);
            if is_open {
                open_legs.insert(
                    key,
                    OpenLeg {
                        price: action.price,
                        time: action.timestamp,
                    },
                );
                continue;
            }

            let Some(open) = open_legs.remove(&key) else {
                continue;
            };
            if open.price <= 0.0 || action.price <= 0.0 {
                continue;
            }
            let change = (action.price - open.price) / open.price * 100.0;
            let pnl_pct = match side {
                PositionSide::Long => change,
                PositionSide::Short => -change,
            };
            outcomes.push(TradeOutcome {
                symbol: action.symbol.clone(),
                side,
                open_price: open.price,
                close_price: action.price,
                pnl_pct,
                open_time: open.time,
                close_time: action.timestamp,
            });
        }
    }

    summarize(outcomes)
}

fn summarize(outcomes: Vec<TradeOutcome>) -> PerformanceSummary {
    let mut summary = PerformanceSummary::default();
    let mut total_win = 0.0;
    let mut total_loss = 0.0;

    for outcome in &outcomes {
        summary.total_trades += 1;
        let entry = summary
            .symbol_stats
            .entry(outcome.symbol.clone())
            .or_insert_with(|| SymbolPerformance {
                symbol: outcome.symbol.clone(),
                ..Default::default()
            });
        entry.total_trades += 1;
        entry.total_pnl_pct += outcome.pnl_pct;

        if outcome.pnl_pct > 0.0 {
            summary.winning_trades += 1;
            entry.winning_trades += 1;
            total_win += outcome.pnl_pct;
        } else if outcome.pnl_pct < 0.0 {
            summary.losing_trades += 1;
            entry.losing_trades += 1;
            total_loss += -outcome.pnl_pct;
        }
    }

    if summary.total_trades > 0 {
        summary.win_rate = summary.winning_trades as f64 / summary.total_trades as f64 * 100.0;
    }
    if summary.winning_trades > 0 {
        summary.avg_win_pct = total_win / summary.winning_trades as f64;
    }
    if summary.losing_trades > 0 {
        summary.avg_loss_pct = total_loss / summary.losing_trades as f64;
    }
    if total_loss > 0.0 {
        summary.profit_factor = total_win / total_loss;
    }
    for stats in summary.symbol_stats.values_mut() {
        stats.win_rate = stats.winning_trades as f64 / stats.total_trades as f64 * 100.0;
        stats.avg_pnl_pct = stats.total_pnl_pct / stats.total_trades as f64;
    }

    let skip = outcomes.len().saturating_sub(RECENT_TRADES_LIMIT);
    summary.recent_trades = outcomes.into_iter().skip(skip).collect();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::decision_log::ActionRecord;
    use approx::assert_relative_eq;
    use chrono::{Duration, Utc};

    fn action(name: &str, symbol: &str, price: f64, success: bool) -> ActionRecord {
        ActionRecord {
            success,
            price,
            ..ActionRecord::new(name, symbol)
        }
    }

    fn record(cycle: u64, actions: Vec<ActionRecord>) -> DecisionRecord {
        let ts = Utc::now() + Duration::minutes(cycle as i64 * 3);
        let mut record = DecisionRecord::new(cycle, ts);
        record.decisions = actions;
        record
    }

    #[test]
    fn test_pairs_open_and_close_across_cycles() {
        let records = vec![
            record(1, vec![action("open_long", "BTCUSDT", 100.0, true)]),
            record(2, vec![action("open_short", "ETHUSDT", 200.0, true)]),
            record(
                3,
                vec![
                    action("close_long", "BTCUSDT", 110.0, true),
                    action("close_short", "ETHUSDT", 210.0, true),
                ],
            ),
        ];
        let summary = analyze_records(&records);

        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 1);
        assert_relative_eq!(summary.win_rate, 50.0);
        assert_relative_eq!(summary.avg_win_pct, 10.0, epsilon = 1e-9);
        assert_relative_eq!(summary.avg_loss_pct, 5.0, epsilon = 1e-9);
        assert_relative_eq!(summary.profit_factor, 2.0, epsilon = 1e-9);
        assert_eq!(summary.symbol_stats["ETHUSDT"].losing_trades, 1);
        assert_eq!(summary.recent_trades.len(), 2);
    }

    #[test]
    fn test_failed_actions_and_unmatched_closes_ignored() {
        let records = vec![
            record(1, vec![action("open_long", "BTCUSDT", 100.0, false)]),
            record(2, vec![action("close_long", "BTCUSDT", 120.0, true)]),
            record(3, vec![action("hold", "SOLUSDT", 0.0, true)]),
        ];
        let summary = analyze_records(&records);
        assert_eq!(summary, PerformanceSummary::default());
    }
}
