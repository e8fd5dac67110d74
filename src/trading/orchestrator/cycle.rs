//! 单个交易周期
//!
//! 只依赖各组件的 trait 与可变的 `TraderState`，测试时全部可以替换为内存实现。

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::app_config::trader_config::TraderConfig;
use crate::trading::ai::{sort_decisions, AiCallArtifacts, AiDecisionClient, PromptConfig};
use crate::trading::context::{
    CandidatePool, ContextBuilder, CycleMeta, PositionTracker,
};
use crate::trading::decision_log::{ActionRecord, DecisionLogger, DecisionRecord};
use crate::trading::exchange::{ExchangeAdapter, PositionSide};
use crate::trading::kelly::KellyStatsEngine;
use crate::trading::kelly::ParameterAdjustment;
use crate::trading::orchestrator::executor::{execute_decision, ExecOutcome};

/// 日内盈亏重置周期
const DAILY_RESET_HOURS: i64 = 24;
/// 每隔多少个周期做一次 Kelly 参数优化
pub const KELLY_TUNING_INTERVAL_CYCLES: u64 = 10;

/// 周期内的节奏控制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// 每次成功写入交易所后的等待
    pub after_write: Duration,
    /// 更新止盈止损时每个持仓之间的等待
    pub between_positions: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            after_write: Duration::from_secs(1),
            between_positions: Duration::from_millis(500),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            after_write: Duration::ZERO,
            between_positions: Duration::ZERO,
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// 交易员的可变运行状态，只由所属任务访问
#[derive(Debug, Clone)]
pub struct TraderState {
    pub call_count: u64,
    pub start_time: DateTime<Utc>,
    /// 风控暂停截止时间
    pub stop_until: Option<DateTime<Utc>>,
    pub last_reset_time: DateTime<Utc>,
    pub daily_pnl: f64,
    pub tracker: PositionTracker,
}

impl TraderState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            call_count: 0,
            start_time: now,
            stop_until: None,
            last_reset_time: now,
            daily_pnl: 0.0,
            tracker: PositionTracker::new(),
        }
    }
}

/// 周期依赖
pub struct CycleDeps<'a> {
    pub config: &'a TraderConfig,
    pub exchange: &'a dyn ExchangeAdapter,
    pub stats: &'a KellyStatsEngine,
    pub ai: &'a dyn AiDecisionClient,
    pub logger: &'a dyn DecisionLogger,
    pub pool: &'a dyn CandidatePool,
    pub pacing: Pacing,
}

/// 执行一个完整周期，返回已提交给日志的记录
pub async fn run_cycle(deps: &CycleDeps<'_>, state: &mut TraderState) -> DecisionRecord {
    let name = deps.config.display_name();
    let now = Utc::now();
    state.call_count += 1;
    let mut record = DecisionRecord::new(state.call_count, now);

    info!("[{}] ===== 第{}个周期 =====", name, state.call_count);

    if let Some(until) = state.stop_until {
        if now < until {
            let remaining = (until - now).num_minutes();
            info!("[{}] 风险控制暂停中，剩余 {} 分钟", name, remaining);
            record.fail(format!("风险控制暂停中，剩余 {} 分钟", remaining));
            submit(deps, &record).await;
            return record;
        }
    }

    if now - state.last_reset_time >= chrono::Duration::hours(DAILY_RESET_HOURS) {
        state.daily_pnl = 0.0;
        state.last_reset_time = now;
        info!("[{}] 日盈亏已重置", name);
    }

    let meta = CycleMeta {
        now,
        call_count: state.call_count,
        runtime_minutes: (now - state.start_time).num_minutes(),
        daily_pnl: state.daily_pnl,
    };
    let builder = ContextBuilder::new(deps.exchange, deps.pool, deps.logger);
    let ctx = match builder.build(deps.config, meta, &mut state.tracker).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("[{}] 构建交易上下文失败: {:#}", name, e);
            record.fail(format!("构建交易上下文失败: {:#}", e));
            submit(deps, &record).await;
            return record;
        }
    };
    record.account_state = ctx.account.clone();
    record.positions = ctx.positions.clone();
    record.candidate_coins = ctx.candidate_symbols();
    record.execution_log.push(format!(
        "账户权益 {:.2} USDT，持仓 {} 个，候选币种 {} 个",
        ctx.account.total_equity,
        ctx.positions.len(),
        ctx.candidate_coins.len()
    ));

    let prompt = PromptConfig::from_trader(deps.config);
    let mut output = match deps.ai.decide(&ctx, &prompt).await {
        Ok(output) => {
            fill_artifacts(&mut record, &output);
            output
        }
        Err(e) => {
            error!("[{}] 获取AI决策失败: {}", name, e);
            fill_artifacts(&mut record, e.artifacts());
            record.fail(format!("获取AI决策失败: {}", e));
            submit(deps, &record).await;
            return record;
        }
    };

    sort_decisions(&mut output.decisions);
    info!("[{}] AI决策 {} 条", name, output.decisions.len());

    let mut executed: HashSet<(String, PositionSide, bool)> = HashSet::new();
    for decision in &output.decisions {
        let mut action = ActionRecord::new(decision.action.name(), &decision.symbol);

        if let Some(side) = decision.action.side() {
            let is_open = decision.action.open_intent().is_some();
            if !executed.insert((decision.symbol.clone(), side, is_open)) {
                action.skip("本周期已执行过相同操作");
                record.execution_log.push(format!(
                    "跳过 {} {}: {}",
                    decision.symbol,
                    decision.action.name(),
                    action.skip_reason
                ));
                record.decisions.push(action);
                continue;
            }
        }

        match execute_decision(deps, state, decision, &mut action).await {
            Ok(ExecOutcome::Skipped(reason)) => {
                record.execution_log.push(format!(
                    "跳过 {} {}: {}",
                    decision.symbol,
                    decision.action.name(),
                    reason
                ));
                action.skip(reason);
            }
            Ok(outcome) => {
                action.success = true;
                record.execution_log.push(format!(
                    "{} {} 成功",
                    decision.symbol,
                    decision.action.name()
                ));
                if outcome == ExecOutcome::Written {
                    pause(deps.pacing.after_write).await;
                }
            }
            Err(e) => {
                error!(
                    "[{}] 执行决策失败 {} {}: {:#}",
                    name,
                    decision.symbol,
                    decision.action.name(),
                    e
                );
                action.error = format!("{:#}", e);
                record.execution_log.push(format!(
                    "{} {} 失败: {:#}",
                    decision.symbol,
                    decision.action.name(),
                    e
                ));
            }
        }
        record.decisions.push(action);
    }

    update_protective_orders(deps, &mut record).await;

    if state.call_count % KELLY_TUNING_INTERVAL_CYCLES == 0 {
        tune_kelly_parameters(deps, &mut record).await;
    }

    submit(deps, &record).await;
    if let Err(e) = deps.stats.auto_save().await {
        warn!("[{}] 保存统计数据失败: {}", name, e);
    }
    record
}

/// 周期性输出统计并按胜率调整 Kelly 参数
async fn tune_kelly_parameters(deps: &CycleDeps<'_>, record: &mut DecisionRecord) {
    deps.stats.monitor_performance().await;
    let line = match deps.stats.optimize_parameters().await {
        ParameterAdjustment::Aggressive(rate) => {
            format!("Kelly参数调整为激进（平均胜率 {:.2}%）", rate * 100.0)
        }
        ParameterAdjustment::Conservative(rate) => {
            format!("Kelly参数调整为保守（平均胜率 {:.2}%）", rate * 100.0)
        }
        ParameterAdjustment::Unchanged(rate) => {
            format!("Kelly参数保持不变（平均胜率 {:.2}%）", rate * 100.0)
        }
        ParameterAdjustment::InsufficientData => "Kelly参数优化：数据不足".to_string(),
    };
    record.execution_log.push(line);
}

fn fill_artifacts(record: &mut DecisionRecord, artifacts: &AiCallArtifacts) {
    record.system_prompt = artifacts.system_prompt.clone();
    record.input_prompt = artifacts.user_prompt.clone();
    record.cot_trace = artifacts.cot_trace.clone();
    record.decision_json = if artifacts.decision_json.is_empty() {
        serde_json::to_string_pretty(&artifacts.decisions).unwrap_or_default()
    } else {
        artifacts.decision_json.clone()
    };
}

/// 按最新持仓重新计算止盈止损，失败只告警
pub async fn update_protective_orders(deps: &CycleDeps<'_>, record: &mut DecisionRecord) {
    let name = deps.config.display_name();
    let positions = match deps.exchange.get_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!("[{}] 获取持仓失败，跳过止盈止损更新: {:#}", name, e);
            return;
        }
    };

    let mut first = true;
    for position in positions.iter().filter(|p| p.quantity != 0.0) {
        let Some(side) = PositionSide::parse(&position.side) else {
            continue;
        };
        if !first {
            pause(deps.pacing.between_positions).await;
        }
        first = false;

        let symbol = position.symbol.as_str();
        let current_price = if position.mark_price > 0.0 {
            position.mark_price
        } else {
            match deps.exchange.get_market_price(symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!("[{}] 获取 {} 价格失败: {:#}", name, symbol, e);
                    continue;
                }
            }
        };

        let take_profit = deps
            .stats
            .calculate_optimal_take_profit(symbol, position.entry_price, current_price, side)
            .await;
        let stop_loss = deps
            .stats
            .calculate_dynamic_stop_loss(symbol, position.entry_price, current_price, side)
            .await;
        let (take_profit, stop_loss) = match (take_profit, stop_loss) {
            (Ok(tp), Ok(sl)) => (tp, sl),
            (Err(e), _) | (_, Err(e)) => {
                warn!("[{}] 计算 {} 止盈止损失败: {}", name, symbol, e);
                continue;
            }
        };

        let quantity = position.quantity.abs();
        let mut outcome = Vec::with_capacity(2);
        match deps
            .exchange
            .set_stop_loss(symbol, side, quantity, stop_loss)
            .await
        {
            Ok(()) => outcome.push(format!("止损 {:.4}", stop_loss)),
            Err(e) => {
                warn!("[{}] 更新 {} 止损失败: {:#}", name, symbol, e);
                outcome.push(format!("止损失败: {:#}", e));
            }
        }
        match deps
            .exchange
            .set_take_profit(symbol, side, quantity, take_profit)
            .await
        {
            Ok(()) => outcome.push(format!("止盈 {:.4}", take_profit)),
            Err(e) => {
                warn!("[{}] 更新 {} 止盈失败: {:#}", name, symbol, e);
                outcome.push(format!("止盈失败: {:#}", e));
            }
        }
        record
            .execution_log
            .push(format!("{} {} {}", symbol, side, outcome.join(", ")));
    }
}

async fn submit(deps: &CycleDeps<'_>, record: &DecisionRecord) {
    if let Err(e) = deps.logger.log_decision(record).await {
        warn!(
            "[{}] 保存决策记录失败: {:#}",
            deps.config.display_name(),
            e
        );
    }
}
