use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::app_config::trader_config::TraderConfig;
use crate::error::AppResult;
use crate::trading::ai::AiDecisionClient;
use crate::trading::context::builder::{account_snapshot, position_snapshot};
use crate::trading::context::CandidatePool;
use crate::trading::decision_log::{DecisionLogger, DecisionRecord};
use crate::trading::exchange::{ExchangeAdapter, PositionSide};
use crate::trading::kelly::KellyStatsEngine;
use crate::trading::orchestrator::cycle::{run_cycle, CycleDeps, Pacing, TraderState};

/// 交易员依赖的外部组件
#[derive(Clone)]
pub struct TraderDeps {
    pub exchange: Arc<dyn ExchangeAdapter>,
    pub stats: Arc<KellyStatsEngine>,
    pub ai: Arc<dyn AiDecisionClient>,
    pub logger: Arc<dyn DecisionLogger>,
    pub pool: Arc<dyn CandidatePool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TraderStatus {
    pub trader_id: String,
    pub trader_name: String,
    pub ai_model: String,
    pub exchange: String,
    pub is_running: bool,
    pub start_time: DateTime<Utc>,
    pub runtime_minutes: i64,
    pub call_count: u64,
    pub initial_balance: f64,
    pub scan_interval_secs: u64,
    pub stop_until: Option<DateTime<Utc>>,
    pub last_reset_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AccountInfo {
    pub total_equity: f64,
    pub wallet_balance: f64,
    pub unrealized_profit: f64,
    pub available_balance: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub initial_balance: f64,
    pub daily_pnl: f64,
    pub position_count: usize,
    pub margin_used: f64,
    pub margin_used_pct: f64,
}

/// 单个交易员的自动交易循环
pub struct AutoTrader {
    config: TraderConfig,
    deps: TraderDeps,
    pacing: Pacing,
    state: Mutex<TraderState>,
    is_running: AtomicBool,
    /// 一旦置位不再复位，`run()` 之前调用 `stop()` 也能生效
    stop_requested: AtomicBool,
    stop_signal: Notify,
}

impl AutoTrader {
    /// 配置不合法时直接失败
    pub fn new(mut config: TraderConfig, deps: TraderDeps) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            deps,
            pacing: Pacing::default(),
            state: Mutex::new(TraderState::new(Utc::now())),
            is_running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_signal: Notify::new(),
        })
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn config(&self) -> &TraderConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn stats(&self) -> &Arc<KellyStatsEngine> {
        &self.deps.stats
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// 启动循环，首个周期立即执行；`stop()` 后在当前周期结束时返回
    ///
    /// 已在运行时返回错误；启动前已收到停止信号则直接返回
    pub async fn run(&self) -> Result<()> {
        let name = self.config.display_name();
        if self.stop_requested.load(Ordering::SeqCst) {
            info!("[{}] 启动前已收到停止信号，不再启动", name);
            return Ok(());
        }
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            bail!("[{}] 交易员已在运行", name);
        }
        // stop() 可能落在两次检查之间
        if self.stop_requested.load(Ordering::SeqCst) {
            self.is_running.store(false, Ordering::SeqCst);
            info!("[{}] 启动前已收到停止信号，不再启动", name);
            return Ok(());
        }
        {
            let mut state = self.state.lock().await;
            state.start_time = Utc::now();
        }
        info!(
            "[{}] 自动交易启动，AI模型 {}，交易所 {}，扫描间隔 {:?}",
            name,
            self.config.ai_model,
            self.deps.exchange.name(),
            self.config.scan_interval()
        );

        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop_signal.notified() => {}
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            self.run_once().await;
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("[{}] 自动交易已停止", name);
        Ok(())
    }

    /// 执行一个周期
    pub async fn run_once(&self) -> DecisionRecord {
        let mut state = self.state.lock().await;
        let deps = CycleDeps {
            config: &self.config,
            exchange: self.deps.exchange.as_ref(),
            stats: self.deps.stats.as_ref(),
            ai: self.deps.ai.as_ref(),
            logger: self.deps.logger.as_ref(),
            pool: self.deps.pool.as_ref(),
            pacing: self.pacing,
        };
        run_cycle(&deps, &mut state).await
    }

    pub fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            info!("[{}] 收到停止信号", self.config.display_name());
        }
        self.is_running.store(false, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    /// 风控暂停到指定时间，期间的周期不调用 AI
    pub async fn pause_until(&self, until: DateTime<Utc>) {
        warn!(
            "[{}] 风险控制暂停至 {}",
            self.config.display_name(),
            until.format("%Y-%m-%d %H:%M:%S")
        );
        self.state.lock().await.stop_until = Some(until);
    }

    pub async fn status(&self) -> TraderStatus {
        let state = self.state.lock().await;
        TraderStatus {
            trader_id: self.config.id.clone(),
            trader_name: self.config.display_name().to_string(),
            ai_model: self.config.ai_model.clone(),
            exchange: self.config.exchange.clone(),
            is_running: self.is_running(),
            start_time: state.start_time,
            runtime_minutes: (Utc::now() - state.start_time).num_minutes(),
            call_count: state.call_count,
            initial_balance: self.config.initial_balance,
            scan_interval_secs: self.config.scan_interval().as_secs(),
            stop_until: state.stop_until,
            last_reset_time: state.last_reset_time,
        }
    }

    /// 账户概览，保证金按持仓估算
    pub async fn account_info(&self) -> Result<AccountInfo> {
        let name = self.config.display_name();
        let balance = self.deps.exchange.get_balance().await?;
        let raw_positions = self.deps.exchange.get_positions().await?;
        let positions: Vec<_> = raw_positions
            .iter()
            .filter(|p| p.quantity != 0.0)
            .filter_map(|p| {
                PositionSide::parse(&p.side).map(|side| position_snapshot(p, side, 0))
            })
            .collect();
        let daily_pnl = self.state.lock().await.daily_pnl;
        let account = account_snapshot(
            name,
            &balance,
            &positions,
            self.config.initial_balance,
            daily_pnl,
        );

        Ok(AccountInfo {
            total_equity: account.total_equity,
            wallet_balance: balance.wallet_balance.unwrap_or(account.total_equity - account.unrealized_pnl),
            unrealized_profit: account.unrealized_pnl,
            available_balance: account.available_balance,
            total_pnl: account.total_pnl,
            total_pnl_pct: account.total_pnl_pct,
            initial_balance: account.initial_balance,
            daily_pnl: account.daily_pnl,
            position_count: account.position_count,
            margin_used: account.used_margin,
            margin_used_pct: account.margin_used_pct,
        })
    }
}
