use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use approx::assert_relative_eq;
use async_trait::async_trait;
use chrono::Utc;

use rust_quant_ai::app_config::trader_config::TraderConfig;
use rust_quant_ai::trading::ai::{
    AiCallArtifacts, AiClientError, AiDecisionClient, AiDecisionOutput, Decision, DecisionAction,
    OpenIntent, PromptConfig,
};
use rust_quant_ai::trading::context::{CandidatePool, Context, StaticCandidatePool};
use rust_quant_ai::trading::decision_log::{DecisionLogger, DecisionRecord};
use rust_quant_ai::trading::exchange::{
    Balance, CachedExchange, ExchangeAdapter, ExchangePosition, OrderAck, PositionSide,
};
use rust_quant_ai::trading::kelly::{HistoricalStats, KellyConfig, KellyStatsEngine};
use rust_quant_ai::trading::orchestrator::{
    run_cycle, AutoTrader, CycleDeps, Pacing, TraderDeps, TraderState,
    KELLY_TUNING_INTERVAL_CYCLES,
};
use tempfile::TempDir;

#[derive(Default)]
struct ExchangeState {
    free: f64,
    positions: Vec<ExchangePosition>,
    prices: HashMap<String, f64>,
    calls: Vec<String>,
}

#[derive(Default)]
struct FakeExchange {
    state: Mutex<ExchangeState>,
}

impl FakeExchange {
    fn new(free: f64, prices: &[(&str, f64)]) -> Self {
        let exchange = FakeExchange::default();
        {
            let mut state = exchange.state.lock().unwrap();
            state.free = free;
            for (symbol, price) in prices {
                state.prices.insert(symbol.to_string(), *price);
            }
        }
        exchange
    }

    fn with_position(self, symbol: &str, side: &str, entry: f64, mark: f64, quantity: f64) -> Self {
        self.state.lock().unwrap().positions.push(ExchangePosition {
            symbol: symbol.into(),
            side: side.into(),
            entry_price: entry,
            mark_price: mark,
            quantity,
            leverage: Some(5),
            unrealized_pnl: 0.0,
            liquidation_price: None,
            margin_used: None,
        });
        self
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn write_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("get_"))
            .collect()
    }

    fn open(&self, symbol: &str, side: &str, quantity: f64, leverage: u32) -> Result<OrderAck> {
        let mut state = self.state.lock().unwrap();
        let price = *state
            .prices
            .get(symbol)
            .ok_or_else(|| anyhow!("unknown symbol {}", symbol))?;
        state
            .calls
            .push(format!("open_{} {} {:.4} {}x", side, symbol, quantity, leverage));
        state.free -= quantity * price / leverage as f64;
        state.positions.push(ExchangePosition {
            symbol: symbol.into(),
            side: side.into(),
            entry_price: price,
            mark_price: price,
            quantity,
            leverage: Some(leverage),
            unrealized_pnl: 0.0,
            liquidation_price: None,
            margin_used: None,
        });
        Ok(OrderAck {
            order_id: format!("ord-{}", state.calls.len()),
            symbol: symbol.into(),
            quantity,
            avg_price: Some(price),
        })
    }

    fn close(&self, symbol: &str, side: &str) -> Result<OrderAck> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("close_{} {}", side, symbol));
        let Some(index) = state
            .positions
            .iter()
            .position(|p| p.symbol == symbol && p.side == side)
        else {
            return Err(anyhow!("no position"));
        };
        let closed = state.positions.remove(index);
        state.free += closed.quantity.abs() * closed.entry_price
            / closed.leverage.unwrap_or(1) as f64;
        Ok(OrderAck {
            order_id: "close".into(),
            symbol: symbol.into(),
            quantity: 0.0,
            avg_price: None,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for FakeExchange {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn get_balance(&self) -> Result<Balance> {
        let state = self.state.lock().unwrap();
        Ok(Balance {
            total: Some(state.free),
            wallet_balance: Some(state.free),
            free: Some(state.free),
            used: Some(0.0),
            unrealized_pnl: Some(0.0),
        })
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self.state.lock().unwrap().positions.clone())
    }

    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck> {
        self.open(symbol, "long", quantity, leverage)
    }

    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck> {
        self.open(symbol, "short", quantity, leverage)
    }

    async fn close_long(&self, symbol: &str, _quantity: f64) -> Result<OrderAck> {
        self.close(symbol, "long")
    }

    async fn close_short(&self, symbol: &str, _quantity: f64) -> Result<OrderAck> {
        self.close(symbol, "short")
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("set_leverage {} {}", symbol, leverage));
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("set_margin_mode {} {}", symbol, is_cross));
        Ok(())
    }

    async fn set_stop_loss(
        &self,
        symbol: &str,
        side: PositionSide,
        _quantity: f64,
        trigger_price: f64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("set_stop_loss {} {} {:.4}", symbol, side, trigger_price));
        Ok(())
    }

    async fn set_take_profit(
        &self,
        symbol: &str,
        side: PositionSide,
        _quantity: f64,
        trigger_price: f64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("set_take_profit {} {} {:.4}", symbol, side, trigger_price));
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("cancel_all_orders {}", symbol));
        Ok(())
    }

    async fn get_market_price(&self, symbol: &str) -> Result<f64> {
        let state = self.state.lock().unwrap();
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("unknown symbol {}", symbol))
    }
}

struct FakeAi {
    decisions: Vec<Decision>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeAi {
    fn returning(decisions: Vec<Decision>) -> Self {
        Self {
            decisions,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            decisions: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiDecisionClient for FakeAi {
    async fn decide(
        &self,
        ctx: &Context,
        _prompt: &PromptConfig,
    ) -> Result<AiDecisionOutput, AiClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let artifacts = AiCallArtifacts {
            system_prompt: "system".into(),
            user_prompt: format!("cycle {}", ctx.call_count),
            cot_trace: "分析".into(),
            decisions: self.decisions.clone(),
            ..Default::default()
        };
        if self.fail {
            return Err(AiClientError::Transport {
                message: "connection reset".into(),
                artifacts: Box::new(artifacts),
            });
        }
        Ok(artifacts)
    }
}

#[derive(Default)]
struct MemoryLogger {
    records: Mutex<Vec<DecisionRecord>>,
}

impl MemoryLogger {
    fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionLogger for MemoryLogger {
    async fn log_decision(&self, record: &DecisionRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn latest_records(&self, n: usize) -> Result<Vec<DecisionRecord>> {
        let records = self.records.lock().unwrap();
        let skip = records.len().saturating_sub(n);
        Ok(records.iter().skip(skip).cloned().collect())
    }
}

fn trader_config() -> TraderConfig {
    serde_json::from_str(
        r#"{"id":"cycle-test","name":"测试交易员","ai_model":"deepseek","initial_balance":1000,
            "trading_coins":["BTC","ETH"]}"#,
    )
    .unwrap()
}

fn stats_engine(dir: &TempDir) -> KellyStatsEngine {
    KellyStatsEngine::new(dir.path(), "cycle-test", KellyConfig::default())
}

fn open_long(symbol: &str, size: f64, leverage: u32) -> Decision {
    Decision::new(
        symbol,
        DecisionAction::OpenLong(OpenIntent {
            leverage,
            position_size_usd: size,
            stop_loss: 90.0,
            take_profit: 130.0,
            confidence: Some(80),
        }),
    )
}

/// 交易所经过与生产相同的缓存层
struct Harness {
    _dir: TempDir,
    config: TraderConfig,
    exchange: CachedExchange<FakeExchange>,
    stats: KellyStatsEngine,
    ai: FakeAi,
    logger: MemoryLogger,
    pool: StaticCandidatePool,
}

impl Harness {
    fn new(exchange: FakeExchange, ai: FakeAi) -> Self {
        let dir = TempDir::new().unwrap();
        Self {
            config: trader_config(),
            exchange: CachedExchange::new(exchange),
            stats: stats_engine(&dir),
            _dir: dir,
            ai,
            logger: MemoryLogger::default(),
            pool: StaticCandidatePool::default(),
        }
    }

    fn fake(&self) -> &FakeExchange {
        self.exchange.inner()
    }

    fn deps(&self) -> CycleDeps<'_> {
        CycleDeps {
            config: &self.config,
            exchange: &self.exchange,
            stats: &self.stats,
            ai: &self.ai,
            logger: &self.logger,
            pool: &self.pool as &dyn CandidatePool,
            pacing: Pacing::none(),
        }
    }
}

#[tokio::test]
async fn test_margin_guard_clamps_open_size() {
    let harness = Harness::new(
        FakeExchange::new(50.0, &[("BTCUSDT", 100.0)]),
        FakeAi::returning(vec![open_long("BTCUSDT", 800.0, 10)]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    assert!(record.success);
    assert_eq!(record.decisions.len(), 1);
    let action = &record.decisions[0];
    assert!(action.success, "{}", action.error);
    assert_relative_eq!(action.quantity, 4.0, epsilon = 1e-9);
    assert_eq!(action.leverage, 10);
    assert!(harness
        .fake()
        .calls()
        .contains(&"open_long BTCUSDT 4.0000 10x".to_string()));
    assert!(state.tracker.first_seen("BTCUSDT", PositionSide::Long).is_some());
}

#[tokio::test]
async fn test_margin_guard_refuses_tiny_account() {
    let harness = Harness::new(
        FakeExchange::new(1.0, &[("BTCUSDT", 100.0)]),
        FakeAi::returning(vec![open_long("BTCUSDT", 800.0, 10)]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    assert!(!record.decisions[0].success);
    assert!(record.decisions[0].error.contains("保证金不足"));
    assert!(harness.fake().write_calls().is_empty());
}

#[tokio::test]
async fn test_closes_execute_before_opens() {
    let exchange = FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0), ("ETHUSDT", 10.0)])
        .with_position("BTCUSDT", "short", 110.0, 100.0, 1.0);
    let harness = Harness::new(
        exchange,
        FakeAi::returning(vec![
            open_long("BTCUSDT", 200.0, 5),
            Decision::new("BTCUSDT", DecisionAction::CloseShort),
            Decision::new("ETHUSDT", DecisionAction::Hold),
        ]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    let order: Vec<&str> = record.decisions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(order, vec!["close_short", "open_long", "hold"]);
    assert!(record.decisions.iter().all(|a| a.success));

    let writes = harness.fake().write_calls();
    let close_at = writes.iter().position(|c| c == "close_short BTCUSDT").unwrap();
    let open_at = writes
        .iter()
        .position(|c| c.starts_with("open_long BTCUSDT"))
        .unwrap();
    assert!(close_at < open_at);

    // 平空盈利计入统计，峰值清除
    let stats = harness.stats.stats("BTCUSDT").await.unwrap();
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.profitable_trades, 1);
    assert_eq!(harness.stats.position_peak("BTCUSDT").await, 0.0);
}

#[tokio::test]
async fn test_duplicate_open_is_refused() {
    let exchange = FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0)])
        .with_position("BTCUSDT", "long", 95.0, 100.0, 1.0);
    let harness = Harness::new(
        exchange,
        FakeAi::returning(vec![open_long("BTCUSDT", 200.0, 5)]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    assert!(!record.decisions[0].success);
    assert!(record.decisions[0].error.contains("已有"));
    assert!(!harness
        .fake()
        .calls()
        .iter()
        .any(|c| c.starts_with("open_long")));
}

#[tokio::test]
async fn test_same_intent_runs_once_per_cycle() {
    let harness = Harness::new(
        FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0)]),
        FakeAi::returning(vec![
            open_long("BTCUSDT", 100.0, 5),
            open_long("BTCUSDT", 100.0, 5),
        ]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    assert!(record.decisions[0].success);
    assert!(!record.decisions[1].success);
    assert!(record.decisions[1].skipped);
    let opens = harness
        .fake()
        .calls()
        .iter()
        .filter(|c| c.starts_with("open_long"))
        .count();
    assert_eq!(opens, 1);
}

#[tokio::test]
async fn test_cooldown_skips_ai_and_venue() {
    let harness = Harness::new(
        FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0)]),
        FakeAi::returning(vec![open_long("BTCUSDT", 100.0, 5)]),
    );
    let mut state = TraderState::new(Utc::now());
    state.stop_until = Some(Utc::now() + chrono::Duration::minutes(30));

    let record = run_cycle(&harness.deps(), &mut state).await;

    assert!(!record.success);
    assert!(record.error_message.contains("风险控制暂停中"));
    assert_eq!(harness.ai.call_count(), 0);
    assert!(harness.fake().calls().is_empty());
    assert_eq!(harness.logger.records().len(), 1);
}

#[tokio::test]
async fn test_ai_failure_logs_artifacts_without_orders() {
    let harness = Harness::new(
        FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0)]),
        FakeAi::failing(),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    assert!(!record.success);
    assert_eq!(record.system_prompt, "system");
    assert_eq!(record.cot_trace, "分析");
    assert_eq!(record.candidate_coins, vec!["BTCUSDT", "ETHUSDT"]);
    assert!(harness.fake().write_calls().is_empty());
    assert_eq!(harness.logger.records().len(), 1);
}

#[tokio::test]
async fn test_protective_orders_refreshed_for_open_positions() {
    let exchange = FakeExchange::new(1_000.0, &[("BTCUSDT", 106.0)])
        .with_position("BTCUSDT", "long", 100.0, 106.0, 1.0);
    let harness = Harness::new(
        exchange,
        FakeAi::returning(vec![Decision::new("BTCUSDT", DecisionAction::Hold)]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;
    assert!(record.success);

    let calls = harness.fake().calls();
    let stop = calls
        .iter()
        .find(|c| c.starts_with("set_stop_loss BTCUSDT long"))
        .unwrap();
    let take = calls
        .iter()
        .find(|c| c.starts_with("set_take_profit BTCUSDT long"))
        .unwrap();
    let stop_price: f64 = stop.rsplit(' ').next().unwrap().parse().unwrap();
    let take_price: f64 = take.rsplit(' ').next().unwrap().parse().unwrap();
    assert!((100.0..=106.0).contains(&stop_price));
    assert!(take_price > 106.0);
    assert!(harness.stats.position_peak("BTCUSDT").await > 0.0);
}

fn idle_trader(dir: &TempDir) -> Arc<AutoTrader> {
    let deps = TraderDeps {
        exchange: Arc::new(FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0)])),
        stats: Arc::new(stats_engine(dir)),
        ai: Arc::new(FakeAi::returning(vec![Decision::new(
            "BTCUSDT",
            DecisionAction::Wait,
        )])),
        logger: Arc::new(MemoryLogger::default()),
        pool: Arc::new(StaticCandidatePool::default()),
    };
    Arc::new(
        AutoTrader::new(trader_config(), deps)
            .unwrap()
            .with_pacing(Pacing::none()),
    )
}

#[tokio::test]
async fn test_auto_trader_run_and_stop() {
    let dir = TempDir::new().unwrap();
    let trader = idle_trader(&dir);

    let runner = {
        let trader = trader.clone();
        tokio::spawn(async move { trader.run().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(trader.is_running());

    trader.stop();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let status = trader.status().await;
    assert!(!status.is_running);
    assert_eq!(status.call_count, 1);
    assert_eq!(status.scan_interval_secs, 180);

    trader
        .pause_until(Utc::now() + chrono::Duration::minutes(10))
        .await;
    let record = trader.run_once().await;
    assert!(!record.success);
    assert_eq!(trader.status().await.call_count, 2);

    let info = trader.account_info().await.unwrap();
    assert_relative_eq!(info.total_equity, 1_000.0);
    assert_relative_eq!(info.total_pnl, 0.0);
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let dir = TempDir::new().unwrap();
    let mut config = trader_config();
    config.initial_balance = 0.0;
    let deps = TraderDeps {
        exchange: Arc::new(FakeExchange::default()),
        stats: Arc::new(stats_engine(&dir)),
        ai: Arc::new(FakeAi::failing()),
        logger: Arc::new(MemoryLogger::default()),
        pool: Arc::new(StaticCandidatePool::default()),
    };
    assert!(AutoTrader::new(config, deps).is_err());
}

#[tokio::test]
async fn test_stop_before_run_is_honoured() {
    let dir = TempDir::new().unwrap();
    let trader = idle_trader(&dir);

    trader.stop();
    tokio::time::timeout(Duration::from_secs(2), trader.run())
        .await
        .unwrap()
        .unwrap();

    assert!(!trader.is_running());
    assert_eq!(trader.status().await.call_count, 0);
}

#[tokio::test]
async fn test_second_run_is_rejected_while_running() {
    let dir = TempDir::new().unwrap();
    let trader = idle_trader(&dir);

    let runner = {
        let trader = trader.clone();
        tokio::spawn(async move { trader.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(trader.run().await.is_err());

    trader.stop();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_close_then_reopen_same_side_sees_fresh_positions() {
    let exchange = FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0)])
        .with_position("BTCUSDT", "long", 90.0, 100.0, 1.0);
    let harness = Harness::new(
        exchange,
        FakeAi::returning(vec![
            open_long("BTCUSDT", 200.0, 5),
            Decision::new("BTCUSDT", DecisionAction::CloseLong),
        ]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    let order: Vec<&str> = record.decisions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(order, vec!["close_long", "open_long"]);
    assert!(
        record.decisions.iter().all(|a| a.success),
        "{:?}",
        record.decisions
    );
    assert_eq!(
        harness.fake().write_calls().first().map(String::as_str),
        Some("close_long BTCUSDT")
    );
    assert!(harness
        .fake()
        .calls()
        .contains(&"open_long BTCUSDT 2.0000 5x".to_string()));
}

#[tokio::test]
async fn test_opens_in_one_cycle_share_free_margin() {
    let harness = Harness::new(
        FakeExchange::new(100.0, &[("BTCUSDT", 100.0), ("ETHUSDT", 10.0)]),
        FakeAi::returning(vec![
            open_long("BTCUSDT", 800.0, 10),
            open_long("ETHUSDT", 800.0, 10),
        ]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    assert!(record.decisions.iter().all(|a| a.success));
    // 第一笔用掉 80 USDT 保证金，第二笔只剩 20 × 10 × 0.8
    let notional: Vec<f64> = record
        .decisions
        .iter()
        .map(|a| a.quantity * a.price)
        .collect();
    assert_relative_eq!(notional[0], 800.0, epsilon = 1e-9);
    assert_relative_eq!(notional[1], 160.0, epsilon = 1e-9);
}

#[tokio::test]
async fn test_close_without_position_is_skipped() {
    let harness = Harness::new(
        FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0)]),
        FakeAi::returning(vec![Decision::new("BTCUSDT", DecisionAction::CloseShort)]),
    );
    let mut state = TraderState::new(Utc::now());

    let record = run_cycle(&harness.deps(), &mut state).await;

    let action = &record.decisions[0];
    assert!(action.skipped);
    assert!(!action.success);
    assert!(action.error.is_empty());
    assert!(action.skip_reason.contains("没有"));
    assert!(record.success);
    assert!(harness.fake().write_calls().is_empty());
    assert!(harness.stats.stats("BTCUSDT").await.is_none());
}

#[tokio::test]
async fn test_kelly_parameters_tuned_on_interval() {
    let harness = Harness::new(
        FakeExchange::new(1_000.0, &[("BTCUSDT", 100.0)]),
        FakeAi::returning(vec![Decision::new("BTCUSDT", DecisionAction::Wait)]),
    );
    harness
        .stats
        .upsert_stats(HistoricalStats {
            symbol: "BTCUSDT".into(),
            total_trades: 12,
            profitable_trades: 9,
            win_rate: 0.75,
            weighted_win_rate: 0.75,
            ..Default::default()
        })
        .await;
    let mut state = TraderState::new(Utc::now());

    // 未到间隔不调整
    let record = run_cycle(&harness.deps(), &mut state).await;
    assert!(!record.execution_log.iter().any(|l| l.contains("Kelly参数")));
    assert_eq!(harness.stats.config().await, KellyConfig::default());

    state.call_count = KELLY_TUNING_INTERVAL_CYCLES - 1;
    let record = run_cycle(&harness.deps(), &mut state).await;
    assert!(record.execution_log.iter().any(|l| l.contains("激进")));
    let config = harness.stats.config().await;
    assert_relative_eq!(config.kelly_ratio_adjustment, 0.6);
    assert_relative_eq!(config.max_take_profit_multiplier, 3.5);
}
