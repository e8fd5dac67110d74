use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};

use crate::app_config::env::env_or_default;
use crate::app_config::trader_config::{load_traders_file, TraderConfig};
use crate::trading::ai::HttpAiClient;
use crate::trading::context::create_candidate_pool;
use crate::trading::decision_log::FileDecisionLogger;
use crate::trading::exchange::create_exchange_adapter;
use crate::trading::kelly::{KellyConfig, KellyStatsEngine};
use crate::trading::orchestrator::{AutoTrader, TraderDeps};

pub const DEFAULT_KELLY_DATA_DIR: &str = "data";

/// 优雅关闭各阶段的超时
#[derive(Debug, Clone, Copy)]
pub struct GracefulShutdownConfig {
    /// 等待交易员完成当前周期
    pub trader_stop_timeout_secs: u64,
    /// 统计数据落盘
    pub stats_flush_timeout_secs: u64,
}

impl Default for GracefulShutdownConfig {
    fn default() -> Self {
        Self {
            trader_stop_timeout_secs: 60,
            stats_flush_timeout_secs: 10,
        }
    }
}

/// 按配置组装一个交易员
pub fn build_trader(config: TraderConfig, kelly: &KellyConfig, data_dir: &str) -> Result<AutoTrader> {
    let exchange = create_exchange_adapter(&config)?;
    let ai = HttpAiClient::from_trader(&config)?;
    let stats = KellyStatsEngine::new(data_dir, &config.id, kelly.clone());
    let logger = FileDecisionLogger::from_env(&config.id);

    let deps = TraderDeps {
        exchange,
        stats: Arc::new(stats),
        ai: Arc::new(ai),
        logger: Arc::new(logger),
        pool: create_candidate_pool(),
    };
    Ok(AutoTrader::new(config, deps)?)
}

/// 应用入口：加载配置、启动所有交易员、等待退出信号、优雅关闭
pub async fn run(config_path: impl AsRef<Path>) -> Result<()> {
    let file = load_traders_file(config_path.as_ref())?;
    if file.traders.is_empty() {
        return Err(anyhow!("配置文件中没有交易员"));
    }
    let kelly = file.kelly_config();
    let data_dir = env_or_default("KELLY_DATA_DIR", DEFAULT_KELLY_DATA_DIR);

    let mut traders = Vec::with_capacity(file.traders.len());
    for config in file.traders {
        let id = config.id.clone();
        match build_trader(config, &kelly, &data_dir) {
            Ok(trader) => traders.push(Arc::new(trader)),
            Err(e) => error!("[{}] 初始化交易员失败: {:#}", id, e),
        }
    }
    if traders.is_empty() {
        return Err(anyhow!("没有可运行的交易员"));
    }

    let mut handles = Vec::with_capacity(traders.len());
    for trader in traders.iter().cloned() {
        handles.push(tokio::spawn(async move {
            if let Err(e) = trader.run().await {
                error!("[{}] 交易循环异常退出: {:#}", trader.id(), e);
            }
        }));
    }
    info!("已启动 {} 个交易员", traders.len());

    let signal_name = setup_shutdown_signals().await?;
    info!("接收到 {} 信号，开始优雅关闭...", signal_name);

    let shutdown_config = GracefulShutdownConfig::default();
    for trader in &traders {
        trader.stop();
    }

    let stop_result = tokio::time::timeout(
        Duration::from_secs(shutdown_config.trader_stop_timeout_secs),
        futures::future::join_all(handles),
    )
    .await;
    match stop_result {
        Ok(results) => {
            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed > 0 {
                warn!("{} 个交易员任务异常结束", failed);
            }
            info!("所有交易员已停止");
        }
        Err(_) => error!(
            "停止交易员超时 ({}秒)",
            shutdown_config.trader_stop_timeout_secs
        ),
    }

    for trader in &traders {
        let flush = tokio::time::timeout(
            Duration::from_secs(shutdown_config.stats_flush_timeout_secs),
            trader.stats().shutdown(),
        )
        .await;
        match flush {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("[{}] 保存统计数据失败: {}", trader.id(), e),
            Err(_) => error!("[{}] 保存统计数据超时", trader.id()),
        }
    }

    info!("应用已优雅退出");
    Ok(())
}

/// 等待退出信号
async fn setup_shutdown_signals() -> Result<&'static str> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok("CTRL+C")
    }
}
