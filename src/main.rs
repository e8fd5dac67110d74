use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};

use rust_quant_ai::app::bootstrap;
use rust_quant_ai::app_config::env::env_or_default;
use rust_quant_ai::app_config::log::setup_logging;
use rust_quant_ai::app_config::trader_config::DEFAULT_TRADER_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(name = "rust_quant_ai", about = "AI 驱动的永续合约自动交易")]
struct Args {
    /// 交易员配置文件，默认取 TRADER_CONFIG_PATH
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();
    setup_logging()?;

    let config_path = args
        .config
        .unwrap_or_else(|| env_or_default("TRADER_CONFIG_PATH", DEFAULT_TRADER_CONFIG_PATH));
    info!("使用配置文件: {}", config_path);

    if let Err(e) = bootstrap::run(&config_path).await {
        error!("程序异常退出: {:#}", e);
        return Err(e);
    }
    Ok(())
}
