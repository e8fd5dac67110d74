use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app_config::env::{env_is_true, env_non_empty};
use crate::error::{AppError, AppResult};
use crate::trading::kelly::KellyConfig;

pub const DEFAULT_TRADER_CONFIG_PATH: &str = "config/traders.json";
/// 扫描间隔下限
pub const MIN_SCAN_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 180;
pub const MAX_LEVERAGE: u32 = 125;

pub const SUPPORTED_EXCHANGES: [&str; 1] = ["okx"];
pub const SUPPORTED_AI_MODELS: [&str; 3] = ["deepseek", "qwen", "custom"];

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_leverage() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_template() -> String {
    "default".to_string()
}

fn default_exchange() -> String {
    "okx".to_string()
}

/// OKX 账户凭证，留空时从环境变量读取
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct OkxAccountConfig {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
    /// 模拟盘
    pub simulated: Option<bool>,
}

/// AI 模型接入配置
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AiModelConfig {
    pub api_key: String,
    /// 仅 custom 模型使用
    pub custom_api_url: String,
    pub custom_model_name: String,
}

/// 单个交易员的静态配置
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TraderConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// deepseek / qwen / custom
    pub ai_model: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default)]
    pub okx: OkxAccountConfig,
    #[serde(default)]
    pub ai: AiModelConfig,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// 初始资金（USDT）
    pub initial_balance: f64,
    #[serde(default = "default_leverage")]
    pub btc_eth_leverage: u32,
    #[serde(default = "default_leverage")]
    pub altcoin_leverage: u32,
    #[serde(default = "default_true")]
    pub is_cross_margin: bool,
    /// 默认币种池
    #[serde(default)]
    pub default_coins: Vec<String>,
    /// 指定交易币种，优先级最高
    #[serde(default)]
    pub trading_coins: Vec<String>,
    #[serde(default)]
    pub custom_prompt: String,
    /// true 时 custom_prompt 完全替换系统提示词
    #[serde(default)]
    pub override_base_prompt: bool,
    #[serde(default = "default_template")]
    pub system_prompt_template: String,
    /// 以下风控参数只作为提示词中的参考
    #[serde(default)]
    pub max_daily_loss: f64,
    #[serde(default)]
    pub max_drawdown: f64,
    #[serde(default)]
    pub stop_trading_minutes: u64,
}

impl TraderConfig {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(MIN_SCAN_INTERVAL_SECS))
    }

    /// 凭证为空时使用环境变量补齐
    pub fn fill_credentials_from_env(&mut self) {
        if self.exchange == "okx" {
            if self.okx.api_key.is_empty() {
                self.okx.api_key = env_non_empty("OKX_API_KEY").unwrap_or_default();
            }
            if self.okx.secret_key.is_empty() {
                self.okx.secret_key = env_non_empty("OKX_API_SECRET").unwrap_or_default();
            }
            if self.okx.passphrase.is_empty() {
                self.okx.passphrase = env_non_empty("OKX_PASSPHRASE").unwrap_or_default();
            }
            if self.okx.simulated.is_none() {
                self.okx.simulated = Some(env_is_true("IS_SIMULATED_TRADING", true));
            }
        }

        if self.ai.api_key.is_empty() {
            let key = match self.ai_model.as_str() {
                "deepseek" => env_non_empty("DEEPSEEK_API_KEY"),
                "qwen" => env_non_empty("QWEN_API_KEY"),
                _ => None,
            };
            self.ai.api_key = key.unwrap_or_default();
        }
    }

    /// 校验配置；扫描间隔低于下限时上调并告警
    pub fn validate(&mut self) -> AppResult<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::config("交易员ID不能为空"));
        }
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return Err(AppError::config(format!(
                "[{}] 初始资金必须大于0: {}",
                self.id, self.initial_balance
            )));
        }

        self.exchange = self.exchange.to_lowercase();
        if !SUPPORTED_EXCHANGES.contains(&self.exchange.as_str()) {
            return Err(AppError::config(format!(
                "[{}] 不支持的交易所: {}",
                self.id, self.exchange
            )));
        }

        self.ai_model = self.ai_model.to_lowercase();
        if !SUPPORTED_AI_MODELS.contains(&self.ai_model.as_str()) {
            return Err(AppError::config(format!(
                "[{}] 不支持的AI模型: {}",
                self.id, self.ai_model
            )));
        }
        if self.ai_model == "custom"
            && (self.ai.custom_api_url.is_empty()
                || self.ai.custom_model_name.is_empty()
                || self.ai.api_key.is_empty())
        {
            return Err(AppError::config(format!(
                "[{}] 自定义AI模型需要配置 URL、模型名称和 API Key",
                self.id
            )));
        }

        for (label, leverage) in [
            ("btc_eth_leverage", self.btc_eth_leverage),
            ("altcoin_leverage", self.altcoin_leverage),
        ] {
            if !(1..=MAX_LEVERAGE).contains(&leverage) {
                return Err(AppError::validation(format!(
                    "[{}] {} 超出范围 [1, {}]: {}",
                    self.id, label, MAX_LEVERAGE, leverage
                )));
            }
        }

        for symbol in self.trading_coins.iter().chain(self.default_coins.iter()) {
            let valid = !symbol.trim().is_empty()
                && symbol.trim().chars().all(|c| c.is_ascii_alphanumeric());
            if !valid {
                return Err(AppError::validation(format!(
                    "[{}] 非法的交易对: {:?}",
                    self.id, symbol
                )));
            }
        }

        if self.scan_interval_secs < MIN_SCAN_INTERVAL_SECS {
            warn!(
                "[{}] 扫描间隔 {}s 低于下限，调整为 {}s",
                self.id, self.scan_interval_secs, MIN_SCAN_INTERVAL_SECS
            );
            self.scan_interval_secs = MIN_SCAN_INTERVAL_SECS;
        }

        Ok(())
    }
}

/// 配置文件结构
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TradersFile {
    #[serde(default)]
    pub traders: Vec<TraderConfig>,
    #[serde(default)]
    pub kelly: Option<KellyConfig>,
}

impl TradersFile {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let mut file: TradersFile = serde_json::from_str(raw)?;

        let mut ids = HashSet::new();
        for trader in file.traders.iter_mut() {
            trader.fill_credentials_from_env();
            trader.validate()?;
            if !ids.insert(trader.id.clone()) {
                return Err(AppError::config(format!("交易员ID重复: {}", trader.id)));
            }
        }
        Ok(file)
    }

    /// Kelly 参数：文件配置 + 环境变量覆盖
    pub fn kelly_config(&self) -> KellyConfig {
        self.kelly.clone().unwrap_or_default().with_env_overrides()
    }
}

/// 读取并校验交易员配置文件
pub fn load_traders_file(path: impl AsRef<Path>) -> AppResult<TradersFile> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::config(format!("读取配置文件失败 {}: {}", path.display(), e))
    })?;
    let file = TradersFile::parse(&raw)?;
    info!(
        "加载交易员配置: {} 个交易员 ({})",
        file.traders.len(),
        path.display()
    );
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(extra: &str) -> String {
        format!(
            r#"{{"traders":[{{"id":"t1","ai_model":"deepseek","initial_balance":1000,
            "okx":{{"api_key":"k","secret_key":"s","passphrase":"p","simulated":true}},
            "ai":{{"api_key":"sk"}}{}}}]}}"#,
            extra
        )
    }

    #[test]
    fn test_defaults_applied() {
        let file = TradersFile::parse(&sample("")).unwrap();
        let trader = &file.traders[0];
        assert_eq!(trader.exchange, "okx");
        assert_eq!(trader.scan_interval(), Duration::from_secs(180));
        assert_eq!(trader.btc_eth_leverage, 5);
        assert!(trader.is_cross_margin);
        assert_eq!(trader.system_prompt_template, "default");
        assert_eq!(trader.display_name(), "t1");
    }

    #[test]
    fn test_scan_interval_raised_to_lower_bound() {
        let file = TradersFile::parse(&sample(r#","scan_interval_secs":10"#)).unwrap();
        assert_eq!(file.traders[0].scan_interval_secs, MIN_SCAN_INTERVAL_SECS);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = TradersFile::parse(&sample(r#","btc_eth_leverage":200"#)).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let raw = sample("").replace(r#""initial_balance":1000"#, r#""initial_balance":0"#);
        assert!(matches!(
            TradersFile::parse(&raw).unwrap_err(),
            AppError::ConfigError(_)
        ));

        let err = TradersFile::parse(&sample(r#","exchange":"binance""#)).unwrap_err();
        assert!(err.to_string().contains("不支持的交易所"));

        let err = TradersFile::parse(&sample(r#","trading_coins":["BTC-USDT"]"#)).unwrap_err();
        assert!(err.to_string().contains("非法的交易对"));
    }

    #[test]
    fn test_custom_model_requires_endpoint() {
        let raw = sample("").replace(r#""ai_model":"deepseek""#, r#""ai_model":"custom""#);
        assert!(TradersFile::parse(&raw).is_err());
    }
}
