use std::time::Duration;

use crate::app_config::env::env_i64;

/// 决策记录写入的事务策略（超时 / 重试次数 / 重试间隔）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl TransactionConfig {
    /// 从环境变量加载，非法值忽略并保留默认值
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let timeout = env_i64("TRANSACTION_TIMEOUT_SECONDS", -1);
        if timeout > 0 {
            config.timeout = Duration::from_secs(timeout as u64);
        }

        let retries = env_i64("TRANSACTION_MAX_RETRIES", -1);
        if retries >= 0 {
            config.max_retries = retries as u32;
        }

        let interval = env_i64("TRANSACTION_RETRY_INTERVAL_SECONDS", -1);
        if interval > 0 {
            config.retry_interval = Duration::from_secs(interval as u64);
        }

        config
    }
}
