use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::app_config::env::env_or_default;
use crate::app_config::transaction::TransactionConfig;
use crate::trading::decision_log::{DecisionLogger, DecisionRecord};

pub const DEFAULT_DECISION_LOG_DIR: &str = "decision_logs";

/// 每条记录一个 JSON 文件：`<root>/<trader_id>/decision_<YYYYMMDD_HHMMSS>_cycle<N>.json`
pub struct FileDecisionLogger {
    dir: PathBuf,
    transaction: TransactionConfig,
}

impl FileDecisionLogger {
    pub fn new(root: impl AsRef<Path>, trader_id: &str, transaction: TransactionConfig) -> Self {
        Self {
            dir: root.as_ref().join(trader_id),
            transaction,
        }
    }

    /// 根目录取 DECISION_LOG_DIR
    pub fn from_env(trader_id: &str) -> Self {
        let root = env_or_default("DECISION_LOG_DIR", DEFAULT_DECISION_LOG_DIR);
        Self::new(root, trader_id, TransactionConfig::from_env())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(record: &DecisionRecord) -> String {
        format!(
            "decision_{}_cycle{}.json",
            record.timestamp.format("%Y%m%d_%H%M%S"),
            record.cycle_number
        )
    }

    async fn write_once(&self, path: &Path, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("创建日志目录失败: {}", self.dir.display()))?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("写入决策日志失败: {}", path.display()))?;
        Ok(())
    }
}

/// decision_20250101_120000_cycle12.json -> ("20250101_120000", 12)
fn sort_key(file_name: &str) -> Option<(String, u64)> {
    let stem = file_name
        .strip_prefix("decision_")?
        .strip_suffix(".json")?;
    let (stamp, cycle) = stem.rsplit_once("_cycle")?;
    Some((stamp.to_string(), cycle.parse().ok()?))
}

#[async_trait]
impl DecisionLogger for FileDecisionLogger {
    async fn log_decision(&self, record: &DecisionRecord) -> Result<()> {
        let path = self.dir.join(Self::file_name(record));
        let content = serde_json::to_string_pretty(record)?;

        let attempts = self.transaction.max_retries + 1;
        let mut last_error = anyhow!("决策日志未写入");
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.transaction.timeout, self.write_once(&path, &content))
                .await
            {
                Ok(Ok(())) => {
                    debug!("决策日志已保存: {}", path.display());
                    return Ok(());
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = anyhow!("写入决策日志超时: {}", path.display()),
            }
            if attempt < attempts {
                warn!(
                    "决策日志写入失败，第{}次重试: {}",
                    attempt, last_error
                );
                tokio::time::sleep(self.transaction.retry_interval).await;
            }
        }
        Err(last_error)
    }

    async fn latest_records(&self, n: usize) -> Result<Vec<DecisionRecord>> {
        if n == 0 || !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = sort_key(&name) {
                files.push((key, entry.path()));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        let skip = files.len().saturating_sub(n);

        let mut records = Vec::with_capacity(files.len() - skip);
        for (_, path) in files.into_iter().skip(skip) {
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("读取决策日志失败 {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<DecisionRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!("解析决策日志失败 {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}
