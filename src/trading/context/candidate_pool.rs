//! 候选币种池
//!
//! 显式配置的币种优先；两者都为空时从币种池服务拉取 AI500 与 OI Top 合并结果。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::app_config::env::env_non_empty;
use crate::trading::context::CandidateCoin;
use crate::trading::okx::symbol::normalize_symbol;

/// AI500 取评分最高的前 N 个
pub const AI500_LIMIT: usize = 20;
pub const OI_TOP_LIMIT: usize = 20;
const POOL_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const STATIC_CANDIDATES: [&str; 8] = [
    "BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT", "DOGEUSDT", "ADAUSDT", "HYPEUSDT",
];

/// 候选币种来源
#[async_trait]
pub trait CandidatePool: Send + Sync {
    /// 合并后的候选币种，保持来源顺序并去重
    async fn fetch_candidates(&self, limit: usize) -> Result<Vec<CandidateCoin>>;
}

/// 固定列表
pub struct StaticCandidatePool {
    symbols: Vec<String>,
}

impl StaticCandidatePool {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }
}

impl Default for StaticCandidatePool {
    fn default() -> Self {
        Self::new(STATIC_CANDIDATES.iter().map(|s| s.to_string()).collect())
    }
}

#[async_trait]
impl CandidatePool for StaticCandidatePool {
    async fn fetch_candidates(&self, _limit: usize) -> Result<Vec<CandidateCoin>> {
        Ok(self
            .symbols
            .iter()
            .map(|s| CandidateCoin::new(normalize_symbol(s), "default"))
            .collect())
    }
}

/// 币种池服务（AI500 + OI Top）
pub struct HttpCandidatePool {
    client: Client,
    coin_pool_url: Option<String>,
    oi_top_url: Option<String>,
}

impl HttpCandidatePool {
    pub fn new(coin_pool_url: Option<String>, oi_top_url: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(POOL_HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            coin_pool_url,
            oi_top_url,
        })
    }

    async fn fetch_list(&self, url: &str, limit: usize) -> Result<Vec<String>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!("币种池接口返回 HTTP {}: {}", status.as_u16(), body));
        }
        let value: Value = serde_json::from_str(&body)?;
        Ok(extract_symbols(&value, limit))
    }
}

#[async_trait]
impl CandidatePool for HttpCandidatePool {
    async fn fetch_candidates(&self, limit: usize) -> Result<Vec<CandidateCoin>> {
        let mut lists = Vec::new();
        if let Some(url) = &self.coin_pool_url {
            lists.push(("ai500", self.fetch_list(url, limit).await));
        }
        if let Some(url) = &self.oi_top_url {
            lists.push(("oi_top", self.fetch_list(url, OI_TOP_LIMIT).await));
        }

        let mut tagged = Vec::new();
        let mut last_error = None;
        for (source, result) in lists {
            match result {
                Ok(symbols) => tagged.push((source, symbols)),
                Err(e) => {
                    warn!("获取{}币种池失败: {}", source, e);
                    last_error = Some(e);
                }
            }
        }
        if tagged.is_empty() {
            return Err(last_error.unwrap_or_else(|| anyhow!("未配置币种池接口")));
        }

        let merged = merge_sources(&tagged);
        info!("合并币种池: {}个候选币种", merged.len());
        Ok(merged)
    }
}

/// 按出现顺序合并，同一币种累积来源标签
pub fn merge_sources(lists: &[(&str, Vec<String>)]) -> Vec<CandidateCoin> {
    let mut merged: Vec<CandidateCoin> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (source, symbols) in lists {
        for symbol in symbols {
            let symbol = normalize_symbol(symbol);
            match index.get(&symbol) {
                Some(&i) => {
                    if !merged[i].sources.iter().any(|s| s == source) {
                        merged[i].sources.push(source.to_string());
                    }
                }
                None => {
                    index.insert(symbol.clone(), merged.len());
                    merged.push(CandidateCoin::new(symbol, source));
                }
            }
        }
    }
    merged
}

/// 兼容几种返回格式：顶层数组、`data` 数组，或 `data.coins` / `data.positions`；
/// 元素为字符串或带 `pair` / `symbol` 字段的对象，带 `score` 时按分数降序
pub fn extract_symbols(value: &Value, limit: usize) -> Vec<String> {
    let items = value
        .as_array()
        .or_else(|| value.get("data").and_then(Value::as_array))
        .or_else(|| {
            let data = value.get("data")?;
            data.get("coins")
                .or_else(|| data.get("positions"))
                .and_then(Value::as_array)
        });
    let Some(items) = items else {
        return Vec::new();
    };

    let mut scored: Vec<(String, f64)> = items
        .iter()
        .filter_map(|item| {
            if let Some(s) = item.as_str() {
                return Some((s.to_string(), 0.0));
            }
            let symbol = item
                .get("pair")
                .or_else(|| item.get("symbol"))
                .and_then(Value::as_str)?;
            let score = item.get("score").and_then(Value::as_f64).unwrap_or(0.0);
            Some((symbol.to_string(), score))
        })
        .filter(|(s, _)| !s.trim().is_empty())
        .collect();

    // 稳定排序，无分数时保持原顺序
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(limit).map(|(s, _)| s).collect()
}

/// COIN_POOL_API_URL / OI_TOP_API_URL 任一配置时使用币种池服务，否则使用固定列表
pub fn create_candidate_pool() -> Arc<dyn CandidatePool> {
    let coin_pool_url = env_non_empty("COIN_POOL_API_URL");
    let oi_top_url = env_non_empty("OI_TOP_API_URL");
    if coin_pool_url.is_none() && oi_top_url.is_none() {
        return Arc::new(StaticCandidatePool::default());
    }
    match HttpCandidatePool::new(coin_pool_url, oi_top_url) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            warn!("初始化币种池客户端失败，使用默认币种: {}", e);
            Arc::new(StaticCandidatePool::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_symbols_sorted_by_score() {
        let value = json!({
            "success": true,
            "data": {"coins": [
                {"pair": "SOLUSDT", "score": 60.0},
                {"pair": "BTCUSDT", "score": 90.0},
                {"pair": "ETHUSDT", "score": 75.0}
            ]}
        });
        assert_eq!(extract_symbols(&value, 2), vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(extract_symbols(&json!(["btc", "eth"]), 10), vec!["btc", "eth"]);
        assert!(extract_symbols(&json!({"code": 1}), 10).is_empty());
    }

    #[test]
    fn test_merge_sources_accumulates_tags() {
        let merged = merge_sources(&[
            ("ai500", vec!["BTCUSDT".into(), "SOL".into()]),
            ("oi_top", vec!["solusdt".into(), "DOGEUSDT".into()]),
        ]);
        let symbols: Vec<&str> = merged.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "SOLUSDT", "DOGEUSDT"]);
        assert_eq!(merged[1].sources, vec!["ai500", "oi_top"]);
    }

    #[tokio::test]
    async fn test_static_pool() {
        let coins = StaticCandidatePool::default().fetch_candidates(20).await.unwrap();
        assert_eq!(coins.len(), 8);
        assert!(coins.iter().all(|c| c.sources == vec!["default"]));
    }
}
