use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::trading::okx::error::OkxError;
use crate::trading::okx::okx_client::OkxClient;
use crate::trading::okx::parse_f64;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TickerData {
    pub inst_id: String,
    /// 最新成交价
    pub last: String,
    pub ask_px: String,
    pub bid_px: String,
    pub ts: String,
}

pub struct OkxMarket {
    client: Arc<OkxClient>,
}

impl OkxMarket {
    pub fn new(client: Arc<OkxClient>) -> Self {
        Self { client }
    }

    pub async fn get_ticker(&self, inst_id: &str) -> Result<TickerData, OkxError> {
        let path = format!("/api/v5/market/ticker?instId={}", inst_id);
        let tickers: Vec<TickerData> = self.client.send_request(Method::GET, &path, "").await?;
        tickers
            .into_iter()
            .next()
            .ok_or_else(|| OkxError::api("51001", format!("交易产品不存在: {}", inst_id)))
    }

    /// 最新成交价
    pub async fn get_last_price(&self, inst_id: &str) -> Result<f64, OkxError> {
        let ticker = self.get_ticker(inst_id).await?;
        parse_f64(&ticker.last)
            .filter(|px| *px > 0.0)
            .ok_or_else(|| OkxError::Decode(format!("无效的最新价: {} {}", inst_id, ticker.last)))
    }
}
