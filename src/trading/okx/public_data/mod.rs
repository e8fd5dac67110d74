use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::trading::okx::contract::ContractSpec;
use crate::trading::okx::error::OkxError;
use crate::trading::okx::okx_client::OkxClient;
use crate::trading::okx::parse_f64;

/// 交易产品基础信息
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InstrumentData {
    pub inst_id: String,
    /// 合约面值
    pub ct_val: String,
    /// 最小下单数量
    pub min_sz: String,
    /// 下单数量精度
    pub lot_sz: String,
}

impl InstrumentData {
    /// 字段缺失时按 1 处理
    pub fn to_contract_spec(&self) -> ContractSpec {
        ContractSpec::new(
            parse_f64(&self.ct_val).unwrap_or(1.0),
            parse_f64(&self.min_sz).unwrap_or(1.0),
            parse_f64(&self.lot_sz).unwrap_or(1.0),
        )
    }
}

pub struct OkxPublicData {
    client: Arc<OkxClient>,
}

impl OkxPublicData {
    pub fn new(client: Arc<OkxClient>) -> Self {
        Self { client }
    }

    /**
    获取交易产品基础信息
    inst_type String 是 产品类型 SWAP：永续合约
    inst_id	String 否 产品ID
     **/
    pub async fn get_instruments(
        &self,
        inst_type: &str,
        inst_id: Option<&str>,
    ) -> Result<Vec<InstrumentData>, OkxError> {
        let mut path = format!("/api/v5/public/instruments?instType={}", inst_type);
        if let Some(inst_id) = inst_id {
            path.push_str(&format!("&instId={}", inst_id));
        }
        self.client.send_request(Method::GET, &path, "").await
    }
}
