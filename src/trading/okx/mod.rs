use serde::{Deserialize, Serialize};

pub mod account;
pub mod contract;
pub mod error;
pub mod market;
pub mod okx_client;
pub mod public_data;
pub mod rate_limit;
pub mod symbol;
pub mod trade;

pub use error::OkxError;
pub use okx_client::{OkxClient, OkxCredentials};

// 通用的响应结构体
#[derive(Serialize, Deserialize, Debug)]
pub struct OkxApiResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    pub data: T,
}

/// OKX 数值字段均为字符串，空串视为缺失
pub fn parse_f64(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 价格/数量统一格式化为 8 位小数
pub fn format_px(value: f64) -> String {
    format!("{:.8}", value)
}
