use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::app_config::env::{env_is_true, env_non_empty, env_or_default};
use crate::trading::okx::error::OkxError;
use crate::trading::okx::rate_limit::{EndpointClass, RateLimiter};
use crate::trading::okx::OkxApiResponse;

pub const OKX_BASE_URL: &str = "https://www.okx.com";
/// HTTP 请求超时
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// 本地时间与服务器时间允许的最大偏差
pub const MAX_TIMESTAMP_DRIFT_MS: i64 = 30_000;
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// 重试退避上限
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
}

#[derive(Deserialize)]
struct ServerTime {
    ts: String,
}

/// OKX API 凭证
#[derive(Debug, Clone, Default)]
pub struct OkxCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    /// 是否模拟盘
    pub simulated: bool,
}

impl OkxCredentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
        simulated: bool,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: passphrase.into(),
            simulated,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env_non_empty("OKX_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("OKX_API_KEY 未配置"))?;
        let api_secret = env_non_empty("OKX_API_SECRET")
            .ok_or_else(|| anyhow::anyhow!("OKX_API_SECRET 未配置"))?;
        let passphrase = env_non_empty("OKX_PASSPHRASE")
            .ok_or_else(|| anyhow::anyhow!("OKX_PASSPHRASE 未配置"))?;
        Ok(Self::new(
            api_key,
            api_secret,
            passphrase,
            env_is_true("IS_SIMULATED_TRADING", true),
        ))
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty() && !self.passphrase.is_empty()
    }
}

/// 签名 + 限流 + 重试 的 OKX REST 客户端
pub struct OkxClient {
    client: Client,
    credentials: OkxCredentials,
    base_url: String,
    rate_limiter: RateLimiter,
    max_retries: usize,
    /// 服务器时间 - 本地时间（毫秒）
    server_time_offset_ms: AtomicI64,
}

impl OkxClient {
    pub fn new(credentials: OkxCredentials) -> Result<Self, OkxError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| OkxError::Network(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(OkxClient {
            client,
            credentials,
            base_url: env_or_default("OKX_BASE_URL", OKX_BASE_URL),
            rate_limiter: RateLimiter::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            server_time_offset_ms: AtomicI64::new(0),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(OkxCredentials::from_env()?)?)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_simulated(&self) -> bool {
        self.credentials.simulated
    }

    /// base64(HMAC-SHA256(secret, timestamp + METHOD + path?query + body))
    pub fn generate_signature(
        &self,
        timestamp: &str,
        method: &Method,
        path: &str,
        body: &str,
    ) -> Result<String, OkxError> {
        sign_request(&self.credentials.api_secret, timestamp, method, path, body)
    }

    /// 同步服务器时间，返回偏差（毫秒）
    pub async fn sync_server_time(&self) -> Result<i64, OkxError> {
        let local_before = chrono::Utc::now().timestamp_millis();
        let url = format!("{}/api/v5/public/time", self.base_url);
        let body = self.client.get(&url).send().await?.text().await?;
        let local_after = chrono::Utc::now().timestamp_millis();

        let response: OkxApiResponse<Vec<ServerTime>> = serde_json::from_str(&body)?;
        let server_ts = response
            .data
            .first()
            .and_then(|t| t.ts.parse::<i64>().ok())
            .ok_or_else(|| OkxError::Decode(format!("无法解析服务器时间: {}", body)))?;

        let offset = server_ts - (local_before + local_after) / 2;
        self.server_time_offset_ms.store(offset, Ordering::Relaxed);
        info!("OKX服务器时间同步完成, 偏差: {} 毫秒", offset);
        Ok(offset)
    }

    fn timestamp(&self) -> Result<String, OkxError> {
        let now = chrono::Utc::now();
        let local_ms = now.timestamp_millis();
        let server_ms = local_ms + self.server_time_offset_ms.load(Ordering::Relaxed);
        validate_timestamp(local_ms, server_ms)?;
        Ok(now.format("%Y-%m-%dT%H:%M:%S.%3fZ").to_string())
    }

    /// 发送请求，返回 `data` 字段
    ///
    /// GET 请求对网络错误与 5xx 重试；写请求只对限频、订单过多、临时性错误码和网络类错误重试
    pub async fn send_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &str,
    ) -> Result<T, OkxError> {
        let is_read = method == Method::GET;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(MAX_BACKOFF)
            .take(self.max_retries);

        RetryIf::spawn(
            strategy,
            || self.send_once::<T>(method.clone(), path, body),
            |err: &OkxError| {
                let retry = if is_read {
                    err.is_retryable_read() && !err.is_auth_error()
                } else {
                    err.is_retryable()
                };
                if retry {
                    warn!("OKX请求失败，准备重试: path={}, err={}", path, err);
                }
                retry
            },
        )
        .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &str,
    ) -> Result<T, OkxError> {
        self.rate_limiter
            .acquire(EndpointClass::from_path(path))
            .await?;

        let timestamp = self.timestamp()?;
        let signature = self.generate_signature(&timestamp, &method, path, body)?;
        let url = format!("{}{}", self.base_url, path);

        let mut request_builder = self
            .client
            .request(method, &url)
            .header("OK-ACCESS-KEY", &self.credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.credentials.passphrase)
            .header("Content-Type", "application/json");

        //设置是否是模拟盘
        if self.credentials.simulated {
            request_builder = request_builder.header("x-simulated-trading", "1");
        }
        if !body.is_empty() {
            request_builder = request_builder.body(body.to_string());
        }

        let response = request_builder.send().await?;
        let status_code = response.status();
        let response_body = response.text().await?;
        debug!("path:{}, okx_response: {}", path, response_body);

        if !status_code.is_success() {
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&response_body) {
                if !error.code.is_empty() && error.code != "0" {
                    return Err(OkxError::api(error.code, error.msg));
                }
            }
            return Err(OkxError::Http {
                status: status_code.as_u16(),
                body: response_body,
            });
        }

        parse_envelope(&response_body)
    }
}

/// 解析 `{code,msg,data}`，code 或批量结果中的 sCode 非 0 视为失败
pub fn parse_envelope<T: DeserializeOwned>(response_body: &str) -> Result<T, OkxError> {
    let envelope: OkxApiResponse<serde_json::Value> = serde_json::from_str(response_body)?;
    let first_item_error = envelope
        .data
        .as_array()
        .and_then(|items| items.first())
        .and_then(|item| {
            let s_code = item.get("sCode")?.as_str()?;
            if s_code.is_empty() || s_code == "0" {
                return None;
            }
            let s_msg = item
                .get("sMsg")
                .and_then(|m| m.as_str())
                .unwrap_or_default();
            Some(OkxError::api(s_code, s_msg))
        });

    if envelope.code != "0" {
        // code=1/2 时具体原因在 data[0].sCode
        return Err(first_item_error.unwrap_or_else(|| OkxError::api(envelope.code, envelope.msg)));
    }
    if let Some(err) = first_item_error {
        return Err(err);
    }
    Ok(serde_json::from_value(envelope.data)?)
}

pub fn sign_request(
    secret: &str,
    timestamp: &str,
    method: &Method,
    path: &str,
    body: &str,
) -> Result<String, OkxError> {
    let sign_payload = format!("{}{}{}{}", timestamp, method.as_str(), path, body);
    let mut hmac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| OkxError::InvalidParam(format!("无效的API Secret: {}", e)))?;
    hmac.update(sign_payload.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(hmac.finalize().into_bytes()))
}

/// 时间戳必须在服务器时间 ±30s 以内
pub fn validate_timestamp(local_ms: i64, server_ms: i64) -> Result<(), OkxError> {
    let drift_ms = local_ms - server_ms;
    if drift_ms.abs() > MAX_TIMESTAMP_DRIFT_MS {
        return Err(OkxError::TimestampDrift { drift_ms });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_request_is_deterministic() {
        let signature = sign_request(
            "secret",
            "2020-12-08T09:08:57.715Z",
            &Method::GET,
            "/api/v5/account/balance?ccy=BTC",
            "",
        )
        .unwrap();
        let again = sign_request(
            "secret",
            "2020-12-08T09:08:57.715Z",
            &Method::GET,
            "/api/v5/account/balance?ccy=BTC",
            "",
        )
        .unwrap();
        assert_eq!(signature, again);
        // base64 of 32 bytes
        assert_eq!(signature.len(), 44);
        let other = sign_request(
            "secret",
            "2020-12-08T09:08:57.715Z",
            &Method::POST,
            "/api/v5/account/balance?ccy=BTC",
            "",
        )
        .unwrap();
        assert_ne!(signature, other);
    }

    #[test]
    fn test_validate_timestamp() {
        assert!(validate_timestamp(1_000_000, 1_000_000 + 29_999).is_ok());
        assert_eq!(
            validate_timestamp(1_000_000, 1_000_000 + 30_001),
            Err(OkxError::TimestampDrift { drift_ms: -30_001 })
        );
    }

    #[test]
    fn test_parse_envelope_ok() {
        let body = r#"{"code":"0","msg":"","data":[{"ts":"1597026383085"}]}"#;
        let data: Vec<ServerTime> = parse_envelope(body).unwrap();
        assert_eq!(data[0].ts, "1597026383085");
    }

    #[test]
    fn test_parse_envelope_item_error() {
        let body = r#"{"code":"1","msg":"All operations failed","data":[{"ordId":"","sCode":"51008","sMsg":"Order failed. Insufficient USDT margin"}]}"#;
        let err = parse_envelope::<serde_json::Value>(body).unwrap_err();
        assert_eq!(err.code(), Some("51008"));
    }

    #[test]
    fn test_parse_envelope_code_error() {
        let body = r#"{"code":"50011","msg":"Too Many Requests","data":[]}"#;
        let err = parse_envelope::<serde_json::Value>(body).unwrap_err();
        assert!(err.is_retryable());
    }
}
