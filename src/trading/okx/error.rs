use thiserror::Error;

/// 可重试的 OKX 业务错误码：限频 / 订单过多 / 临时性撤单失败
const RETRYABLE_CODES: [&str; 3] = ["50011", "50061", "58200"];

/// 鉴权类错误码，重试无意义
const AUTH_CODES: [&str; 10] = [
    "50001", "50002", "50003", "50004", "50005", "50006", "50007", "50008", "50013", "50029",
];

/// 网络类错误的特征字符串（小写匹配）
const NETWORK_ERROR_PATTERNS: [&str; 7] = [
    "connection reset",
    "timeout",
    "timed out",
    "eof",
    "broken pipe",
    "connection refused",
    "temporary failure",
];

/// OKX 接口错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OkxError {
    /// 业务错误码（code != "0" 或 sCode != "0"）
    #[error("OKX API错误 [{code}]: {message}")]
    Api { code: String, message: String },

    #[error("rate limit exceeded: {class}")]
    RateLimitExceeded { class: &'static str },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("HTTP状态异常 {status}: {body}")]
    Http { status: u16, body: String },

    /// 本地时间与服务器时间偏差超过允许范围
    #[error("时间戳偏差过大: {drift_ms}ms")]
    TimestampDrift { drift_ms: i64 },

    #[error("响应解析失败: {0}")]
    Decode(String),

    #[error("参数错误: {0}")]
    InvalidParam(String),
}

impl OkxError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let mut message = message.into();
        if message.is_empty() {
            message = describe_code(&code).to_string();
        }
        OkxError::Api { code, message }
    }

    /// 写操作只对这一组错误重试
    pub fn is_retryable(&self) -> bool {
        match self {
            OkxError::Api { code, .. } => RETRYABLE_CODES.contains(&code.as_str()),
            OkxError::Network(msg) => is_network_error_message(msg),
            _ => false,
        }
    }

    /// 读操作（GET）的重试条件：在写操作基础上额外重试 5xx 与所有网络错误
    pub fn is_retryable_read(&self) -> bool {
        match self {
            OkxError::Network(_) => true,
            OkxError::Http { status, .. } => *status >= 500,
            _ => self.is_retryable(),
        }
    }

    pub fn is_auth_error(&self) -> bool {
        match self {
            OkxError::Api { code, .. } => AUTH_CODES.contains(&code.as_str()),
            OkxError::Http { status, .. } => *status == 401,
            _ => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            OkxError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for OkxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return OkxError::Network(format!("timeout: {}", err));
        }
        OkxError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for OkxError {
    fn from(err: serde_json::Error) -> Self {
        OkxError::Decode(err.to_string())
    }
}

pub fn is_network_error_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    NETWORK_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

/// 常见错误码说明
pub fn describe_code(code: &str) -> &'static str {
    match code {
        "0" => "操作成功",
        "50001" => "服务暂时不可用",
        "50002" => "JSON语法错误",
        "50004" => "接口请求超时",
        "50005" => "接口已下线或无法使用",
        "50006" => "无效的Content-Type",
        "50007" => "账户被冻结",
        "50008" => "用户不存在",
        "50011" => "请求频率过高",
        "50013" => "系统繁忙",
        "50029" => "账户存在风险，已被限制",
        "50061" => "订单请求频率过高",
        "51000" => "参数错误",
        "51001" => "交易产品不存在",
        "51008" => "可用保证金不足",
        "51020" => "下单数量小于最小下单量",
        "51202" => "市价单数量超过最大值",
        "51400" => "撤单失败，订单不存在或已完成",
        "58200" => "暂时无法处理请求，请稍后重试",
        _ => "未知错误",
    }
}

// ---------------- 参数校验 ----------------

pub fn validate_leverage(leverage: u32) -> Result<(), OkxError> {
    if !(1..=125).contains(&leverage) {
        return Err(OkxError::InvalidParam(format!(
            "杠杆倍数必须在1-125之间: {}",
            leverage
        )));
    }
    Ok(())
}

pub fn validate_quantity(quantity: f64) -> Result<(), OkxError> {
    if !(quantity.is_finite() && quantity > 0.0) {
        return Err(OkxError::InvalidParam(format!("数量必须大于0: {}", quantity)));
    }
    Ok(())
}

pub fn validate_price(price: f64) -> Result<(), OkxError> {
    if !(price.is_finite() && price > 0.0) {
        return Err(OkxError::InvalidParam(format!("价格必须大于0: {}", price)));
    }
    Ok(())
}

pub fn validate_symbol(symbol: &str) -> Result<(), OkxError> {
    if symbol.trim().is_empty() {
        return Err(OkxError::InvalidParam("交易对不能为空".to_string()));
    }
    Ok(())
}
