//! 按接口类别的令牌桶限流
//!
//! - public: 行情/公共数据
//! - private: 账户类
//! - trading: 下单/撤单类
//! 取令牌最多等待 100ms，超时返回 `rate limit exceeded`

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::trading::okx::error::OkxError;

/// 取令牌的最大等待时间
pub const RATE_LIMIT_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    Public,
    Private,
    Trading,
}

impl EndpointClass {
    /// 根据请求路径判断接口类别
    pub fn from_path(path: &str) -> Self {
        if path.contains("/trade/") {
            EndpointClass::Trading
        } else if path.contains("/market/") || path.contains("/public/") {
            EndpointClass::Public
        } else {
            EndpointClass::Private
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Public => "public",
            EndpointClass::Private => "private",
            EndpointClass::Trading => "trading",
        }
    }

    /// (每秒补充速率, 桶容量)
    fn limits(&self) -> (f64, f64) {
        match self {
            EndpointClass::Public => (10.0, 20.0),
            EndpointClass::Private => (5.0, 10.0),
            EndpointClass::Trading => (2.0, 5.0),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// 单个类别的令牌桶
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: f64,
    capacity: f64,
    state: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 在 deadline 内尝试取一个令牌；返回 false 表示等待超时
    pub async fn acquire(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return true;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate_per_sec)
            };

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            if wait > remaining {
                // 截止前等不到令牌，直接返回
                tokio::time::sleep(remaining).await;
                return false;
            }
            tokio::time::sleep(wait).await;
        }
    }
}

/// OKX 三类接口的限流器
#[derive(Debug)]
pub struct RateLimiter {
    public: TokenBucket,
    private: TokenBucket,
    trading: TokenBucket,
    max_wait: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WAIT)
    }
}

impl RateLimiter {
    pub fn new(max_wait: Duration) -> Self {
        let bucket = |class: EndpointClass| {
            let (rate, capacity) = class.limits();
            TokenBucket::new(rate, capacity)
        };
        Self {
            public: bucket(EndpointClass::Public),
            private: bucket(EndpointClass::Private),
            trading: bucket(EndpointClass::Trading),
            max_wait,
        }
    }

    pub async fn acquire(&self, class: EndpointClass) -> Result<(), OkxError> {
        let bucket = match class {
            EndpointClass::Public => &self.public,
            EndpointClass::Private => &self.private,
            EndpointClass::Trading => &self.trading,
        };
        if bucket.acquire(self.max_wait).await {
            Ok(())
        } else {
            Err(OkxError::RateLimitExceeded {
                class: class.as_str(),
            })
        }
    }
}
