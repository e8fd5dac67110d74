//! 适配器外层的余额 / 持仓 TTL 缓存

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::trading::exchange::{Balance, ExchangeAdapter, ExchangePosition, OrderAck, PositionSide};

/// 余额与持仓缓存时长
pub const ACCOUNT_CACHE_TTL: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct CacheEntry<T> {
    value: T,
    expire_at: Instant,
}

/// 读多写少；并发刷新不做合并，最后写入者生效
pub struct TtlCache<T>
where
    T: Clone + Send + Sync,
{
    entry: RwLock<Option<CacheEntry<T>>>,
    ttl: Duration,
}

impl<T> TtlCache<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// 未过期时返回缓存值
    pub async fn get(&self) -> Option<T> {
        let guard = self.entry.read().await;
        guard
            .as_ref()
            .filter(|entry| Instant::now() < entry.expire_at)
            .map(|entry| entry.value.clone())
    }

    pub async fn set(&self, value: T) {
        let mut guard = self.entry.write().await;
        *guard = Some(CacheEntry {
            value,
            expire_at: Instant::now() + self.ttl,
        });
    }

    pub async fn invalidate(&self) {
        self.entry.write().await.take();
    }
}

/// 为任意适配器加上余额 / 持仓缓存
///
/// 开平仓成功后两个缓存立即失效，同一周期内后续的保证金与重复开仓检查读到的是成交后的状态
pub struct CachedExchange<A> {
    inner: A,
    balance_cache: TtlCache<Balance>,
    positions_cache: TtlCache<Vec<ExchangePosition>>,
}

impl<A: ExchangeAdapter> CachedExchange<A> {
    pub fn new(inner: A) -> Self {
        Self::with_ttl(inner, ACCOUNT_CACHE_TTL)
    }

    pub fn with_ttl(inner: A, ttl: Duration) -> Self {
        Self {
            inner,
            balance_cache: TtlCache::new(ttl),
            positions_cache: TtlCache::new(ttl),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    async fn invalidate_account(&self) {
        self.balance_cache.invalidate().await;
        self.positions_cache.invalidate().await;
        debug!("{}: 成交后清除余额与持仓缓存", self.inner.name());
    }

    async fn after_write(&self, result: Result<OrderAck>) -> Result<OrderAck> {
        if result.is_ok() {
            self.invalidate_account().await;
        }
        result
    }
}

#[async_trait]
impl<A: ExchangeAdapter> ExchangeAdapter for CachedExchange<A> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get_balance(&self) -> Result<Balance> {
        if let Some(balance) = self.balance_cache.get().await {
            return Ok(balance);
        }
        let balance = self.inner.get_balance().await?;
        self.balance_cache.set(balance.clone()).await;
        Ok(balance)
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>> {
        if let Some(positions) = self.positions_cache.get().await {
            return Ok(positions);
        }
        let positions = self.inner.get_positions().await?;
        self.positions_cache.set(positions.clone()).await;
        Ok(positions)
    }

    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck> {
        let result = self.inner.open_long(symbol, quantity, leverage).await;
        self.after_write(result).await
    }

    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck> {
        let result = self.inner.open_short(symbol, quantity, leverage).await;
        self.after_write(result).await
    }

    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck> {
        let result = self.inner.close_long(symbol, quantity).await;
        self.after_write(result).await
    }

    async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck> {
        let result = self.inner.close_short(symbol, quantity).await;
        self.after_write(result).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.inner.set_leverage(symbol, leverage).await
    }

    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> Result<()> {
        self.inner.set_margin_mode(symbol, is_cross).await
    }

    async fn set_stop_loss(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        trigger_price: f64,
    ) -> Result<()> {
        self.inner
            .set_stop_loss(symbol, side, quantity, trigger_price)
            .await
    }

    async fn set_take_profit(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        trigger_price: f64,
    ) -> Result<()> {
        self.inner
            .set_take_profit(symbol, side, quantity, trigger_price)
            .await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        self.inner.cancel_all_orders(symbol).await
    }

    async fn get_market_price(&self, symbol: &str) -> Result<f64> {
        self.inner.get_market_price(symbol).await
    }
}
