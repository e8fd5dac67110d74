use std::collections::HashMap;

use crate::trading::exchange::PositionSide;

/// (symbol, side) -> 首次观察时间（毫秒）
///
/// 只在所属交易员的任务内访问，不需要加锁
#[derive(Debug, Default, Clone)]
pub struct PositionTracker {
    first_seen: HashMap<(String, PositionSide), i64>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回首次观察时间，未记录过则以 now_ms 登记
    pub fn observe(&mut self, symbol: &str, side: PositionSide, now_ms: i64) -> i64 {
        *self
            .first_seen
            .entry((symbol.to_string(), side))
            .or_insert(now_ms)
    }

    /// 开仓成功时登记，覆盖旧值
    pub fn record_open(&mut self, symbol: &str, side: PositionSide, now_ms: i64) {
        self.first_seen.insert((symbol.to_string(), side), now_ms);
    }

    /// 删除本次快照中已不存在的持仓
    pub fn prune(&mut self, alive: &[(String, PositionSide)]) {
        self.first_seen
            .retain(|key, _| alive.iter().any(|(s, side)| *s == key.0 && *side == key.1));
    }

    pub fn first_seen(&self, symbol: &str, side: PositionSide) -> Option<i64> {
        self.first_seen.get(&(symbol.to_string(), side)).copied()
    }

    pub fn remove(&mut self, symbol: &str, side: PositionSide) -> Option<i64> {
        self.first_seen.remove(&(symbol.to_string(), side))
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}
