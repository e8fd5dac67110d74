//! 凯利公式止盈止损引擎
//!
//! 根据交易员自身的历史成交计算每个持仓的移动止损价与动态止盈价：
//! - 时间衰减加权胜率 / 平均盈亏
//! - 波动率调整的半凯利比例
//! - 持仓期间峰值回撤检测

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::trading::exchange::PositionSide;
use crate::trading::kelly::types::{
    HistoricalStats, KellyConfig, KellyError, TradeRecord, DEFAULT_AVG_LOSS, DEFAULT_VOLATILITY,
};

const SECONDS_PER_DAY: f64 = 86_400.0;
/// 亏损状态下的固定止盈目标
const LOSS_TAKE_PROFIT_PCT: f64 = 0.18;
/// 亏损状态下的止损上限
const MAX_STOP_LOSS_PCT: f64 = 0.12;
/// 无统计数据时的止损幅度
const DEFAULT_STOP_LOSS_PCT: f64 = 0.08;

/// 参与参数优化的最少成交数
pub const OPTIMIZE_MIN_TRADES: u32 = 10;
const HIGH_WIN_RATE: f64 = 0.6;
const LOW_WIN_RATE: f64 = 0.4;
const AGGRESSIVE_KELLY_RATIO: f64 = 0.6;
const AGGRESSIVE_TP_MULTIPLIER: f64 = 3.5;
const CONSERVATIVE_KELLY_RATIO: f64 = 0.3;
const CONSERVATIVE_TP_MULTIPLIER: f64 = 2.0;

/// 一次参数优化的结果，附带平均加权胜率
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterAdjustment {
    Aggressive(f64),
    Conservative(f64),
    Unchanged(f64),
    InsufficientData,
}

pub struct KellyStatsEngine {
    historical_stats: RwLock<HashMap<String, HistoricalStats>>,
    /// 持仓期间的最高盈利点
    position_peaks: RwLock<HashMap<String, f64>>,
    config: RwLock<KellyConfig>,
    data_file: PathBuf,
    last_save: Mutex<Instant>,
    /// 同一时刻只允许一个写文件操作
    save_lock: Mutex<()>,
}

impl KellyStatsEngine {
    /// `<data_dir>/kelly_stats_<trader_id>.json`
    pub fn stats_file_path(data_dir: impl AsRef<Path>, trader_id: &str) -> PathBuf {
        data_dir
            .as_ref()
            .join(format!("kelly_stats_{}.json", trader_id))
    }

    pub fn new(data_dir: impl AsRef<Path>, trader_id: &str, config: KellyConfig) -> Self {
        Self::with_file(Self::stats_file_path(data_dir, trader_id), config)
    }

    /// 创建时尝试加载历史数据，文件不存在或损坏视为空状态
    pub fn with_file(data_file: impl Into<PathBuf>, config: KellyConfig) -> Self {
        let data_file = data_file.into();
        let stats = match load_stats_file(&data_file) {
            Ok(stats) => {
                info!(
                    "成功从文件加载统计数据: {} ({} 个交易对)",
                    data_file.display(),
                    stats.len()
                );
                stats
            }
            Err(e) => {
                warn!("无法加载历史统计数据: {}，将创建新的统计记录", e);
                HashMap::new()
            }
        };

        Self {
            historical_stats: RwLock::new(stats),
            position_peaks: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            data_file,
            last_save: Mutex::new(Instant::now()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub async fn config(&self) -> KellyConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: KellyConfig) {
        info!(
            "更新Kelly配置: 凯利调整={:.2}, 最大倍数={:.1}, 时间衰减={:.3}",
            config.kelly_ratio_adjustment,
            config.max_take_profit_multiplier,
            config.time_decay_lambda
        );
        *self.config.write().await = config;
    }

    pub async fn stats(&self, symbol: &str) -> Option<HistoricalStats> {
        self.historical_stats.read().await.get(symbol).cloned()
    }

    pub async fn all_stats(&self) -> HashMap<String, HistoricalStats> {
        self.historical_stats.read().await.clone()
    }

    /// 直接写入某个交易对的统计（导入 / 回放）
    pub async fn upsert_stats(&self, stats: HistoricalStats) {
        self.historical_stats
            .write()
            .await
            .insert(stats.symbol.clone(), stats);
    }

    /// 记录一笔平仓结果
    ///
    /// # Arguments
    /// * `profit_pct` - 收益率，百分数（5.0 表示 5%）
    /// * `holding_time` - 持仓时长（秒）
    pub async fn record_trade_result(
        &self,
        symbol: &str,
        is_win: bool,
        profit_pct: f64,
        holding_time: i64,
    ) {
        let now = chrono::Utc::now().timestamp();
        self.record_trade_result_at(symbol, is_win, profit_pct, holding_time, now)
            .await;

        if let Err(e) = self.auto_save().await {
            warn!("自动保存失败: {}", e);
        }
    }

    /// 以指定时间记录，不触发保存
    pub async fn record_trade_result_at(
        &self,
        symbol: &str,
        is_win: bool,
        profit_pct: f64,
        holding_time: i64,
        now: i64,
    ) {
        let config = self.config().await;
        let profit = profit_pct / 100.0;

        let mut guard = self.historical_stats.write().await;
        let stats = guard
            .entry(symbol.to_string())
            .or_insert_with(|| HistoricalStats::new(symbol, config.time_decay_lambda));

        stats.total_trades += 1;
        stats.updated_at = now;
        stats.trade_history.push(TradeRecord {
            timestamp: now,
            profit_pct: profit,
            is_win,
            weight: 1.0,
            holding_time,
        });
        let capacity = config.history_capacity();
        if stats.trade_history.len() > capacity {
            let overflow = stats.trade_history.len() - capacity;
            stats.trade_history.drain(..overflow);
        }

        if is_win {
            stats.profitable_trades += 1;
            stats.total_profit_pct += profit;
            stats.max_profit_pct = stats.max_profit_pct.max(profit);
        } else {
            stats.total_loss_pct += profit.abs();
            stats.max_drawdown_pct = stats.max_drawdown_pct.max(profit.abs());
        }

        recompute_weighted_stats(stats, &config, now);

        info!(
            "[{}] 更新统计: 总交易={}, 盈利={}, 加权胜率={:.2}%, 平均盈利={:.2}%, 平均亏损={:.2}%, 波动率={:.2}%",
            symbol,
            stats.total_trades,
            stats.profitable_trades,
            stats.weighted_win_rate * 100.0,
            stats.avg_win_pct * 100.0,
            stats.avg_loss_pct * 100.0,
            stats.volatility * 100.0
        );
    }

    /// 仅记录严格为正的最大值
    pub async fn update_position_peak(&self, symbol: &str, current_profit: f64) {
        if current_profit <= 0.0 {
            return;
        }
        let mut peaks = self.position_peaks.write().await;
        let peak = peaks.entry(symbol.to_string()).or_insert(0.0);
        if current_profit > *peak {
            *peak = current_profit;
            debug!("[{}] 更新持仓峰值盈利: {:.2}%", symbol, current_profit * 100.0);
        }
    }

    pub async fn position_peak(&self, symbol: &str) -> f64 {
        self.position_peaks
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(0.0)
    }

    /// 平仓时清除
    pub async fn clear_position_peak(&self, symbol: &str) {
        self.position_peaks.write().await.remove(symbol);
    }

    /// 最优止盈价
    pub async fn calculate_optimal_take_profit(
        &self,
        symbol: &str,
        entry_price: f64,
        current_price: f64,
        side: PositionSide,
    ) -> Result<f64, KellyError> {
        validate_prices(entry_price, current_price)?;
        let current_profit = profit_fraction(entry_price, current_price, side);
        self.update_position_peak(symbol, current_profit).await;

        if current_profit <= 0.0 {
            return Ok(apply_side(entry_price, LOSS_TAKE_PROFIT_PCT, side));
        }

        let config = self.config().await;
        let stats = self.stats(symbol).await;
        let stats = match stats {
            Some(stats) if stats.total_trades >= config.min_trades_for_kelly => stats,
            other => {
                debug!(
                    "[{}] 无足够历史数据({}<{})，使用默认止盈策略",
                    symbol,
                    other.as_ref().map(|s| s.total_trades).unwrap_or(0),
                    config.min_trades_for_kelly
                );
                return Ok(default_take_profit(
                    current_price,
                    current_profit,
                    other.as_ref(),
                    side,
                ));
            }
        };

        let win_rate = stats.weighted_win_rate;
        let avg_loss = if stats.avg_loss_pct > 0.0 {
            stats.avg_loss_pct
        } else {
            DEFAULT_AVG_LOSS
        };
        let odds = stats.avg_win_pct / avg_loss;
        let kelly = kelly_fraction(odds, win_rate);
        let adjusted_kelly =
            kelly * config.kelly_ratio_adjustment * volatility_factor(stats.volatility);

        if adjusted_kelly <= 0.0 {
            debug!("[{}] 凯利比例为负({:.3})，使用保守止盈策略", symbol, adjusted_kelly);
            return Ok(conservative_take_profit(
                current_price,
                win_rate,
                stats.volatility,
                side,
            ));
        }

        let peak = self.position_peak(symbol).await;
        let peak_adjustment = if peak > current_profit && current_profit > 0.0 {
            debug!(
                "[{}] 检测到峰值回撤: 峰值={:.2}%, 当前={:.2}%",
                symbol,
                peak * 100.0,
                current_profit * 100.0
            );
            0.9
        } else {
            1.0
        };

        let multiplier = dynamic_multiplier(stats.volatility, &config);
        let mut target_profit = current_profit * (1.0 + 2.0 * adjusted_kelly) * peak_adjustment;
        if target_profit > current_profit * multiplier {
            target_profit = current_profit * multiplier;
            debug!("[{}] 止盈点被限制为动态倍数: {:.2}倍", symbol, multiplier);
        }

        let price = apply_side(entry_price, target_profit, side);
        info!(
            "[{}] 凯利止盈: 加权胜率={:.2}%, 赔率={:.2}, 凯利比例={:.3}, 当前盈利={:.2}%, 目标盈利={:.2}%, 目标价格={:.6}",
            symbol,
            win_rate * 100.0,
            odds,
            adjusted_kelly,
            current_profit * 100.0,
            target_profit * 100.0,
            price
        );
        Ok(price)
    }

    /// 动态止损价
    pub async fn calculate_dynamic_stop_loss(
        &self,
        symbol: &str,
        entry_price: f64,
        current_price: f64,
        side: PositionSide,
    ) -> Result<f64, KellyError> {
        validate_prices(entry_price, current_price)?;
        let current_profit = profit_fraction(entry_price, current_price, side);
        let config = self.config().await;
        let stats = self.stats(symbol).await;

        if current_profit <= 0.0 {
            let stop_pct = match stats.as_ref() {
                Some(stats) if stats.volatility > 0.0 => {
                    MAX_STOP_LOSS_PCT.min(stats.volatility * 1.5)
                }
                _ => DEFAULT_STOP_LOSS_PCT,
            };
            return Ok(apply_side(entry_price, -stop_pct, side));
        }

        let protection = protection_ratio(
            current_profit,
            stats.as_ref().map(|s| s.volatility).filter(|v| *v > 0.0),
        );
        let stop_profit = current_profit - current_profit * protection;
        let mut stop_price = if stop_profit >= 0.0 {
            apply_side(entry_price, stop_profit, side)
        } else {
            entry_price
        };

        if let Some(stats) = stats.as_ref() {
            if stats.total_trades >= config.min_trades_for_kelly && stats.avg_loss_pct > 0.0 {
                let max_allowed = stats.avg_loss_pct * 2.0;
                let distance = match side {
                    PositionSide::Long => (current_price - stop_price) / entry_price,
                    PositionSide::Short => (stop_price - current_price) / entry_price,
                };
                if distance > max_allowed {
                    stop_price = match side {
                        PositionSide::Long => current_price * (1.0 - max_allowed),
                        PositionSide::Short => current_price * (1.0 + max_allowed),
                    };
                    debug!(
                        "[{}] 止损点过于宽松，调整为最大允许亏损: {:.2}%",
                        symbol,
                        max_allowed * 100.0
                    );
                }
            }
        }

        // 盈利状态下止损不低于开仓价，也不越过当前价
        stop_price = match side {
            PositionSide::Long => stop_price.clamp(entry_price, current_price),
            PositionSide::Short => stop_price.clamp(current_price, entry_price),
        };

        info!(
            "[{}] 动态止损: 当前盈利={:.2}%, 保护比例={:.1}%, 止损价格={:.6}",
            symbol,
            current_profit * 100.0,
            protection * 100.0,
            stop_price
        );
        Ok(stop_price)
    }

    /// 输出各交易对统计与当前参数
    pub async fn monitor_performance(&self) {
        let stats = self.all_stats().await;
        let mut symbols: Vec<&String> = stats.keys().collect();
        symbols.sort();
        for symbol in symbols {
            let s = &stats[symbol];
            if s.total_trades == 0 {
                continue;
            }
            info!(
                "[{}] 总交易: {}, 加权胜率: {:.2}%, 平均盈利: {:.2}%, 平均亏损: {:.2}%, 波动率: {:.2}%",
                symbol,
                s.total_trades,
                s.weighted_win_rate * 100.0,
                s.avg_win_pct * 100.0,
                s.avg_loss_pct * 100.0,
                s.volatility * 100.0
            );
        }
        let config = self.config().await;
        info!(
            "当前Kelly配置: 凯利调整={:.2}, 最大倍数={:.1}, 时间衰减={:.3}, 最小交易数={}",
            config.kelly_ratio_adjustment,
            config.max_take_profit_multiplier,
            config.time_decay_lambda,
            config.min_trades_for_kelly
        );
    }

    /// 按平均加权胜率自动调整凯利系数与止盈倍数
    ///
    /// 只统计成交数不少于 `OPTIMIZE_MIN_TRADES` 的交易对；胜率居中时保持当前配置
    pub async fn optimize_parameters(&self) -> ParameterAdjustment {
        let rates: Vec<f64> = self
            .historical_stats
            .read()
            .await
            .values()
            .filter(|s| s.total_trades >= OPTIMIZE_MIN_TRADES)
            .map(|s| s.weighted_win_rate)
            .collect();
        if rates.is_empty() {
            info!("数据不足，跳过Kelly参数优化");
            return ParameterAdjustment::InsufficientData;
        }
        let avg_win_rate = rates.iter().sum::<f64>() / rates.len() as f64;

        let mut config = self.config().await;
        let adjustment = if avg_win_rate > HIGH_WIN_RATE {
            config.kelly_ratio_adjustment = AGGRESSIVE_KELLY_RATIO;
            config.max_take_profit_multiplier = AGGRESSIVE_TP_MULTIPLIER;
            info!("平均加权胜率 {:.2}% 偏高，切换为激进参数", avg_win_rate * 100.0);
            ParameterAdjustment::Aggressive(avg_win_rate)
        } else if avg_win_rate < LOW_WIN_RATE {
            config.kelly_ratio_adjustment = CONSERVATIVE_KELLY_RATIO;
            config.max_take_profit_multiplier = CONSERVATIVE_TP_MULTIPLIER;
            info!("平均加权胜率 {:.2}% 偏低，切换为保守参数", avg_win_rate * 100.0);
            ParameterAdjustment::Conservative(avg_win_rate)
        } else {
            info!("平均加权胜率 {:.2}% 适中，保持当前参数", avg_win_rate * 100.0);
            return ParameterAdjustment::Unchanged(avg_win_rate);
        };
        self.update_config(config).await;
        adjustment
    }

    /// 写入统计文件；序列化期间只持有读锁
    pub async fn save(&self) -> Result<(), KellyError> {
        let _writer = self.save_lock.lock().await;
        let data = {
            let guard = self.historical_stats.read().await;
            serde_json::to_string_pretty(&*guard)
                .map_err(|e| KellyError::Persistence(format!("序列化统计数据失败: {}", e)))?
        };

        if let Some(parent) = self.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| KellyError::Persistence(format!("创建目录失败: {}", e)))?;
            }
        }
        tokio::fs::write(&self.data_file, data)
            .await
            .map_err(|e| KellyError::Persistence(format!("写入文件失败: {}", e)))?;

        *self.last_save.lock().await = Instant::now();
        debug!("成功保存统计数据到文件: {}", self.data_file.display());
        Ok(())
    }

    /// 距离上次保存超过间隔时写文件，返回是否写入
    pub async fn auto_save(&self) -> Result<bool, KellyError> {
        let interval = Duration::from_secs(self.config.read().await.save_interval_seconds);
        let due = self.last_save.lock().await.elapsed() >= interval;
        if !due {
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }

    /// 优雅关闭，保存数据
    pub async fn shutdown(&self) -> Result<(), KellyError> {
        info!("正在关闭Kelly管理器，保存数据...");
        self.save().await?;
        info!("Kelly管理器已安全关闭");
        Ok(())
    }
}

fn load_stats_file(path: &Path) -> Result<HashMap<String, HistoricalStats>, KellyError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| KellyError::Persistence(format!("读取文件失败 {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| KellyError::Persistence(format!("反序列化失败 {}: {}", path.display(), e)))
}

fn validate_prices(entry: f64, current: f64) -> Result<(), KellyError> {
    if !(entry.is_finite() && entry > 0.0 && current.is_finite() && current > 0.0) {
        return Err(KellyError::InvalidPrice { entry, current });
    }
    Ok(())
}

/// 当前浮盈比例
pub fn profit_fraction(entry_price: f64, current_price: f64, side: PositionSide) -> f64 {
    match side {
        PositionSide::Long => (current_price - entry_price) / entry_price,
        PositionSide::Short => (entry_price - current_price) / entry_price,
    }
}

/// 以开仓价为基准按方向偏移
fn apply_side(entry_price: f64, profit: f64, side: PositionSide) -> f64 {
    match side {
        PositionSide::Long => entry_price * (1.0 + profit),
        PositionSide::Short => entry_price * (1.0 - profit),
    }
}

/// 时间衰减加权统计 + 波动率
pub fn recompute_weighted_stats(stats: &mut HistoricalStats, config: &KellyConfig, now: i64) {
    if stats.trade_history.is_empty() {
        return;
    }

    let mut weighted_wins = 0.0;
    let mut weighted_losses = 0.0;
    let mut win_weight = 0.0;
    let mut total_weight = 0.0;
    let mut win_count = 0usize;
    let mut loss_count = 0usize;

    for trade in stats.trade_history.iter() {
        let age_days = (now - trade.timestamp).max(0) as f64 / SECONDS_PER_DAY;
        let weight = trade.weight * (-config.time_decay_lambda * age_days).exp();
        total_weight += weight;
        if trade.is_win {
            weighted_wins += weight * trade.profit_pct;
            win_weight += weight;
            win_count += 1;
        } else {
            weighted_losses += weight * trade.profit_pct.abs();
            loss_count += 1;
        }
    }

    let total_count = win_count + loss_count;
    if total_weight > 0.0 {
        stats.avg_win_pct = if win_count > 0 {
            weighted_wins / win_count as f64
        } else {
            0.0
        };
        stats.avg_loss_pct = if loss_count > 0 {
            weighted_losses / loss_count as f64
        } else {
            0.0
        };
        stats.weighted_win_rate = win_weight / total_weight;
    } else {
        // 权重和为0时退回未加权统计
        let wins: Vec<f64> = stats
            .trade_history
            .iter()
            .filter(|t| t.is_win)
            .map(|t| t.profit_pct)
            .collect();
        let losses: Vec<f64> = stats
            .trade_history
            .iter()
            .filter(|t| !t.is_win)
            .map(|t| t.profit_pct.abs())
            .collect();
        stats.avg_win_pct = mean(&wins);
        stats.avg_loss_pct = mean(&losses);
        stats.weighted_win_rate = win_count as f64 / total_count as f64;
    }
    stats.avg_win_pct = stats.avg_win_pct.max(0.0);
    stats.win_rate = win_count as f64 / total_count as f64;
    stats.time_decay_factor = config.time_decay_lambda;
    stats.volatility = volatility(&stats.trade_history, config.volatility_window);
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// 最近 window 笔收益率的样本标准差，不足两笔取默认值
pub fn volatility(history: &[TradeRecord], window: usize) -> f64 {
    let window = window.min(history.len());
    if window < 2 {
        return DEFAULT_VOLATILITY;
    }
    let recent = &history[history.len() - window..];
    let avg = recent.iter().map(|t| t.profit_pct).sum::<f64>() / window as f64;
    let variance = recent
        .iter()
        .map(|t| (t.profit_pct - avg).powi(2))
        .sum::<f64>()
        / (window - 1) as f64;
    variance.sqrt()
}

/// f* = (b·p − q) / b
pub fn kelly_fraction(odds: f64, win_rate: f64) -> f64 {
    if !(odds.is_finite() && odds > 0.0) {
        return -1.0;
    }
    (odds * win_rate - (1.0 - win_rate)) / odds
}

fn volatility_factor(volatility: f64) -> f64 {
    if volatility > 0.15 {
        0.8
    } else if volatility < 0.05 {
        1.2
    } else {
        1.0
    }
}

fn dynamic_multiplier(volatility: f64, config: &KellyConfig) -> f64 {
    if volatility > 0.2 {
        2.0
    } else if volatility < 0.08 {
        4.0
    } else {
        config.max_take_profit_multiplier
    }
}

/// 历史数据不足时的分层止盈，作用于当前价
fn default_take_profit(
    current_price: f64,
    current_profit: f64,
    stats: Option<&HistoricalStats>,
    side: PositionSide,
) -> f64 {
    let base_target = match stats.map(|s| s.volatility).filter(|v| *v > 0.0) {
        Some(v) if v > 0.20 => 0.12,
        Some(v) if v < 0.08 => 0.18,
        _ => 0.15,
    };
    let multiplier = if current_profit < 0.05 {
        1.0 + base_target
    } else if current_profit < 0.15 {
        1.0 + base_target * 0.8
    } else {
        1.0 + base_target * 0.6
    };
    match side {
        PositionSide::Long => current_price * multiplier,
        PositionSide::Short => current_price / multiplier,
    }
}

/// 凯利比例非正时的保守止盈，作用于当前价
fn conservative_take_profit(
    current_price: f64,
    win_rate: f64,
    volatility: f64,
    side: PositionSide,
) -> f64 {
    let mut multiplier = if win_rate >= 0.6 {
        1.15
    } else if win_rate >= 0.4 {
        1.10
    } else {
        1.05
    };
    if volatility > 0.15 {
        multiplier *= 0.9;
    }
    match side {
        PositionSide::Long => current_price * multiplier,
        PositionSide::Short => current_price / multiplier,
    }
}

/// 盈利保护比例，结果限制在 [0.5, 1.0]
fn protection_ratio(current_profit: f64, volatility: Option<f64>) -> f64 {
    let mut ratio: f64 = if current_profit < 0.05 {
        1.0
    } else if current_profit < 0.10 {
        0.7
    } else if current_profit < 0.20 {
        0.8
    } else {
        0.85
    };
    match volatility {
        Some(v) if v > 0.20 => ratio *= 0.9,
        Some(v) if v < 0.08 => ratio *= 1.1,
        _ => {}
    }
    ratio.clamp(0.5, 1.0)
}
