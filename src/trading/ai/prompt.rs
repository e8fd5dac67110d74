//! 提示词
//!
//! 系统提示词 = 模板（或自定义覆盖）+ 可选追加；用户提示词由上下文确定性生成，
//! 相同的 Context 总是得到相同的文本。

use std::fmt::Write as _;

use tracing::warn;

use crate::app_config::trader_config::TraderConfig;
use crate::trading::context::Context;

const OUTPUT_FORMAT: &str = r#"# 输出格式
先用中文写出分析过程，然后输出一个 ```json 代码块，内容为决策数组，例如：
```json
[
  {"symbol": "BTCUSDT", "action": "open_long", "leverage": 5, "position_size_usd": 200,
   "stop_loss": 95000, "take_profit": 105000, "confidence": 80, "reasoning": "突破关键阻力"},
  {"symbol": "ETHUSDT", "action": "close_short", "reasoning": "空头动能衰竭"},
  {"symbol": "SOLUSDT", "action": "hold", "reasoning": "持仓逻辑未变"}
]
```
action 只能是 open_long / open_short / close_long / close_short / hold / wait。
开仓必须给出 leverage（整数≥1）、position_size_usd（USDT 仓位价值）、stop_loss、take_profit。
同一交易对已有同方向持仓时不要重复开仓；没有合适机会时返回 wait。"#;

const DEFAULT_TEMPLATE: &str = r#"你是一名专业的加密货币永续合约交易员，管理一个 USDT 本位账户。
# 目标
在控制回撤的前提下追求稳定的风险调整后收益。
# 规则
1. 单笔开仓的保证金不超过可用余额的 30%，总保证金使用率不超过 80%。
2. 每笔开仓必须带止损，止损幅度与杠杆匹配，单笔最大亏损控制在账户权益的 2% 左右。
3. 盈亏比至少 1:2，信心不足时选择观望。
4. 已有持仓优先评估是否平仓，再考虑新开仓。
5. BTC/ETH 与山寨币分别参考给出的杠杆建议，可以根据行情下调。"#;

const CONSERVATIVE_TEMPLATE: &str = r#"你是一名风格保守的加密货币永续合约交易员，首要任务是保护本金。
# 规则
1. 只在趋势清晰、信心 ≥ 80 时开仓，其余情况一律观望。
2. 优先交易 BTC、ETH 等高流动性币种，杠杆不超过建议值的一半。
3. 单笔保证金不超过可用余额的 15%，同时持仓不超过 2 个。
4. 止损必须设置，盈亏比至少 1:3。
5. 浮盈超过 5% 时优先考虑部分锁定利润，浮亏接近止损时果断平仓。"#;

const AGGRESSIVE_TEMPLATE: &str = r#"你是一名风格积极的加密货币永续合约交易员，追求捕捉短线波动。
# 规则
1. 信心 ≥ 65 即可开仓，可以同时持有多个方向的仓位。
2. 可以使用建议杠杆上限，单笔保证金不超过可用余额的 40%。
3. 止损必须设置，盈亏比至少 1:1.5。
4. 关注持仓量与资金异动的币种，趋势反转时及时反手（先平仓后开仓）。
5. 连续亏损时降低仓位。"#;

/// 内置模板名称
pub const TEMPLATE_NAMES: [&str; 3] = ["default", "conservative", "aggressive"];

/// 提示词配置
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptConfig {
    pub template: String,
    pub custom_prompt: String,
    /// true 时 custom_prompt 完全替换系统提示词
    pub override_base: bool,
}

impl PromptConfig {
    pub fn from_trader(config: &TraderConfig) -> Self {
        Self {
            template: config.system_prompt_template.clone(),
            custom_prompt: config.custom_prompt.clone(),
            override_base: config.override_base_prompt,
        }
    }
}

/// 未知模板回退到 default
pub fn template_text(name: &str) -> String {
    let body = match name.trim().to_lowercase().as_str() {
        "" | "default" => DEFAULT_TEMPLATE,
        "conservative" => CONSERVATIVE_TEMPLATE,
        "aggressive" => AGGRESSIVE_TEMPLATE,
        other => {
            warn!("未知的提示词模板 {}，使用 default", other);
            DEFAULT_TEMPLATE
        }
    };
    format!("{}\n\n{}", body, OUTPUT_FORMAT)
}

pub fn build_system_prompt(config: &PromptConfig) -> String {
    let custom = config.custom_prompt.trim();
    if config.override_base && !custom.is_empty() {
        return custom.to_string();
    }
    let mut prompt = template_text(&config.template);
    if !custom.is_empty() {
        prompt.push_str("\n\n# 个性化交易策略\n");
        prompt.push_str(custom);
    }
    prompt
}

/// 用户提示词：账户、持仓、候选币种、历史表现、杠杆建议、时间与周期
pub fn build_user_prompt(ctx: &Context) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "时间: {} | 周期: #{} | 运行: {} 分钟",
        ctx.current_time.format("%Y-%m-%d %H:%M:%S UTC"),
        ctx.call_count,
        ctx.runtime_minutes
    );

    let account = &ctx.account;
    let _ = writeln!(out, "\n## 账户");
    let _ = writeln!(
        out,
        "总权益 {:.2} USDT | 可用 {:.2} | 已用保证金 {:.2} ({:.1}%) | 未实现盈亏 {:+.2}",
        account.total_equity,
        account.available_balance,
        account.used_margin,
        account.margin_used_pct,
        account.unrealized_pnl
    );
    let _ = writeln!(
        out,
        "初始资金 {:.2} | 总盈亏 {:+.2} ({:+.2}%) | 当日盈亏 {:+.2} | 持仓数 {}",
        account.initial_balance,
        account.total_pnl,
        account.total_pnl_pct,
        account.daily_pnl,
        account.position_count
    );

    let _ = writeln!(out, "\n## 当前持仓");
    if ctx.positions.is_empty() {
        let _ = writeln!(out, "无持仓");
    }
    let now_ms = ctx.current_time.timestamp_millis();
    for (i, p) in ctx.positions.iter().enumerate() {
        let holding_minutes = if p.update_time > 0 {
            (now_ms - p.update_time).max(0) / 60_000
        } else {
            0
        };
        let _ = writeln!(
            out,
            "{}. {} {} | 开仓价 {:.4} | 标记价 {:.4} | 数量 {:.4} | {}x | 盈亏 {:+.2} ({:+.2}%) | 强平价 {:.4} | 保证金 {:.2} | 持仓 {} 分钟",
            i + 1,
            p.symbol,
            p.side.as_str().to_uppercase(),
            p.entry_price,
            p.mark_price,
            p.quantity,
            p.leverage,
            p.unrealized_pnl,
            p.unrealized_pnl_pct,
            p.liquidation_price,
            p.margin_used,
            holding_minutes
        );
    }

    let _ = writeln!(out, "\n## 候选币种");
    for coin in &ctx.candidate_coins {
        let _ = writeln!(out, "{} [{}]", coin.symbol, coin.sources.join(", "));
    }

    let _ = writeln!(out, "\n## 历史表现");
    match &ctx.performance {
        Some(perf) if perf.total_trades > 0 => {
            let _ = writeln!(
                out,
                "交易 {} 笔 | 胜率 {:.1}% | 平均盈利 {:.2}% | 平均亏损 {:.2}% | 盈亏比 {:.2}",
                perf.total_trades,
                perf.win_rate,
                perf.avg_win_pct,
                perf.avg_loss_pct,
                perf.profit_factor
            );
            let mut symbols: Vec<_> = perf.symbol_stats.values().collect();
            symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            for s in symbols {
                let _ = writeln!(
                    out,
                    "- {}: {} 笔, 胜率 {:.1}%, 平均 {:+.2}%",
                    s.symbol, s.total_trades, s.win_rate, s.avg_pnl_pct
                );
            }
        }
        Some(_) => {
            let _ = writeln!(out, "暂无已完成交易");
        }
        None => {
            let _ = writeln!(out, "暂无数据");
        }
    }

    let _ = writeln!(out, "\n## 杠杆建议");
    let _ = writeln!(
        out,
        "BTC/ETH: {}x | 山寨币: {}x",
        ctx.leverage.btc_eth_leverage, ctx.leverage.altcoin_leverage
    );

    let risk = &ctx.risk;
    if risk.max_daily_loss > 0.0 || risk.max_drawdown > 0.0 || risk.stop_trading_minutes > 0 {
        let _ = writeln!(out, "\n## 风控参考");
        let _ = writeln!(
            out,
            "单日最大亏损 {:.2}% | 最大回撤 {:.2}% | 触发后暂停 {} 分钟",
            risk.max_daily_loss, risk.max_drawdown, risk.stop_trading_minutes
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::context::{
        AccountSnapshot, CandidateCoin, LeverageHints, PositionSnapshot, RiskHints,
    };
    use crate::trading::exchange::PositionSide;
    use chrono::{TimeZone, Utc};

    fn context() -> Context {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        Context {
            current_time: now,
            runtime_minutes: 30,
            call_count: 11,
            account: AccountSnapshot {
                total_equity: 1000.0,
                available_balance: 800.0,
                ..Default::default()
            },
            positions: vec![PositionSnapshot {
                symbol: "BTCUSDT".into(),
                side: PositionSide::Long,
                entry_price: 100.0,
                mark_price: 105.0,
                quantity: 1.0,
                leverage: 5,
                unrealized_pnl: 5.0,
                unrealized_pnl_pct: 25.0,
                liquidation_price: 80.0,
                margin_used: 20.0,
                update_time: now.timestamp_millis() - 45 * 60_000,
            }],
            candidate_coins: vec![CandidateCoin {
                symbol: "SOLUSDT".into(),
                sources: vec!["ai500".into(), "oi_top".into()],
            }],
            performance: None,
            leverage: LeverageHints {
                btc_eth_leverage: 10,
                altcoin_leverage: 5,
            },
            risk: RiskHints::default(),
        }
    }

    #[test]
    fn test_system_prompt_override_and_append() {
        let mut config = PromptConfig {
            template: "conservative".into(),
            custom_prompt: "只做BTC".into(),
            override_base: false,
        };
        let prompt = build_system_prompt(&config);
        assert!(prompt.starts_with("你是一名风格保守"));
        assert!(prompt.ends_with("只做BTC"));

        config.override_base = true;
        assert_eq!(build_system_prompt(&config), "只做BTC");

        let unknown = PromptConfig {
            template: "nope".into(),
            ..Default::default()
        };
        assert_eq!(build_system_prompt(&unknown), template_text("default"));
    }

    #[test]
    fn test_user_prompt_is_deterministic() {
        let ctx = context();
        let prompt = build_user_prompt(&ctx);
        assert_eq!(prompt, build_user_prompt(&ctx));
        assert!(prompt.contains("周期: #11"));
        assert!(prompt.contains("BTCUSDT LONG"));
        assert!(prompt.contains("持仓 45 分钟"));
        assert!(prompt.contains("SOLUSDT [ai500, oi_top]"));
        assert!(prompt.contains("BTC/ETH: 10x | 山寨币: 5x"));
        assert!(!prompt.contains("风控参考"));
    }
}
