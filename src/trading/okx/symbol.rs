//! 通用交易对（BTCUSDT）与 OKX 永续合约 instId（BTC-USDT-SWAP）之间的转换

use once_cell::sync::Lazy;
use tracing::warn;

/// 已知的基础币种
const KNOWN_BASES: &[&str] = &[
    "1000PEPE", "1000SATS", "1000SHIB", "1000BONK", "1000FLOKI", "1000RATS", "DOGE", "SHIB",
    "PEPE", "FLOKI", "BONK", "SATS", "RATS", "WIF", "MEW", "HYPE", "MATIC", "AVAX", "LINK",
    "ATOM", "NEAR", "APT", "ARB", "OP", "SUI", "SEI", "TIA", "INJ", "FTM", "DOT", "ADA", "XRP",
    "LTC", "BCH", "ETC", "FIL", "AAVE", "UNI", "MKR", "SNX", "CRV", "COMP", "BTC", "ETH", "SOL",
    "BNB", "TRX", "TON",
];

/// 报价币种，按匹配顺序排列
pub const QUOTES: [&str; 4] = ["USDT", "USDC", "USD", "BUSD"];

/// 按长度降序，保证 1000PEPE 先于 PEPE 匹配
static BASES_LONGEST_FIRST: Lazy<Vec<&'static str>> = Lazy::new(|| {
    let mut bases = KNOWN_BASES.to_vec();
    bases.sort_by(|a, b| b.len().cmp(&a.len()));
    bases
});

/// BTCUSDT -> BTC-USDT-SWAP
pub fn to_okx_inst_id(symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    // 已经是 OKX 格式
    if symbol.contains('-') {
        return symbol;
    }

    for base in BASES_LONGEST_FIRST.iter() {
        if let Some(rest) = symbol.strip_prefix(base) {
            if QUOTES.contains(&rest) {
                return format!("{}-{}-SWAP", base, rest);
            }
        }
    }

    // 通用处理：从末尾匹配报价币种
    for quote in QUOTES {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{}-{}-SWAP", base, quote);
            }
        }
    }

    // 无法识别的格式，保留原值并追加 -SWAP
    warn!("无法识别的交易对格式: {}", symbol);
    format!("{}-SWAP", symbol)
}

/// BTC-USDT-SWAP -> BTCUSDT
pub fn from_okx_inst_id(inst_id: &str) -> String {
    inst_id.trim_end_matches("-SWAP").replace('-', "")
}

/// 候选币种标准化：大写并确保以 USDT 结尾
pub fn normalize_symbol(symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.ends_with("USDT") {
        symbol
    } else {
        format!("{}USDT", symbol)
    }
}

/// 提取基础币种（BTCUSDT -> BTC）
pub fn base_asset(symbol: &str) -> String {
    let inst_id = to_okx_inst_id(symbol);
    inst_id
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_okx_inst_id() {
        assert_eq!(to_okx_inst_id("BTCUSDT"), "BTC-USDT-SWAP");
        assert_eq!(to_okx_inst_id("ethusdc"), "ETH-USDC-SWAP");
        assert_eq!(to_okx_inst_id("1000PEPEUSDT"), "1000PEPE-USDT-SWAP");
        assert_eq!(to_okx_inst_id("PEPEUSDT"), "PEPE-USDT-SWAP");
        assert_eq!(to_okx_inst_id("BTC-USDT-SWAP"), "BTC-USDT-SWAP");
    }

    #[test]
    fn test_unknown_base_is_split_generically() {
        assert_eq!(to_okx_inst_id("ORDIUSDT"), "ORDI-USDT-SWAP");
        assert_eq!(to_okx_inst_id("WLDUSD"), "WLD-USD-SWAP");
    }

    #[test]
    fn test_unrecognised_symbol_gets_swap_suffix() {
        assert_eq!(to_okx_inst_id("FOOBAR"), "FOOBAR-SWAP");
    }

    #[test]
    fn test_from_okx_inst_id() {
        assert_eq!(from_okx_inst_id("BTC-USDT-SWAP"), "BTCUSDT");
        assert_eq!(from_okx_inst_id("1000PEPE-USDT-SWAP"), "1000PEPEUSDT");
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" btc "), "BTCUSDT");
        assert_eq!(normalize_symbol("ethusdt"), "ETHUSDT");
        assert_eq!(base_asset("SOLUSDT"), "SOL");
    }
}
