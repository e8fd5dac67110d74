//! 永续合约规格与 币数量 -> 合约张数 的换算

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::trading::okx::error::OkxError;

/// 浮点取整容差，避免 0.3 / 0.1 = 2.9999 被向下取整成 2
const LOT_EPSILON: f64 = 1e-9;

/// 合约规格
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// 合约面值（1张合约对应多少币）
    pub ct_val: f64,
    /// 最小下单张数
    pub min_sz: f64,
    /// 下单精度（必须是 lot_sz 的整数倍）
    pub lot_sz: f64,
}

impl ContractSpec {
    pub const fn new(ct_val: f64, min_sz: f64, lot_sz: f64) -> Self {
        Self {
            ct_val,
            min_sz,
            lot_sz,
        }
    }

    /// 常见合约的默认规格，接口不可用时使用
    pub fn default_for(inst_id: &str) -> Self {
        match inst_id {
            "BTC-USDT-SWAP" => Self::new(0.01, 0.01, 0.01),
            "ETH-USDT-SWAP" => Self::new(0.1, 0.01, 0.01),
            "SOL-USDT-SWAP" => Self::new(1.0, 0.01, 0.01),
            "DOGE-USDT-SWAP" => Self::new(1000.0, 0.01, 0.01),
            "XRP-USDT-SWAP" => Self::new(100.0, 0.01, 0.01),
            "BNB-USDT-SWAP" => Self::new(0.01, 1.0, 1.0),
            "ADA-USDT-SWAP" => Self::new(100.0, 0.1, 0.1),
            "HYPE-USDT-SWAP" => Self::new(1.0, 0.01, 0.01),
            _ => {
                warn!("未知合约 {}，使用默认规格: ctVal=1, minSz=1, lotSz=1", inst_id);
                Self::new(1.0, 1.0, 1.0)
            }
        }
    }

    /// 按 lot_sz 决定的小数位数：>=1 整数，>=0.1 一位，否则两位
    pub fn precision(&self) -> usize {
        if self.lot_sz >= 1.0 {
            0
        } else if self.lot_sz >= 0.1 {
            1
        } else {
            2
        }
    }

    /// 合约张数 -> 币数量
    pub fn contracts_to_base(&self, contracts: f64) -> f64 {
        contracts * self.ct_val
    }
}

/// 换算结果
#[derive(Debug, Clone, PartialEq)]
pub struct ContractSize {
    pub contracts: f64,
    /// 下单用的 sz 字符串
    pub sz: String,
}

/// 币数量 -> 合约张数
///
/// 向下取整到 lot_sz 的整数倍；低于最小下单量时：
/// 原始张数不足最小下单量的一半直接报错，否则上调到最小下单量
pub fn convert_to_contract_size(
    inst_id: &str,
    spec: &ContractSpec,
    base_quantity: f64,
) -> Result<ContractSize, OkxError> {
    if !(base_quantity.is_finite() && base_quantity > 0.0) {
        return Err(OkxError::InvalidParam(format!(
            "下单数量必须大于0: {}",
            base_quantity
        )));
    }
    if spec.ct_val <= 0.0 {
        return Err(OkxError::InvalidParam(format!(
            "合约面值异常: {} ctVal={}",
            inst_id, spec.ct_val
        )));
    }

    let raw = base_quantity / spec.ct_val;
    let mut contracts = if spec.lot_sz > 0.0 {
        (raw / spec.lot_sz + LOT_EPSILON).floor() * spec.lot_sz
    } else {
        raw
    };

    if contracts < spec.min_sz {
        let base = inst_id.split('-').next().unwrap_or(inst_id);
        if raw < spec.min_sz * 0.5 {
            return Err(OkxError::InvalidParam(format!(
                "下单数量过小: 需要至少 {:.6} {} (最小 {} 张合约), 当前只有 {:.6} {}",
                spec.min_sz * spec.ct_val,
                base,
                spec.min_sz,
                base_quantity,
                base
            )));
        }
        warn!(
            "数量不足，向上调整到最小下单量: {:.4} -> {:.4} 张",
            contracts, spec.min_sz
        );
        contracts = spec.min_sz;
    }

    let sz = format!("{:.*}", spec.precision(), contracts);
    info!(
        "数量转换: 币数量={:.6}, ctVal={}, lotSz={}, minSz={} -> 合约张数={}",
        base_quantity, spec.ct_val, spec.lot_sz, spec.min_sz, sz
    );
    Ok(ContractSize { contracts, sz })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_to_lot_size() {
        let spec = ContractSpec::default_for("ETH-USDT-SWAP");
        // 0.3756 ETH / 0.1 = 3.756 张 -> 3.75
        let size = convert_to_contract_size("ETH-USDT-SWAP", &spec, 0.3756).unwrap();
        assert_eq!(size.sz, "3.75");
    }

    #[test]
    fn test_integer_lot_precision() {
        let spec = ContractSpec::default_for("BNB-USDT-SWAP");
        // 0.037 BNB / 0.01 = 3.7 张 -> 3
        let size = convert_to_contract_size("BNB-USDT-SWAP", &spec, 0.037).unwrap();
        assert_eq!(size.sz, "3");
        assert_eq!(size.contracts, 3.0);
    }

    #[test]
    fn test_lot_floor_is_robust_to_float_error() {
        let spec = ContractSpec::new(1.0, 0.1, 0.1);
        let size = convert_to_contract_size("X-USDT-SWAP", &spec, 0.3).unwrap();
        assert_eq!(size.sz, "0.3");
    }

    #[test]
    fn test_bump_to_min_size_when_close() {
        let spec = ContractSpec::default_for("BNB-USDT-SWAP");
        // 0.006 BNB = 0.6 张 >= 0.5 * 1 -> 上调到 1 张
        let size = convert_to_contract_size("BNB-USDT-SWAP", &spec, 0.006).unwrap();
        assert_eq!(size.sz, "1");
    }

    #[test]
    fn test_reject_far_below_min_size() {
        let spec = ContractSpec::default_for("BNB-USDT-SWAP");
        // 0.004 BNB = 0.4 张 < 0.5 张
        let err = convert_to_contract_size("BNB-USDT-SWAP", &spec, 0.004).unwrap_err();
        assert!(matches!(err, OkxError::InvalidParam(_)));
        assert!(err.to_string().contains("下单数量过小"));
    }

    #[test]
    fn test_min_size_result_implies_half_min_raw() {
        let spec = ContractSpec::new(1.0, 1.0, 1.0);
        for qty in [0.5, 0.7, 0.99] {
            let size = convert_to_contract_size("FOO-USDT-SWAP", &spec, qty).unwrap();
            assert_eq!(size.contracts, spec.min_sz);
            assert!(qty / spec.ct_val >= 0.5 * spec.min_sz);
        }
        assert!(convert_to_contract_size("FOO-USDT-SWAP", &spec, 0.49).is_err());
    }

    #[test]
    fn test_unknown_contract_default() {
        assert_eq!(
            ContractSpec::default_for("ABC-USDT-SWAP"),
            ContractSpec::new(1.0, 1.0, 1.0)
        );
    }
}
