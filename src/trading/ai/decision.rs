use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::app_config::trader_config::MAX_LEVERAGE;
use crate::trading::exchange::PositionSide;
use crate::trading::okx::symbol::normalize_symbol;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    #[error("未知的决策动作: {0}")]
    UnknownAction(String),

    #[error("决策缺少交易对")]
    EmptySymbol,

    #[error("{action} 缺少字段 {field}")]
    MissingField { action: String, field: &'static str },

    #[error("{action} 字段 {field} 无效: {value}")]
    InvalidField {
        action: String,
        field: &'static str,
        value: String,
    },
}

/// 开仓参数
#[derive(Debug, Clone, PartialEq)]
pub struct OpenIntent {
    pub leverage: u32,
    /// 仓位价值（USDT）
    pub position_size_usd: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// 0-100
    pub confidence: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionAction {
    OpenLong(OpenIntent),
    OpenShort(OpenIntent),
    CloseLong,
    CloseShort,
    Hold,
    Wait,
}

impl DecisionAction {
    pub fn name(&self) -> &'static str {
        match self {
            DecisionAction::OpenLong(_) => "open_long",
            DecisionAction::OpenShort(_) => "open_short",
            DecisionAction::CloseLong => "close_long",
            DecisionAction::CloseShort => "close_short",
            DecisionAction::Hold => "hold",
            DecisionAction::Wait => "wait",
        }
    }

    /// 执行优先级：平仓 < 开仓 < 观望
    pub fn priority(&self) -> u8 {
        match self {
            DecisionAction::CloseLong | DecisionAction::CloseShort => 1,
            DecisionAction::OpenLong(_) | DecisionAction::OpenShort(_) => 2,
            DecisionAction::Hold | DecisionAction::Wait => 3,
        }
    }

    pub fn side(&self) -> Option<PositionSide> {
        match self {
            DecisionAction::OpenLong(_) | DecisionAction::CloseLong => Some(PositionSide::Long),
            DecisionAction::OpenShort(_) | DecisionAction::CloseShort => Some(PositionSide::Short),
            DecisionAction::Hold | DecisionAction::Wait => None,
        }
    }

    pub fn open_intent(&self) -> Option<&OpenIntent> {
        match self {
            DecisionAction::OpenLong(intent) | DecisionAction::OpenShort(intent) => Some(intent),
            _ => None,
        }
    }
}

/// AI 给出的一条决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDecision", into = "RawDecision")]
pub struct Decision {
    pub symbol: String,
    pub action: DecisionAction,
    pub reasoning: String,
}

impl Decision {
    pub fn new(symbol: impl Into<String>, action: DecisionAction) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            reasoning: String::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// 线上格式，数值字段允许为字符串
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDecision {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_size_usd: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub reasoning: String,
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn required_number(
    action: &str,
    field: &'static str,
    value: &Option<Value>,
) -> Result<f64, DecisionError> {
    let value = value.as_ref().ok_or_else(|| DecisionError::MissingField {
        action: action.to_string(),
        field,
    })?;
    as_number(value)
        .filter(|v| v.is_finite())
        .ok_or_else(|| DecisionError::InvalidField {
            action: action.to_string(),
            field,
            value: value.to_string(),
        })
}

fn positive(action: &str, field: &'static str, value: f64) -> Result<f64, DecisionError> {
    if value > 0.0 {
        Ok(value)
    } else {
        Err(DecisionError::InvalidField {
            action: action.to_string(),
            field,
            value: value.to_string(),
        })
    }
}

fn parse_open(raw: &RawDecision, action: &str) -> Result<OpenIntent, DecisionError> {
    let leverage = required_number(action, "leverage", &raw.leverage)?.round();
    if leverage < 1.0 || leverage > MAX_LEVERAGE as f64 {
        return Err(DecisionError::InvalidField {
            action: action.to_string(),
            field: "leverage",
            value: leverage.to_string(),
        });
    }
    let size = required_number(action, "position_size_usd", &raw.position_size_usd)?;
    let stop_loss = required_number(action, "stop_loss", &raw.stop_loss)?;
    let take_profit = required_number(action, "take_profit", &raw.take_profit)?;
    let confidence = raw
        .confidence
        .as_ref()
        .and_then(as_number)
        .map(|c| c.clamp(0.0, 100.0).round() as u32);

    Ok(OpenIntent {
        leverage: leverage as u32,
        position_size_usd: positive(action, "position_size_usd", size)?,
        stop_loss: positive(action, "stop_loss", stop_loss)?,
        take_profit: positive(action, "take_profit", take_profit)?,
        confidence,
    })
}

impl TryFrom<RawDecision> for Decision {
    type Error = DecisionError;

    fn try_from(raw: RawDecision) -> Result<Self, Self::Error> {
        let action_name = raw.action.trim().to_lowercase();
        if raw.symbol.trim().is_empty() {
            return Err(DecisionError::EmptySymbol);
        }
        let action = match action_name.as_str() {
            "open_long" => DecisionAction::OpenLong(parse_open(&raw, &action_name)?),
            "open_short" => DecisionAction::OpenShort(parse_open(&raw, &action_name)?),
            "close_long" => DecisionAction::CloseLong,
            "close_short" => DecisionAction::CloseShort,
            "hold" => DecisionAction::Hold,
            "wait" => DecisionAction::Wait,
            _ => return Err(DecisionError::UnknownAction(raw.action)),
        };

        Ok(Decision {
            symbol: normalize_symbol(&raw.symbol),
            action,
            reasoning: raw.reasoning,
        })
    }
}

impl From<Decision> for RawDecision {
    fn from(decision: Decision) -> Self {
        let mut raw = RawDecision {
            symbol: decision.symbol,
            action: decision.action.name().to_string(),
            reasoning: decision.reasoning,
            ..Default::default()
        };
        if let Some(intent) = decision.action.open_intent() {
            raw.leverage = Some(Value::from(intent.leverage));
            raw.position_size_usd = Some(Value::from(intent.position_size_usd));
            raw.stop_loss = Some(Value::from(intent.stop_loss));
            raw.take_profit = Some(Value::from(intent.take_profit));
            raw.confidence = intent.confidence.map(Value::from);
        }
        raw
    }
}

/// 稳定排序：同优先级保持 AI 给出的顺序
pub fn sort_decisions(decisions: &mut [Decision]) {
    decisions.sort_by_key(|d| d.action.priority());
}
