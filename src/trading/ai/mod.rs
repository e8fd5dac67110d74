//! AI 决策客户端
//!
//! 由上下文生成提示词，调用模型接口，把回复解析为思维链与决策列表。
//! 失败时同样返回已生成的提示词和原始回复，便于写入决策日志。

use async_trait::async_trait;
use thiserror::Error;

use crate::trading::context::Context;

pub mod client;
pub mod decision;
pub mod parser;
pub mod prompt;

pub use client::HttpAiClient;
pub use decision::{sort_decisions, Decision, DecisionAction, DecisionError, OpenIntent};
pub use prompt::{build_system_prompt, build_user_prompt, PromptConfig};

/// 一次调用的全部产物
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiCallArtifacts {
    pub system_prompt: String,
    pub user_prompt: String,
    pub raw_reply: String,
    pub cot_trace: String,
    pub decision_json: String,
    pub decisions: Vec<Decision>,
}

pub type AiDecisionOutput = AiCallArtifacts;

#[derive(Error, Debug)]
pub enum AiClientError {
    #[error("AI接口调用失败: {message}")]
    Transport {
        message: String,
        artifacts: Box<AiCallArtifacts>,
    },

    #[error("AI响应解析失败: {message}")]
    Parse {
        message: String,
        artifacts: Box<AiCallArtifacts>,
    },

    #[error("AI未返回任何决策")]
    EmptyDecisions { artifacts: Box<AiCallArtifacts> },
}

impl AiClientError {
    pub fn artifacts(&self) -> &AiCallArtifacts {
        match self {
            AiClientError::Transport { artifacts, .. }
            | AiClientError::Parse { artifacts, .. }
            | AiClientError::EmptyDecisions { artifacts } => artifacts,
        }
    }
}

/// 模型决策接口
#[async_trait]
pub trait AiDecisionClient: Send + Sync {
    async fn decide(
        &self,
        ctx: &Context,
        prompt: &PromptConfig,
    ) -> Result<AiDecisionOutput, AiClientError>;
}
