use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::app_config::trader_config::TraderConfig;
use crate::error::{AppError, AppResult};
use crate::trading::ai::parser::{parse_reply, ReplyError};
use crate::trading::ai::prompt::{build_system_prompt, build_user_prompt};
use crate::trading::ai::{
    AiCallArtifacts, AiClientError, AiDecisionClient, AiDecisionOutput, PromptConfig,
};
use crate::trading::context::Context;

pub const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";
pub const DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const QWEN_API_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
pub const QWEN_MODEL: &str = "qwen-plus";

const AI_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const TEMPERATURE: f64 = 0.5;
const MAX_TOKENS: u32 = 2000;
const MAX_RETRIES: usize = 3;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

#[derive(Error, Debug)]
enum ChatError {
    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("响应格式错误: {0}")]
    Decode(String),
}

impl ChatError {
    /// 网络错误、429 与 5xx 重试
    fn is_retryable(&self) -> bool {
        match self {
            ChatError::Network(_) => true,
            ChatError::Http { status, .. } => *status == 429 || *status >= 500,
            ChatError::Decode(_) => false,
        }
    }
}

/// OpenAI 兼容的 chat/completions 客户端
pub struct HttpAiClient {
    client: Client,
    provider: String,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpAiClient {
    pub fn new(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(AI_HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::config(format!("创建AI HTTP客户端失败: {}", e)))?;
        Ok(Self {
            client,
            provider: provider.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// deepseek / qwen 使用内置地址与模型，custom 使用配置值
    pub fn from_trader(config: &TraderConfig) -> AppResult<Self> {
        let ai = &config.ai;
        if ai.api_key.trim().is_empty() {
            return Err(AppError::config(format!("[{}] 未配置AI API Key", config.id)));
        }
        match config.ai_model.to_lowercase().as_str() {
            "deepseek" => Self::new("deepseek", DEEPSEEK_API_URL, DEEPSEEK_MODEL, &ai.api_key),
            "qwen" => Self::new("qwen", QWEN_API_URL, QWEN_MODEL, &ai.api_key),
            "custom" => {
                if ai.custom_api_url.trim().is_empty() || ai.custom_model_name.trim().is_empty() {
                    return Err(AppError::config(format!(
                        "[{}] 自定义模型需要 custom_api_url 和 custom_model_name",
                        config.id
                    )));
                }
                Self::new(
                    "custom",
                    ai.custom_api_url.trim(),
                    ai.custom_model_name.trim(),
                    &ai.api_key,
                )
            }
            other => Err(AppError::config(format!("不支持的AI模型: {}", other))),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat_once(&self, body: &str) -> Result<String, ChatError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        extract_content(&text)
    }

    /// 返回模型回复原文
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ChatError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let body = serde_json::to_string(&request).map_err(|e| ChatError::Decode(e.to_string()))?;

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .take(MAX_RETRIES);
        RetryIf::spawn(
            strategy,
            || self.chat_once(&body),
            |err: &ChatError| {
                let retry = err.is_retryable();
                if retry {
                    warn!("[{}] AI请求失败，准备重试: {}", self.provider, err);
                }
                retry
            },
        )
        .await
    }
}

fn extract_content(body: &str) -> Result<String, ChatError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| ChatError::Decode(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| ChatError::Decode("响应中没有 choices".to_string()))
}

#[async_trait]
impl AiDecisionClient for HttpAiClient {
    async fn decide(
        &self,
        ctx: &Context,
        prompt: &PromptConfig,
    ) -> Result<AiDecisionOutput, AiClientError> {
        let mut artifacts = AiCallArtifacts {
            system_prompt: build_system_prompt(prompt),
            user_prompt: build_user_prompt(ctx),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let reply = match self
            .chat(&artifacts.system_prompt, &artifacts.user_prompt)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                return Err(AiClientError::Transport {
                    message: e.to_string(),
                    artifacts: Box::new(artifacts),
                })
            }
        };
        info!(
            "[{}] AI响应完成，耗时 {}ms，长度 {}",
            self.provider,
            started.elapsed().as_millis(),
            reply.len()
        );
        debug!("[{}] AI原始回复: {}", self.provider, reply);
        artifacts.raw_reply = reply;

        into_output(artifacts)
    }
}

/// 解析原始回复并填充产物
pub fn into_output(mut artifacts: AiCallArtifacts) -> Result<AiDecisionOutput, AiClientError> {
    match parse_reply(&artifacts.raw_reply) {
        Ok(parsed) => {
            artifacts.cot_trace = parsed.cot_trace;
            artifacts.decision_json = parsed.decision_json;
            artifacts.decisions = parsed.decisions;
            Ok(artifacts)
        }
        Err(ReplyError::Invalid { message, partial }) => {
            artifacts.cot_trace = partial.cot_trace;
            artifacts.decision_json = partial.decision_json;
            artifacts.decisions = partial.decisions;
            Err(AiClientError::Parse {
                message,
                artifacts: Box::new(artifacts),
            })
        }
        Err(ReplyError::Empty { partial }) => {
            artifacts.cot_trace = partial.cot_trace;
            artifacts.decision_json = partial.decision_json;
            Err(AiClientError::EmptyDecisions {
                artifacts: Box::new(artifacts),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trader(ai_model: &str, ai: &str) -> TraderConfig {
        let raw = format!(
            r#"{{"id":"t1","ai_model":"{}","initial_balance":100,"ai":{}}}"#,
            ai_model, ai
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_provider_resolution() {
        let client = HttpAiClient::from_trader(&trader("deepseek", r#"{"api_key":"k"}"#)).unwrap();
        assert_eq!(client.endpoint(), DEEPSEEK_API_URL);
        assert_eq!(client.model(), DEEPSEEK_MODEL);

        let client = HttpAiClient::from_trader(&trader("QWEN", r#"{"api_key":"k"}"#)).unwrap();
        assert_eq!(client.model(), QWEN_MODEL);

        let custom = trader(
            "custom",
            r#"{"api_key":"k","custom_api_url":"https://llm.local/v1/chat/completions","custom_model_name":"m1"}"#,
        );
        let client = HttpAiClient::from_trader(&custom).unwrap();
        assert_eq!(client.endpoint(), "https://llm.local/v1/chat/completions");
        assert_eq!(client.provider(), "custom");

        assert!(HttpAiClient::from_trader(&trader("custom", r#"{"api_key":"k"}"#)).is_err());
        assert!(HttpAiClient::from_trader(&trader("deepseek", r#"{"api_key":""}"#)).is_err());
    }

    #[test]
    fn test_extract_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "hi");
        assert!(extract_content(r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_into_output_keeps_artifacts_on_failure() {
        let artifacts = AiCallArtifacts {
            system_prompt: "sys".into(),
            user_prompt: "user".into(),
            raw_reply: "只有分析没有决策".into(),
            ..Default::default()
        };
        let err = into_output(artifacts).unwrap_err();
        assert!(matches!(err, AiClientError::Parse { .. }));
        assert_eq!(err.artifacts().system_prompt, "sys");
        assert_eq!(err.artifacts().cot_trace, "只有分析没有决策");
    }
}
