//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、
//! complete_stream（流式，条目可携带内容与/或用量指标）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenCounts {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

/// 流式条目：内容片段与用量指标可能同现、只现其一或都缺席
/// （底层引擎在不可预测的位置上报用量）
#[derive(Debug, Clone, Default)]
pub struct StreamItem {
    pub content: Option<String>,
    pub usage: Option<TokenCounts>,
}

impl StreamItem {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            usage: None,
        }
    }

    pub fn usage(counts: TokenCounts) -> Self {
        Self {
            content: None,
            usage: Some(counts),
        }
    }
}

/// Token 流类型别名
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamItem, String>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, String>;

    /// 流式完成，返回条目流
    async fn complete_stream(&self, system: &str, prompt: &str) -> Result<TokenStream, String>;

    /// 获取累计 token 使用统计：(input_tokens, output_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
