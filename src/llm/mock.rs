//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按队列顺序返回预置回复，每次调用累计固定 token 用量；
//! 流式模式把回复切成小片段模拟打字效果，可配置中途报错。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::openai::TokenUsage;
use crate::llm::traits::{LlmClient, StreamItem, TokenCounts, TokenStream};

/// 流式回复时每段字符数
const CHUNK_CHARS: usize = 6;

/// Mock 客户端：预置回复队列；队列耗尽时回显提示词前缀
pub struct MockLlmClient {
    replies: Mutex<VecDeque<String>>,
    /// Some(msg) 时流式调用先吐一个片段再报错
    stream_failure: Option<String>,
    /// 流结束时是否以独立条目上报用量
    trailing_usage: bool,
    usage: TokenUsage,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            stream_failure: None,
            trailing_usage: true,
            usage: TokenUsage::new(),
        }
    }

    /// 追加一条预置回复
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(reply.into());
        self
    }

    /// 批量追加预置回复
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut q = self.replies.lock().unwrap();
            for r in replies {
                q.push_back(r.into());
            }
        }
        self
    }

    /// 流式调用在第一个片段后报错（模拟生成中断）
    pub fn with_stream_failure(mut self, message: impl Into<String>) -> Self {
        self.stream_failure = Some(message.into());
        self
    }

    /// 关闭流尾用量条目（模拟只能从会话侧信道取用量的引擎）
    pub fn without_trailing_usage(mut self) -> Self {
        self.trailing_usage = false;
        self
    }

    fn next_reply(&self, prompt: &str) -> String {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                let preview: String = prompt.chars().take(40).collect();
                format!("Mock reply for: {}", preview)
            })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, String> {
        self.usage.add(10, 5);
        Ok(self.next_reply(prompt))
    }

    async fn complete_stream(&self, _system: &str, prompt: &str) -> Result<TokenStream, String> {
        let reply = self.next_reply(prompt);
        self.usage.add(20, reply.chars().count() as u64 / 4);

        if let Some(msg) = &self.stream_failure {
            let first: String = reply.chars().take(CHUNK_CHARS).collect();
            let items = vec![Ok(StreamItem::content(first)), Err(msg.clone())];
            return Ok(Box::pin(stream::iter(items)));
        }

        let chars: Vec<char> = reply.chars().collect();
        let mut items: Vec<Result<StreamItem, String>> = chars
            .chunks(CHUNK_CHARS)
            .map(|c| Ok(StreamItem::content(c.iter().collect::<String>())))
            .collect();
        if self.trailing_usage {
            items.push(Ok(StreamItem::usage(TokenCounts::new(
                20,
                chars.len() as u64 / 4,
            ))));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_reply_queue_order() {
        let client = MockLlmClient::new().with_replies(["first", "second"]);
        assert_eq!(client.complete("", "p").await.unwrap(), "first");
        assert_eq!(client.complete("", "p").await.unwrap(), "second");
        // 队列耗尽后回显
        assert!(client.complete("", "p").await.unwrap().starts_with("Mock reply"));
    }

    #[tokio::test]
    async fn test_stream_concatenates_to_reply() {
        let client = MockLlmClient::new().with_reply("hello streaming world");
        let mut stream = client.complete_stream("", "p").await.unwrap();
        let mut text = String::new();
        let mut saw_usage = false;
        while let Some(item) = stream.next().await {
            let item = item.unwrap();
            if let Some(c) = item.content {
                text.push_str(&c);
            }
            if item.usage.is_some() {
                saw_usage = true;
            }
        }
        assert_eq!(text, "hello streaming world");
        assert!(saw_usage);
    }

    #[tokio::test]
    async fn test_stream_failure_surfaces_error() {
        let client = MockLlmClient::new()
            .with_reply("doomed output")
            .with_stream_failure("connection reset");
        let mut stream = client.complete_stream("", "p").await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(first.is_ok());
        let second = stream.next().await.unwrap();
        assert_eq!(second.unwrap_err(), "connection reset");
    }
}
