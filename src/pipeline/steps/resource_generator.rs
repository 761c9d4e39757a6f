//! 阶段 6：用生成模型流式产出最终资源文本
//!
//! 片段逐条转发到引擎事件通道；全文在本地累积写入共享状态。
//! 用量优先取流内上报（首条为准），流内缺席时退回客户端
//! 会话计数器的前后差值；最终以 metrics 事件上报。
//! 流式条目报错即中止——这是全流水线唯一的硬失败阶段。

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::llm::{LlmClient, TokenCounts};
use crate::pipeline::error::PipelineError;
use crate::pipeline::events::EngineEvent;
use crate::pipeline::state::SharedState;
use crate::pipeline::steps::usage_delta;

const GENERATOR_SYSTEM: &str = "You are an expert mathematics educator creating classroom-ready resources \
aligned to the Australian Curriculum (ACARA v9). \
Produce well-structured Markdown with clear headings. \
Follow the pedagogical guidance in the prompt exactly.";

/// 执行阶段 6：流式生成、转发片段并上报用量
pub async fn run(
    state: &mut SharedState,
    gen_llm: &dyn LlmClient,
    tx: &UnboundedSender<EngineEvent>,
) -> Result<(), PipelineError> {
    let prompt = state
        .resolved_prompt
        .clone()
        .unwrap_or_else(|| format!("Generate a teaching resource about {}", state.params.topic));

    let before = gen_llm.token_usage();
    let mut stream = gen_llm
        .complete_stream(GENERATOR_SYSTEM, &prompt)
        .await
        .map_err(PipelineError::Llm)?;

    let mut full_text = String::new();
    let mut stream_usage: Option<TokenCounts> = None;

    while let Some(item) = stream.next().await {
        let item = item.map_err(PipelineError::GenerationStream)?;
        if let Some(fragment) = item.content {
            full_text.push_str(&fragment);
            let _ = tx.send(EngineEvent::content(fragment));
        }
        if let Some(counts) = item.usage {
            // 首条为准：重复上报忽略
            stream_usage.get_or_insert(counts);
        }
    }

    let counts = match stream_usage {
        Some(c) => c,
        None => usage_delta(before, gen_llm.token_usage()),
    };
    if !counts.is_empty() {
        let _ = tx.send(EngineEvent::metrics("resource_generator", counts));
    }

    state.generated_resource = Some(full_text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::state::GenerationParams;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn test_fragments_forwarded_and_accumulated() {
        let llm = MockLlmClient::new().with_reply("# Worked Examples\n\nStep one.");
        let mut state = SharedState::new(GenerationParams::new("fractions"));
        state.resolved_prompt = Some("prompt".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();

        run(&mut state, &llm, &tx).await.unwrap();

        assert_eq!(
            state.generated_resource.as_deref(),
            Some("# Worked Examples\n\nStep one.")
        );
        let events = drain(&mut rx);
        let streamed: String = events
            .iter()
            .filter_map(|e| e.content.clone())
            .collect();
        assert_eq!(streamed, "# Worked Examples\n\nStep one.");
        // 流尾用量条目转成 metrics 事件
        let metrics: Vec<_> = events.iter().filter_map(|e| e.metrics.as_ref()).collect();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].step, "resource_generator");
    }

    #[tokio::test]
    async fn test_usage_falls_back_to_session_counter() {
        let llm = MockLlmClient::new()
            .with_reply("short text output here")
            .without_trailing_usage();
        let mut state = SharedState::new(GenerationParams::new("fractions"));
        state.resolved_prompt = Some("prompt".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();

        run(&mut state, &llm, &tx).await.unwrap();

        let events = drain(&mut rx);
        let metrics: Vec<_> = events.iter().filter_map(|e| e.metrics.as_ref()).collect();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].counts.input_tokens, 20);
    }

    #[tokio::test]
    async fn test_stream_error_aborts() {
        let llm = MockLlmClient::new()
            .with_reply("doomed")
            .with_stream_failure("connection reset");
        let mut state = SharedState::new(GenerationParams::new("fractions"));
        state.resolved_prompt = Some("prompt".to_string());
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run(&mut state, &llm, &tx).await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationStream(_)));
        // 中断时不落盘部分文本
        assert!(state.generated_resource.is_none());
    }
}
