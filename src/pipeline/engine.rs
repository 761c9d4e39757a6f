//! 流水线引擎：按固定顺序驱动六个阶段，把产物推到松散事件通道
//!
//! 引擎事件通道刻意保持「原始」：生命周期标签与阶段摘要 JSON 混在
//! 内容通道里，阶段 3 还会额外发一次路由标签。对外可信序列由
//! StreamTranslator 重建，引擎只负责跑完六阶段并把一切上报。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::knowledge::KnowledgeBase;
use crate::llm::LlmClient;
use crate::pipeline::error::PipelineError;
use crate::pipeline::events::EngineEvent;
use crate::pipeline::state::SharedState;
use crate::pipeline::steps::{
    curriculum_matcher, input_analyzer, pedagogy_retriever, resource_generator, teaching_router,
    template_resolver,
};
use crate::store::{CurriculumStore, TemplateStore};

/// 引擎协作方集合（编排器注入，引擎与阶段共享）
#[derive(Clone)]
pub struct EngineDeps {
    pub fast_llm: Arc<dyn LlmClient>,
    pub gen_llm: Arc<dyn LlmClient>,
    pub curriculum: Arc<dyn CurriculumStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub max_results: usize,
    pub preview_chars: usize,
}

/// 接收端掉线不视为错误：运行照常跑完并落审计
fn send(tx: &UnboundedSender<EngineEvent>, event: EngineEvent) {
    let _ = tx.send(event);
}

fn send_summary(tx: &UnboundedSender<EngineEvent>, summary: &Value) {
    send(tx, EngineEvent::content(summary.to_string()));
}

/// 跑完六阶段；仅 LLM 调用与存储访问失败会中止
pub async fn run_engine(
    deps: &EngineDeps,
    state: &mut SharedState,
    tx: &UnboundedSender<EngineEvent>,
) -> Result<(), PipelineError> {
    // 阶段 1：输入解析
    send(tx, EngineEvent::step_started());
    let summary = input_analyzer::run(state, deps.fast_llm.as_ref()).await?;
    send_summary(tx, &summary);
    send(tx, EngineEvent::step_completed());

    // 阶段 2：课程匹配（CAG）
    send(tx, EngineEvent::step_started());
    let summary =
        curriculum_matcher::run(state, deps.fast_llm.as_ref(), deps.curriculum.as_ref()).await?;
    send_summary(tx, &summary);
    send(tx, EngineEvent::step_completed());

    // 阶段 3：教学重点路由（引擎额外发一次路由标签，属重复开始信号）
    send(tx, EngineEvent::step_started());
    let summary = teaching_router::run(state, deps.curriculum.as_ref());
    send(
        tx,
        EngineEvent::router(teaching_router::select_enrichment(
            &state.params.teaching_focus,
        )),
    );
    send_summary(tx, &summary);
    send(tx, EngineEvent::step_completed());

    // 阶段 4：教学法检索（RAG）
    send(tx, EngineEvent::step_started());
    let summary = pedagogy_retriever::run(
        state,
        deps.knowledge.as_ref(),
        deps.max_results,
        deps.preview_chars,
    )
    .await;
    send_summary(tx, &summary);
    send(tx, EngineEvent::step_completed());

    // 阶段 5：模板解析
    send(tx, EngineEvent::step_started());
    let summary = template_resolver::run(state, deps.templates.as_ref(), deps.curriculum.as_ref())?;
    send_summary(tx, &summary);
    send(tx, EngineEvent::step_completed());

    // 阶段 6：资源生成（片段在阶段内部直接转发）
    send(tx, EngineEvent::step_started());
    resource_generator::run(state, deps.gen_llm.as_ref(), tx).await?;
    // 流结束后引擎把整份文本再上报一次（重复载荷，翻译器按长度丢弃）
    if let Some(full_text) = &state.generated_resource {
        send(tx, EngineEvent::content(full_text.clone()));
    }
    send(tx, EngineEvent::step_completed());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{RetrievedDoc, StaticKnowledgeBase};
    use crate::llm::MockLlmClient;
    use crate::pipeline::state::GenerationParams;
    use crate::store::{MemoryCurriculumStore, MemoryTemplateStore};
    use tokio::sync::mpsc;

    fn demo_deps(fast_llm: MockLlmClient, gen_llm: MockLlmClient) -> EngineDeps {
        EngineDeps {
            fast_llm: Arc::new(fast_llm),
            gen_llm: Arc::new(gen_llm),
            curriculum: Arc::new(MemoryCurriculumStore::demo()),
            templates: Arc::new(MemoryTemplateStore::demo()),
            knowledge: Arc::new(StaticKnowledgeBase::new(vec![RetrievedDoc {
                content: "Use concrete materials before abstract notation.".to_string(),
                name: "pedagogy_notes".to_string(),
            }])),
            max_results: 5,
            preview_chars: 200,
        }
    }

    #[tokio::test]
    async fn test_engine_runs_all_stages() {
        let fast = MockLlmClient::new().with_replies([
            r#"{"topic":"fractions","year_level":"Year 5","strand":"Number","intent":"instruction","keywords":["fractions"]}"#,
            r#"[{"code":"AC9M5N06","text":"t","year_level":"MATMATY5","strand":"Number","confidence":"high","reason":"r"}]"#,
        ]);
        let gen = MockLlmClient::new().with_reply("# Resource\n\nContent body.");
        let deps = demo_deps(fast, gen);
        let mut state = SharedState::new(GenerationParams::new("fractions"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        run_engine(&deps, &mut state, &tx).await.unwrap();

        assert!(state.parsed_input.is_some());
        assert_eq!(state.primary_descriptor_code.as_deref(), Some("AC9M5N06"));
        assert!(state.routing_decision.is_some());
        assert_eq!(state.rag_results.len(), 1);
        assert!(state.resolved_prompt.is_some());
        assert_eq!(
            state.generated_resource.as_deref(),
            Some("# Resource\n\nContent body.")
        );

        let mut started = 0;
        let mut completed = 0;
        let mut router = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev.kind.as_deref() {
                Some("workflow_step_started") => started += 1,
                Some("workflow_step_completed") => completed += 1,
                Some(k) if k.starts_with("router_path_selected:") => router += 1,
                _ => {}
            }
        }
        assert_eq!(started, 6);
        assert_eq!(completed, 6);
        assert_eq!(router, 1);
    }

    #[tokio::test]
    async fn test_engine_keeps_running_with_closed_receiver() {
        let fast = MockLlmClient::new();
        let gen = MockLlmClient::new().with_reply("body");
        let deps = demo_deps(fast, gen);
        let mut state = SharedState::new(GenerationParams::new("fractions"));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        run_engine(&deps, &mut state, &tx).await.unwrap();
        assert!(state.generated_resource.is_some());
    }
}
