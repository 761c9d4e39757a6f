//! 编排器：审计包夹 + 引擎驱动 + 流翻译，对外暴露单一 generate 入口
//!
//! 每次运行：insert_running（失败即拒绝运行）→ 后台跑引擎、逐条翻译
//! 引擎事件 → 终态一次性落审计（completed 或 error）→ 收尾事件。
//! 事件经 unbounded channel 推给调用方，接收端掉线不影响审计落库。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::pipeline::engine::{run_engine, EngineDeps};
use crate::pipeline::events::GenerationEvent;
use crate::pipeline::state::{GenerationParams, SharedState};
use crate::pipeline::translator::StreamTranslator;
use crate::store::{AuditStore, AuditUpdate};

/// 资源生成流水线（可克隆，跨请求共享协作方）
#[derive(Clone)]
pub struct Pipeline {
    deps: EngineDeps,
    audit: Arc<dyn AuditStore>,
    max_content_chars: usize,
}

fn send(tx: &UnboundedSender<GenerationEvent>, events: Vec<GenerationEvent>) {
    for event in events {
        let _ = tx.send(event);
    }
}

impl Pipeline {
    pub fn new(deps: EngineDeps, audit: Arc<dyn AuditStore>, max_content_chars: usize) -> Self {
        Self {
            deps,
            audit,
            max_content_chars,
        }
    }

    /// 启动一次生成运行，返回对外事件流的接收端
    pub fn generate(&self, params: GenerationParams) -> UnboundedReceiver<GenerationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run(params, tx).await;
        });
        rx
    }

    async fn run(&self, params: GenerationParams, tx: UnboundedSender<GenerationEvent>) {
        let generation_id = Uuid::new_v4().to_string();
        let mut translator = StreamTranslator::new(&generation_id, self.max_content_chars);

        let request_payload = serde_json::to_value(&params).unwrap_or(Value::Null);
        if let Err(e) = self.audit.insert_running(&generation_id, &request_payload) {
            tracing::error!(%generation_id, "audit insert failed: {}", e);
            send(&tx, translator.fail(format!("audit insert failed: {}", e)));
            return;
        }

        send(&tx, translator.start());

        let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();
        let deps = self.deps.clone();
        let engine = tokio::spawn(async move {
            let mut state = SharedState::new(params);
            let result = run_engine(&deps, &mut state, &engine_tx).await;
            (state, result)
        });

        while let Some(event) = engine_rx.recv().await {
            send(&tx, translator.handle(event));
        }

        let (state, result) = match engine.await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.settle_error(&generation_id, &mut translator, &tx, format!("engine task failed: {}", e));
                return;
            }
        };

        match result {
            Ok(()) => {
                let update = AuditUpdate {
                    matched_descriptors: serde_json::to_value(&state.cag_matches)
                        .unwrap_or(Value::Null),
                    routing_decision: serde_json::to_value(state.routing()).unwrap_or(Value::Null),
                    rag_results: serde_json::to_value(&state.rag_results).unwrap_or(Value::Null),
                    selected_template: state.selected_template.unwrap_or_default(),
                    resolved_prompt: state.resolved_prompt.unwrap_or_default(),
                    generated_resource: state.generated_resource.unwrap_or_default(),
                    step_timings: serde_json::to_value(translator.timings())
                        .unwrap_or(Value::Null),
                    token_usage: serde_json::to_value(translator.usage()).unwrap_or(Value::Null),
                };
                match self.audit.mark_completed(&generation_id, &update) {
                    Ok(()) => send(&tx, translator.finish()),
                    Err(e) => self.settle_error(
                        &generation_id,
                        &mut translator,
                        &tx,
                        format!("audit update failed: {}", e),
                    ),
                }
            }
            Err(e) => self.settle_error(&generation_id, &mut translator, &tx, e.to_string()),
        }
    }

    /// 失败终态：审计标错 + 单条错误事件
    fn settle_error(
        &self,
        generation_id: &str,
        translator: &mut StreamTranslator,
        tx: &UnboundedSender<GenerationEvent>,
        message: String,
    ) {
        if let Err(e) = self.audit.mark_error(generation_id, &message) {
            tracing::error!(generation_id, "audit error update failed: {}", e);
        }
        tracing::warn!(generation_id, "generation failed: {}", message);
        send(tx, translator.fail(message));
    }
}
