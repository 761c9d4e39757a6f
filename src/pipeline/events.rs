//! 流水线事件：对外事件流与引擎内部事件
//!
//! GenerationEvent 是客户端消费的有序单向事件流（序列化为 JSON，
//! tag = "type"）。EngineEvent 是引擎侧的松散事件：生命周期标签
//! 可能错标、缺失或重复，内容通道可能夹带阶段的结构化 JSON 产物，
//! 由 StreamTranslator 统一重建为可信的 GenerationEvent 序列。

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::llm::TokenCounts;

/// 六个阶段的规范名，下标即阶段序
pub const STEP_NAMES: [&str; 6] = [
    "input_analyzer",
    "curriculum_matcher",
    "teaching_focus_router",
    "pedagogy_retriever",
    "template_resolver",
    "resource_generator",
];

/// 对外事件（可序列化为 JSON 供 SSE 等前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// 运行开始
    GenerationStarted { generation_id: String },
    /// 阶段开始（index 从 1 计）
    StepStarted { step: String, index: usize },
    /// 阶段完成
    StepCompleted {
        step: String,
        index: usize,
        duration_ms: u64,
    },
    /// 课程匹配明细（最多前 5 条）
    CagMatches { matches: Vec<Value> },
    /// 路由决策明细
    RoutingDecision {
        teaching_path: String,
        year_band: String,
    },
    /// 检索结果明细
    RagResults {
        num_chunks: usize,
        results: Vec<Value>,
    },
    /// 模板选择明细
    TemplateSelected {
        name: String,
        variables_resolved: usize,
    },
    /// 解析后的最终提示词
    ResolvedPrompt { prompt: String },
    /// 生成内容的一小段（流式输出）
    ContentChunk { content: String },
    /// Token 用量汇总（各阶段 + 合计）
    TokenUsage {
        steps: BTreeMap<String, TokenCounts>,
        total_input: u64,
        total_output: u64,
        total: u64,
    },
    /// 运行完成（终态）
    GenerationCompleted {
        generation_id: String,
        total_duration_ms: u64,
    },
    /// 运行失败（终态）
    Error {
        message: String,
        generation_id: String,
    },
}

/// 单阶段 token 用量（引擎侧信道）
#[derive(Debug, Clone)]
pub struct StepUsage {
    pub step: String,
    pub counts: TokenCounts,
}

/// 引擎事件：生命周期标签、内容、用量三个通道都可能缺席
#[derive(Debug, Clone, Default)]
pub struct EngineEvent {
    /// 生命周期标签（不可靠：可能错标、缺失或重复）
    pub kind: Option<String>,
    /// 内容片段；可能是真正的生成文本，也可能是阶段的结构化 JSON 产物
    pub content: Option<String>,
    /// 用量指标
    pub metrics: Option<StepUsage>,
}

impl EngineEvent {
    pub fn step_started() -> Self {
        Self {
            kind: Some("workflow_step_started".to_string()),
            ..Default::default()
        }
    }

    pub fn step_completed() -> Self {
        Self {
            kind: Some("workflow_step_completed".to_string()),
            ..Default::default()
        }
    }

    /// 路由选择信号（引擎对阶段 3 额外发出的标签）
    pub fn router(path_label: &str) -> Self {
        Self {
            kind: Some(format!("router_path_selected:{}", path_label)),
            ..Default::default()
        }
    }

    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn metrics(step: &str, counts: TokenCounts) -> Self {
        Self {
            metrics: Some(StepUsage {
                step: step.to_string(),
                counts,
            }),
            ..Default::default()
        }
    }
}
