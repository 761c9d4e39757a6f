//! 流翻译器：把引擎的松散事件流重建为可信的对外事件序列
//!
//! 引擎侧的生命周期标签不可靠（可能错标、缺失或重复），阶段摘要 JSON
//! 混在内容通道里。翻译器自持阶段计数器作为唯一事实来源：
//! - 生命周期信号只推进计数器，重复/多余信号忽略；
//! - 内容片段先按 JSON 键形识别为阶段摘要（每种键形至多采纳一次），
//!   识别成功转成明细事件，识别失败但带摘要痕迹的片段整体压制；
//! - 超长片段视为引擎末尾的整份重复载荷，直接丢弃；
//! - 终态（完成/失败）之后不再产出任何事件。

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use serde_json::Value;

use crate::llm::TokenCounts;
use crate::pipeline::events::{EngineEvent, GenerationEvent, STEP_NAMES};

/// 阶段摘要的 JSON 键形（识别即归属到对应阶段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Shape {
    ParsedInput,
    CagMatches,
    RoutingDecision,
    RagResults,
    TemplateResolution,
}

impl Shape {
    /// 所属阶段下标（0 起）
    fn stage(&self) -> usize {
        match self {
            Shape::ParsedInput => 0,
            Shape::CagMatches => 1,
            Shape::RoutingDecision => 2,
            Shape::RagResults => 3,
            Shape::TemplateResolution => 4,
        }
    }

    /// 完整 JSON 解析后的键形判定；非对象或键形不符返回 None
    fn classify(text: &str) -> Option<(Shape, Value)> {
        let value: Value = serde_json::from_str(text).ok()?;
        let obj = value.as_object()?;
        let shape = if obj.contains_key("keywords") && obj.contains_key("intent") {
            Shape::ParsedInput
        } else if obj.contains_key("matches") {
            Shape::CagMatches
        } else if obj.contains_key("teaching_path") {
            Shape::RoutingDecision
        } else if obj.contains_key("num_chunks") {
            Shape::RagResults
        } else if obj.contains_key("variables_resolved") {
            Shape::TemplateResolution
        } else {
            return None;
        };
        Some((shape, value))
    }
}

/// 解析失败的片段若带这些带引号的键名痕迹，视为残缺摘要并压制
const SUMMARY_TELLTALES: [&str; 6] = [
    "\"keywords\"",
    "\"intent\"",
    "\"matches\"",
    "\"teaching_path\"",
    "\"num_chunks\"",
    "\"variables_resolved\"",
];

fn looks_like_summary(text: &str) -> bool {
    SUMMARY_TELLTALES.iter().any(|t| text.contains(t))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Streaming,
    Completed,
    Failed,
}

/// 引擎事件 → 对外事件的有状态翻译器（单次运行单实例）
pub struct StreamTranslator {
    generation_id: String,
    phase: Phase,
    /// 下一个待开始/待完成阶段的下标（自持计数器，不信任引擎标签）
    step_index: usize,
    in_step: bool,
    step_timer: Option<Instant>,
    run_timer: Instant,
    seen_shapes: HashSet<Shape>,
    /// 当前阶段内识别出的明细事件，在 step_completed 之后统一放出
    pending_details: Vec<GenerationEvent>,
    usage: BTreeMap<String, TokenCounts>,
    timings: BTreeMap<String, u64>,
    max_content_chars: usize,
}

impl StreamTranslator {
    pub fn new(generation_id: impl Into<String>, max_content_chars: usize) -> Self {
        Self {
            generation_id: generation_id.into(),
            phase: Phase::NotStarted,
            step_index: 0,
            in_step: false,
            step_timer: None,
            run_timer: Instant::now(),
            seen_shapes: HashSet::new(),
            pending_details: Vec::new(),
            usage: BTreeMap::new(),
            timings: BTreeMap::new(),
            max_content_chars,
        }
    }

    /// 宣告运行开始
    pub fn start(&mut self) -> Vec<GenerationEvent> {
        if self.phase != Phase::NotStarted {
            return Vec::new();
        }
        self.phase = Phase::Streaming;
        self.run_timer = Instant::now();
        vec![GenerationEvent::GenerationStarted {
            generation_id: self.generation_id.clone(),
        }]
    }

    /// 翻译一条引擎事件；终态之后恒为空
    pub fn handle(&mut self, event: EngineEvent) -> Vec<GenerationEvent> {
        if matches!(self.phase, Phase::Completed | Phase::Failed) {
            return Vec::new();
        }
        if self.phase == Phase::NotStarted {
            self.phase = Phase::Streaming;
        }

        let mut out = Vec::new();

        if let Some(metric) = event.metrics {
            // 首报为准
            self.usage.entry(metric.step).or_insert(metric.counts);
        }

        if let Some(kind) = event.kind.as_deref() {
            if kind == "workflow_step_started" || kind.starts_with("router_path_selected") {
                out.extend(self.begin_step());
            } else if kind == "workflow_step_completed" {
                out.extend(self.complete_step());
            }
            // 其余标签不认识，忽略
        }

        if let Some(content) = event.content {
            out.extend(self.handle_content(content));
        }

        out
    }

    /// 运行成功收尾：用量汇总 + 完成事件，进入终态
    pub fn finish(&mut self) -> Vec<GenerationEvent> {
        if matches!(self.phase, Phase::Completed | Phase::Failed) {
            return Vec::new();
        }
        let mut out = Vec::new();
        if self.in_step {
            out.extend(self.complete_step());
        }
        if !self.usage.is_empty() {
            let total = self.total_usage();
            out.push(GenerationEvent::TokenUsage {
                steps: self.usage.clone(),
                total_input: total.input_tokens,
                total_output: total.output_tokens,
                total: total.total_tokens,
            });
        }
        out.push(GenerationEvent::GenerationCompleted {
            generation_id: self.generation_id.clone(),
            total_duration_ms: self.run_timer.elapsed().as_millis() as u64,
        });
        self.phase = Phase::Completed;
        out
    }

    /// 运行失败收尾：单条错误事件，进入终态
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<GenerationEvent> {
        if matches!(self.phase, Phase::Completed | Phase::Failed) {
            return Vec::new();
        }
        self.phase = Phase::Failed;
        vec![GenerationEvent::Error {
            message: message.into(),
            generation_id: self.generation_id.clone(),
        }]
    }

    /// 各阶段耗时（毫秒），审计落库用
    pub fn timings(&self) -> &BTreeMap<String, u64> {
        &self.timings
    }

    /// 各阶段 token 用量，审计落库用
    pub fn usage(&self) -> &BTreeMap<String, TokenCounts> {
        &self.usage
    }

    pub fn total_usage(&self) -> TokenCounts {
        let input = self.usage.values().map(|c| c.input_tokens).sum();
        let output = self.usage.values().map(|c| c.output_tokens).sum();
        TokenCounts::new(input, output)
    }

    fn begin_step(&mut self) -> Vec<GenerationEvent> {
        // 已在阶段内或六阶段已走完：重复/多余的开始信号，忽略
        if self.in_step || self.step_index >= STEP_NAMES.len() {
            return Vec::new();
        }
        self.in_step = true;
        self.step_timer = Some(Instant::now());
        vec![GenerationEvent::StepStarted {
            step: STEP_NAMES[self.step_index].to_string(),
            index: self.step_index + 1,
        }]
    }

    fn complete_step(&mut self) -> Vec<GenerationEvent> {
        if self.step_index >= STEP_NAMES.len() {
            return Vec::new();
        }
        let mut out = Vec::new();
        // 缺失的开始信号就地补发
        if !self.in_step {
            out.extend(self.begin_step());
        }
        let step = STEP_NAMES[self.step_index];
        let duration_ms = self
            .step_timer
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.timings.insert(step.to_string(), duration_ms);
        out.push(GenerationEvent::StepCompleted {
            step: step.to_string(),
            index: self.step_index + 1,
            duration_ms,
        });
        out.append(&mut self.pending_details);
        self.in_step = false;
        self.step_index += 1;
        out
    }

    fn handle_content(&mut self, content: String) -> Vec<GenerationEvent> {
        if let Some((shape, payload)) = Shape::classify(&content) {
            return self.handle_shape(shape, payload);
        }
        if looks_like_summary(&content) {
            tracing::debug!("suppressing malformed summary fragment ({} chars)", content.len());
            return Vec::new();
        }
        // 超长片段：引擎在流结束后重复上报的整份文本
        if content.chars().count() > self.max_content_chars {
            tracing::debug!("dropping oversized content fragment ({} chars)", content.len());
            return Vec::new();
        }
        vec![GenerationEvent::ContentChunk { content }]
    }

    fn handle_shape(&mut self, shape: Shape, payload: Value) -> Vec<GenerationEvent> {
        // 每种键形至多采纳一次
        if !self.seen_shapes.insert(shape) {
            return Vec::new();
        }
        if let Some(counts) = payload
            .get("_token_usage")
            .and_then(|v| serde_json::from_value::<TokenCounts>(v.clone()).ok())
        {
            self.usage
                .entry(STEP_NAMES[shape.stage()].to_string())
                .or_insert(counts);
        }

        let details = detail_events(shape, &payload);
        let stage = shape.stage();

        if self.in_step && self.step_index == stage {
            // 阶段进行中：明细押后到本阶段完成事件之后
            self.pending_details.extend(details);
            Vec::new()
        } else if !self.in_step && self.step_index <= stage {
            // 生命周期信号缺失：补发至该阶段为止的开始/完成对
            let mut out = Vec::new();
            while self.step_index <= stage {
                out.extend(self.begin_step());
                out.extend(self.complete_step());
            }
            out.extend(details);
            out
        } else {
            // 阶段已过（或身处其他阶段）：直接放出
            details
        }
    }
}

/// 从已识别的摘要载荷构建对外明细事件
fn detail_events(shape: Shape, payload: &Value) -> Vec<GenerationEvent> {
    match shape {
        // 阶段 1 无对外明细事件
        Shape::ParsedInput => Vec::new(),
        Shape::CagMatches => {
            let matches = payload["matches"]
                .as_array()
                .map(|a| a.iter().take(5).cloned().collect())
                .unwrap_or_default();
            vec![GenerationEvent::CagMatches { matches }]
        }
        Shape::RoutingDecision => vec![GenerationEvent::RoutingDecision {
            teaching_path: payload["teaching_path"].as_str().unwrap_or_default().to_string(),
            year_band: payload["year_band"].as_str().unwrap_or_default().to_string(),
        }],
        Shape::RagResults => vec![GenerationEvent::RagResults {
            num_chunks: payload["num_chunks"].as_u64().unwrap_or(0) as usize,
            results: payload["results"]
                .as_array()
                .cloned()
                .unwrap_or_default(),
        }],
        Shape::TemplateResolution => {
            let mut events = vec![GenerationEvent::TemplateSelected {
                name: payload["name"].as_str().unwrap_or("none").to_string(),
                variables_resolved: payload["variables_resolved"].as_u64().unwrap_or(0) as usize,
            }];
            if let Some(prompt) = payload["resolved_prompt"].as_str() {
                events.push(GenerationEvent::ResolvedPrompt {
                    prompt: prompt.to_string(),
                });
            }
            events
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn translator() -> StreamTranslator {
        let mut t = StreamTranslator::new("g-1", 200);
        t.start();
        t
    }

    fn kinds(events: &[GenerationEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_lifecycle_pair_counts_steps() {
        let mut t = translator();
        let mut out = Vec::new();
        out.extend(t.handle(EngineEvent::step_started()));
        out.extend(t.handle(EngineEvent::step_completed()));
        out.extend(t.handle(EngineEvent::step_started()));
        out.extend(t.handle(EngineEvent::step_completed()));

        assert_eq!(
            kinds(&out),
            vec!["step_started", "step_completed", "step_started", "step_completed"]
        );
        let json: Vec<Value> = out.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
        assert_eq!(json[0]["step"], "input_analyzer");
        assert_eq!(json[0]["index"], 1);
        assert_eq!(json[2]["step"], "curriculum_matcher");
        assert_eq!(json[2]["index"], 2);
    }

    #[test]
    fn test_duplicate_started_signal_ignored() {
        let mut t = translator();
        assert_eq!(t.handle(EngineEvent::step_started()).len(), 1);
        // 阶段 3 的路由标签属重复开始信号
        assert!(t.handle(EngineEvent::router("explicit_instruction_enrichment")).is_empty());
        assert!(t.handle(EngineEvent::step_started()).is_empty());
    }

    #[test]
    fn test_completed_without_started_synthesizes_started() {
        let mut t = translator();
        let out = t.handle(EngineEvent::step_completed());
        assert_eq!(kinds(&out), vec!["step_started", "step_completed"]);
    }

    #[test]
    fn test_shape_recognized_and_details_after_completion() {
        let mut t = translator();
        t.handle(EngineEvent::step_started());
        t.handle(EngineEvent::step_completed());
        t.handle(EngineEvent::step_started());

        let summary = json!({
            "matches": [{"code": "AC9M5N06"}, {"code": "AC9M5N03"}],
        });
        // 阶段内识别：明细押后
        assert!(t.handle(EngineEvent::content(summary.to_string())).is_empty());

        let out = t.handle(EngineEvent::step_completed());
        assert_eq!(kinds(&out), vec!["step_completed", "cag_matches"]);
    }

    #[test]
    fn test_shape_adopted_at_most_once() {
        let mut t = translator();
        let summary = json!({"matches": []}).to_string();
        let first = t.handle(EngineEvent::content(summary.clone()));
        // 无生命周期信号：补发阶段 1、2 的开始/完成对，再放明细
        assert_eq!(
            kinds(&first),
            vec![
                "step_started",
                "step_completed",
                "step_started",
                "step_completed",
                "cag_matches"
            ]
        );
        // 同键形第二次出现：整体压制
        assert!(t.handle(EngineEvent::content(summary)).is_empty());
    }

    #[test]
    fn test_template_shape_emits_selected_and_prompt() {
        let mut t = translator();
        let summary = json!({
            "name": "none",
            "error": "No template found",
            "variables_resolved": 0,
            "resolved_prompt": "Generate a worksheet resource about fractions",
        });
        let out = t.handle(EngineEvent::content(summary.to_string()));
        let types = kinds(&out);
        assert!(types.contains(&"template_selected".to_string()));
        assert!(types.contains(&"resolved_prompt".to_string()));
        let json: Vec<Value> = out.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
        let selected = json.iter().find(|v| v["type"] == "template_selected").unwrap();
        assert_eq!(selected["name"], "none");
    }

    #[test]
    fn test_malformed_summary_fragment_suppressed() {
        let mut t = translator();
        let out = t.handle(EngineEvent::content(r#"{"matches": [truncated"#));
        assert!(out.is_empty());
    }

    #[test]
    fn test_oversized_fragment_dropped() {
        let mut t = translator();
        let out = t.handle(EngineEvent::content("x".repeat(201)));
        assert!(out.is_empty());
        let out = t.handle(EngineEvent::content("a short real fragment"));
        assert_eq!(kinds(&out), vec!["content_chunk"]);
    }

    #[test]
    fn test_usage_aggregation_first_wins() {
        let mut t = translator();
        t.handle(EngineEvent::metrics("resource_generator", TokenCounts::new(100, 50)));
        t.handle(EngineEvent::metrics("resource_generator", TokenCounts::new(999, 999)));
        t.handle(EngineEvent::content(
            json!({
                "keywords": ["fractions"],
                "intent": "instruction",
                "_token_usage": {"input_tokens": 10, "output_tokens": 5, "total_tokens": 15},
            })
            .to_string(),
        ));

        let total = t.total_usage();
        assert_eq!(total.input_tokens, 110);
        assert_eq!(total.output_tokens, 55);

        let out = t.finish();
        let types = kinds(&out);
        assert!(types.contains(&"token_usage".to_string()));
        assert!(types.contains(&"generation_completed".to_string()));
    }

    #[test]
    fn test_terminal_states_are_silent() {
        let mut t = translator();
        let fail = t.fail("boom");
        assert_eq!(kinds(&fail), vec!["error"]);
        assert!(t.handle(EngineEvent::step_started()).is_empty());
        assert!(t.handle(EngineEvent::content("more text")).is_empty());
        assert!(t.finish().is_empty());
        assert!(t.fail("again").is_empty());
    }

    #[test]
    fn test_finish_after_finish_is_silent() {
        let mut t = translator();
        assert!(!t.finish().is_empty());
        assert!(t.finish().is_empty());
    }

    #[test]
    fn test_timings_recorded_per_step() {
        let mut t = translator();
        t.handle(EngineEvent::step_started());
        t.handle(EngineEvent::step_completed());
        assert!(t.timings().contains_key("input_analyzer"));
    }
}
