//! 阶段 5：模板选择与变量解析，产出最终生成提示词
//!
//! 变量来自前序阶段产物与课程参考表点查；任何缺失都注入固定哨兵值，
//! 占位符替换用字面 {key} 替换（无转义、无嵌套）。无匹配模板时回退为
//! 内置短提示词，并在摘要中标注 name = "none"。

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::pipeline::error::PipelineError;
use crate::pipeline::state::SharedState;
use crate::pipeline::steps::truncate_chars;
use crate::store::{CurriculumStore, TemplateStore};

const NA: &str = "N/A";
const NO_RAG_CONTEXT: &str = "No additional pedagogical context retrieved.";
const NO_ADDITIONAL_CONTEXT: &str = "No additional context provided.";

/// 从共享状态与参考表收集模板变量（键集固定）
fn collect_variables(
    state: &SharedState,
    store: &dyn CurriculumStore,
) -> Result<BTreeMap<String, String>, PipelineError> {
    let parsed = state.parsed();
    let routing = state.routing();
    let mut vars = BTreeMap::new();

    let resource_type_name = store
        .resource_type_by_slug(&state.params.resource_type)?
        .map(|r| r.name)
        .unwrap_or_else(|| state.params.resource_type.clone());
    vars.insert("resource_type_name".to_string(), resource_type_name);
    vars.insert("year_level".to_string(), parsed.year_level.clone());
    vars.insert("topic".to_string(), parsed.topic.clone());
    vars.insert("strand".to_string(), parsed.strand.clone());

    let teaching_focus_name = store
        .teaching_focus_by_slug(&routing.teaching_path)?
        .map(|t| t.name)
        .unwrap_or_else(|| routing.teaching_path.clone());
    vars.insert("teaching_focus".to_string(), teaching_focus_name);

    // 首选描述符及其附属参考数据
    let descriptor = match &state.primary_descriptor_code {
        Some(code) => store.descriptor_by_code(code)?,
        None => None,
    };
    match descriptor {
        Some(d) => {
            vars.insert(
                "content_descriptor".to_string(),
                format!("[{}] {}", d.code, d.text),
            );
            let elaborations = store.elaborations_for(&d.code)?;
            let elaboration_text = if elaborations.is_empty() {
                NA.to_string()
            } else {
                elaborations
                    .iter()
                    .map(|e| format!("- {}", e.text))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            vars.insert("elaborations".to_string(), elaboration_text);
        }
        None => {
            // 合成匹配（如 AC9M0X00）查不到描述符行
            let fallback_text = state
                .cag_matches
                .first()
                .map(|m| format!("[{}] {}", m.code, m.text))
                .unwrap_or_else(|| NA.to_string());
            vars.insert("content_descriptor".to_string(), fallback_text);
            vars.insert("elaborations".to_string(), NA.to_string());
        }
    }

    let standards = store.achievement_standards_for(&routing.year_level_code)?;
    let standard_text = if standards.is_empty() {
        NA.to_string()
    } else {
        standards
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    };
    vars.insert("achievement_standard".to_string(), standard_text);

    let rag_context = if state.rag_context.is_empty() {
        NO_RAG_CONTEXT.to_string()
    } else {
        state.rag_context.clone()
    };
    vars.insert("rag_context".to_string(), rag_context);

    let additional = if state.params.additional_context.is_empty() {
        NO_ADDITIONAL_CONTEXT.to_string()
    } else {
        state.params.additional_context.clone()
    };
    vars.insert("additional_context".to_string(), additional);

    Ok(vars)
}

/// 字面占位符替换：逐键替换所有 {key} 出现处
fn substitute(template_body: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = template_body.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

/// 执行阶段 5，返回摘要载荷
pub fn run(
    state: &mut SharedState,
    templates: &dyn TemplateStore,
    store: &dyn CurriculumStore,
) -> Result<Value, PipelineError> {
    let routing = state.routing();
    let template = templates.select(
        &state.params.resource_type,
        &routing.teaching_path,
        routing.year_band.as_str(),
    )?;

    let vars = collect_variables(state, store)?;

    let summary = match template {
        Some(t) => {
            let body = substitute(&t.template_body, &vars);
            let resolved = format!(
                "**Pedagogical Guidance:**\n{}\n\n{}",
                routing.pedagogy_notes, body
            );
            let variables_resolved = vars.len();

            state.selected_template = Some(t.name.clone());
            state.template_variables = vars
                .into_iter()
                .map(|(k, v)| (k, truncate_chars(&v, 100)))
                .collect();
            state.resolved_prompt = Some(resolved.clone());

            json!({
                "name": t.name,
                "priority": t.priority,
                "variables_resolved": variables_resolved,
                "variables": serde_json::to_value(&state.template_variables).unwrap_or(Value::Null),
                "resolved_prompt": truncate_chars(&resolved, 5000),
            })
        }
        None => {
            let parsed = state.parsed();
            let resolved = format!(
                "Generate a {} resource about {}",
                state.params.resource_type, parsed.topic
            );

            state.selected_template = Some("none".to_string());
            state.template_variables = BTreeMap::new();
            state.resolved_prompt = Some(resolved.clone());

            json!({
                "name": "none",
                "error": "No template found",
                "variables_resolved": 0,
                "resolved_prompt": resolved,
            })
        }
    };
    Ok(summary)
}
