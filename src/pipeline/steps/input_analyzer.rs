//! 阶段 1：用快速模型把教师的自由文本请求解析为结构化字段
//!
//! LLM 输出不可解析时回退为直接取自请求字段的确定性默认值，绝不报错。

use serde_json::{json, Value};

use crate::llm::LlmClient;
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::{GenerationParams, ParsedInput, SharedState};
use crate::pipeline::steps::{strip_code_fence, usage_delta};

const SYSTEM: &str = "You are an educational request parser for the Australian Mathematics Curriculum. \
Parse the teacher's request and extract: topic, year_level, strand, intent, and keywords. \
Intent should be one of: instruction, practice, assessment, inquiry, planning. \
Keywords should be 3-5 key mathematical terms from the request.";

fn build_prompt(params: &GenerationParams) -> String {
    format!(
        "Parse this teacher's resource request:\n\n\
         Topic: {}\n\
         Year Level: {}\n\
         Strand: {}\n\
         Teaching Focus: {}\n\
         Resource Type: {}\n\
         Additional Context: {}\n\n\
         Return a JSON object with:\n\
         - \"topic\": the core mathematical topic (cleaned up)\n\
         - \"year_level\": the year level as stated\n\
         - \"strand\": the mathematical strand\n\
         - \"intent\": one of \"instruction\", \"practice\", \"assessment\", \"inquiry\", \"planning\"\n\
         - \"keywords\": list of 3-5 key mathematical terms\n\n\
         Return ONLY valid JSON.",
        params.topic,
        params.year_level,
        params.strand,
        params.teaching_focus,
        params.resource_type,
        params.additional_context,
    )
}

/// 解析 LLM 回复；围栏剥离后仍不可解析时回退
fn parse_response(content: &str, params: &GenerationParams) -> ParsedInput {
    let text = strip_code_fence(content);
    serde_json::from_str::<ParsedInput>(text).unwrap_or_else(|_| ParsedInput::fallback(params))
}

/// 执行阶段 1，返回摘要载荷（含 _token_usage 侧信道）
pub async fn run(state: &mut SharedState, fast_llm: &dyn LlmClient) -> Result<Value, PipelineError> {
    let prompt = build_prompt(&state.params);
    let before = fast_llm.token_usage();
    let content = fast_llm
        .complete(SYSTEM, &prompt)
        .await
        .map_err(PipelineError::Llm)?;
    let delta = usage_delta(before, fast_llm.token_usage());

    let parsed = parse_response(&content, &state.params);
    state.parsed_input = Some(parsed.clone());

    let mut summary = serde_json::to_value(&parsed).unwrap_or_else(|_| json!({}));
    if !delta.is_empty() {
        summary["_token_usage"] = serde_json::to_value(delta).unwrap_or(Value::Null);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::state::Intent;

    #[test]
    fn test_parse_valid_json() {
        let params = GenerationParams::new("fractions");
        let parsed = parse_response(
            r#"{"topic":"equivalent fractions","year_level":"Year 5","strand":"Number","intent":"practice","keywords":["fractions","denominator"]}"#,
            &params,
        );
        assert_eq!(parsed.topic, "equivalent fractions");
        assert_eq!(parsed.intent, Intent::Practice);
        assert_eq!(parsed.keywords.len(), 2);
    }

    #[test]
    fn test_parse_fenced_json() {
        let params = GenerationParams::new("fractions");
        let parsed = parse_response(
            "```json\n{\"topic\":\"t\",\"year_level\":\"Year 3\",\"strand\":\"Number\"}\n```",
            &params,
        );
        assert_eq!(parsed.year_level, "Year 3");
        // 缺省字段取默认
        assert_eq!(parsed.intent, Intent::Instruction);
    }

    #[test]
    fn test_malformed_falls_back_to_request() {
        let params = GenerationParams::new("fractions");
        let parsed = parse_response("I think the topic is about fractions!", &params);
        assert_eq!(parsed.topic, "fractions");
        assert_eq!(parsed.keywords, vec!["fractions".to_string()]);
    }

    #[tokio::test]
    async fn test_run_writes_state_and_summary() {
        let llm = MockLlmClient::new().with_reply(
            r#"{"topic":"fractions","year_level":"Year 5","strand":"Number","intent":"instruction","keywords":["fractions"]}"#,
        );
        let mut state = SharedState::new(GenerationParams::new("fractions"));
        let summary = run(&mut state, &llm).await.unwrap();

        assert!(state.parsed_input.is_some());
        assert_eq!(summary["intent"], "instruction");
        assert!(summary["keywords"].is_array());
        assert!(summary.get("_token_usage").is_some());
    }
}
